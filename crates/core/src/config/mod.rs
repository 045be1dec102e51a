use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{symbol::CodeFamily, timeline::PlaybackSettings, FramecastError, Result};

/// Recommended chunk size bounds; values outside still work but produce a warning.
pub const RECOMMENDED_CHUNK_SIZE: (usize, usize) = (10, 500);
/// Recommended frame rate bounds in frames per second.
pub const RECOMMENDED_FRAME_RATE: (u32, u32) = (1, 30);

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// Reads a TOML configuration file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| FramecastError::Config(err.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| FramecastError::Config(err.to_string()))
    }

    /// Rejects values the pipeline cannot run with and warns about values
    /// outside the recommended ranges.
    pub fn validate(&self) -> Result<()> {
        let stream = &self.stream;
        if stream.chunk_size == 0 {
            return Err(FramecastError::InvalidChunkSize(stream.chunk_size));
        }
        stream.playback_settings().validate()?;
        if self.render.target_size == 0 {
            return Err(FramecastError::InvalidTargetSize);
        }

        let (min_chunk, max_chunk) = RECOMMENDED_CHUNK_SIZE;
        if !(min_chunk..=max_chunk).contains(&stream.chunk_size) {
            tracing::warn!(
                chunk_size = stream.chunk_size,
                "chunk size outside the recommended {min_chunk}..={max_chunk} range"
            );
        }
        let (min_rate, max_rate) = RECOMMENDED_FRAME_RATE;
        if !(min_rate..=max_rate).contains(&stream.frame_rate) {
            tracing::warn!(
                frame_rate = stream.frame_rate,
                "frame rate outside the recommended {min_rate}..={max_rate} range"
            );
        }
        Ok(())
    }
}

/// Chunking and playback parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub chunk_size: usize,
    pub frame_rate: u32,
    pub loop_playback: bool,
    pub enabled: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            frame_rate: 5,
            loop_playback: true,
            enabled: true,
        }
    }
}

impl StreamConfig {
    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            frame_rate: self.frame_rate,
            loop_playback: self.loop_playback,
            enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub family: CodeFamily,
    /// Edge length in pixels the symbol is scaled towards.
    pub target_size: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            family: CodeFamily::Qr,
            target_size: 256,
        }
    }
}
