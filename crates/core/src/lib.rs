//! Core library for Framecast, an animated barcode streamer.
//!
//! Text is cut into self-describing envelopes ([`chunker`]), played back one
//! at a time by a timer-driven state machine ([`timeline`], [`playback`]) and
//! drawn as an optical code ([`symbol`], [`render`]) that a camera can capture
//! frame by frame.

pub mod chunker;
pub mod config;
pub mod error;
pub mod playback;
pub mod render;
pub mod symbol;
pub mod timeline;

pub use chunker::{chunk, ChunkSet, Envelope, StreamId};
pub use config::{AppConfig, RenderConfig, StreamConfig};
pub use error::{FramecastError, Result};
pub use playback::{FrameSnapshot, PlaybackCore, Player, PlayerCommand};
pub use render::{FrameView, PixelBuffer, SymbolRenderer};
pub use symbol::{BitMatrix, CodeFamily, SymbolEncoder};
pub use timeline::{PlaybackSettings, PlaybackState, Scheduler, TickOutcome, TimerToken};
