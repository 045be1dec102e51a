use crate::symbol::CodeFamily;

/// Result alias that carries the custom [`FramecastError`] type.
pub type Result<T> = std::result::Result<T, FramecastError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum FramecastError {
    /// Free-form message for conditions that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    #[error("chunk size must be at least 1 (got {0})")]
    InvalidChunkSize(usize),
    #[error("frame rate must be at least 1 frame per second (got {0})")]
    InvalidFrameRate(u32),
    #[error("render target size must be at least 1 pixel")]
    InvalidTargetSize,
    /// The envelope could not be serialised to or parsed from its JSON payload.
    #[error("cannot parse chunk: {0}")]
    Envelope(#[from] serde_json::Error),
    #[error("envelope data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("envelope data is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    /// The envelope list has gaps, duplicates or mixes stream identifiers.
    #[error("cannot reassemble stream: {0}")]
    Reassembly(String),
    /// The symbol encoder rejected the payload, usually because it exceeds
    /// the capacity of the chosen code family.
    #[error("{family} encoder failed: {message}")]
    Symbol { family: CodeFamily, message: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("image output failed: {0}")]
    Image(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl FramecastError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn symbol(family: CodeFamily, message: impl ToString) -> Self {
        Self::Symbol {
            family,
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_and_symbol_failures_render_readably() {
        let err = FramecastError::msg("playback task has stopped");
        assert!(matches!(err, FramecastError::Message(_)));
        assert_eq!(err.to_string(), "playback task has stopped");

        let err = FramecastError::symbol(CodeFamily::Aztec, "payload too large");
        assert_eq!(err.to_string(), "aztec encoder failed: payload too large");
    }
}
