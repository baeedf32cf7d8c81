/// Errors that can occur while framing or parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The message header does not start with the expected magic.
    #[error("invalid message magic (expected 0x5343 \"SC\")")]
    InvalidMagic,

    /// The message exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A complete message was read but its payload is not UTF-8.
    ///
    /// The message has been consumed; the stream remains usable.
    #[error("message is not valid UTF-8 ({len} bytes)")]
    InvalidUtf8 { len: usize },

    /// A text message does not follow the `type,name,id[,payload]` grammar.
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },

    /// An I/O error occurred while reading or writing messages.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete message was received.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Whether the stream can keep delivering messages after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidUtf8 { .. } | Self::Malformed { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
