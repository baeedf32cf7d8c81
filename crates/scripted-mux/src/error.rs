/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] scripted_transport::TransportError),

    /// Message framing error.
    #[error("frame error: {0}")]
    Frame(#[from] scripted_frame::FrameError),

    /// The channel has not finished opening; nothing was sent.
    #[error("channel {name}#{id} is not open")]
    ChannelNotOpen { name: String, id: u64 },

    /// The channel has been closed by either endpoint.
    #[error("channel {name}#{id} is closed")]
    ChannelClosed { name: String, id: u64 },

    /// The physical connection is gone.
    #[error("physical connection closed")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, MuxError>;
