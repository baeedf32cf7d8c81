use std::fmt;
use std::io;

use scripted_frame::FrameError;
use scripted_mux::MuxError;
use scripted_search::SearchError;
use scripted_transport::TransportError;

// Process exit codes. 124 matches timeout(1).
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        io::ErrorKind::InvalidData => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. }
        | FrameError::InvalidUtf8 { .. }
        | FrameError::Malformed { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn mux_error(context: &str, err: MuxError) -> CliError {
    match err {
        MuxError::Transport(err) => transport_error(context, err),
        MuxError::Frame(err) => frame_error(context, err),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

pub fn search_error(context: &str, err: SearchError) -> CliError {
    match err {
        SearchError::Mux(err) => mux_error(context, err),
        SearchError::Io(err) => io_error(context, err),
        SearchError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        SearchError::Json(_) | SearchError::Protocol(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn connect_failures_map_through_layers() {
        let err = SearchError::Mux(MuxError::Transport(TransportError::Connect {
            path: "/tmp/missing.sock".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        }));
        assert_eq!(search_error("open failed", err).code, FAILURE);
    }

    #[test]
    fn search_timeout_is_timeout_code() {
        let err = search_error("search failed", SearchError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("search failed: "));
    }

    #[test]
    fn closed_channels_are_plain_failures() {
        let err = mux_error(
            "send failed",
            MuxError::ChannelClosed {
                name: "echo".into(),
                id: 1,
            },
        );
        assert_eq!(err.code, FAILURE);
        assert_eq!(
            frame_error("read", FrameError::InvalidUtf8 { len: 3 }).code,
            DATA_INVALID
        );
    }
}
