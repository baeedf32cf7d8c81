use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use scripted_transport::IpcStream;

use crate::codec::{decode_message, MessageConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete text messages from any `Read` stream.
///
/// Partial reads are buffered internally; callers always receive whole
/// messages.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: MessageConfig,
}

impl<T: Read> MessageReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, MessageConfig::default())
    }

    pub fn with_config(inner: T, config: MessageConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at EOF. A
    /// [`FrameError::InvalidUtf8`] error leaves the reader positioned at the
    /// following message.
    pub fn read_message(&mut self) -> Result<String> {
        loop {
            if let Some(text) = decode_message(&mut self.buf, self.config.max_message_size)? {
                return Ok(text);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };
            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &MessageConfig {
        &self.config
    }
}

impl MessageReader<IpcStream> {
    /// Wrap an `IpcStream`, applying the configured read timeout to it.
    pub fn for_stream(inner: IpcStream, config: MessageConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(crate::writer::transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}
