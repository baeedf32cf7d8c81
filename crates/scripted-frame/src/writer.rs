use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use scripted_transport::{IpcStream, TransportError};

use crate::codec::{encode_message, MessageConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete text messages to any `Write` stream.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
    config: MessageConfig,
}

impl<T: Write> MessageWriter<T> {
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

    /// Encode and write one message, then flush (blocking).
    pub fn send(&mut self, text: &str) -> Result<()> {
        if text.len() > self.config.max_message_size {
            return Err(FrameError::PayloadTooLarge {
                size: text.len(),
                max: self.config.max_message_size,
            });
        }

        self.buf.clear();
        encode_message(text, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl MessageWriter<IpcStream> {
    /// Wrap an `IpcStream`, applying the configured write timeout to it.
    pub fn for_stream(inner: IpcStream, config: MessageConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: TransportError) -> FrameError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            FrameError::Io(source)
        }
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_message;

    fn written(writer: MessageWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn writes_decodable_messages() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::new()));
        writer.send("sub,echo,0").unwrap();
        writer.send("msg,echo,0,a,b,c").unwrap();

        let mut wire = written(writer);
        assert_eq!(
            decode_message(&mut wire, usize::MAX).unwrap().as_deref(),
            Some("sub,echo,0")
        );
        assert_eq!(
            decode_message(&mut wire, usize::MAX).unwrap().as_deref(),
            Some("msg,echo,0,a,b,c")
        );
    }

    #[test]
    fn refuses_oversized_message() {
        let cfg = MessageConfig {
            max_message_size: 4,
            ..MessageConfig::default()
        };
        let mut writer = MessageWriter::with_config(Cursor::new(Vec::new()), cfg);
        let err = writer.send("oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 9, max: 4 }));
        assert!(written(writer).is_empty(), "nothing may reach the stream");
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = MessageWriter::new(Closed);
        assert!(matches!(
            writer.send("x"),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn interrupted_write_is_retried() {
        let mut writer = MessageWriter::new(InterruptFirst {
            interrupted: false,
            data: Vec::new(),
        });
        writer.send("retry").unwrap();

        let mut wire = BytesMut::from(writer.into_inner().data.as_slice());
        assert_eq!(
            decode_message(&mut wire, usize::MAX).unwrap().as_deref(),
            Some("retry")
        );
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptFirst {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptFirst {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
