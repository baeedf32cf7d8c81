use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Message header: magic (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Magic bytes: "SC" (0x53 0x43).
pub const MAGIC: [u8; 2] = [0x53, 0x43];

/// Default maximum message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// Encode one text message into the stream format.
///
/// ```text
/// ┌──────────────┬───────────┬─────────────────────┐
/// │ Magic (2B)   │ Length    │ UTF-8 text          │
/// │ 0x53 0x43    │ (4B LE)   │ (Length bytes)      │
/// └──────────────┴───────────┴─────────────────────┘
/// ```
pub fn encode_message(text: &str, dst: &mut BytesMut) -> Result<()> {
    let len = u32::try_from(text.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: text.len(),
        max: u32::MAX as usize,
    })?;
    dst.reserve(HEADER_SIZE + text.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(len);
    dst.put_slice(text.as_bytes());
    Ok(())
}

/// Decode one text message from the front of `src`.
///
/// Returns `Ok(None)` until a complete message is buffered. A complete
/// message is always consumed, even when its payload turns out not to be
/// UTF-8, so a bad message never wedges the stream.
pub fn decode_message(src: &mut BytesMut, max_message: usize) -> Result<Option<String>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    if src[..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&src[2..HEADER_SIZE]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > max_message {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_message,
        });
    }
    if src.len() < HEADER_SIZE + len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(len);
    String::from_utf8(body.to_vec())
        .map(Some)
        .map_err(|_| FrameError::InvalidUtf8 { len })
}

/// Limits and timeouts for a message stream.
#[derive(Debug, Clone)]
pub struct MessageConfig {
    /// Maximum message size in bytes. Default: 16 MiB.
    pub max_message_size: usize,
    /// Read timeout for blocking reads. `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking writes.
    pub write_timeout: Option<Duration>,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE,
            read_timeout: None,
            write_timeout: Some(Duration::from_secs(30)),
        }
    }
}
