//! Framing for the Scripted channel multiplexer.
//!
//! Two layers of framing live here:
//!
//! - **Messages**: a physical connection carries discrete UTF-8 text
//!   messages. On a byte stream each message is prefixed with a 2-byte magic
//!   ("SC") and a 4-byte little-endian length ([`codec`], [`reader`],
//!   [`writer`]).
//! - **Mux frames**: every message is one comma-separated frame
//!   `type,name,id[,payload]` addressing a logical channel ([`wire`]).
//!   Channel names travel percent-encoded ([`encoding`]).

pub mod codec;
pub mod encoding;
pub mod error;
pub mod reader;
pub mod writer;
pub mod wire;

pub use codec::{decode_message, encode_message, MessageConfig, DEFAULT_MAX_MESSAGE, HEADER_SIZE};
pub use encoding::{decode_component, encode_component};
pub use error::{FrameError, Result};
pub use reader::MessageReader;
pub use wire::{FrameKind, MuxFrame};
pub use writer::MessageWriter;
