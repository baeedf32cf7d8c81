//! The textual channel frame grammar.
//!
//! ```text
//! frame := type "," name "," id [ "," payload ]
//! type  := "sub" | "uns" | "msg"
//! ```
//!
//! Only the first three commas are structural: the payload is everything
//! after the third comma and may contain commas of its own. `name` is
//! percent-encoded on the wire.

use std::fmt;
use std::str::FromStr;

use crate::encoding::{decode_component, encode_component};
use crate::error::{FrameError, Result};

/// Frame type token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Subscribe: open a logical channel.
    Sub,
    /// Unsubscribe: close a logical channel.
    Uns,
    /// Message: deliver a payload on an open channel.
    Msg,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sub => "sub",
            Self::Uns => "uns",
            Self::Msg => "msg",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameKind {
    type Err = FrameError;

    fn from_str(token: &str) -> Result<Self> {
        match token {
            "sub" => Ok(Self::Sub),
            "uns" => Ok(Self::Uns),
            "msg" => Ok(Self::Msg),
            other => Err(FrameError::malformed(format!("unknown frame type {other:?}"))),
        }
    }
}

/// One decoded channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxFrame {
    pub kind: FrameKind,
    /// Raw (decoded) channel name.
    pub name: String,
    pub id: u64,
    /// Empty for `sub` and `uns`.
    pub payload: String,
}

impl MuxFrame {
    pub fn sub(name: impl Into<String>, id: u64) -> Self {
        Self::new(FrameKind::Sub, name, id, String::new())
    }

    pub fn uns(name: impl Into<String>, id: u64) -> Self {
        Self::new(FrameKind::Uns, name, id, String::new())
    }

    pub fn msg(name: impl Into<String>, id: u64, payload: impl Into<String>) -> Self {
        Self::new(FrameKind::Msg, name, id, payload)
    }

    fn new(kind: FrameKind, name: impl Into<String>, id: u64, payload: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            id,
            payload: payload.into(),
        }
    }

    /// Render the frame in wire form.
    pub fn encode(&self) -> String {
        let name = encode_component(&self.name);
        match self.kind {
            FrameKind::Msg => format!("{},{},{},{}", self.kind, name, self.id, self.payload),
            FrameKind::Sub | FrameKind::Uns => format!("{},{},{}", self.kind, name, self.id),
        }
    }

    /// Parse a wire frame.
    ///
    /// A `sub`/`uns` frame carrying a trailing payload is accepted and the
    /// payload kept; receivers simply ignore it.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = text.splitn(4, ',');
        let kind: FrameKind = fields.next().unwrap_or_default().parse()?;
        let name = fields
            .next()
            .ok_or_else(|| FrameError::malformed("missing channel name"))?;
        let id_field = fields
            .next()
            .ok_or_else(|| FrameError::malformed("missing channel id"))?;
        let id = id_field
            .parse::<u64>()
            .map_err(|_| FrameError::malformed(format!("invalid channel id {id_field:?}")))?;
        let payload = fields.next().unwrap_or_default();

        Ok(Self::new(kind, decode_component(name), id, payload))
    }
}

impl fmt::Display for MuxFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
