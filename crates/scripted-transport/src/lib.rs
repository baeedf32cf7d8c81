//! Local byte-stream transport for the Scripted editor services.
//!
//! This is the lowest layer of the workspace. It knows nothing about
//! messages or channels: it binds, accepts and connects Unix domain sockets
//! and hands out [`IpcStream`] values that implement `Read + Write`.
//! Message framing lives in `scripted-frame`, channel multiplexing in
//! `scripted-mux`.

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::{connect, UdsListener};
