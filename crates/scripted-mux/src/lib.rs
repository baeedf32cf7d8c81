//! Named logical channels multiplexed over one physical message connection.
//!
//! On the client, a [`ConnectionManager`] lazily dials a single physical
//! connection and hands out [`Channel`]s that share it. On the server, a
//! [`MuxServer`] demultiplexes every physical connection into
//! [`ServerChannel`]s accepted from named [`Endpoint`]s.
//!
//! Frames on the wire look like `sub,<name>,<id>`, `uns,<name>,<id>` and
//! `msg,<name>,<id>,<payload>`; see [`scripted_frame::MuxFrame`].

pub mod client;
pub mod error;
mod event;
#[cfg(unix)]
pub mod listener;
pub mod memory;
pub mod server;
pub mod socket;

pub use client::{Channel, ChannelEvent, ChannelState, ConnectionManager};
pub use error::{MuxError, Result};
#[cfg(unix)]
pub use listener::MuxListener;
pub use memory::{MemoryDialer, MemorySocket};
pub use server::{ConnectionHandler, Endpoint, MuxServer, ServerChannel, ServerChannelEvent};
#[cfg(unix)]
pub use socket::UdsDialer;
pub use socket::{Dialer, EventSink, MessageSocket, SocketEvent, StreamSocket};
