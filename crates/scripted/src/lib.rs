//! Multiplexed channels and incremental search sessions for the Scripted
//! editor.
//!
//! Many named logical channels share one physical message connection; the
//! incremental search service is built on top of them.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket byte streams
//! - [`frame`]: Message framing and the `sub`/`uns`/`msg` channel frame grammar
//! - [`mux`]: Client and server channel multiplexers
//! - [`search`]: Incremental search sessions (behind `search` feature)

/// Re-export transport types.
pub mod transport {
    pub use scripted_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use scripted_frame::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use scripted_mux::*;
}

/// Re-export search types (requires `search` feature).
#[cfg(feature = "search")]
pub mod search {
    pub use scripted_search::*;
}
