//! Incremental, pausable search sessions over multiplexed channels.
//!
//! A [`SearchSession`] opens its own channel (`ifsearch` for file names,
//! `isearch` for file contents), sends the initial query as soon as the
//! channel opens and dispatches the server's `add`/`revoke`/`done` events to
//! a [`SearchListener`]. [`SearchServer`] is the matching server side,
//! backed by a [`SearchBackend`].

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use backend::{FileNameBackend, Hits, SearchBackend, SearchHit, TextBackend};
pub use client::{dispatch, SearchListener, SearchSession, SessionState};
pub use config::SearchConfig;
pub use error::{Result, SearchError};
pub use protocol::{decode_events, DoneStatus, SearchEvent, SearchKind, SearchOptions, SearchRequest};
pub use server::SearchServer;
