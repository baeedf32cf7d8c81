//! Server side of an incremental search.
//!
//! Each accepted channel runs one session on its own thread. A session
//! streams hits in `add` batches, pauses at the result cap until the client
//! asks for `more`, and answers `requery` by revoking hits that no longer
//! match before continuing with the new query.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use scripted_mux::{Endpoint, MuxError, ServerChannel, ServerChannelEvent};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{Hits, SearchBackend, SearchHit};
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::protocol::{DoneStatus, SearchEvent, SearchOptions, SearchRequest};

/// Longest a session walks before sending what it found and checking for
/// requests.
const STEP_TIME: Duration = Duration::from_millis(50);

/// Serves search sessions from a [`SearchBackend`].
#[derive(Clone)]
pub struct SearchServer {
    backend: Arc<dyn SearchBackend>,
    config: SearchConfig,
}

impl SearchServer {
    pub fn new(backend: impl SearchBackend + 'static, config: SearchConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Accept sessions from `endpoint` on a background thread until the
    /// endpoint stops.
    pub fn spawn(&self, endpoint: Endpoint) -> Result<JoinHandle<()>> {
        let server = self.clone();
        thread::Builder::new()
            .name(format!("scripted-search-{}", endpoint.name()))
            .spawn(move || server.accept_loop(endpoint))
            .map_err(SearchError::Io)
    }

    /// Drive one session until the client closes its channel.
    pub fn run_session(&self, channel: ServerChannel) -> Result<()> {
        let Some((root, query, options)) = self.await_query(&channel) else {
            return Ok(());
        };
        let cap = options.max_results().or(self.config.default_max_results);
        debug!(id = channel.id(), ?root, %query, ?cap, "search session started");

        let mut session = Session {
            server: self,
            channel: &channel,
            root,
            query,
            cap,
            sent: Vec::new(),
            skip: HashSet::new(),
            hits: None,
            pending: VecDeque::new(),
            paused: false,
        };
        session.restart();
        match session.run() {
            // The client went away mid-write.
            Err(SearchError::Mux(MuxError::ChannelClosed { .. } | MuxError::Disconnected)) => {
                Ok(())
            }
            other => other,
        }
    }

    fn accept_loop(&self, endpoint: Endpoint) {
        while let Some(channel) = endpoint.accept() {
            let server = self.clone();
            let id = channel.id();
            let spawned = thread::Builder::new()
                .name("scripted-search-session".to_string())
                .spawn(move || {
                    if let Err(err) = server.run_session(channel) {
                        warn!(id, error = %err, "search session failed");
                    }
                });
            if let Err(err) = spawned {
                warn!(id, error = %err, "could not start search session");
            }
        }
        debug!(endpoint = endpoint.name(), "search endpoint stopped");
    }

    /// Wait for the opening `query`. `None` if the channel closes first.
    fn await_query(&self, channel: &ServerChannel) -> Option<(PathBuf, String, SearchOptions)> {
        while let Some(ServerChannelEvent::Data(payload)) = channel.next_event() {
            match SearchRequest::from_json(&payload) {
                Ok(SearchRequest::Query {
                    root,
                    query,
                    options,
                }) => return Some((self.resolve_root(&root), query, options)),
                Ok(other) => {
                    warn!(id = channel.id(), request = other.key(), "request before query ignored")
                }
                Err(err) => warn!(id = channel.id(), error = %err, "undecodable search request"),
            }
        }
        None
    }

    fn resolve_root(&self, root: &str) -> PathBuf {
        let root = PathBuf::from(root);
        match &self.config.workspace {
            Some(workspace) if root.is_relative() => workspace.join(root),
            _ => root,
        }
    }
}

impl std::fmt::Debug for SearchServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Session<'a> {
    server: &'a SearchServer,
    channel: &'a ServerChannel,
    root: PathBuf,
    query: String,
    /// `None` once the client asked for everything.
    cap: Option<u64>,
    /// Hits the client currently holds, in the order they were sent.
    sent: Vec<SearchHit>,
    /// Hits to leave out of the current enumeration.
    skip: HashSet<SearchHit>,
    /// `None` once the enumeration is exhausted.
    hits: Option<Hits>,
    /// Found but not yet sent.
    pending: VecDeque<SearchHit>,
    paused: bool,
}

impl Session<'_> {
    fn run(&mut self) -> Result<()> {
        loop {
            if self.streaming() {
                while let Some(event) = self.channel.try_next_event() {
                    if !self.on_event(event)? {
                        return Ok(());
                    }
                }
                if self.streaming() {
                    self.step()?;
                }
            } else {
                match self.channel.next_event() {
                    Some(event) => {
                        if !self.on_event(event)? {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                }
            }
        }
    }

    fn streaming(&self) -> bool {
        self.hits.is_some() && !self.paused
    }

    /// Returns `false` once the session is over.
    fn on_event(&mut self, event: ServerChannelEvent) -> Result<bool> {
        let payload = match event {
            ServerChannelEvent::Data(payload) => payload,
            ServerChannelEvent::Close => {
                debug!(id = self.channel.id(), "search session closed by client");
                return Ok(false);
            }
        };
        match SearchRequest::from_json(&payload) {
            Ok(request) => self.on_request(request)?,
            Err(err) => warn!(id = self.channel.id(), error = %err, "undecodable search request"),
        }
        Ok(true)
    }

    fn on_request(&mut self, request: SearchRequest) -> Result<()> {
        match request {
            SearchRequest::Query {
                root,
                query,
                options,
            } => {
                debug!(id = self.channel.id(), %query, "search restarted");
                let revoked = std::mem::take(&mut self.sent);
                self.send_hits(SearchEvent::Revoke, &revoked)?;
                self.root = self.server.resolve_root(&root);
                self.query = query;
                self.cap = options
                    .max_results()
                    .or(self.server.config.default_max_results);
                self.skip.clear();
            }
            SearchRequest::Requery { query } => {
                debug!(id = self.channel.id(), %query, "requery");
                let backend = &self.server.backend;
                let (kept, revoked): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sent)
                    .into_iter()
                    .partition(|hit| backend.matches(hit, &query));
                self.send_hits(SearchEvent::Revoke, &revoked)?;
                self.skip = kept.iter().cloned().collect();
                self.sent = kept;
                self.query = query;
            }
            SearchRequest::More => {
                self.cap = None;
                if self.hits.is_some() {
                    self.paused = false;
                } else {
                    self.send(SearchEvent::Done(DoneStatus::Complete))?;
                }
                return Ok(());
            }
        }
        self.restart();
        Ok(())
    }

    fn restart(&mut self) {
        self.hits = Some(
            self.server
                .backend
                .search(self.root.clone(), self.query.clone()),
        );
        self.pending.clear();
        self.paused = false;
    }

    /// Send the next batch, then report `done` if the enumeration ended or
    /// the cap was reached.
    ///
    /// A step stops pulling from the walk after [`STEP_TIME`] and sends
    /// whatever it has, so sparse matches still stream and requests are
    /// seen between steps.
    fn step(&mut self) -> Result<()> {
        let Some(hits) = self.hits.as_mut() else {
            return Ok(());
        };
        let batch_size = self.server.config.batch_size.max(1);
        let budget = match self.cap {
            Some(cap) => {
                let left = cap.saturating_sub(self.sent.len() as u64);
                usize::try_from(left).unwrap_or(usize::MAX).min(batch_size)
            }
            None => batch_size,
        };

        let deadline = Instant::now() + STEP_TIME;
        let mut walked = false;
        while self.pending.len() < budget && Instant::now() < deadline {
            match hits.next() {
                Some(found) => self
                    .pending
                    .extend(found.into_iter().filter(|hit| !self.skip.contains(hit))),
                None => {
                    walked = true;
                    break;
                }
            }
        }

        let take = budget.min(self.pending.len());
        let batch: Vec<SearchHit> = self.pending.drain(..take).collect();
        self.send_hits(SearchEvent::Add, &batch)?;
        self.sent.extend(batch);

        if walked && self.pending.is_empty() {
            self.hits = None;
            self.send(SearchEvent::Done(DoneStatus::Complete))?;
        } else if self
            .cap
            .is_some_and(|cap| self.sent.len() as u64 >= cap)
        {
            self.paused = true;
            self.send(SearchEvent::Done(DoneStatus::Paused))?;
        }
        Ok(())
    }

    /// Send `hits` as one event; nothing is sent for an empty list.
    fn send_hits(&self, event: fn(Vec<Value>) -> SearchEvent, hits: &[SearchHit]) -> Result<()> {
        if hits.is_empty() {
            return Ok(());
        }
        let items = hits
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.send(event(items))
    }

    fn send(&self, event: SearchEvent) -> Result<()> {
        self.channel.write(&event.to_json())?;
        Ok(())
    }
}
