//! Client side of an incremental search.

use std::time::{Duration, Instant};

use scripted_mux::{Channel, ChannelEvent, ConnectionManager};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{Result, SearchError};
use crate::protocol::{decode_events, DoneStatus, SearchEvent, SearchKind, SearchOptions, SearchRequest};

/// Receives the events of a search session.
///
/// Every method has a no-op default, so a listener only implements what it
/// cares about. Each element of `items` is one positional argument of the
/// wire event.
pub trait SearchListener {
    /// Options sent to the server with the initial query.
    fn options(&self) -> SearchOptions {
        SearchOptions::default()
    }

    fn add(&mut self, _items: Vec<Value>) {}

    fn revoke(&mut self, _items: Vec<Value>) {}

    fn done(&mut self, _status: DoneStatus) {}
}

/// Route decoded events to `listener`, in order.
///
/// Keys without a listener method are logged and skipped; the remaining
/// events are still delivered.
pub fn dispatch<L: SearchListener + ?Sized>(listener: &mut L, events: Vec<SearchEvent>) {
    for event in events {
        match event {
            SearchEvent::Add(items) => listener.add(items),
            SearchEvent::Revoke(items) => listener.revoke(items),
            SearchEvent::Done(status) => listener.done(status),
            SearchEvent::Unknown { key, args } => {
                error!(key = %key, args = args.len(), "search listener has no handler for event");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the channel to open; requests are queued.
    Opening,
    Open,
    /// Terminal.
    Closed,
}

/// One search over its own channel.
///
/// The initial query is always the first request the server sees. Requests
/// issued while the channel is still opening are queued and sent right after
/// it, in call order.
pub struct SearchSession<L> {
    channel: Channel,
    kind: SearchKind,
    state: SessionState,
    initial: Option<SearchRequest>,
    queued: Vec<SearchRequest>,
    last_done: Option<DoneStatus>,
    listener: L,
}

impl<L: SearchListener> SearchSession<L> {
    /// Start a search for `query` under `root`.
    pub fn open(
        manager: &ConnectionManager,
        kind: SearchKind,
        root: impl Into<String>,
        query: impl Into<String>,
        listener: L,
    ) -> Result<Self> {
        let initial = SearchRequest::Query {
            root: root.into(),
            query: query.into(),
            options: listener.options(),
        };
        let channel = manager.channel(kind.channel_name())?;
        debug!(%kind, id = channel.id(), "opening search session");
        Ok(Self {
            channel,
            kind,
            state: SessionState::Opening,
            initial: Some(initial),
            queued: Vec::new(),
            last_done: None,
            listener,
        })
    }

    pub fn kind(&self) -> SearchKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn channel_id(&self) -> u64 {
        self.channel.id()
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    /// Replace the query of the running search.
    pub fn query(&mut self, query: impl Into<String>) -> Result<()> {
        self.request(SearchRequest::Requery {
            query: query.into(),
        })
    }

    /// Lift the result cap and resume a paused search.
    pub fn more(&mut self) -> Result<()> {
        self.request(SearchRequest::More)
    }

    /// Stop the search. Nothing is dispatched afterwards.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(kind = %self.kind, id = self.channel.id(), "closing search session");
        }
        self.state = SessionState::Closed;
        self.queued.clear();
        self.channel.close();
    }

    /// Handle every event already received, without blocking. Returns the
    /// number of channel events handled.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.channel.try_next_event() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for an event, then handle everything pending.
    ///
    /// Returns whether anything was handled.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        match self.channel.next_event_timeout(timeout) {
            Some(event) => {
                self.handle(event);
                self.poll();
                true
            }
            None => false,
        }
    }

    /// Handle events until the next `done`, and return its status.
    ///
    /// Fails with [`SearchError::Timeout`] if `timeout` passes first, and
    /// with [`SearchError::SessionClosed`] if the channel closes first.
    pub fn run_until_done(&mut self, timeout: Option<Duration>) -> Result<DoneStatus> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        self.last_done = None;
        loop {
            if let Some(status) = self.last_done.take() {
                return Ok(status);
            }
            if self.state == SessionState::Closed {
                return Err(SearchError::SessionClosed);
            }

            let event = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.channel.next_event_timeout(remaining)
                }
                None => self.channel.next_event(),
            };
            match event {
                Some(event) => self.handle(event),
                // A blocking wait only comes back empty once the channel is gone.
                None => {
                    return Err(match timeout {
                        Some(timeout) => SearchError::Timeout(timeout),
                        None => SearchError::SessionClosed,
                    })
                }
            }
        }
    }

    fn request(&mut self, request: SearchRequest) -> Result<()> {
        match self.state {
            SessionState::Opening => {
                self.queued.push(request);
                Ok(())
            }
            SessionState::Open => {
                self.channel.send(&request.to_json())?;
                Ok(())
            }
            SessionState::Closed => Err(SearchError::SessionClosed),
        }
    }

    fn handle(&mut self, event: ChannelEvent) {
        if self.state == SessionState::Closed {
            return;
        }
        match event {
            ChannelEvent::Open => {
                self.state = SessionState::Open;
                let pending = self.initial.take().into_iter().chain(std::mem::take(&mut self.queued));
                for request in pending {
                    // A failed send means the channel is closing; its Close event follows.
                    if let Err(err) = self.channel.send(&request.to_json()) {
                        debug!(kind = %self.kind, request = request.key(), error = %err, "request not sent");
                        break;
                    }
                }
            }
            ChannelEvent::Message(payload) => match decode_events(&payload) {
                Ok(events) => {
                    if let Some(status) = events.iter().rev().find_map(|event| match event {
                        SearchEvent::Done(status) => Some(*status),
                        _ => None,
                    }) {
                        self.last_done = Some(status);
                    }
                    dispatch(&mut self.listener, events);
                }
                Err(err) => warn!(kind = %self.kind, error = %err, "skipping undecodable search payload"),
            },
            ChannelEvent::Close => {
                debug!(kind = %self.kind, id = self.channel.id(), "search channel closed");
                self.state = SessionState::Closed;
            }
        }
    }
}

impl<L> std::fmt::Debug for SearchSession<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSession")
            .field("kind", &self.kind)
            .field("id", &self.channel.id())
            .field("state", &self.state)
            .field("queued", &self.queued.len())
            .finish()
    }
}
