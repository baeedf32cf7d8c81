//! Client side of the multiplexer.
//!
//! A [`ConnectionManager`] hands out any number of [`Channel`]s that share a
//! single physical connection. The connection is dialed lazily by the first
//! `channel()` call and dialed again after it is lost.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use scripted_frame::{FrameKind, MuxFrame};
use tracing::{debug, trace, warn};

use crate::error::{MuxError, Result};
use crate::event::{lock, EventQueue};
use crate::socket::{Dialer, EventSink, MessageSocket, SocketEvent};

/// Lifecycle of a client channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for the physical connection to open.
    Opening,
    /// Subscribed; `send` writes immediately.
    Open,
    /// Terminal.
    Closed,
}

/// Event observed on a client channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The subscription went out. Delivered at most once, first.
    Open,
    /// Payload of one `msg` frame.
    Message(String),
    /// The channel closed. Always the last event.
    Close,
}

/// Shared handle to one lazily dialed physical connection.
///
/// Cloning the manager shares the connection and the id counter.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    dialer: Box<dyn Dialer>,
    state: Mutex<MuxState>,
}

struct MuxState {
    conn: Option<Physical>,
    next_id: u64,
    next_generation: u64,
    channels: HashMap<u64, Arc<ChannelCore>>,
}

struct Physical {
    socket: Arc<dyn MessageSocket>,
    generation: u64,
    open: bool,
}

impl ConnectionManager {
    pub fn new(dialer: impl Dialer + 'static) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                dialer: Box::new(dialer),
                state: Mutex::new(MuxState {
                    conn: None,
                    next_id: 0,
                    next_generation: 0,
                    channels: HashMap::new(),
                }),
            }),
        }
    }

    /// Open a logical channel named `name`.
    ///
    /// Dials the physical connection if there is none. The returned channel
    /// starts in [`ChannelState::Opening`] and receives [`ChannelEvent::Open`]
    /// once its subscription has been sent.
    pub fn channel(&self, name: &str) -> Result<Channel> {
        let mut state = lock(&self.inner.state);
        let id = state.next_id;
        state.next_id += 1;

        if state.conn.is_none() {
            let generation = state.next_generation;
            state.next_generation += 1;
            let socket = self.inner.dialer.dial(self.sink(generation))?;
            debug!(generation, "dialed physical connection");
            state.conn = Some(Physical {
                socket,
                generation,
                open: false,
            });
        }

        let core = Arc::new(ChannelCore::new(id, name));
        let open_socket = state
            .conn
            .as_ref()
            .filter(|conn| conn.open)
            .map(|conn| Arc::clone(&conn.socket));
        if let Some(socket) = open_socket {
            socket.send(&MuxFrame::sub(name, id).encode())?;
            core.mark_open();
        }
        state.channels.insert(id, Arc::clone(&core));
        debug!(channel = name, id, "opened channel");

        Ok(Channel {
            core,
            manager: Arc::downgrade(&self.inner),
        })
    }

    /// Whether a physical connection is currently open.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state)
            .conn
            .as_ref()
            .is_some_and(|conn| conn.open)
    }

    /// Number of channels registered on the current connection.
    pub fn open_channels(&self) -> usize {
        lock(&self.inner.state).channels.len()
    }

    /// Drop the physical connection and close every channel on it.
    pub fn disconnect(&self) {
        let mut state = lock(&self.inner.state);
        let Some(conn) = state.conn.take() else {
            return;
        };
        let channels: Vec<_> = state.channels.drain().map(|(_, core)| core).collect();
        drop(state);

        debug!(generation = conn.generation, "disconnecting");
        conn.socket.close();
        for core in channels {
            core.force_close();
        }
    }

    fn sink(&self, generation: u64) -> EventSink {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move |event| {
            if let Some(inner) = inner.upgrade() {
                inner.on_event(generation, event);
            }
        })
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ConnectionManager")
            .field("connected", &state.conn.as_ref().is_some_and(|c| c.open))
            .field("channels", &state.channels.len())
            .field("next_id", &state.next_id)
            .finish()
    }
}

impl ManagerInner {
    fn on_event(&self, generation: u64, event: SocketEvent) {
        match event {
            SocketEvent::Open => self.on_open(generation),
            SocketEvent::Message(text) => self.on_message(generation, &text),
            SocketEvent::Closed => self.on_closed(generation),
        }
    }

    fn on_open(&self, generation: u64) {
        let mut state = lock(&self.state);
        let Some(conn) = state.conn.as_mut().filter(|c| c.generation == generation) else {
            trace!(generation, "ignoring open from superseded connection");
            return;
        };
        conn.open = true;
        let socket = Arc::clone(&conn.socket);

        let mut pending: Vec<_> = state
            .channels
            .values()
            .filter(|core| core.state() == ChannelState::Opening)
            .cloned()
            .collect();
        pending.sort_by_key(|core| core.id);

        debug!(generation, channels = pending.len(), "physical connection open");
        for core in pending {
            match socket.send(&MuxFrame::sub(&core.name, core.id).encode()) {
                Ok(()) => core.mark_open(),
                Err(err) => {
                    warn!(channel = %core.name, id = core.id, error = %err, "subscribe failed");
                    break;
                }
            }
        }
    }

    fn on_message(&self, generation: u64, text: &str) {
        let frame = match MuxFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
                return;
            }
        };

        let mut state = lock(&self.state);
        if state.conn.as_ref().map(|c| c.generation) != Some(generation) {
            trace!(generation, "ignoring frame from superseded connection");
            return;
        }
        match frame.kind {
            FrameKind::Msg => {
                let core = state.channels.get(&frame.id).cloned();
                drop(state);
                match core {
                    Some(core) if !core.closing.load(Ordering::SeqCst) => {
                        core.events.push(ChannelEvent::Message(frame.payload));
                    }
                    Some(_) => {}
                    None => trace!(id = frame.id, "dropping dead-letter frame"),
                }
            }
            FrameKind::Uns => {
                let core = state.channels.remove(&frame.id);
                drop(state);
                match core {
                    Some(core) => {
                        debug!(channel = %core.name, id = core.id, "server unsubscribed");
                        core.force_close();
                    }
                    None => trace!(id = frame.id, "uns for unknown channel"),
                }
            }
            FrameKind::Sub => debug!(id = frame.id, "ignoring sub from server"),
        }
    }

    fn on_closed(&self, generation: u64) {
        let mut state = lock(&self.state);
        if state.conn.as_ref().map(|c| c.generation) != Some(generation) {
            return;
        }
        state.conn = None;
        let channels: Vec<_> = state.channels.drain().map(|(_, core)| core).collect();
        drop(state);

        debug!(generation, channels = channels.len(), "physical connection lost");
        for core in channels {
            core.force_close();
        }
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let state = lock(&self.state);
        if let Some(conn) = state.conn.as_ref() {
            conn.socket.close();
        }
    }
}

struct ChannelCore {
    id: u64,
    name: String,
    state: Mutex<ChannelState>,
    closing: AtomicBool,
    events: EventQueue<ChannelEvent>,
}

impl ChannelCore {
    fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: Mutex::new(ChannelState::Opening),
            closing: AtomicBool::new(false),
            events: EventQueue::new(),
        }
    }

    fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    fn mark_open(&self) {
        *lock(&self.state) = ChannelState::Open;
        self.events.push(ChannelEvent::Open);
    }

    /// Closed from the far side: messages already queued stay deliverable.
    fn force_close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.events.seal(Some(ChannelEvent::Close), false);
    }
}

/// A named logical channel on a shared physical connection.
///
/// Events are consumed with [`next_event`](Self::next_event) and friends.
/// Dropping a channel closes it.
pub struct Channel {
    core: Arc<ChannelCore>,
    manager: Weak<ManagerInner>,
}

impl Channel {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Current state. Becomes [`ChannelState::Closed`] only once the
    /// `Close` event has been consumed.
    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    /// Send `data` as one `msg` frame. Nothing is queued: sending on a
    /// channel that is still opening fails with [`MuxError::ChannelNotOpen`].
    pub fn send(&self, data: &str) -> Result<()> {
        if self.core.closing.load(Ordering::SeqCst) {
            return Err(self.error(|name, id| MuxError::ChannelClosed { name, id }));
        }
        let manager = self.manager.upgrade().ok_or(MuxError::Disconnected)?;
        let state = lock(&manager.state);
        if self.core.state() != ChannelState::Open {
            return Err(self.error(|name, id| MuxError::ChannelNotOpen { name, id }));
        }
        let conn = state
            .conn
            .as_ref()
            .filter(|conn| conn.open)
            .ok_or(MuxError::Disconnected)?;
        conn.socket
            .send(&MuxFrame::msg(self.name(), self.id(), data).encode())
    }

    /// Unsubscribe and stop delivering messages.
    ///
    /// Undelivered messages are discarded and `Close` is queued, so the
    /// channel keeps reporting its prior state until that event is taken.
    pub fn close(&self) {
        if !self.core.closing.swap(true, Ordering::SeqCst) {
            if let Some(manager) = self.manager.upgrade() {
                let mut state = lock(&manager.state);
                let registered = state.channels.remove(&self.core.id).is_some();
                let subscribed = self.core.state() == ChannelState::Open;
                if let Some(conn) = state.conn.as_ref().filter(|c| c.open) {
                    if registered && subscribed {
                        let frame = MuxFrame::uns(self.name(), self.id()).encode();
                        if let Err(err) = conn.socket.send(&frame) {
                            debug!(channel = %self.core.name, id = self.core.id, error = %err, "unsubscribe not sent");
                        }
                    }
                }
            }
            debug!(channel = %self.core.name, id = self.core.id, "closed channel");
        }
        if !self.core.events.seal(Some(ChannelEvent::Close), true) {
            self.core
                .events
                .retain(|event| *event == ChannelEvent::Close);
        }
    }

    /// Wait for the next event. `None` after `Close` has been delivered.
    pub fn next_event(&self) -> Option<ChannelEvent> {
        self.observe(self.core.events.pop())
    }

    pub fn try_next_event(&self) -> Option<ChannelEvent> {
        self.observe(self.core.events.try_pop())
    }

    pub fn next_event_timeout(&self, timeout: Duration) -> Option<ChannelEvent> {
        self.observe(self.core.events.pop_timeout(timeout))
    }

    fn observe(&self, event: Option<ChannelEvent>) -> Option<ChannelEvent> {
        if event == Some(ChannelEvent::Close) {
            *lock(&self.core.state) = ChannelState::Closed;
        }
        event
    }

    fn error(&self, make: impl FnOnce(String, u64) -> MuxError) -> MuxError {
        make(self.core.name.clone(), self.core.id)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.core.name)
            .field("id", &self.core.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSocket {
        sent: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl RecordingSocket {
        fn sent(&self) -> Vec<String> {
            lock(&self.sent).clone()
        }
    }

    impl MessageSocket for RecordingSocket {
        fn send(&self, text: &str) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(MuxError::Disconnected);
            }
            lock(&self.sent).push(text.to_string());
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Hands out recording sockets and keeps their sinks so tests can play
    /// the connection's side.
    #[derive(Clone, Default)]
    struct FakeDialer {
        dials: Arc<Mutex<Vec<(EventSink, Arc<RecordingSocket>)>>>,
    }

    impl FakeDialer {
        fn count(&self) -> usize {
            lock(&self.dials).len()
        }

        fn emit(&self, dial: usize, event: SocketEvent) {
            let sink = Arc::clone(&lock(&self.dials)[dial].0);
            sink(event);
        }

        fn deliver(&self, dial: usize, text: &str) {
            self.emit(dial, SocketEvent::Message(text.to_string()));
        }

        fn socket(&self, dial: usize) -> Arc<RecordingSocket> {
            Arc::clone(&lock(&self.dials)[dial].1)
        }
    }

    impl Dialer for FakeDialer {
        fn dial(&self, events: EventSink) -> Result<Arc<dyn MessageSocket>> {
            let socket = Arc::new(RecordingSocket::default());
            lock(&self.dials).push((events, Arc::clone(&socket)));
            Ok(socket)
        }
    }

    fn manager() -> (ConnectionManager, FakeDialer) {
        let dialer = FakeDialer::default();
        (ConnectionManager::new(dialer.clone()), dialer)
    }

    #[test]
    fn ids_are_distinct_and_share_one_connection() {
        let (manager, dialer) = manager();
        let channels: Vec<_> = (0..5)
            .map(|_| manager.channel("ifsearch").unwrap())
            .collect();

        let ids: Vec<u64> = channels.iter().map(Channel::id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(dialer.count(), 1);
        assert_eq!(manager.open_channels(), 5);
    }

    #[test]
    fn subscribes_on_open_in_id_order() {
        let (manager, dialer) = manager();
        let first = manager.channel("ifsearch").unwrap();
        let second = manager.channel("isearch").unwrap();
        assert_eq!(first.state(), ChannelState::Opening);
        assert!(dialer.socket(0).sent().is_empty());

        dialer.emit(0, SocketEvent::Open);

        assert_eq!(dialer.socket(0).sent(), vec!["sub,ifsearch,0", "sub,isearch,1"]);
        assert_eq!(first.try_next_event(), Some(ChannelEvent::Open));
        assert_eq!(second.try_next_event(), Some(ChannelEvent::Open));
        assert_eq!(first.state(), ChannelState::Open);
        assert!(manager.is_connected());
    }

    #[test]
    fn send_before_open_is_rejected_not_queued() {
        let (manager, dialer) = manager();
        let channel = manager.channel("echo").unwrap();

        assert!(matches!(
            channel.send("early"),
            Err(MuxError::ChannelNotOpen { id: 0, .. })
        ));
        dialer.emit(0, SocketEvent::Open);
        channel.send("a,b").unwrap();

        assert_eq!(dialer.socket(0).sent(), vec!["sub,echo,0", "msg,echo,0,a,b"]);
    }

    #[test]
    fn channel_on_open_connection_subscribes_immediately() {
        let (manager, dialer) = manager();
        let _first = manager.channel("echo").unwrap();
        dialer.emit(0, SocketEvent::Open);

        let late = manager.channel("a,b/c").unwrap();

        assert_eq!(late.state(), ChannelState::Open);
        assert_eq!(late.try_next_event(), Some(ChannelEvent::Open));
        assert_eq!(dialer.socket(0).sent().last().unwrap(), "sub,a%2Cb%2Fc,1");
    }

    #[test]
    fn messages_then_unsubscribe_arrive_in_order() {
        let (manager, dialer) = manager();
        for _ in 0..42 {
            drop(manager.channel("warmup").unwrap());
        }
        let channel = manager.channel("echo").unwrap();
        assert_eq!(channel.id(), 42);
        dialer.emit(0, SocketEvent::Open);

        dialer.deliver(0, "msg,echo,42,one");
        dialer.deliver(0, "msg,echo,42,two");
        dialer.deliver(0, "uns,echo,42");

        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Open));
        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Message("one".into())));
        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Message("two".into())));
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Close));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.next_event(), None);
        assert_eq!(manager.open_channels(), 0);
    }

    #[test]
    fn dead_letter_frames_are_dropped() {
        let (manager, dialer) = manager();
        let channel = manager.channel("echo").unwrap();
        dialer.emit(0, SocketEvent::Open);
        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Open));

        dialer.deliver(0, "msg,ghost,99,hello");
        dialer.deliver(0, "uns,ghost,99");
        dialer.deliver(0, "not a frame");

        assert_eq!(channel.try_next_event(), None);
        assert_eq!(manager.open_channels(), 1);
    }

    #[test]
    fn close_is_terminal_and_deferred() {
        let (manager, dialer) = manager();
        let channel = manager.channel("echo").unwrap();
        dialer.emit(0, SocketEvent::Open);
        dialer.deliver(0, "msg,echo,0,unread");

        channel.close();
        assert_eq!(channel.state(), ChannelState::Open);
        dialer.deliver(0, "msg,echo,0,in flight");

        assert_eq!(dialer.socket(0).sent(), vec!["sub,echo,0", "uns,echo,0"]);
        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Close));
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.try_next_event(), None);
        assert!(matches!(
            channel.send("x"),
            Err(MuxError::ChannelClosed { .. })
        ));
    }

    #[test]
    fn close_after_remote_unsubscribe_drops_queued_messages() {
        let (manager, dialer) = manager();
        let channel = manager.channel("echo").unwrap();
        dialer.emit(0, SocketEvent::Open);
        dialer.deliver(0, "msg,echo,0,late");
        dialer.deliver(0, "uns,echo,0");

        channel.close();

        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Close));
        assert_eq!(channel.try_next_event(), None);
        assert_eq!(dialer.socket(0).sent(), vec!["sub,echo,0"]);
    }

    #[test]
    fn closing_before_open_sends_nothing() {
        let (manager, dialer) = manager();
        let channel = manager.channel("echo").unwrap();
        channel.close();
        dialer.emit(0, SocketEvent::Open);

        assert!(dialer.socket(0).sent().is_empty());
        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Close));
    }

    #[test]
    fn physical_loss_closes_channels_and_redials() {
        let (manager, dialer) = manager();
        let old = manager.channel("echo").unwrap();
        dialer.emit(0, SocketEvent::Open);
        dialer.deliver(0, "msg,echo,0,before loss");

        dialer.emit(0, SocketEvent::Closed);

        assert!(!manager.is_connected());
        assert_eq!(manager.open_channels(), 0);
        assert_eq!(old.try_next_event(), Some(ChannelEvent::Open));
        assert_eq!(old.try_next_event(), Some(ChannelEvent::Message("before loss".into())));
        assert_eq!(old.try_next_event(), Some(ChannelEvent::Close));

        let fresh = manager.channel("echo").unwrap();
        assert_eq!(fresh.id(), 1, "ids are not reused across connections");
        assert_eq!(dialer.count(), 2);

        // Late events from the first connection are ignored.
        dialer.emit(0, SocketEvent::Open);
        assert_eq!(fresh.state(), ChannelState::Opening);

        dialer.emit(1, SocketEvent::Open);
        assert_eq!(dialer.socket(1).sent(), vec!["sub,echo,1"]);
        assert_eq!(dialer.socket(0).sent(), vec!["sub,echo,0"]);
    }

    #[test]
    fn disconnect_closes_socket_and_channels() {
        let (manager, dialer) = manager();
        let channel = manager.channel("echo").unwrap();
        dialer.emit(0, SocketEvent::Open);

        manager.disconnect();

        assert!(dialer.socket(0).closed.load(Ordering::SeqCst));
        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Open));
        assert_eq!(channel.try_next_event(), Some(ChannelEvent::Close));
        assert!(!manager.is_connected());
    }

    #[test]
    fn dropping_channel_unsubscribes() {
        let (manager, dialer) = manager();
        let channel = manager.channel("echo").unwrap();
        dialer.emit(0, SocketEvent::Open);

        drop(channel);

        assert_eq!(dialer.socket(0).sent(), vec!["sub,echo,0", "uns,echo,0"]);
        assert_eq!(manager.open_channels(), 0);
    }

    #[test]
    fn dropping_manager_closes_connection() {
        let (manager, dialer) = manager();
        let _channel = manager.channel("echo").unwrap();
        drop(manager);
        assert!(dialer.socket(0).closed.load(Ordering::SeqCst));
    }
}
