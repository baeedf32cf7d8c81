//! Server side of the multiplexer.
//!
//! A [`MuxServer`] is a registry of named endpoints. Every physical
//! connection gets its own [`ConnectionHandler`] with a private
//! `id -> channel` table, because channel ids are chosen by clients and are
//! only unique within one connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use scripted_frame::{FrameKind, MuxFrame};
use tracing::{debug, trace, warn};

use crate::error::{MuxError, Result};
use crate::event::{lock, EventQueue};
use crate::socket::{EventSink, MessageSocket, SocketEvent};

type ChannelTable = Mutex<HashMap<u64, Arc<ChannelCore>>>;
type Registry = Mutex<HashMap<String, Arc<EndpointShared>>>;

/// Registry of server-side endpoints, shared by all physical connections.
#[derive(Clone, Default)]
pub struct MuxServer {
    endpoints: Arc<Registry>,
    next_connection: Arc<AtomicU64>,
}

impl MuxServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an endpoint under `name`.
    ///
    /// Clients subscribe with the percent-encoded form of the same name.
    /// Registering a name twice replaces the earlier endpoint, which stops
    /// accepting.
    pub fn register_channel(&self, name: &str) -> Endpoint {
        let shared = Arc::new(EndpointShared {
            name: name.to_string(),
            connections: EventQueue::new(),
        });
        if let Some(previous) = lock(&self.endpoints).insert(name.to_string(), Arc::clone(&shared))
        {
            warn!(channel = name, "endpoint registered twice; replacing");
            previous.connections.seal(None, false);
        }
        debug!(channel = name, "registered endpoint");
        Endpoint {
            shared,
            registry: Arc::downgrade(&self.endpoints),
        }
    }

    /// Remove an endpoint. Returns whether it existed.
    pub fn unregister_channel(&self, name: &str) -> bool {
        match lock(&self.endpoints).remove(name) {
            Some(endpoint) => {
                endpoint.connections.seal(None, false);
                true
            }
            None => false,
        }
    }

    /// Stop every endpoint; pending and future `accept` calls return `None`.
    pub fn shutdown(&self) {
        for (_, endpoint) in lock(&self.endpoints).drain() {
            endpoint.connections.seal(None, false);
        }
    }

    /// Start demultiplexing a new physical connection.
    ///
    /// Attach [`ConnectionHandler::sink`] to the socket's event stream.
    pub fn handle_connection(&self, socket: Arc<dyn MessageSocket>) -> Arc<ConnectionHandler> {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "handling physical connection");
        Arc::new(ConnectionHandler {
            id,
            socket,
            server: self.clone(),
            channels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn endpoint(&self, name: &str) -> Option<Arc<EndpointShared>> {
        lock(&self.endpoints).get(name).cloned()
    }
}

impl fmt::Debug for MuxServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = lock(&self.endpoints).keys().cloned().collect();
        f.debug_struct("MuxServer").field("endpoints", &names).finish()
    }
}

struct EndpointShared {
    name: String,
    connections: EventQueue<ServerChannel>,
}

/// A registered endpoint. Each client subscription shows up as one
/// accepted [`ServerChannel`].
///
/// Dropping an endpoint unregisters it and unsubscribes every client whose
/// subscription was never accepted.
pub struct Endpoint {
    shared: Arc<EndpointShared>,
    registry: Weak<Registry>,
}

impl Endpoint {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Wait for the next subscription. `None` once the endpoint is stopped.
    pub fn accept(&self) -> Option<ServerChannel> {
        self.shared.connections.pop()
    }

    pub fn try_accept(&self) -> Option<ServerChannel> {
        self.shared.connections.try_pop()
    }

    pub fn accept_timeout(&self, timeout: Duration) -> Option<ServerChannel> {
        self.shared.connections.pop_timeout(timeout)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.connections.is_sealed()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = lock(&registry);
            // The name may already belong to a newer registration.
            if registry
                .get(&self.shared.name)
                .is_some_and(|current| Arc::ptr_eq(current, &self.shared))
            {
                registry.remove(&self.shared.name);
            }
        }
        // Discarded channels end themselves on drop.
        if self.shared.connections.seal(None, true) {
            debug!(channel = %self.shared.name, "endpoint dropped");
        }
    }
}

/// Routes the frames of one physical connection.
pub struct ConnectionHandler {
    id: u64,
    socket: Arc<dyn MessageSocket>,
    server: MuxServer,
    channels: Arc<ChannelTable>,
}

impl ConnectionHandler {
    /// Event sink to hand to the physical connection.
    pub fn sink(self: &Arc<Self>) -> EventSink {
        let handler = Arc::clone(self);
        Arc::new(move |event| handler.on_event(event))
    }

    pub fn on_event(&self, event: SocketEvent) {
        match event {
            SocketEvent::Open => debug!(connection = self.id, "physical connection open"),
            SocketEvent::Message(text) => self.on_message(&text),
            SocketEvent::Closed => self.on_closed(),
        }
    }

    /// Number of channels currently subscribed on this connection.
    pub fn open_channels(&self) -> usize {
        lock(&self.channels).len()
    }

    fn on_message(&self, text: &str) {
        let frame = match MuxFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection = self.id, error = %err, "dropping malformed frame");
                return;
            }
        };

        match frame.kind {
            FrameKind::Sub => self.on_subscribe(frame),
            FrameKind::Uns => {
                let removed = lock(&self.channels).remove(&frame.id);
                match removed {
                    Some(core) => {
                        debug!(connection = self.id, channel = %core.name, id = core.id, "client unsubscribed");
                        core.finish();
                    }
                    None => trace!(connection = self.id, id = frame.id, "uns for unknown channel"),
                }
            }
            FrameKind::Msg => {
                let core = lock(&self.channels).get(&frame.id).cloned();
                match core {
                    Some(core) => {
                        core.events.push(ServerChannelEvent::Data(frame.payload));
                    }
                    None => trace!(connection = self.id, id = frame.id, "dropping dead-letter frame"),
                }
            }
        }
    }

    fn on_subscribe(&self, frame: MuxFrame) {
        let Some(endpoint) = self.server.endpoint(&frame.name) else {
            debug!(connection = self.id, channel = %frame.name, "subscription to unregistered channel ignored");
            return;
        };

        let core = Arc::new(ChannelCore {
            id: frame.id,
            name: frame.name,
            events: EventQueue::new(),
            ended: AtomicBool::new(false),
        });
        let replaced = lock(&self.channels).insert(core.id, Arc::clone(&core));
        if let Some(old) = replaced {
            warn!(connection = self.id, id = old.id, "channel id resubscribed; closing previous channel");
            old.finish();
        }

        let channel = ServerChannel {
            core: Arc::clone(&core),
            socket: Arc::clone(&self.socket),
            table: Arc::downgrade(&self.channels),
        };
        if endpoint.connections.push(channel) {
            debug!(connection = self.id, channel = %core.name, id = core.id, "accepted channel");
        } else {
            debug!(connection = self.id, channel = %core.name, "endpoint stopped; dropping subscription");
        }
    }

    fn on_closed(&self) {
        let channels: Vec<_> = lock(&self.channels).drain().map(|(_, core)| core).collect();
        debug!(
            connection = self.id,
            channels = channels.len(),
            "physical connection closed"
        );
        for core in channels {
            core.finish();
        }
    }
}

struct ChannelCore {
    id: u64,
    name: String,
    events: EventQueue<ServerChannelEvent>,
    ended: AtomicBool,
}

impl ChannelCore {
    /// Mark ended and queue `Close` behind anything already delivered.
    fn finish(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.events.seal(Some(ServerChannelEvent::Close), false);
    }
}

/// Event observed on a server-side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerChannelEvent {
    /// Payload of one `msg` frame.
    Data(String),
    /// The channel closed. Always the last event.
    Close,
}

/// One accepted client subscription.
///
/// Dropping a channel that has not been ended ends it.
pub struct ServerChannel {
    core: Arc<ChannelCore>,
    socket: Arc<dyn MessageSocket>,
    table: Weak<ChannelTable>,
}

impl ServerChannel {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn is_ended(&self) -> bool {
        self.core.ended.load(Ordering::SeqCst)
    }

    /// Send `data` to the client as one `msg` frame.
    pub fn write(&self, data: &str) -> Result<()> {
        if self.is_ended() {
            return Err(self.closed_error());
        }
        self.socket
            .send(&MuxFrame::msg(self.name(), self.id(), data).encode())
    }

    /// Optionally write `data`, then unsubscribe the client.
    ///
    /// `Close` is queued for this channel's consumer rather than observed
    /// synchronously. Ending twice is a no-op.
    pub fn end(&self, data: Option<&str>) -> Result<()> {
        if self.is_ended() {
            return Ok(());
        }
        let written = match data {
            Some(data) => self.write(data),
            None => Ok(()),
        };
        self.core.ended.store(true, Ordering::SeqCst);
        self.detach();
        let unsubscribed = self
            .socket
            .send(&MuxFrame::uns(self.name(), self.id()).encode());
        self.core.events.seal(Some(ServerChannelEvent::Close), false);
        written.and(unsubscribed)
    }

    /// Drop every pending event, then end the channel.
    pub fn destroy(&self) -> Result<()> {
        self.core.events.seal(None, true);
        self.end(None)
    }

    /// Writes are synchronous, so there is nothing to flush first.
    pub fn destroy_soon(&self) -> Result<()> {
        self.destroy()
    }

    /// Wait for the next event. `None` after `Close` has been delivered.
    pub fn next_event(&self) -> Option<ServerChannelEvent> {
        self.core.events.pop()
    }

    pub fn try_next_event(&self) -> Option<ServerChannelEvent> {
        self.core.events.try_pop()
    }

    pub fn next_event_timeout(&self, timeout: Duration) -> Option<ServerChannelEvent> {
        self.core.events.pop_timeout(timeout)
    }

    fn detach(&self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut table = lock(&table);
        // The id may already belong to a newer subscription.
        if table
            .get(&self.core.id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.core))
        {
            table.remove(&self.core.id);
        }
    }

    fn closed_error(&self) -> MuxError {
        MuxError::ChannelClosed {
            name: self.core.name.clone(),
            id: self.core.id,
        }
    }
}

impl Drop for ServerChannel {
    fn drop(&mut self) {
        if !self.is_ended() {
            let _ = self.end(None);
        }
    }
}

impl fmt::Debug for ServerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerChannel")
            .field("name", &self.core.name)
            .field("id", &self.core.id)
            .field("ended", &self.is_ended())
            .finish()
    }
}
