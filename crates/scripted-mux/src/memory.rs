//! An in-process physical connection.
//!
//! [`MemoryDialer`] connects a client [`ConnectionManager`](crate::ConnectionManager)
//! straight to a [`MuxServer`] living in the same process. Each direction is a
//! queue drained by its own pump thread, so delivery is asynchronous exactly
//! like a real socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use scripted_transport::TransportError;

use crate::error::{MuxError, Result};
use crate::event::lock;
use crate::server::MuxServer;
use crate::socket::{Dialer, EventSink, MessageSocket, SocketEvent};

/// `None` is the hang-up marker.
type Envelope = Option<String>;

/// One end of an in-memory connection.
pub struct MemorySocket {
    to_peer: Mutex<Sender<Envelope>>,
    to_self: Mutex<Sender<Envelope>>,
    closed: Arc<AtomicBool>,
}

impl MessageSocket for MemorySocket {
    fn send(&self, text: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MuxError::Disconnected);
        }
        lock(&self.to_peer)
            .send(Some(text.to_string()))
            .map_err(|_| MuxError::Disconnected)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = lock(&self.to_peer).send(None);
            let _ = lock(&self.to_self).send(None);
        }
    }
}

/// A socket plus the inbound queue its pump will drain.
struct MemoryEnd {
    socket: Arc<MemorySocket>,
    inbound: Receiver<Envelope>,
}

impl MemoryEnd {
    fn pair() -> (Self, Self) {
        let (to_a, a_inbound) = mpsc::channel();
        let (to_b, b_inbound) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));

        let a = MemorySocket {
            to_peer: Mutex::new(to_b.clone()),
            to_self: Mutex::new(to_a.clone()),
            closed: Arc::clone(&closed),
        };
        let b = MemorySocket {
            to_peer: Mutex::new(to_a),
            to_self: Mutex::new(to_b),
            closed,
        };
        (
            Self {
                socket: Arc::new(a),
                inbound: a_inbound,
            },
            Self {
                socket: Arc::new(b),
                inbound: b_inbound,
            },
        )
    }

    fn start(self, events: EventSink) -> Result<(Arc<MemorySocket>, JoinHandle<()>)> {
        let inbound = self.inbound;
        let handle = std::thread::Builder::new()
            .name("scripted-memory-pump".to_string())
            .spawn(move || {
                events(SocketEvent::Open);
                while let Ok(Some(text)) = inbound.recv() {
                    events(SocketEvent::Message(text));
                }
                events(SocketEvent::Closed);
            })
            .map_err(|err| MuxError::Transport(TransportError::Io(err)))?;
        Ok((self.socket, handle))
    }
}

/// Dials in-process connections to a [`MuxServer`].
#[derive(Clone)]
pub struct MemoryDialer {
    server: MuxServer,
}

impl MemoryDialer {
    pub fn new(server: MuxServer) -> Self {
        Self { server }
    }
}

impl Dialer for MemoryDialer {
    fn dial(&self, events: EventSink) -> Result<Arc<dyn MessageSocket>> {
        let (client, server) = MemoryEnd::pair();
        let handler = self.server.handle_connection(server.socket.clone());
        server.start(handler.sink())?;
        let (socket, _pump) = client.start(events)?;
        Ok(socket)
    }
}
