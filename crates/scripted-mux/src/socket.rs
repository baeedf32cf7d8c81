//! The physical connection abstraction.
//!
//! A physical connection moves discrete text messages in both directions.
//! Its owner sends through [`MessageSocket`] and observes it through an
//! [`EventSink`] that receives [`SocketEvent`]s from the connection's pump
//! thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use scripted_frame::{FrameError, MessageConfig, MessageReader, MessageWriter};
use scripted_transport::{IpcStream, TransportError};
use tracing::{debug, warn};

use crate::error::{MuxError, Result};
use crate::event::lock;

/// Something that happened on a physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The connection is ready to carry messages. Delivered once, first.
    Open,
    /// One complete text message arrived.
    Message(String),
    /// The connection is gone. Delivered once, last.
    Closed,
}

/// Receives the events of one physical connection, in order.
pub type EventSink = Arc<dyn Fn(SocketEvent) + Send + Sync>;

/// The sending half of a physical connection.
pub trait MessageSocket: Send + Sync {
    /// Send one text message.
    fn send(&self, text: &str) -> Result<()>;

    /// Tear the connection down. The sink still receives `Closed`.
    fn close(&self);
}

/// Establishes physical connections on demand.
pub trait Dialer: Send + Sync {
    /// Open a new connection whose events go to `events`.
    ///
    /// Implementations must not call `events` before returning; `Open` is
    /// delivered later from the connection's own thread.
    fn dial(&self, events: EventSink) -> Result<Arc<dyn MessageSocket>>;
}

/// A physical connection over a local byte stream.
///
/// Built in two steps so the owner can register the socket before any
/// event can reach it: [`StreamSocket::new`], then [`StreamSocket::start`].
pub struct StreamSocket {
    writer: Mutex<MessageWriter<IpcStream>>,
    reader: Mutex<Option<MessageReader<IpcStream>>>,
    control: IpcStream,
    closed: AtomicBool,
}

impl StreamSocket {
    pub fn new(stream: IpcStream, config: MessageConfig) -> Result<Self> {
        let reader = MessageReader::for_stream(stream.try_clone()?, config.clone())?;
        let control = stream.try_clone()?;
        let writer = MessageWriter::for_stream(stream, config)?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(Some(reader)),
            control,
            closed: AtomicBool::new(false),
        })
    }

    /// Spawn the pump thread that feeds `events`. May only be called once.
    pub fn start(&self, events: EventSink) -> Result<JoinHandle<()>> {
        let reader = lock(&self.reader).take().ok_or(MuxError::Disconnected)?;
        std::thread::Builder::new()
            .name("scripted-pump".to_string())
            .spawn(move || pump(reader, events))
            .map_err(|err| MuxError::Transport(TransportError::Io(err)))
    }
}

impl MessageSocket for StreamSocket {
    fn send(&self, text: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MuxError::Disconnected);
        }
        lock(&self.writer).send(text)?;
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Err(err) = self.control.shutdown() {
                debug!(error = %err, "stream shutdown failed");
            }
        }
    }
}

fn pump(mut reader: MessageReader<IpcStream>, events: EventSink) {
    events(SocketEvent::Open);
    loop {
        match reader.read_message() {
            Ok(text) => events(SocketEvent::Message(text)),
            Err(err) if err.is_recoverable() => {
                warn!(error = %err, "dropping undecodable message");
            }
            Err(FrameError::ConnectionClosed) => {
                debug!("physical connection reached EOF");
                break;
            }
            Err(err) => {
                warn!(error = %err, "physical connection failed");
                break;
            }
        }
    }
    events(SocketEvent::Closed);
}

/// Dials a Unix domain socket for every new physical connection.
#[cfg(unix)]
pub struct UdsDialer {
    path: PathBuf,
    config: MessageConfig,
}

#[cfg(unix)]
impl UdsDialer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, MessageConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: MessageConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }
}

#[cfg(unix)]
impl Dialer for UdsDialer {
    fn dial(&self, events: EventSink) -> Result<Arc<dyn MessageSocket>> {
        let stream = scripted_transport::connect(&self.path)?;
        let socket = Arc::new(StreamSocket::new(stream, self.config.clone())?);
        socket.start(events)?;
        debug!(path = ?self.path, "dialed physical connection");
        Ok(socket)
    }
}
