use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scripted_frame::MessageConfig;
use scripted_transport::{TransportError, UdsListener};
use tracing::{debug, info};

use crate::error::{MuxError, Result};
use crate::server::{ConnectionHandler, MuxServer};
use crate::socket::StreamSocket;

/// How long `serve` sleeps between polls when no client is waiting.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accepts physical connections on a Unix domain socket and hands each one
/// to a [`MuxServer`].
pub struct MuxListener {
    socket: UdsListener,
    server: MuxServer,
    config: MessageConfig,
}

impl MuxListener {
    /// Bind to a Unix domain socket path.
    pub fn bind(path: impl AsRef<Path>, server: MuxServer) -> Result<Self> {
        Self::with_config(path, server, MessageConfig::default())
    }

    /// Bind with explicit message limits for every accepted connection.
    pub fn with_config(
        path: impl AsRef<Path>,
        server: MuxServer,
        config: MessageConfig,
    ) -> Result<Self> {
        let socket = UdsListener::bind(path)?;
        Ok(Self {
            socket,
            server,
            config,
        })
    }

    /// Accept one physical connection and start demultiplexing it.
    pub fn accept(&self) -> Result<Arc<ConnectionHandler>> {
        let stream = self.socket.accept()?;
        if let Some((uid, gid, pid)) = stream.peer_credentials() {
            info!(uid, gid, pid, "accepted connection");
        } else {
            info!("accepted connection");
        }

        let socket = Arc::new(StreamSocket::new(stream, self.config.clone())?);
        let handler = self.server.handle_connection(socket.clone());
        socket.start(handler.sink())?;
        Ok(handler)
    }

    /// Accept connections until `running` is cleared.
    pub fn serve(&self, running: &AtomicBool) -> Result<()> {
        self.socket.set_nonblocking(true)?;
        while running.load(Ordering::SeqCst) {
            match self.accept() {
                Ok(_) => {}
                Err(MuxError::Transport(TransportError::Accept(err)))
                    if err.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }
        debug!(path = ?self.socket.path(), "listener stopped");
        Ok(())
    }

    pub fn server(&self) -> &MuxServer {
        &self.server
    }

    /// Bound socket path.
    pub fn path(&self) -> &Path {
        self.socket.path()
    }
}
