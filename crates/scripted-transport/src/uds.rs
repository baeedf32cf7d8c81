use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// `sockaddr_un.sun_path` capacity: 108 bytes on Linux, 104 elsewhere.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// A listening Unix domain socket bound to a filesystem path.
///
/// The socket file is removed on drop, unless something else has replaced
/// it in the meantime.
pub struct UdsListener {
    listener: UnixListener,
    path: PathBuf,
    identity: (u64, u64),
}

impl UdsListener {
    /// Permission mode applied to freshly bound socket files.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind and listen on `path` with [`Self::DEFAULT_SOCKET_MODE`].
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind and listen on `path` with an explicit permission mode.
    ///
    /// A stale socket left behind by a previous server is replaced. Any other
    /// kind of file at `path` is left alone and reported as a bind error.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        check_path_len(&path)?;
        remove_stale_socket(&path)?;

        let bind_err = |source| TransportError::Bind {
            path: path.clone(),
            source,
        };

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let meta = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");
        Ok(Self {
            listener,
            path,
            identity: (meta.dev(), meta.ino()),
        })
    }

    /// Accept the next incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        // Some platforms hand out accepted sockets in the listener's mode.
        stream.set_nonblocking(false)?;
        debug!(path = ?self.path, "accepted connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Switch `accept` between blocking and non-blocking mode.
    ///
    /// In non-blocking mode an idle `accept` fails with
    /// [`std::io::ErrorKind::WouldBlock`] wrapped in [`TransportError::Accept`].
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener
            .set_nonblocking(nonblocking)
            .map_err(TransportError::Io)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UdsListener {
    fn drop(&mut self) {
        let Ok(meta) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if meta.file_type().is_socket() && (meta.dev(), meta.ino()) == self.identity {
            debug!(path = ?self.path, "removing socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path was replaced; leaving it");
        }
    }
}

/// Connect to a listening Unix domain socket (blocking).
pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(?path, "connected to unix domain socket");
    Ok(IpcStream::from_unix(stream))
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(TransportError::Bind {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if !meta.file_type().is_socket() {
        return Err(TransportError::Bind {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "existing path is not a unix socket",
            ),
        });
    }

    debug!(?path, "removing stale socket");
    std::fs::remove_file(path).map_err(|source| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "scripted-uds-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn bind_accept_connect() {
        let dir = scratch_dir("roundtrip");
        let sock_path = dir.join("s.sock");
        let listener = UdsListener::bind(&sock_path).unwrap();

        let client_path = sock_path.clone();
        let client = std::thread::spawn(move || {
            let mut stream = connect(&client_path).unwrap();
            stream.write_all(b"hello").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        client.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_overlong_path() {
        let long_path = format!("/tmp/{}.sock", "x".repeat(200));
        let result = UdsListener::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn socket_file_is_owner_only() {
        let dir = scratch_dir("mode");
        let sock_path = dir.join("s.sock");
        let _listener = UdsListener::bind(&sock_path).unwrap();

        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rebinding_replaces_stale_socket() {
        let dir = scratch_dir("stale");
        let sock_path = dir.join("s.sock");
        let first = UdsListener::bind(&sock_path).unwrap();
        // Simulate a crashed server: the file stays, the listener is gone.
        std::mem::forget(first);

        let second = UdsListener::bind(&sock_path);
        assert!(second.is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn refuses_to_clobber_regular_file() {
        let dir = scratch_dir("clobber");
        let sock_path = dir.join("notes.txt");
        std::fs::write(&sock_path, b"keep me").unwrap();

        let result = UdsListener::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        assert_eq!(std::fs::read(&sock_path).unwrap(), b"keep me");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn nonblocking_accept_reports_would_block() {
        let dir = scratch_dir("nonblock");
        let listener = UdsListener::bind(dir.join("s.sock")).unwrap();
        listener.set_nonblocking(true).unwrap();

        match listener.accept() {
            Err(TransportError::Accept(err)) => {
                assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock)
            }
            other => panic!("expected WouldBlock, got {other:?}"),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_to_missing_socket_fails() {
        let dir = scratch_dir("missing");
        let result = connect(dir.join("nobody.sock"));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
