//! The server's front door: a unix socket under the runtime directory,
//! with flock-guarded auto-start so concurrent clients race safely.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::UnixStream;

use crate::error::CyError;

/// Socket names must match `^[A-Za-z0-9_-]+$`.
pub fn valid_socket_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(dir) = std::env::var("TMPDIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from("/tmp")
}

pub fn socket_path(name: &str) -> Result<PathBuf, CyError> {
    if !valid_socket_name(name) {
        return Err(CyError::Invalid(format!(
            "invalid socket name {:?}: must be alphanumeric, '-' or '_'",
            name
        )));
    }
    Ok(runtime_dir().join(format!("cy-{}", name)))
}

/// An exclusive flock on `{socket}.lock`; released when dropped.
pub struct SocketLock {
    _file: File,
}

pub enum LockResult {
    Acquired(SocketLock),
    /// Another process holds the lock (it is probably starting the server).
    Busy,
}

impl SocketLock {
    pub fn acquire(socket: &PathBuf) -> Result<LockResult, CyError> {
        let lock_path = socket.with_extension("lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(LockResult::Acquired(SocketLock { _file: file }));
        }

        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(LockResult::Busy);
        }
        Err(err.into())
    }
}

/// How long to keep retrying the connect after starting a server.
const START_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Connect to the socket, auto-starting the server when it is missing.
///
/// This mimics tmux's `client_connect`: the starter runs under an
/// exclusive flock, and a lock holder always retries the connect once
/// after acquiring the lock, because another client may have started the
/// server between our connect and our flock.
pub async fn connect(
    path: &PathBuf,
    starter: impl Fn() -> Result<(), CyError>,
) -> Result<UnixStream, CyError> {
    let mut lock: Option<SocketLock> = None;
    let mut started_at: Option<std::time::Instant> = None;

    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) => {}
            Err(err) => return Err(err.into()),
        }

        if let Some(started) = started_at {
            if started.elapsed() > START_TIMEOUT {
                return Err(CyError::Timeout("server did not come up".into()));
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
            continue;
        }

        if lock.is_none() {
            match SocketLock::acquire(path)? {
                LockResult::Acquired(acquired) => {
                    lock = Some(acquired);
                    // Retry at least once while holding the lock.
                    continue;
                }
                LockResult::Busy => {
                    tokio::time::sleep(RETRY_INTERVAL).await;
                    continue;
                }
            }
        }

        // We hold the lock and the socket is still dead: it is ours to
        // start. Clear any stale socket file first.
        match std::fs::remove_file(path) {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        starter()?;
        started_at = Some(std::time::Instant::now());
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_name_validation() {
        assert!(valid_socket_name("default"));
        assert!(valid_socket_name("my-session_2"));
        assert!(!valid_socket_name(""));
        assert!(!valid_socket_name("has space"));
        assert!(!valid_socket_name("slash/y"));
    }

    #[test]
    fn lock_is_exclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("cy-test");

        let first = SocketLock::acquire(&socket).expect("first acquire");
        assert!(matches!(first, LockResult::Acquired(_)));

        let second = SocketLock::acquire(&socket).expect("second acquire");
        assert!(matches!(second, LockResult::Busy));

        drop(first);
        let third = SocketLock::acquire(&socket).expect("third acquire");
        assert!(matches!(third, LockResult::Acquired(_)));
    }

    #[tokio::test]
    async fn connect_starts_server_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cy-race");

        let starts = Arc::new(AtomicUsize::new(0));
        let bind_path = path.clone();
        let starts_counter = starts.clone();
        let starter = move || {
            starts_counter.fetch_add(1, Ordering::SeqCst);
            let listener = std::os::unix::net::UnixListener::bind(&bind_path)?;
            std::thread::spawn(move || {
                while let Ok((stream, _)) = listener.accept() {
                    // Hold connections open like a real server would.
                    std::mem::forget(stream);
                }
            });
            Ok(())
        };

        // Two concurrent clients race for a missing socket.
        let a = connect(&path, starter.clone());
        let b = connect(&path, starter.clone());
        let (a, b) = tokio::join!(a, b);
        a.expect("first client connected");
        b.expect("second client connected");

        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }
}
