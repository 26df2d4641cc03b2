use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{DecodeFailure, InternalError, RequestError};

/// Why a slave session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// the peer closed the connection
    PeerClosed,
    /// the connection failed, e.g. it was reset by the peer
    Io(std::io::ErrorKind),
    /// a frame or PDU could not be decoded
    DecodeFailure(DecodeFailure),
    /// a response could not be serialized
    Internal(InternalError),
    /// the server was shut down
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Io(kind) => write!(f, "i/o error: {kind}"),
            CloseReason::DecodeFailure(DecodeFailure::Frame(err)) => {
                write!(f, "bad frame: {err}")
            }
            CloseReason::DecodeFailure(DecodeFailure::Pdu(err)) => write!(f, "bad request: {err}"),
            CloseReason::Internal(err) => write!(f, "internal error: {err}"),
            CloseReason::Shutdown => f.write_str("server shutdown"),
        }
    }
}

impl From<RequestError> for CloseReason {
    fn from(err: RequestError) -> Self {
        if let Some(failure) = err.as_decode_failure() {
            return CloseReason::DecodeFailure(failure);
        }
        match err {
            RequestError::Io(std::io::ErrorKind::UnexpectedEof) => CloseReason::PeerClosed,
            RequestError::Io(kind) => CloseReason::Io(kind),
            RequestError::Internal(err) => CloseReason::Internal(err),
            _ => CloseReason::Shutdown,
        }
    }
}

/// Lifecycle notifications for the connections of a TCP slave
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// a connection was accepted and its session started
    Accepted(SocketAddr),
    /// a session ended and was removed from the connection table
    Closed {
        /// identity of the peer
        remote: SocketAddr,
        /// why the session ended
        reason: CloseReason,
    },
}

struct Entry {
    id: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Sessions {
    next_id: u64,
    entries: BTreeMap<SocketAddr, Entry>,
}

impl Sessions {
    fn get_next_id(&mut self) -> u64 {
        let ret = self.next_id;
        self.next_id += 1;
        ret
    }
}

/// Active sessions of a TCP slave keyed by remote address
///
/// Events are published while the table lock is held, so subscribers see them in the same
/// order as the table changes.
pub(crate) struct ConnectionTable {
    sessions: Mutex<Sessions>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionTable {
    pub(crate) fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            sessions: Mutex::new(Sessions::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// register a session, `spawn` receives the id the session must present on removal
    ///
    /// the lock is held while spawning so the session cannot remove itself before it is inserted
    pub(crate) fn add<F>(&self, remote: SocketAddr, spawn: F)
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let mut sessions = self.lock();
        let id = sessions.get_next_id();
        let task = spawn(id);
        if sessions.entries.insert(remote, Entry { id, task }).is_some() {
            tracing::warn!("replaced stale session entry for {}", remote);
        }
        // no receivers is not an error
        let _ = self.events.send(ConnectionEvent::Accepted(remote));
    }

    /// remove a session if it is still the one registered under `remote`
    pub(crate) fn remove(&self, remote: SocketAddr, id: u64, reason: CloseReason) {
        let mut sessions = self.lock();
        match sessions.entries.get(&remote) {
            Some(entry) if entry.id == id => {
                sessions.entries.remove(&remote);
                let _ = self.events.send(ConnectionEvent::Closed { remote, reason });
            }
            _ => {}
        }
    }

    /// abort every session and empty the table
    pub(crate) fn shutdown(&self) {
        let mut sessions = self.lock();
        let entries = std::mem::take(&mut sessions.entries);
        for (remote, entry) in entries {
            entry.task.abort();
            let _ = self.events.send(ConnectionEvent::Closed {
                remote,
                reason: CloseReason::Shutdown,
            });
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub(crate) fn remotes(&self) -> Vec<SocketAddr> {
        self.lock().entries.keys().copied().collect()
    }
}

impl std::fmt::Debug for ConnectionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTable")
            .field("connections", &self.len())
            .finish()
    }
}
