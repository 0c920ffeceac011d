//! Session registry (spec.md §4.2).
//!
//! A session is created by SETUP and lives until TEARDOWN, a connection
//! reset, or the TCP idle timeout purges it. The registry keeps two
//! indexes — by identifier and by the peer's last-seen address — behind a
//! single exclusive lock, since every mutation (create/find/purge/delete)
//! is rare enough next to the RTP data path that lock contention doesn't
//! matter.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::rtp::RtpSender;

/// Default session timeout advertised in the `Session` response header's
/// `;timeout=` suffix (kept from the teacher's `session_header_value`;
/// spec.md §9 only constrains the identifier's value, not this suffix).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session playback state (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Ready,
    Playing,
    Recording,
}

/// A single RTSP session. Cheaply clonable; interior state is behind the
/// registry's lock, not its own, since every field changes only while the
/// registry holds it.
pub struct Session {
    pub identifier: String,
    pub state: SessionState,
    pub last_seen: SocketAddr,
    pub sender: Option<RtpSender>,
}

impl Session {
    /// The `Session` response header value, with the teacher's
    /// `;timeout=` suffix.
    pub fn header_value(&self) -> String {
        format!("{};timeout={}", self.identifier, DEFAULT_SESSION_TIMEOUT_SECS)
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

struct Inner {
    by_identifier: HashMap<String, SessionHandle>,
    by_address: HashMap<SocketAddr, Vec<String>>,
}

/// Registry of active sessions, indexed by identifier and by peer address.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            inner: Arc::new(Mutex::new(Inner {
                by_identifier: HashMap::new(),
                by_address: HashMap::new(),
            })),
        }
    }

    /// Create a session in [`SessionState::Init`] for `peer`, with a fresh
    /// UUID identifier.
    pub fn create(&self, peer: SocketAddr) -> SessionHandle {
        let identifier = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(Session {
            identifier: identifier.clone(),
            state: SessionState::Init,
            last_seen: peer,
            sender: None,
        }));

        let mut inner = self.inner.lock();
        inner.by_identifier.insert(identifier.clone(), session.clone());
        inner.by_address.entry(peer).or_default().push(identifier.clone());

        tracing::info!(session_id = %identifier, %peer, "session created");
        session
    }

    /// Look up a session by identifier.
    pub fn find(&self, identifier: &str) -> Result<SessionHandle> {
        self.inner
            .lock()
            .by_identifier
            .get(identifier)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(identifier.to_string()))
    }

    /// Update a session's last-seen peer address, moving it between the
    /// by-address buckets.
    pub fn touch(&self, identifier: &str, peer: SocketAddr) {
        let mut inner = self.inner.lock();
        let Some(handle) = inner.by_identifier.get(identifier).cloned() else {
            return;
        };
        let previous = {
            let mut session = handle.lock();
            let previous = session.last_seen;
            session.last_seen = peer;
            previous
        };
        if previous == peer {
            return;
        }
        if let Some(bucket) = inner.by_address.get_mut(&previous) {
            bucket.retain(|id| id != identifier);
            if bucket.is_empty() {
                inner.by_address.remove(&previous);
            }
        }
        inner.by_address.entry(peer).or_default().push(identifier.to_string());
    }

    /// Remove every session last seen from `address` (spec.md §4.4: TCP
    /// idle timeout or connection reset).
    pub fn purge(&self, address: SocketAddr) -> usize {
        let mut inner = self.inner.lock();
        let Some(ids) = inner.by_address.remove(&address) else {
            return 0;
        };
        for id in &ids {
            inner.by_identifier.remove(id);
        }
        if !ids.is_empty() {
            tracing::info!(%address, count = ids.len(), "purged sessions for peer");
        }
        ids.len()
    }

    /// Remove a single session by identifier (spec.md §4.3: TEARDOWN).
    pub fn delete(&self, identifier: &str) -> Option<SessionHandle> {
        let mut inner = self.inner.lock();
        let session = inner.by_identifier.remove(identifier)?;
        let peer = session.lock().last_seen;
        if let Some(bucket) = inner.by_address.get_mut(&peer) {
            bucket.retain(|id| id != identifier);
            if bucket.is_empty() {
                inner.by_address.remove(&peer);
            }
        }
        tracing::info!(session_id = %identifier, "session deleted");
        Some(session)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn create_then_find_round_trips() {
        let registry = SessionRegistry::new();
        let session = registry.create(addr(1));
        let identifier = session.lock().identifier.clone();
        assert!(registry.find(&identifier).is_ok());
    }

    #[test]
    fn find_missing_is_session_not_found() {
        let registry = SessionRegistry::new();
        assert!(matches!(registry.find("nope"), Err(Error::SessionNotFound(_))));
    }

    #[test]
    fn purge_removes_every_session_for_address() {
        let registry = SessionRegistry::new();
        let a = registry.create(addr(1));
        let b = registry.create(addr(1));
        registry.create(addr(2));

        let removed = registry.purge(addr(1));
        assert_eq!(removed, 2);
        assert!(registry.find(&a.lock().identifier).is_err());
        assert!(registry.find(&b.lock().identifier).is_err());
    }

    #[test]
    fn delete_removes_from_both_indexes() {
        let registry = SessionRegistry::new();
        let session = registry.create(addr(1));
        let identifier = session.lock().identifier.clone();

        assert!(registry.delete(&identifier).is_some());
        assert!(registry.find(&identifier).is_err());
        assert_eq!(registry.purge(addr(1)), 0);
    }

    #[test]
    fn touch_moves_session_between_address_buckets() {
        let registry = SessionRegistry::new();
        let session = registry.create(addr(1));
        let identifier = session.lock().identifier.clone();

        registry.touch(&identifier, addr(2));
        assert_eq!(registry.purge(addr(1)), 0);
        assert_eq!(registry.purge(addr(2)), 1);
    }
}
