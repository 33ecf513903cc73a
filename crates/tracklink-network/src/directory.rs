//! phone id → live connection map.
//!
//! At most one connection per phone id. Installing a second one cancels the
//! first (last writer wins); the caller can wait on the returned handle until
//! the old connection has finished closing. The lock is held only for map
//! operations.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;
use tracklink_core::PhoneId;

/// Control handle of one connection task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    connection_id: u64,
    cancel: CancellationToken,
    closed: CancellationToken,
}

impl SessionHandle {
    pub fn new(connection_id: u64) -> Self {
        Self {
            connection_id,
            cancel: CancellationToken::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Resolves once another connection has taken over this phone id.
    pub fn superseded(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_superseded(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Called by the connection task after its offline event went out.
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}

#[derive(Debug, Default)]
pub struct SessionDirectory {
    sessions: Mutex<HashMap<PhoneId, SessionHandle>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the owner of `phone`.
    ///
    /// Returns the previous owner, already cancelled, if there was one.
    pub fn install(&self, phone: PhoneId, handle: SessionHandle) -> Option<SessionHandle> {
        let connection_id = handle.connection_id;
        let previous = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(phone, handle)?;

        if previous.connection_id == connection_id {
            return None;
        }
        previous.cancel.cancel();
        info!(
            phone = %phone,
            old_connection = previous.connection_id,
            new_connection = connection_id,
            "Superseded existing session"
        );
        Some(previous)
    }

    /// Remove the entry only if `connection_id` still owns it.
    pub fn remove_if(&self, phone: PhoneId, connection_id: u64) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(&phone) {
            Some(handle) if handle.connection_id == connection_id => {
                sessions.remove(&phone);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, phone: &PhoneId) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(phone)
    }

    pub fn connection_of(&self, phone: &PhoneId) -> Option<u64> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(phone)
            .map(|h| h.connection_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phone(s: &str) -> PhoneId {
        PhoneId::new(s).unwrap()
    }

    #[test]
    fn test_install_and_remove() {
        let dir = SessionDirectory::new();
        let p = phone("123456789012");
        assert!(dir.install(p, SessionHandle::new(1)).is_none());
        assert!(dir.contains(&p));
        assert_eq!(dir.len(), 1);
        assert!(dir.remove_if(p, 1));
        assert!(dir.is_empty());
    }

    #[test]
    fn test_second_install_cancels_first() {
        let dir = SessionDirectory::new();
        let p = phone("123456789012");
        let first = SessionHandle::new(1);
        let second = SessionHandle::new(2);

        dir.install(p, first.clone());
        let old = dir.install(p, second.clone()).unwrap();

        assert_eq!(old.connection_id(), 1);
        assert!(first.is_superseded());
        assert!(!second.is_superseded());
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.connection_of(&p), Some(2));
    }

    #[test]
    fn test_reinstall_same_connection_is_noop() {
        let dir = SessionDirectory::new();
        let p = phone("123456789012");
        let handle = SessionHandle::new(1);
        dir.install(p, handle.clone());
        assert!(dir.install(p, handle.clone()).is_none());
        assert!(!handle.is_superseded());
    }

    #[test]
    fn test_stale_remove_keeps_new_owner() {
        let dir = SessionDirectory::new();
        let p = phone("123456789012");
        dir.install(p, SessionHandle::new(1));
        dir.install(p, SessionHandle::new(2));

        assert!(!dir.remove_if(p, 1));
        assert_eq!(dir.connection_of(&p), Some(2));
    }

    #[test]
    fn test_distinct_phones_coexist() {
        let dir = SessionDirectory::new();
        dir.install(phone("000000000001"), SessionHandle::new(1));
        dir.install(phone("000000000002"), SessionHandle::new(2));
        assert_eq!(dir.len(), 2);
    }

    #[tokio::test]
    async fn test_closed_resolves_after_mark() {
        let handle = SessionHandle::new(1);
        let waiter = handle.clone();
        handle.mark_closed();
        waiter.closed().await;
    }
}
