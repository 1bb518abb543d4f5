use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::UserId;

/// Frames buffered per connection before new frames for it are dropped.
pub const OUTBOUND_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The writer is not keeping up; the frame was dropped.
    Full,
    /// The writer is gone.
    Closed,
}

/// Sending side of one live connection.
///
/// Frames go through a bounded queue. The supersede signal lives outside
/// that queue, so raising it never depends on the writer having room.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<Bytes>,
    superseded: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    pub fn channel() -> (Self, mpsc::Receiver<Bytes>) {
        Self::with_capacity(OUTBOUND_QUEUE)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (superseded, _) = watch::channel(false);
        (
            Self {
                id: Uuid::new_v4(),
                tx,
                superseded: Arc::new(superseded),
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queues a binary frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> Result<(), SendFailure> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Tells the writer to close the socket, whatever state its queue is in.
    pub fn close(&self) {
        self.superseded.send_replace(true);
    }

    /// Watches for [`close`](Self::close). Subscribe before the handle is
    /// admitted; a receiver taken after the signal was raised sees it as
    /// already seen.
    pub fn superseded(&self) -> watch::Receiver<bool> {
        self.superseded.subscribe()
    }

    pub fn is_superseded(&self) -> bool {
        *self.superseded.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Process-wide map from user to their one live connection.
///
/// Every operation takes the same lock, so register/lookup/unregister are
/// atomic with respect to each other. The map itself is never handed out.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<UserId, ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<UserId, ConnectionHandle>> {
        // Values are plain handles; a panic elsewhere cannot leave one half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the user's handle. Returns the replaced one.
    pub fn register(&self, user_id: UserId, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.map().insert(user_id, handle)
    }

    pub fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.map().get(&user_id).cloned()
    }

    /// Removes the user's handle, whichever connection it belongs to. Idempotent.
    pub fn unregister(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.map().remove(&user_id)
    }

    /// Removes the user's handle only if it still belongs to `connection_id`.
    pub fn unregister_connection(&self, user_id: UserId, connection_id: Uuid) -> bool {
        let mut map = self.map();
        match map.get(&user_id) {
            Some(current) if current.id == connection_id => {
                map.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Registers a freshly admitted connection, force-closes the one it
    /// supersedes, and returns a guard that unregisters it on drop.
    pub fn admit(&self, user_id: UserId, handle: ConnectionHandle) -> Registration {
        let connection_id = handle.id();
        if let Some(previous) = self.register(user_id, handle) {
            info!(
                "{} reconnected, closing superseded connection {}",
                user_id,
                previous.id()
            );
            previous.close();
        }
        Registration {
            registry: self.clone(),
            user_id,
            connection_id,
        }
    }
}

/// Keeps a connection registered for as long as it lives.
pub struct Registration {
    registry: ConnectionRegistry,
    user_id: UserId,
    connection_id: Uuid,
}

impl Registration {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.registry.unregister_connection(self.user_id, self.connection_id) {
            debug!("{} unregistered connection {}", self.user_id, self.connection_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_returns_latest_registration() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (first, _rx1) = ConnectionHandle::channel();
        let (second, _rx2) = ConnectionHandle::channel();

        assert!(registry.lookup(user).is_none());
        assert!(registry.register(user, first.clone()).is_none());
        let replaced = registry.register(user, second.clone()).unwrap();

        assert_eq!(replaced.id(), first.id());
        assert_eq!(registry.lookup(user).unwrap().id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (handle, _rx) = ConnectionHandle::channel();
        registry.register(user, handle);

        assert!(registry.unregister(user).is_some());
        assert!(registry.unregister(user).is_none());
        assert!(registry.lookup(user).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_connection_cannot_unregister_successor() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (old, _rx1) = ConnectionHandle::channel();
        let (new, _rx2) = ConnectionHandle::channel();
        registry.register(user, old.clone());
        registry.register(user, new.clone());

        assert!(!registry.unregister_connection(user, old.id()));
        assert_eq!(registry.lookup(user).unwrap().id(), new.id());
        assert!(registry.unregister_connection(user, new.id()));
        assert!(registry.lookup(user).is_none());
    }

    #[test]
    fn test_admit_closes_superseded_connection() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (old, _old_rx) = ConnectionHandle::channel();
        let (new, _new_rx) = ConnectionHandle::channel();
        let old_signal = old.superseded();
        let new_signal = new.superseded();

        let _first = registry.admit(user, old);
        let _second = registry.admit(user, new);

        assert!(old_signal.has_changed().unwrap());
        assert!(*old_signal.borrow());
        assert!(!new_signal.has_changed().unwrap());
    }

    #[test]
    fn test_supersede_reaches_connection_with_full_queue() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (old, mut old_rx) = ConnectionHandle::with_capacity(1);
        let stalled = old.clone();
        let old_signal = old.superseded();
        let _first = registry.admit(user, old);

        assert_eq!(stalled.try_send(Bytes::from_static(b"pending")), Ok(()));
        assert_eq!(stalled.try_send(Bytes::from_static(b"more")), Err(SendFailure::Full));

        let (new, _new_rx) = ConnectionHandle::channel();
        let _second = registry.admit(user, new);

        assert!(stalled.is_superseded());
        assert!(old_signal.has_changed().unwrap());
        // The queued frame is untouched; the close does not compete for room.
        assert_eq!(old_rx.try_recv().unwrap(), Bytes::from_static(b"pending"));
        assert!(old_rx.try_recv().is_err());
    }

    #[test]
    fn test_registration_guard_cleans_up_only_its_own_entry() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (old, _rx1) = ConnectionHandle::channel();
        let (new, _rx2) = ConnectionHandle::channel();
        let new_id = new.id();

        let first = registry.admit(user, old);
        let second = registry.admit(user, new);
        assert_eq!(second.user_id(), user);

        drop(first);
        assert_eq!(registry.lookup(user).unwrap().id(), new_id);

        drop(second);
        assert!(registry.lookup(user).is_none());
    }

    #[test]
    fn test_try_send_reports_full_and_closed() {
        let (handle, mut rx) = ConnectionHandle::with_capacity(1);
        assert_eq!(handle.try_send(Bytes::from_static(b"a")), Ok(()));
        assert_eq!(handle.try_send(Bytes::from_static(b"b")), Err(SendFailure::Full));

        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));
        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(handle.try_send(Bytes::from_static(b"c")), Err(SendFailure::Closed));
    }

    #[test]
    fn test_concurrent_register_unregister_loses_nothing() {
        let registry = ConnectionRegistry::new();
        let users: Vec<UserId> = (0..16).map(|_| UserId::new()).collect();

        // Every thread owns two users: it registers both many times and
        // finally leaves the even one registered and the odd one removed.
        let expected: Vec<(UserId, Uuid)> = std::thread::scope(|scope| {
            let workers: Vec<_> = users
                .chunks(2)
                .map(|pair| {
                    let registry = registry.clone();
                    scope.spawn(move || {
                        let mut last = None;
                        let mut receivers = Vec::new();
                        for _ in 0..200 {
                            for user in pair {
                                let (handle, rx) = ConnectionHandle::channel();
                                receivers.push(rx);
                                if *user == pair[0] {
                                    last = Some(handle.id());
                                }
                                registry.register(*user, handle);
                                let _ = registry.lookup(*user);
                            }
                            registry.unregister(pair[1]);
                        }
                        (pair[0], last.unwrap())
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), expected.len());
        for (user, handle_id) in expected {
            assert_eq!(registry.lookup(user).unwrap().id(), handle_id);
        }
        for odd in users.iter().skip(1).step_by(2) {
            assert!(registry.lookup(*odd).is_none());
        }
    }
}
