//! Connection admission and per-client activity bookkeeping.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Groups every concurrent connection from one source address.
pub type ClientKey = String;

/// Opaque handle for one admitted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

/// Per-key state. Invariant: a key is present in `connections` iff its set
/// is non-empty, and then it also has a `last_activity` stamp.
#[derive(Default)]
struct Inner {
    connections: HashMap<ClientKey, HashSet<ConnectionId>>,
    last_activity: HashMap<ClientKey, Instant>,
}

/// Tracks open connections per source address and enforces the admission cap.
///
/// Both maps live behind one mutex. No operation does I/O while holding it.
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    max_per_key: usize,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(max_per_key: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_per_key,
            next_id: AtomicU64::new(1),
        }
    }

    /// Admit a new connection for `key`. Returns `None` when the key already
    /// holds the maximum; a failed admit mutates nothing.
    pub fn admit(&self, key: &str) -> Option<ConnectionId> {
        let mut inner = self.inner.lock();
        let open = inner.connections.get(key).map_or(0, HashSet::len);
        if open >= self.max_per_key {
            return None;
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let Inner { connections, last_activity } = &mut *inner;
        connections.entry(key.to_owned()).or_default().insert(id);
        last_activity.insert(key.to_owned(), Instant::now());
        Some(id)
    }

    /// Remove one connection handle. Drops the key entirely when its set
    /// empties. Tolerates a key the reaper already removed.
    pub fn release(&self, key: &str, id: ConnectionId) {
        let mut inner = self.inner.lock();
        let Inner { connections, last_activity } = &mut *inner;
        if let Some(set) = connections.get_mut(key) {
            set.remove(&id);
            if set.is_empty() {
                connections.remove(key);
                last_activity.remove(key);
            }
        }
    }

    /// Stamp the key's last activity. Only live keys are touched; a key the
    /// reaper removed is not resurrected by a straggling stream.
    pub fn touch(&self, key: &str) {
        let mut inner = self.inner.lock();
        if let Some(at) = inner.last_activity.get_mut(key) {
            *at = Instant::now();
        }
    }

    /// Read-only copy of the activity map. Holds the lock for the copy only.
    pub fn snapshot(&self) -> HashMap<ClientKey, Instant> {
        self.inner.lock().last_activity.clone()
    }

    /// Remove every key whose last activity is strictly older than
    /// `older_than`. Staleness is re-checked under the lock so a concurrent
    /// `touch` wins. Returns the removed keys.
    pub fn remove_idle(&self, older_than: Duration) -> Vec<ClientKey> {
        let now = Instant::now();
        let stale: Vec<ClientKey> = self
            .snapshot()
            .into_iter()
            .filter(|(_, at)| now.duration_since(*at) > older_than)
            .map(|(key, _)| key)
            .collect();

        let mut removed = Vec::new();
        let mut inner = self.inner.lock();
        let Inner { connections, last_activity } = &mut *inner;
        for key in stale {
            let still_stale = last_activity
                .get(&key)
                .is_some_and(|at| now.duration_since(*at) > older_than);
            if still_stale {
                connections.remove(&key);
                last_activity.remove(&key);
                removed.push(key);
            }
        }
        removed
    }

    /// Open connections for one key.
    pub fn open_connections(&self, key: &str) -> usize {
        self.inner.lock().connections.get(key).map_or(0, HashSet::len)
    }

    /// Number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &str, age: Duration) {
        let past = Instant::now()
            .checked_sub(age)
            .expect("test age exceeds clock range");
        let mut inner = self.inner.lock();
        if let Some(at) = inner.last_activity.get_mut(key) {
            *at = past;
        }
    }
}
