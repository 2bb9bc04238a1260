//! In-memory versioned key/value store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::backends::{KvStore, Versioned};
use crate::core::EngineError;

struct Entry {
    value: String,
    version: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

struct Inner {
    next_version: u64,
    entries: HashMap<String, Entry>,
}

impl Inner {
    fn live(&mut self, key: &str, now: Instant) -> Option<&Entry> {
        if self.entries.get(key).is_some_and(|e| !e.live(now)) {
            self.entries.remove(key);
        }
        self.entries.get(key)
    }

    fn prune(&mut self, now: Instant) {
        self.entries.retain(|_, e| e.live(now));
    }

    fn write(&mut self, key: &str, value: String, expires_at: Option<Instant>) {
        self.next_version += 1;
        let version = self.next_version;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at,
            },
        );
    }
}

/// Process-local stand-in for the shared store, with the same conditional-write contract.
pub struct InMemoryKvStore {
    inner: Mutex<Inner>,
}

impl InMemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_version: 0,
                entries: HashMap::new(),
            }),
        }
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, EngineError> {
        let mut inner = self.inner.lock();
        Ok(inner.live(key, Instant::now()).map(|e| Versioned {
            value: e.value.clone(),
            version: e.version,
        }))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: u64,
        value: String,
    ) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock();
        let current = inner.live(key, Instant::now()).map_or(0, |e| e.version);
        if current != expected {
            return Ok(false);
        }
        inner.write(key, value, None);
        Ok(true)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), EngineError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.prune(now);
        inner.write(key, value, Some(now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        self.inner.lock().entries.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, EngineError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.prune(now);
        let mut found: Vec<(String, String)> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }
}
