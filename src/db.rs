use bytes::Bytes;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug)]
struct Entry {
    value: Bytes,
    /// Absolute unix time in milliseconds.
    expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map_or(false, |t| now >= t)
    }
}

/// Wall clock in unix milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Key/value map with lazy expiry: dead entries are dropped when observed.
#[derive(Default)]
pub struct InMemoryDB {
    map: HashMap<Bytes, Entry>,
}

impl InMemoryDB {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites `key`. Any previous expiry is replaced by `expiry_ms`.
    pub fn set(&mut self, key: Bytes, value: Bytes, expiry_ms: Option<u64>) {
        self.map.insert(
            key,
            Entry {
                value,
                expires_at: expiry_ms,
            },
        );
    }

    pub fn set_with_expiry(&mut self, key: Bytes, value: Bytes, ttl_ms: u64) {
        self.set(key, value, Some(now_ms().saturating_add(ttl_ms)));
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Bytes> {
        self.get_at(key, now_ms())
    }

    fn get_at(&mut self, key: &[u8], now: u64) -> Option<Bytes> {
        let entry = self.map.get(key)?;
        if entry.is_expired(now) {
            self.map.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn keys(&mut self) -> Vec<Bytes> {
        let now = now_ms();
        self.map.retain(|_, e| !e.is_expired(now));
        self.map.keys().cloned().collect()
    }

    /// Drops everything; used before loading a full resync snapshot.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Entries physically present, including expired ones not yet observed.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
