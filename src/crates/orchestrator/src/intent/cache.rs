//! Bounded TTL cache for gray-zone classifier verdicts.

use crate::clock::{to_chrono, SharedClock};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tooling::serialization::{normalize_text, sha256_hex};

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct Entry {
    is_image: bool,
    inserted_at: DateTime<Local>,
}

#[derive(Debug)]
pub struct IntentCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    capacity: usize,
    clock: SharedClock,
}

impl IntentCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: DEFAULT_TTL,
            capacity: DEFAULT_CAPACITY,
            clock,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// SHA-256 of the normalized message
    pub fn key(message: &str) -> String {
        sha256_hex(&normalize_text(message))
    }

    pub fn get(&self, message: &str) -> Option<bool> {
        let key = Self::key(message);
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if now - entry.inserted_at < to_chrono(self.ttl) => Some(entry.is_image),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a verdict; purges expired entries and evicts the oldest when full
    pub fn insert(&self, message: &str, is_image: bool) {
        let now = self.clock.now();
        let ttl = to_chrono(self.ttl);
        let mut entries = self.entries.lock();

        entries.retain(|_, e| now - e.inserted_at < ttl);
        let key = Self::key(message);
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            Entry {
                is_image,
                inserted_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
