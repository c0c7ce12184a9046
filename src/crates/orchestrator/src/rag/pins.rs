//! Sticky document-to-conversation association.
//!
//! A conversation is pinned to a document when retrieval confidently
//! prefers it. Pins expire after a fixed TTL and never decay otherwise.

use crate::clock::{to_chrono, SharedClock};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_PIN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pin {
    pub upload_id: String,
    /// Last page shown to the user, for continue mode
    pub last_page: u32,
    pub pinned_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Created,
    /// Same document re-pinned; only the timestamp and page moved
    Updated,
}

#[derive(Debug)]
pub struct PinStore {
    pins: Mutex<HashMap<String, Pin>>,
    ttl: Duration,
    clock: SharedClock,
}

impl PinStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            pins: Mutex::new(HashMap::new()),
            ttl: DEFAULT_PIN_TTL,
            clock,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn is_live(&self, pin: &Pin, now: DateTime<Local>) -> bool {
        now - pin.updated_at < to_chrono(self.ttl)
    }

    /// Pin `upload_id` to a conversation
    pub fn pin(&self, conversation_id: &str, upload_id: &str, last_page: u32) -> PinOutcome {
        let now = self.clock.now();
        let mut pins = self.pins.lock();

        if let Some(existing) = pins.get_mut(conversation_id) {
            if existing.upload_id == upload_id && now - existing.updated_at < to_chrono(self.ttl) {
                existing.updated_at = now;
                existing.last_page = last_page;
                return PinOutcome::Updated;
            }
        }

        let ttl = to_chrono(self.ttl);
        pins.retain(|_, p| now - p.updated_at < ttl);
        debug!(conversation = conversation_id, upload_id, "Document pinned");
        pins.insert(
            conversation_id.to_string(),
            Pin {
                upload_id: upload_id.to_string(),
                last_page,
                pinned_at: now,
                updated_at: now,
            },
        );
        PinOutcome::Created
    }

    /// Live pin for a conversation; expired pins are dropped
    pub fn active(&self, conversation_id: &str) -> Option<Pin> {
        let now = self.clock.now();
        let mut pins = self.pins.lock();
        match pins.get(conversation_id) {
            Some(pin) if self.is_live(pin, now) => Some(pin.clone()),
            Some(_) => {
                pins.remove(conversation_id);
                None
            }
            None => None,
        }
    }

    pub fn clear(&self, conversation_id: &str) -> bool {
        self.pins.lock().remove(conversation_id).is_some()
    }

    /// Number of stored pins, live or not
    pub fn len(&self) -> usize {
        self.pins.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
