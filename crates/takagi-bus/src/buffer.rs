//! Bounded per-address message buffer
//!
//! A ring of recent messages per address, bounded by count and TTL.
//! Writes happen synchronously on publish before local delivery; expired
//! entries are dropped lazily on access and by a background maintenance
//! task the server owns.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::message::BusMessage;

/// Buffer bounds.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Maximum retained messages per address.
    pub max_per_address: usize,
    /// Maximum message age.
    pub ttl: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_per_address: 100,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Per-address bounded ring of recent messages.
pub struct MessageBuffer {
    config: BufferConfig,
    rings: Mutex<HashMap<String, VecDeque<(BusMessage, Instant)>>>,
}

impl MessageBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Append a message, evicting the oldest entry past the count bound.
    pub fn store(&self, message: &BusMessage) {
        let now = Instant::now();
        let mut rings = self.rings.lock();
        let ring = rings.entry(message.address.clone()).or_default();
        Self::drop_expired(ring, now, self.config.ttl);
        if ring.len() >= self.config.max_per_address {
            ring.pop_front();
        }
        ring.push_back((message.clone(), now));
    }

    /// Messages for an address since the given instant, in insertion order.
    pub fn replay(&self, address: &str, since: Option<Instant>) -> Vec<BusMessage> {
        let now = Instant::now();
        let mut rings = self.rings.lock();
        let Some(ring) = rings.get_mut(address) else {
            return Vec::new();
        };
        Self::drop_expired(ring, now, self.config.ttl);
        ring.iter()
            .filter(|(_, stored)| since.map_or(true, |s| *stored >= s))
            .map(|(msg, _)| msg.clone())
            .collect()
    }

    /// Drop expired entries across all addresses. Returns dropped count.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut dropped = 0;
        let mut rings = self.rings.lock();
        rings.retain(|_, ring| {
            let before = ring.len();
            Self::drop_expired(ring, now, self.config.ttl);
            dropped += before - ring.len();
            !ring.is_empty()
        });
        dropped
    }

    pub fn len(&self, address: &str) -> usize {
        self.rings.lock().get(address).map_or(0, VecDeque::len)
    }

    fn drop_expired(ring: &mut VecDeque<(BusMessage, Instant)>, now: Instant, ttl: Duration) {
        while let Some((_, stored)) = ring.front() {
            if now.duration_since(*stored) > ttl {
                ring.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_bound() {
        let buffer = MessageBuffer::new(BufferConfig {
            max_per_address: 3,
            ttl: Duration::from_secs(60),
        });

        for i in 0..5 {
            buffer.store(&BusMessage::new("q", json!(i)));
        }

        let replayed = buffer.replay("q", None);
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[0].body, json!(2));
        assert_eq!(replayed[2].body, json!(4));
    }

    #[test]
    fn test_replay_since() {
        let buffer = MessageBuffer::new(BufferConfig::default());
        buffer.store(&BusMessage::new("q", json!("old")));
        let cut = Instant::now();
        buffer.store(&BusMessage::new("q", json!("new")));

        let replayed = buffer.replay("q", Some(cut));
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].body, json!("new"));
    }

    #[test]
    fn test_ttl_eviction() {
        let buffer = MessageBuffer::new(BufferConfig {
            max_per_address: 10,
            ttl: Duration::from_millis(0),
        });
        buffer.store(&BusMessage::new("q", json!(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(buffer.evict_expired(), 1);
        assert!(buffer.replay("q", None).is_empty());
    }

    #[test]
    fn test_unknown_address_replays_empty() {
        let buffer = MessageBuffer::new(BufferConfig::default());
        assert!(buffer.replay("nowhere", None).is_empty());
    }
}
