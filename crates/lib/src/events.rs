//! Fire-and-forget event fan-out and process-wide audit counters.
//!
//! Subscribers get a `broadcast` receiver; a slow subscriber lags and loses events instead of
//! blocking the producer, and emitting with no subscribers is a silent drop.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// One named event with a JSON payload.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event: String,
    pub payload: serde_json::Value,
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Deliver at most once to current subscribers; never blocks, never fails.
    pub fn emit<T: Serialize>(&self, name: &str, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("event {} payload not serializable: {}", name, e);
                return;
            }
        };
        let event = Event {
            event: name.to_string(),
            payload,
        };
        if self.tx.send(event).is_err() {
            log::debug!("event {} dropped: no subscribers", name);
        }
    }
}

/// Counters keyed by command outcome (`cmd:1` success, `cmd:0` failure).
#[derive(Debug, Default)]
pub struct AuditCounters {
    success: AtomicU64,
    failure: AtomicU64,
}

/// Point-in-time copy of [`AuditCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    #[serde(rename = "cmd:1")]
    pub success: u64,
    #[serde(rename = "cmd:0")]
    pub failure: u64,
}

impl AuditCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, success: bool) {
        let counter = if success { &self.success } else { &self.failure };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
        }
    }
}
