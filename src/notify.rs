//! Change notification channel.
//!
//! A `tokio::sync::broadcast` bus carrying "record changed" events. Delivery
//! is at-most-once: slow subscribers lose events and must fall back to a
//! full refresh, which the kitchen poll tick provides anyway.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

pub const ORDERS_TABLE: &str = "orders";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Upsert,
    ItemCompletion,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub table: String,
    pub record_id: String,
    pub kind: ChangeKind,
    pub ts_millis: i64,
}

impl ChangeEvent {
    pub fn order(record_id: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            table: ORDERS_TABLE.to_string(),
            record_id: record_id.into(),
            kind,
            ts_millis: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn is_order_change(&self) -> bool {
        self.table == ORDERS_TABLE
    }
}

/// Cloneable publish/subscribe handle.
#[derive(Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let record_id = event.record_id.clone();
        match self.tx.send(event) {
            Ok(receivers) => debug!(record_id = %record_id, receivers, "Change published"),
            Err(_) => debug!(record_id = %record_id, "Change published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}
