//! Order Record Store: the canonical, shared table of orders.
//!
//! Every backend applies writes through [`crate::merge`] and keeps each write
//! atomic at single-order granularity: the whole merged record is stored or
//! nothing is.

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::model::{Order, OrderStatus};

#[cfg(test)]
pub(crate) mod memory;
pub mod notifying;
pub mod rest;
pub mod sqlite;

pub use notifying::NotifyingStore;
pub use rest::RestOrderStore;
pub use sqlite::SqliteOrderStore;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert, or merge into the stored record when the id exists.
    async fn upsert(&self, order: Order) -> SyncResult<Order>;

    async fn get(&self, id: &str) -> SyncResult<Order>;

    /// Orders whose status is one of `statuses`, oldest first.
    async fn list_by_status(&self, statuses: &[OrderStatus]) -> SyncResult<Vec<Order>>;

    /// Monotonic: `done = false` never clears a completed item.
    async fn update_item_completion(
        &self,
        order_id: &str,
        item_id: &str,
        done: bool,
    ) -> SyncResult<Order>;

    /// Goes through the state machine; repeated terminal transitions are no-ops.
    async fn update_status(&self, order_id: &str, status: OrderStatus) -> SyncResult<Order>;
}
