//! Store decorator that announces every successful write on a [`ChangeBus`].

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::model::{Order, OrderStatus};
use crate::notify::{ChangeBus, ChangeEvent, ChangeKind};

use super::OrderStore;

pub struct NotifyingStore<S> {
    inner: S,
    bus: ChangeBus,
}

impl<S: OrderStore> NotifyingStore<S> {
    pub fn new(inner: S, bus: ChangeBus) -> Self {
        Self { inner, bus }
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: OrderStore> OrderStore for NotifyingStore<S> {
    async fn upsert(&self, order: Order) -> SyncResult<Order> {
        let stored = self.inner.upsert(order).await?;
        self.bus
            .publish(ChangeEvent::order(stored.id.clone(), ChangeKind::Upsert));
        Ok(stored)
    }

    async fn get(&self, id: &str) -> SyncResult<Order> {
        self.inner.get(id).await
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> SyncResult<Vec<Order>> {
        self.inner.list_by_status(statuses).await
    }

    async fn update_item_completion(
        &self,
        order_id: &str,
        item_id: &str,
        done: bool,
    ) -> SyncResult<Order> {
        let stored = self
            .inner
            .update_item_completion(order_id, item_id, done)
            .await?;
        self.bus
            .publish(ChangeEvent::order(order_id, ChangeKind::ItemCompletion));
        Ok(stored)
    }

    async fn update_status(&self, order_id: &str, status: OrderStatus) -> SyncResult<Order> {
        let stored = self.inner.update_status(order_id, status).await?;
        self.bus
            .publish(ChangeEvent::order(order_id, ChangeKind::Status));
        Ok(stored)
    }
}
