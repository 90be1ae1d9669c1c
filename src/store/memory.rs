//! In-memory store for tests, with failure injection and a write gate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::{SyncError, SyncResult};
use crate::merge;
use crate::model::{Order, OrderStatus};

use super::OrderStore;

#[derive(Default)]
pub(crate) struct InMemoryOrderStore {
    orders: Mutex<HashMap<String, Order>>,
    failures: Mutex<VecDeque<SyncError>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `order` as-is, bypassing the merge.
    pub fn seed(&self, order: Order) {
        self.orders.lock().unwrap().insert(order.id.clone(), order);
    }

    pub fn snapshot(&self, id: &str) -> Option<Order> {
        self.orders.lock().unwrap().get(id).cloned()
    }

    /// The next write fails with `err` without touching the record.
    pub fn fail_next_write(&self, err: SyncError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Writes, in the order they reached the store.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Park every subsequent write until the returned semaphore gets permits.
    pub fn hold_writes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Transient("store offline".into()));
        }
        Ok(())
    }

    async fn before_write(&self, call: String) -> SyncResult<()> {
        self.calls.lock().unwrap().push(call);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| SyncError::Transient("write gate closed".into()))?
                .forget();
        }
        self.check_online()?;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(())
    }

    fn modify(
        &self,
        order_id: &str,
        change: impl FnOnce(&Order) -> SyncResult<Option<Order>>,
    ) -> SyncResult<Order> {
        let mut orders = self.orders.lock().unwrap();
        let current = orders
            .get(order_id)
            .ok_or_else(|| SyncError::NotFound(format!("order {order_id}")))?;
        match change(current)? {
            Some(next) => {
                orders.insert(next.id.clone(), next.clone());
                Ok(next)
            }
            None => Ok(current.clone()),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn upsert(&self, order: Order) -> SyncResult<Order> {
        self.before_write(format!("upsert:{}", order.id)).await?;
        let id = order.id.clone();
        let mut orders = self.orders.lock().unwrap();
        let next = merge::apply_upsert(orders.get(&id), order);
        orders.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    async fn get(&self, id: &str) -> SyncResult<Order> {
        self.check_online()?;
        self.snapshot(id)
            .ok_or_else(|| SyncError::NotFound(format!("order {id}")))
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> SyncResult<Vec<Order>> {
        self.check_online()?;
        let mut matching: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| statuses.contains(&o.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn update_item_completion(
        &self,
        order_id: &str,
        item_id: &str,
        done: bool,
    ) -> SyncResult<Order> {
        self.before_write(format!("item:{order_id}:{item_id}:{done}"))
            .await?;
        self.modify(order_id, |current| {
            merge::apply_item_completion(current, item_id, done)
        })
    }

    async fn update_status(&self, order_id: &str, status: OrderStatus) -> SyncResult<Order> {
        self.before_write(format!("status:{order_id}:{status}")).await?;
        self.modify(order_id, |current| merge::apply_status(current, status))
    }
}
