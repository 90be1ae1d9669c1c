//! Kitchen display runner.
//!
//! Wires one [`KitchenController`] to its inputs:
//!
//! * a poll ticker pulling the full active set every `poll_interval`;
//! * the change notification stream, re-pulling only the announced orders
//!   (a lagged receiver falls back to a full pull);
//! * a FIFO write queue, so this display's toggles and finalizes reach the
//!   store in the order the operator issued them.
//!
//! Both read inputs end in the same reconcile entry points on the
//! controller. Snapshots are published on a `watch` channel after every
//! change.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SyncResult;
use crate::kitchen::{
    FinalizeRequest, KitchenController, ProjectionSnapshot, StationFilter, ToggleRequest,
};
use crate::notify::{ChangeBus, ChangeEvent};
use crate::sync::SyncOrchestrator;

enum WriteOp {
    Toggle(ToggleRequest),
    Finalize(FinalizeRequest),
}

struct DisplayContext {
    sync: Arc<SyncOrchestrator>,
    controller: Mutex<KitchenController>,
    snapshots: watch::Sender<ProjectionSnapshot>,
}

impl DisplayContext {
    /// Run `f` on the controller and publish the resulting snapshot.
    fn with_controller<T>(&self, f: impl FnOnce(&mut KitchenController) -> T) -> T {
        let mut controller = self
            .controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let value = f(&mut *controller);
        self.snapshots.send_replace(controller.snapshot());
        value
    }

    async fn refresh_all(&self) {
        let ticket = self.with_controller(|kc| kc.begin_load());
        match self.sync.pull_active().await {
            Ok(orders) => {
                debug!(count = orders.len(), "Kitchen poll");
                self.with_controller(|kc| kc.apply_full_pull(ticket, orders));
            }
            Err(e) => self.with_controller(|kc| kc.load_failed(&e)),
        }
    }

    async fn refresh_ids(&self, ids: Vec<String>) {
        let ticket = self.with_controller(|kc| kc.begin_load());
        match self.sync.pull(&ids).await {
            Ok(orders) => self.with_controller(|kc| kc.apply_partial_pull(ticket, &ids, orders)),
            Err(e) => self.with_controller(|kc| kc.load_failed(&e)),
        }
    }
}

async fn run_poller(ctx: Arc<DisplayContext>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        ctx.refresh_all().await;
    }
}

async fn run_notifications(ctx: Arc<DisplayContext>, mut rx: broadcast::Receiver<ChangeEvent>) {
    loop {
        let first = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Change notifications lagged, doing full refresh");
                ctx.refresh_all().await;
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        // Coalesce whatever else is already queued into one pull.
        let mut ids = BTreeSet::new();
        let mut lagged = false;
        let mut pending = Some(first);
        while let Some(event) = pending.take() {
            if event.is_order_change() {
                ids.insert(event.record_id);
            }
            match rx.try_recv() {
                Ok(next) => pending = Some(next),
                Err(TryRecvError::Lagged(_)) => lagged = true,
                Err(TryRecvError::Empty | TryRecvError::Closed) => {}
            }
        }

        if lagged {
            ctx.refresh_all().await;
        } else if !ids.is_empty() {
            ctx.refresh_ids(ids.into_iter().collect()).await;
        }
    }
    debug!("Change notification stream closed");
}

async fn run_writer(ctx: Arc<DisplayContext>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Toggle(req) => {
                let result = ctx
                    .sync
                    .persist_item_completion(&req.order_id, &req.item_id, req.done)
                    .await;
                ctx.with_controller(|kc| kc.resolve_toggle(&req, result));
            }
            WriteOp::Finalize(req) => {
                let result = ctx.sync.finalize_order(&req.order_id).await;
                ctx.with_controller(|kc| kc.resolve_finalize(&req, result));
            }
        }
    }
}

/// Handle to a running kitchen display. Dropping it unmounts the display.
pub struct KitchenDisplay {
    ctx: Arc<DisplayContext>,
    writes: mpsc::UnboundedSender<WriteOp>,
    readers: Vec<JoinHandle<()>>,
}

/// Mount a display for `station` and start its poll, notification and write
/// tasks on the current runtime.
pub fn spawn_kitchen_display(
    sync: Arc<SyncOrchestrator>,
    bus: &ChangeBus,
    station: StationFilter,
) -> KitchenDisplay {
    let controller = KitchenController::new(station);
    let (snapshots, _rx) = watch::channel(controller.snapshot());
    let poll_interval = sync.config().poll_interval();
    let ctx = Arc::new(DisplayContext {
        sync,
        controller: Mutex::new(controller),
        snapshots,
    });

    let (writes, write_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_writer(ctx.clone(), write_rx));
    let readers = vec![
        tokio::spawn(run_notifications(ctx.clone(), bus.subscribe())),
        tokio::spawn(run_poller(ctx.clone(), poll_interval)),
    ];

    info!(?station, poll_secs = poll_interval.as_secs(), "Kitchen display mounted");
    KitchenDisplay {
        ctx,
        writes,
        readers,
    }
}

impl KitchenDisplay {
    pub fn subscribe_active_orders(&self) -> watch::Receiver<ProjectionSnapshot> {
        self.ctx.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> ProjectionSnapshot {
        self.ctx.snapshots.borrow().clone()
    }

    /// Mark an item done. Applied locally at once; `Ok(false)` when it was
    /// already done.
    pub fn toggle_item(&self, order_id: &str, item_id: &str) -> SyncResult<bool> {
        let request = self
            .ctx
            .with_controller(|kc| kc.begin_toggle(order_id, item_id))?;
        Ok(self.enqueue(request.map(WriteOp::Toggle)))
    }

    /// Complete an order. Removed locally at once; `Ok(false)` when a
    /// finalize for it is already in flight.
    pub fn finalize_order(&self, order_id: &str) -> SyncResult<bool> {
        let request = self.ctx.with_controller(|kc| kc.begin_finalize(order_id))?;
        Ok(self.enqueue(request.map(WriteOp::Finalize)))
    }

    fn enqueue(&self, op: Option<WriteOp>) -> bool {
        let Some(op) = op else {
            return false;
        };
        if self.writes.send(op).is_err() {
            warn!("Kitchen write queue closed");
            return false;
        }
        true
    }

    /// Pull the full active set now, outside the poll schedule.
    pub async fn refresh(&self) {
        self.ctx.refresh_all().await;
    }

    pub fn dismiss_error(&self) {
        self.ctx.with_controller(|kc| kc.dismiss_error());
    }

    /// Unmount. Writes already queued still reach the store; their results
    /// are discarded.
    pub fn shutdown(self) {}
}

impl Drop for KitchenDisplay {
    fn drop(&mut self) {
        for task in &self.readers {
            task.abort();
        }
        self.ctx.with_controller(|kc| kc.unmount());
        info!("Kitchen display unmounted");
    }
}
