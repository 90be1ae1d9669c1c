//! Sync Orchestrator.
//!
//! The only component that talks to both the Local Draft Store and the
//! canonical Order Record Store. Pushes are at-least-once: a draft stays
//! `pending_sync` until the store confirms the upsert, and a retried push
//! is harmless because the store merges by order and item identity.
//!
//! A background loop (`start_sync_loop`) re-pushes due drafts with
//! exponential backoff and refreshes held drafts from the canonical record.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::drafts::{DraftKind, DraftStore, LocalDraft, RetryPolicy, RetrySchedule};
use crate::error::{SyncError, SyncResult};
use crate::model::{now_millis, Order, OrderStatus};
use crate::store::OrderStore;

/// Queue health published to the POS status indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending: usize,
    /// Drafts past the retry budget. Still queued; shown as a persistent
    /// indicator.
    pub exhausted: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The canonical store accepted the order; this is the merged record.
    Synced(Order),
    /// Transient failure; the draft stays queued for a later retry.
    Queued {
        error: SyncError,
        retry: RetrySchedule,
    },
    /// An earlier push already sent the latest version, or the draft was
    /// voided meanwhile. Nothing was sent.
    Superseded,
}

impl PushOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, PushOutcome::Synced(_))
    }
}

#[derive(Debug)]
pub struct BulkPushEntry {
    pub order_id: String,
    pub result: SyncResult<PushOutcome>,
}

/// Per-draft results of a bulk push, in push order.
#[derive(Debug, Default)]
pub struct BulkPushReport {
    pub entries: Vec<BulkPushEntry>,
}

impl BulkPushReport {
    pub fn synced(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(&e.result, Ok(outcome) if outcome.is_synced()))
            .count()
    }

    pub fn queued(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(&e.result, Ok(PushOutcome::Queued { .. })))
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.entries.iter().filter(|e| e.result.is_err()).count()
    }

    fn record(&mut self, order_id: String, result: SyncResult<PushOutcome>) {
        if let Err(e) = &result {
            warn!(order_id = %order_id, error = %e, "Draft rejected during bulk push");
        }
        self.entries.push(BulkPushEntry { order_id, result });
    }

    fn log_summary(&self) {
        if !self.entries.is_empty() {
            info!(
                synced = self.synced(),
                queued = self.queued(),
                rejected = self.rejected(),
                "Bulk push complete"
            );
        }
    }
}

pub struct SyncOrchestrator {
    drafts: DraftStore,
    store: Arc<dyn OrderStore>,
    config: SyncConfig,
    status_tx: watch::Sender<SyncStatus>,
    is_running: AtomicBool,
    push_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SyncOrchestrator {
    pub fn new(drafts: DraftStore, store: Arc<dyn OrderStore>, config: SyncConfig) -> Self {
        let (status_tx, _rx) = watch::channel(SyncStatus {
            online: true,
            ..SyncStatus::default()
        });
        Self {
            drafts,
            store,
            config,
            status_tx,
            is_running: AtomicBool::new(false),
            push_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_push_retries,
            base_delay_ms: self.config.retry_base_delay_ms,
            max_delay_ms: self.config.retry_max_delay_ms,
        }
    }

    fn publish_status(&self, update: impl FnOnce(&mut SyncStatus)) {
        let pending = self.drafts.count_pending().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count pending drafts");
            0
        });
        let exhausted = self
            .drafts
            .count_exhausted(self.config.max_push_retries)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count exhausted drafts");
                0
            });
        self.status_tx.send_modify(|status| {
            status.pending = pending;
            status.exhausted = exhausted;
            update(status);
        });
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Push one draft to the canonical store.
    ///
    /// Malformed drafts fail with [`SyncError::Validation`] before anything is
    /// stored. Transient failures are not errors: the draft stays queued and
    /// the outcome says when it will be retried.
    pub async fn push(&self, draft: LocalDraft) -> SyncResult<PushOutcome> {
        let order_id = self.stage(draft)?;
        self.send(&order_id).await
    }

    /// Validate and save `draft` as the latest local version, pending.
    fn stage(&self, mut draft: LocalDraft) -> SyncResult<String> {
        draft.order.validate()?;
        draft.pending_sync = true;
        draft.updated_at = now_millis();
        self.drafts.save(&draft)?;
        Ok(draft.order.id)
    }

    fn push_lock(&self, order_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .push_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(order_id.to_string()).or_default())
    }

    /// Upsert the latest stored version of `order_id`. Pushes of one order
    /// run one at a time, so an older payload never lands after a newer one.
    async fn send(&self, order_id: &str) -> SyncResult<PushOutcome> {
        let lock = self.push_lock(order_id);
        let _guard = lock.lock().await;

        let draft = match self.drafts.get(order_id) {
            Ok(draft) if draft.pending_sync => draft,
            Ok(_) | Err(SyncError::NotFound(_)) => {
                debug!(order_id = %order_id, "Draft already resolved by an earlier push");
                return Ok(PushOutcome::Superseded);
            }
            Err(e) => return Err(e),
        };

        match self.store.upsert(draft.order.clone()).await {
            Ok(confirmed) => {
                let settled = match draft.kind {
                    DraftKind::Sale => self.drafts.convert_to_reference(&draft.order, &confirmed)?,
                    DraftKind::Hold => {
                        match self.drafts.mark_synced(order_id, &draft.order, &confirmed) {
                            // Resolved meanwhile by a later sale or void of the same order.
                            Err(SyncError::NotFound(_)) => {
                                debug!(order_id = %order_id, "Hold no longer stored locally");
                                true
                            }
                            other => other?,
                        }
                    }
                };
                info!(
                    order_id = %order_id,
                    kind = %draft.kind,
                    total = confirmed.total,
                    settled,
                    "Draft pushed"
                );
                self.publish_status(|s| {
                    s.online = true;
                    s.last_sync = Some(now_millis());
                    s.last_error = None;
                });
                Ok(PushOutcome::Synced(confirmed))
            }
            Err(e) if e.is_retryable() => {
                let retry = self
                    .drafts
                    .record_failure(order_id, &e.to_string(), &self.retry_policy())?;
                warn!(
                    order_id = %order_id,
                    retry_count = retry.retry_count,
                    error = %e,
                    "Draft push failed, kept in queue"
                );
                self.publish_status(|s| {
                    s.online = !matches!(e, SyncError::Transient(_));
                    s.last_error = Some(e.to_string());
                });
                Ok(PushOutcome::Queued { error: e, retry })
            }
            Err(e) => {
                self.drafts
                    .mark_rejected(order_id, &draft.order, &e.to_string())?;
                self.publish_status(|s| s.last_error = Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Fire-and-forget push; the receiver resolves with the outcome. The
    /// draft is saved before this returns, so a later push of the same
    /// order always wins.
    pub fn push_in_background(
        self: &Arc<Self>,
        draft: LocalDraft,
    ) -> oneshot::Receiver<SyncResult<PushOutcome>> {
        let (tx, rx) = oneshot::channel();
        let staged = self.stage(draft);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match staged {
                Ok(order_id) => this.send(&order_id).await,
                Err(e) => Err(e),
            };
            if tx.send(outcome).is_err() {
                debug!("Push completed after its caller went away");
            }
        });
        rx
    }

    /// Push drafts one after another. A failure never aborts the rest.
    pub async fn push_bulk(&self, drafts: Vec<LocalDraft>) -> BulkPushReport {
        let mut report = BulkPushReport::default();
        for draft in drafts {
            let order_id = draft.order.id.clone();
            let result = self.push(draft).await;
            report.record(order_id, result);
        }
        report.log_summary();
        report
    }

    /// Push the queued drafts whose retry time has come, one batch. Each
    /// push sends whatever version is stored when its turn comes.
    pub async fn push_due(&self) -> SyncResult<BulkPushReport> {
        let due = self
            .drafts
            .list_due(now_millis(), self.config.push_batch_size)?;
        let mut report = BulkPushReport::default();
        for draft in due {
            let order_id = draft.order.id;
            let result = self.send(&order_id).await;
            report.record(order_id, result);
        }
        report.log_summary();
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    /// Canonical records for `ids`. Ids the store no longer has are skipped.
    pub async fn pull(&self, ids: &[String]) -> SyncResult<Vec<Order>> {
        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get(id).await {
                Ok(order) => orders.push(order),
                Err(SyncError::NotFound(_)) => debug!(order_id = %id, "Pulled order no longer exists"),
                Err(e) => return Err(e),
            }
        }
        Ok(orders)
    }

    /// Every order a kitchen display should show.
    pub async fn pull_active(&self) -> SyncResult<Vec<Order>> {
        self.store.list_by_status(&OrderStatus::ACTIVE).await
    }

    /// Refresh confirmed holds from the canonical store. Holds with a push
    /// still pending are left alone; holds whose order reached a terminal
    /// status elsewhere are dropped.
    pub async fn reconcile_held_drafts(&self) -> SyncResult<usize> {
        let mut refreshed = 0;
        for draft in self.drafts.list_held()? {
            if draft.pending_sync {
                continue;
            }
            let id = draft.id().to_string();
            match self.store.get(&id).await {
                Ok(remote) if remote.status.is_terminal() => {
                    info!(order_id = %id, status = %remote.status, "Held order closed remotely");
                    self.drafts.delete(&id)?;
                }
                Ok(remote) => {
                    if remote != draft.order
                        && self.drafts.mark_synced(&id, &draft.order, &remote)?
                    {
                        refreshed += 1;
                    }
                }
                Err(SyncError::NotFound(_)) => {
                    warn!(order_id = %id, "Confirmed hold missing from store, re-queueing");
                    self.drafts.save(&LocalDraft::new(draft.order, DraftKind::Hold))?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(refreshed)
    }

    // -----------------------------------------------------------------------
    // Status writes
    // -----------------------------------------------------------------------

    pub async fn persist_item_completion(
        &self,
        order_id: &str,
        item_id: &str,
        done: bool,
    ) -> SyncResult<Order> {
        self.store
            .update_item_completion(order_id, item_id, done)
            .await
    }

    /// Kitchen progress (`PREPARING`, `READY`).
    pub async fn advance_order(&self, order_id: &str, status: OrderStatus) -> SyncResult<Order> {
        if status.is_terminal() {
            return Err(SyncError::Validation(format!(
                "{status} must be set through finalize or void"
            )));
        }
        self.store.update_status(order_id, status).await
    }

    /// Move to `COMPLETED`. Finalizing a terminal order is a no-op.
    pub async fn finalize_order(&self, order_id: &str) -> SyncResult<Order> {
        let order = self
            .store
            .update_status(order_id, OrderStatus::Completed)
            .await?;
        info!(order_id = %order_id, status = %order.status, "Order finalized");
        Ok(order)
    }

    /// POS void. An order that never reached the store is voided locally.
    pub async fn void_order(&self, order_id: &str) -> SyncResult<Order> {
        match self
            .store
            .update_status(order_id, OrderStatus::Cancelled)
            .await
        {
            Ok(order) => {
                self.drafts.delete(order_id)?;
                info!(order_id = %order_id, "Order voided");
                Ok(order)
            }
            Err(SyncError::NotFound(msg)) => {
                let mut draft = match self.drafts.get(order_id) {
                    Ok(draft) => draft,
                    Err(_) => return Err(SyncError::NotFound(msg)),
                };
                self.drafts.delete(order_id)?;
                draft.order.status = OrderStatus::Cancelled;
                draft.order.updated_at = now_millis();
                info!(order_id = %order_id, "Unsynced order voided locally");
                self.publish_status(|_| {});
                Ok(draft.order)
            }
            Err(e) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Background loop
    // -----------------------------------------------------------------------

    /// One background cycle: push due drafts, then refresh held drafts.
    pub async fn run_cycle(&self) -> SyncResult<BulkPushReport> {
        let report = self.push_due().await?;
        match self.reconcile_held_drafts().await {
            Ok(refreshed) if refreshed > 0 => debug!(refreshed, "Held drafts refreshed"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Held draft refresh failed"),
        }
        self.publish_status(|_| {});
        Ok(report)
    }

    /// Start the background push loop on the current runtime.
    pub fn start_sync_loop(self: &Arc<Self>) -> JoinHandle<()> {
        self.is_running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        let interval = self.config.push_interval();

        tokio::spawn(async move {
            info!("Sync loop started (interval: {}s)", interval.as_secs());
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !this.is_running.load(Ordering::SeqCst) {
                    info!("Sync loop stopped");
                    break;
                }
                match this.run_cycle().await {
                    Ok(report) if report.synced() > 0 => {
                        info!("Sync cycle complete: {} drafts synced", report.synced());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Sync cycle failed: {e}"),
                }
            }
        })
    }

    /// The loop exits at its next tick.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::test_db;
    use crate::model::fixtures::*;
    use crate::store::memory::InMemoryOrderStore;

    fn setup() -> (Arc<SyncOrchestrator>, Arc<InMemoryOrderStore>) {
        let store = Arc::new(InMemoryOrderStore::new());
        let orchestrator = SyncOrchestrator::new(
            DraftStore::new(Arc::new(test_db())),
            store.clone(),
            SyncConfig::default(),
        );
        (Arc::new(orchestrator), store)
    }

    fn draft(id: &str, kind: DraftKind) -> LocalDraft {
        LocalDraft::new(order(id, vec![food("a", 2, 10_000), drink("b", 1, 8_000)]), kind)
    }

    #[tokio::test]
    async fn test_confirmed_sale_becomes_reference() {
        let (sync, store) = setup();
        let outcome = sync.push(draft("POS-0001", DraftKind::Sale)).await.unwrap();

        assert!(outcome.is_synced());
        assert!(store.snapshot("POS-0001").is_some());
        assert!(matches!(sync.drafts().get("POS-0001"), Err(SyncError::NotFound(_))));
        assert!(sync.drafts().get_reference("POS-0001").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_hold_edited_and_repushed_keeps_one_record() {
        let (sync, store) = setup();
        sync.push(draft("POS-0001", DraftKind::Hold)).await.unwrap();
        sync.persist_item_completion("POS-0001", "a", true).await.unwrap();

        let mut edited = sync.drafts().get("POS-0001").unwrap();
        assert!(!edited.pending_sync);
        edited.order.items[0].is_done = false;
        edited.order.items.push(drink("c", 1, 2_000));
        edited.order.total = edited.order.items_total();

        let outcome = sync.push(edited).await.unwrap();
        let PushOutcome::Synced(stored) = outcome else {
            panic!("expected synced outcome");
        };
        assert_eq!(stored.total, 30_000);
        assert!(stored.item("a").unwrap().is_done);
        assert_eq!(sync.pull_active().await.unwrap().len(), 1);
        assert_eq!(store.calls().iter().filter(|c| c.starts_with("upsert")).count(), 2);
    }

    async fn wait_for_writes(store: &InMemoryOrderStore, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.calls().len() < n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("store never saw the write");
    }

    #[tokio::test]
    async fn test_older_push_never_overwrites_newer_edit() {
        let (sync, store) = setup();
        let gate = store.hold_writes();
        let first = LocalDraft::new(order("POS-0001", vec![food("a", 2, 10_000)]), DraftKind::Hold);
        let older = sync.push_in_background(first.clone());
        wait_for_writes(&store, 1).await;

        let mut edited = first;
        edited.order.items.push(drink("b", 1, 8_000));
        edited.order.total = edited.order.items_total();
        let newer = sync.push_in_background(edited);
        gate.add_permits(2);

        assert!(older.await.unwrap().unwrap().is_synced());
        assert!(newer.await.unwrap().unwrap().is_synced());
        assert_eq!(store.snapshot("POS-0001").unwrap().items.len(), 2);
        let held = sync.drafts().get("POS-0001").unwrap();
        assert_eq!(held.order.items.len(), 2);
        assert!(!held.pending_sync);
    }

    #[tokio::test]
    async fn test_queued_push_sends_latest_version_once() {
        let (sync, store) = setup();
        let first = LocalDraft::new(order("POS-0001", vec![food("a", 2, 10_000)]), DraftKind::Hold);
        let older = sync.push_in_background(first.clone());

        let mut edited = first;
        edited.order.items.push(drink("b", 1, 8_000));
        edited.order.total = edited.order.items_total();
        let newer = sync.push(edited).await.unwrap();
        let older = older.await.unwrap().unwrap();

        assert!(newer.is_synced() || older.is_synced());
        assert!(matches!(newer, PushOutcome::Superseded) || matches!(older, PushOutcome::Superseded));
        assert_eq!(store.calls(), vec!["upsert:POS-0001".to_string()]);
        assert_eq!(store.snapshot("POS-0001").unwrap().items.len(), 2);
        assert!(!sync.drafts().get("POS-0001").unwrap().pending_sync);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_draft_queued() {
        let (sync, store) = setup();
        let mut status = sync.subscribe_status();
        store.set_offline(true);

        let outcome = sync.push(draft("POS-0001", DraftKind::Sale)).await.unwrap();
        let PushOutcome::Queued { retry, .. } = outcome else {
            panic!("expected queued outcome");
        };
        assert_eq!(retry.retry_count, 1);

        let queued = sync.drafts().get("POS-0001").unwrap();
        assert!(queued.pending_sync);
        let snapshot = status.borrow_and_update().clone();
        assert_eq!(snapshot.pending, 1);
        assert!(!snapshot.online);

        store.set_offline(false);
        let report = sync.push_bulk(sync.drafts().list_pending().unwrap()).await;
        assert_eq!(report.synced(), 1);
        assert_eq!(status.borrow().pending, 0);
    }

    #[tokio::test]
    async fn test_malformed_draft_is_rejected_without_queueing() {
        let (sync, store) = setup();
        let mut bad = draft("POS-0001", DraftKind::Sale);
        bad.order.total = 1;

        let err = sync.push(bad).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(matches!(sync.drafts().get("POS-0001"), Err(SyncError::NotFound(_))));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_rejection_keeps_draft_out_of_queue() {
        let (sync, store) = setup();
        store.fail_next_write(SyncError::Validation("payment method required".into()));

        assert!(sync.push(draft("POS-0001", DraftKind::Hold)).await.is_err());
        let kept = sync.drafts().get("POS-0001").unwrap();
        assert!(!kept.pending_sync);
        assert!(kept.last_error.is_some());
    }

    #[tokio::test]
    async fn test_bulk_push_continues_past_failures() {
        let (sync, store) = setup();
        let drafts = vec![
            draft("POS-0001", DraftKind::Sale),
            draft("POS-0002", DraftKind::Sale),
            draft("POS-0003", DraftKind::Sale),
        ];
        store.fail_next_write(SyncError::Transient("503".into()));
        store.fail_next_write(SyncError::Transient("503".into()));

        let report = sync.push_bulk(drafts).await;
        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.queued(), 2);
        assert_eq!(report.synced(), 1);
        assert_eq!(sync.drafts().count_pending().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pull_skips_missing_orders() {
        let (sync, _store) = setup();
        sync.push(draft("POS-0001", DraftKind::Sale)).await.unwrap();

        let pulled = sync
            .pull(&["POS-0001".to_string(), "POS-0404".to_string()])
            .await
            .unwrap();
        assert_eq!(pulled.len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_twice_is_noop() {
        let (sync, _store) = setup();
        sync.push(draft("POS-0001", DraftKind::Sale)).await.unwrap();

        let first = sync.finalize_order("POS-0001").await.unwrap();
        let second = sync.finalize_order("POS-0001").await.unwrap();
        assert_eq!(first.status, OrderStatus::Completed);
        assert_eq!(second, first);
        assert!(sync.pull_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_hold_is_dropped_on_reconcile() {
        let (sync, _store) = setup();
        sync.push(draft("POS-0001", DraftKind::Hold)).await.unwrap();
        sync.push(draft("POS-0002", DraftKind::Hold)).await.unwrap();
        sync.persist_item_completion("POS-0002", "a", true).await.unwrap();
        sync.finalize_order("POS-0001").await.unwrap();

        assert_eq!(sync.reconcile_held_drafts().await.unwrap(), 1);
        let held = sync.drafts().list_held().unwrap();
        assert_eq!(held.len(), 1);
        assert!(held[0].order.item("a").unwrap().is_done);
    }

    #[tokio::test]
    async fn test_void_unsynced_order_locally() {
        let (sync, store) = setup();
        store.set_offline(true);
        sync.push(draft("POS-0001", DraftKind::Hold)).await.unwrap();
        store.set_offline(false);

        let voided = sync.void_order("POS-0001").await.unwrap();
        assert_eq!(voided.status, OrderStatus::Cancelled);
        assert_eq!(sync.drafts().count_pending().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_background_push_reports_through_callback() {
        let (sync, _store) = setup();
        let rx = sync.push_in_background(draft("POS-0001", DraftKind::Sale));
        assert!(rx.await.unwrap().unwrap().is_synced());
    }

    #[tokio::test]
    async fn test_advance_rejects_terminal_targets() {
        let (sync, _store) = setup();
        sync.push(draft("POS-0001", DraftKind::Sale)).await.unwrap();
        assert_eq!(
            sync.advance_order("POS-0001", OrderStatus::Preparing)
                .await
                .unwrap()
                .status,
            OrderStatus::Preparing
        );
        assert!(sync
            .advance_order("POS-0001", OrderStatus::Completed)
            .await
            .is_err());
    }
}
