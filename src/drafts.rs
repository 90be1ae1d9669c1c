//! Local Draft Store.
//!
//! Device-scoped persistence for carts converted into orders: one-shot sales
//! waiting for their first push and held orders the cashier may resume. No
//! merge logic lives here. `pending_sync` separates "must retry push" from
//! "confirmed by the canonical store".
//!
//! A confirmed sale is reduced to a row in `draft_refs` (id, total, sync
//! time). A confirmed hold stays with `pending_sync = 0` until it is resumed
//! or deleted.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{self, DbState};
use crate::error::{SyncError, SyncResult};
use crate::model::{db_timestamp, now_millis, parse_db_timestamp, Order};

const DRAFT_COLUMNS: &str =
    "id, kind, payload, pending_sync, retry_count, last_error, next_retry_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftKind {
    /// Paid (or about to be paid) order; removed locally once confirmed.
    Sale,
    /// Parked order the cashier can resume and edit.
    Hold,
}

impl DraftKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DraftKind::Sale => "sale",
            DraftKind::Hold => "hold",
        }
    }
}

impl fmt::Display for DraftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftKind {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "sale" => Ok(DraftKind::Sale),
            "hold" => Ok(DraftKind::Hold),
            other => Err(SyncError::Storage(format!("unknown draft kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDraft {
    pub order: Order,
    pub kind: DraftKind,
    pub pending_sync: bool,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl LocalDraft {
    /// Fresh draft awaiting its first push.
    pub fn new(order: Order, kind: DraftKind) -> Self {
        Self {
            order,
            kind,
            pending_sync: true,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
            updated_at: now_millis(),
        }
    }

    pub fn id(&self) -> &str {
        &self.order.id
    }

    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.pending_sync && self.retry_count >= max_retries
    }
}

/// What remains of a sale once the canonical store has confirmed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftReference {
    pub order_id: String,
    pub total: i64,
    pub synced_at: DateTime<Utc>,
}

/// Retry bookkeeping after a failed push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub exhausted: bool,
}

/// Backoff policy for failed pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl RetryPolicy {
    /// Delay before attempt `retry_count + 1`: doubles per failure, capped.
    /// Exhausted drafts keep retrying at the cap.
    pub fn delay_ms(&self, retry_count: u32) -> i64 {
        let exponent = retry_count.saturating_sub(1).min(20);
        self.base_delay_ms
            .saturating_mul(1_i64 << exponent)
            .clamp(1_000, self.max_delay_ms.max(1_000))
    }
}

/// Stable per-draft seed so retries of different drafts spread out.
fn jitter_seed(id: &str) -> u64 {
    id.bytes()
        .fold(17_u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)))
}

fn deterministic_jitter_ms(seed: u64) -> i64 {
    (seed % 700) as i64 + 50
}

fn schedule_next_retry(now: DateTime<Utc>, delay_ms: i64, seed: u64) -> DateTime<Utc> {
    now + ChronoDuration::milliseconds(delay_ms + deterministic_jitter_ms(seed))
}

struct DraftRow {
    id: String,
    kind: String,
    payload: String,
    pending_sync: bool,
    retry_count: u32,
    last_error: Option<String>,
    next_retry_at: Option<String>,
    updated_at: String,
}

impl DraftRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            payload: row.get(2)?,
            pending_sync: row.get::<_, i64>(3)? != 0,
            retry_count: row.get(4)?,
            last_error: row.get(5)?,
            next_retry_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_draft(self) -> SyncResult<LocalDraft> {
        let order: Order = serde_json::from_str(&self.payload)
            .map_err(|e| SyncError::Storage(format!("corrupt draft {}: {e}", self.id)))?;
        Ok(LocalDraft {
            order,
            kind: self.kind.parse()?,
            pending_sync: self.pending_sync,
            retry_count: self.retry_count,
            last_error: self.last_error,
            next_retry_at: self
                .next_retry_at
                .as_deref()
                .map(parse_db_timestamp)
                .transpose()?,
            updated_at: parse_db_timestamp(&self.updated_at)?,
        })
    }
}

fn query_drafts(
    conn: &Connection,
    where_clause: &str,
    params: impl rusqlite::Params,
) -> SyncResult<Vec<LocalDraft>> {
    let sql = format!("SELECT {DRAFT_COLUMNS} FROM local_drafts {where_clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, DraftRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(DraftRow::into_draft).collect()
}

fn stored_order(conn: &Connection, id: &str) -> SyncResult<Option<Order>> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload FROM local_drafts WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    payload
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| SyncError::Storage(format!("corrupt draft {id}: {e}")))
        })
        .transpose()
}

pub struct DraftStore {
    db: Arc<DbState>,
}

impl DraftStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Insert or replace the draft with all of its bookkeeping.
    pub fn save(&self, draft: &LocalDraft) -> SyncResult<()> {
        let payload = serde_json::to_string(&draft.order)
            .map_err(|e| SyncError::Validation(format!("serialize draft: {e}")))?;
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO local_drafts (
                id, kind, payload, pending_sync, retry_count, last_error,
                next_retry_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                payload = excluded.payload,
                pending_sync = excluded.pending_sync,
                retry_count = excluded.retry_count,
                last_error = excluded.last_error,
                next_retry_at = excluded.next_retry_at,
                updated_at = excluded.updated_at",
            params![
                draft.order.id,
                draft.kind.as_str(),
                payload,
                draft.pending_sync as i64,
                draft.retry_count,
                draft.last_error,
                draft.next_retry_at.as_ref().map(db_timestamp),
                db_timestamp(&draft.order.created_at),
                db_timestamp(&draft.updated_at),
            ],
        )?;
        debug!(order_id = %draft.order.id, kind = %draft.kind, pending = draft.pending_sync, "Draft saved");
        Ok(())
    }

    pub fn get(&self, id: &str) -> SyncResult<LocalDraft> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {DRAFT_COLUMNS} FROM local_drafts WHERE id = ?1"),
                params![id],
                DraftRow::from_row,
            )
            .optional()?;
        row.ok_or_else(|| SyncError::NotFound(format!("draft {id}")))?
            .into_draft()
    }

    /// Held orders, oldest first.
    pub fn list_held(&self) -> SyncResult<Vec<LocalDraft>> {
        let conn = self.db.lock()?;
        query_drafts(
            &conn,
            "WHERE kind = 'hold' ORDER BY created_at ASC, id ASC",
            [],
        )
    }

    /// Every draft still waiting for a confirmed push.
    pub fn list_pending(&self) -> SyncResult<Vec<LocalDraft>> {
        let conn = self.db.lock()?;
        query_drafts(
            &conn,
            "WHERE pending_sync = 1 ORDER BY created_at ASC, id ASC",
            [],
        )
    }

    /// Pending drafts whose retry time has come, oldest first.
    pub fn list_due(&self, now: DateTime<Utc>, limit: usize) -> SyncResult<Vec<LocalDraft>> {
        let conn = self.db.lock()?;
        query_drafts(
            &conn,
            "WHERE pending_sync = 1 AND (next_retry_at IS NULL OR next_retry_at <= ?1)
             ORDER BY created_at ASC, id ASC LIMIT ?2",
            params![db_timestamp(&now), limit as i64],
        )
    }

    /// Deleting a missing draft is not an error.
    pub fn delete(&self, id: &str) -> SyncResult<()> {
        let conn = self.db.lock()?;
        let removed = conn.execute("DELETE FROM local_drafts WHERE id = ?1", params![id])?;
        if removed > 0 {
            info!(order_id = %id, "Draft deleted");
        }
        Ok(())
    }

    /// Record a confirmed push of `pushed`: store the canonical record and
    /// clear retry state. Returns `false` and leaves the draft queued when a
    /// newer version was saved while the push was in flight.
    pub fn mark_synced(&self, id: &str, pushed: &Order, confirmed: &Order) -> SyncResult<bool> {
        let payload = serde_json::to_string(confirmed)
            .map_err(|e| SyncError::Validation(format!("serialize draft: {e}")))?;
        let conn = self.db.lock()?;
        match stored_order(&conn, id)? {
            None => return Err(SyncError::NotFound(format!("draft {id}"))),
            Some(current) if current != *pushed => {
                debug!(order_id = %id, "Draft changed during push, kept queued");
                return Ok(false);
            }
            Some(_) => {}
        }
        conn.execute(
            "UPDATE local_drafts
             SET payload = ?1,
                 pending_sync = 0,
                 retry_count = 0,
                 last_error = NULL,
                 next_retry_at = NULL,
                 updated_at = ?2
             WHERE id = ?3",
            params![payload, db_timestamp(&now_millis()), id],
        )?;
        Ok(true)
    }

    /// Count a failed push and schedule the next attempt. The draft stays
    /// pending no matter how many attempts failed.
    pub fn record_failure(
        &self,
        id: &str,
        error: &str,
        policy: &RetryPolicy,
    ) -> SyncResult<RetrySchedule> {
        let conn = self.db.lock()?;
        let retry_count: u32 = conn
            .query_row(
                "SELECT retry_count FROM local_drafts WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| SyncError::NotFound(format!("draft {id}")))?;

        let retry_count = retry_count.saturating_add(1);
        let now = now_millis();
        let next_retry_at =
            schedule_next_retry(now, policy.delay_ms(retry_count), jitter_seed(id));
        conn.execute(
            "UPDATE local_drafts
             SET pending_sync = 1,
                 retry_count = ?1,
                 last_error = ?2,
                 next_retry_at = ?3,
                 updated_at = ?4
             WHERE id = ?5",
            params![
                retry_count,
                error,
                db_timestamp(&next_retry_at),
                db_timestamp(&now),
                id
            ],
        )?;

        let exhausted = retry_count >= policy.max_retries;
        if exhausted {
            warn!(order_id = %id, retry_count, error = %error, "Draft push retries exhausted");
        } else {
            debug!(order_id = %id, retry_count, next_retry_at = %next_retry_at, "Draft push rescheduled");
        }
        Ok(RetrySchedule {
            retry_count,
            next_retry_at,
            exhausted,
        })
    }

    /// Keep a draft the store refused, out of the push queue. A newer
    /// version saved meanwhile stays queued.
    pub fn mark_rejected(&self, id: &str, pushed: &Order, error: &str) -> SyncResult<bool> {
        let conn = self.db.lock()?;
        if stored_order(&conn, id)?.as_ref() != Some(pushed) {
            return Ok(false);
        }
        conn.execute(
            "UPDATE local_drafts
             SET pending_sync = 0,
                 last_error = ?1,
                 next_retry_at = NULL,
                 updated_at = ?2
             WHERE id = ?3",
            params![error, db_timestamp(&now_millis()), id],
        )?;
        warn!(order_id = %id, error = %error, "Draft rejected by order store");
        Ok(true)
    }

    /// Replace a confirmed sale with its lightweight reference, atomically.
    /// Returns `false` and keeps the draft when it changed after `pushed`
    /// was sent.
    pub fn convert_to_reference(&self, pushed: &Order, confirmed: &Order) -> SyncResult<bool> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(current) = stored_order(&tx, &confirmed.id)? {
            if current != *pushed {
                debug!(order_id = %confirmed.id, "Sale changed during push, kept queued");
                return Ok(false);
            }
        }
        tx.execute(
            "DELETE FROM local_drafts WHERE id = ?1",
            params![confirmed.id],
        )?;
        tx.execute(
            "INSERT INTO draft_refs (order_id, total, synced_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(order_id) DO UPDATE SET
                total = excluded.total,
                synced_at = excluded.synced_at",
            params![confirmed.id, confirmed.total, db_timestamp(&now_millis())],
        )?;
        tx.commit()?;
        info!(order_id = %confirmed.id, "Sale confirmed, draft reduced to reference");
        Ok(true)
    }

    pub fn get_reference(&self, id: &str) -> SyncResult<Option<DraftReference>> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT order_id, total, synced_at FROM draft_refs WHERE order_id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(order_id, total, synced_at)| {
            Ok(DraftReference {
                order_id,
                total,
                synced_at: parse_db_timestamp(&synced_at)?,
            })
        })
        .transpose()
    }

    pub fn count_pending(&self) -> SyncResult<usize> {
        let conn = self.db.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM local_drafts WHERE pending_sync = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn count_exhausted(&self, max_retries: u32) -> SyncResult<usize> {
        let conn = self.db.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM local_drafts WHERE pending_sync = 1 AND retry_count >= ?1",
            params![max_retries],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Reserve the next human-readable order id on this device.
    pub fn next_order_id(&self, prefix: &str) -> SyncResult<String> {
        let conn = self.db.lock()?;
        db::next_order_number(&conn, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::model::fixtures::*;

    fn store() -> DraftStore {
        DraftStore::new(Arc::new(test_db()))
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
        }
    }

    #[test]
    fn test_save_and_get_round_trip() {
        let drafts = store();
        let draft = LocalDraft::new(order("POS-0001", vec![food("a", 2, 10_000)]), DraftKind::Hold);
        drafts.save(&draft).unwrap();

        let loaded = drafts.get("POS-0001").unwrap();
        assert_eq!(loaded, draft);
        assert!(matches!(drafts.get("POS-0404"), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn test_list_held_only_returns_holds() {
        let drafts = store();
        drafts
            .save(&LocalDraft::new(order("POS-0001", vec![food("a", 1, 1)]), DraftKind::Sale))
            .unwrap();
        drafts
            .save(&LocalDraft::new(order("POS-0002", vec![food("a", 1, 1)]), DraftKind::Hold))
            .unwrap();

        let held: Vec<_> = drafts.list_held().unwrap().into_iter().map(|d| d.order.id).collect();
        assert_eq!(held, vec!["POS-0002"]);
        assert_eq!(drafts.count_pending().unwrap(), 2);
    }

    #[test]
    fn test_failures_back_off_and_exhaust_without_dropping() {
        let drafts = store();
        drafts
            .save(&LocalDraft::new(order("POS-0001", vec![food("a", 1, 1)]), DraftKind::Sale))
            .unwrap();

        let first = drafts.record_failure("POS-0001", "offline", &policy()).unwrap();
        assert_eq!(first.retry_count, 1);
        assert!(!first.exhausted);
        assert!(drafts.list_due(now_millis(), 10).unwrap().is_empty());
        assert_eq!(
            drafts.list_due(first.next_retry_at, 10).unwrap().len(),
            1
        );

        drafts.record_failure("POS-0001", "offline", &policy()).unwrap();
        let third = drafts.record_failure("POS-0001", "offline", &policy()).unwrap();
        assert!(third.exhausted);

        let draft = drafts.get("POS-0001").unwrap();
        assert!(draft.pending_sync);
        assert!(draft.is_exhausted(3));
        assert_eq!(draft.last_error.as_deref(), Some("offline"));
        assert_eq!(drafts.count_exhausted(3).unwrap(), 1);
    }

    #[test]
    fn test_retry_delay_doubles_up_to_cap() {
        let p = policy();
        assert_eq!(p.delay_ms(1), 5_000);
        assert_eq!(p.delay_ms(2), 10_000);
        assert_eq!(p.delay_ms(3), 20_000);
        assert_eq!(p.delay_ms(30), 60_000);
        let jitter = deterministic_jitter_ms(jitter_seed("POS-0001"));
        assert!((50..750).contains(&jitter));
    }

    #[test]
    fn test_mark_synced_keeps_hold_confirmed() {
        let drafts = store();
        let draft = LocalDraft::new(order("POS-0001", vec![food("a", 1, 1)]), DraftKind::Hold);
        drafts.save(&draft).unwrap();
        drafts.record_failure("POS-0001", "offline", &policy()).unwrap();

        let mut confirmed = draft.order.clone();
        confirmed.items[0].is_done = true;
        assert!(drafts.mark_synced("POS-0001", &draft.order, &confirmed).unwrap());

        let held = drafts.get("POS-0001").unwrap();
        assert!(!held.pending_sync);
        assert_eq!(held.retry_count, 0);
        assert!(held.order.items[0].is_done);
        assert!(drafts.list_due(now_millis(), 10).unwrap().is_empty());
    }

    #[test]
    fn test_stale_confirmation_keeps_newer_edit_queued() {
        let drafts = store();
        let first = LocalDraft::new(order("POS-0001", vec![food("a", 1, 1_000)]), DraftKind::Hold);
        drafts.save(&first).unwrap();
        let mut edited = first.clone();
        edited.order.items.push(drink("b", 1, 2_000));
        edited.order.total = 3_000;
        drafts.save(&edited).unwrap();

        assert!(!drafts.mark_synced("POS-0001", &first.order, &first.order).unwrap());
        assert!(!drafts.mark_rejected("POS-0001", &first.order, "bad").unwrap());
        assert!(!drafts.convert_to_reference(&first.order, &first.order).unwrap());

        let held = drafts.get("POS-0001").unwrap();
        assert!(held.pending_sync);
        assert_eq!(held.order.items.len(), 2);
        assert!(drafts.get_reference("POS-0001").unwrap().is_none());
    }

    #[test]
    fn test_convert_to_reference_removes_sale() {
        let drafts = store();
        let draft = LocalDraft::new(order("POS-0001", vec![food("a", 2, 10_000)]), DraftKind::Sale);
        drafts.save(&draft).unwrap();

        assert!(drafts.convert_to_reference(&draft.order, &draft.order).unwrap());

        assert!(matches!(drafts.get("POS-0001"), Err(SyncError::NotFound(_))));
        let reference = drafts.get_reference("POS-0001").unwrap().unwrap();
        assert_eq!(reference.total, 20_000);
    }

    #[test]
    fn test_rejected_draft_leaves_queue_but_stays_stored() {
        let drafts = store();
        drafts
            .save(&LocalDraft::new(order("POS-0001", vec![food("a", 1, 1)]), DraftKind::Hold))
            .unwrap();
        let pushed = drafts.get("POS-0001").unwrap().order;
        assert!(drafts.mark_rejected("POS-0001", &pushed, "Order has no items").unwrap());

        assert_eq!(drafts.count_pending().unwrap(), 0);
        assert_eq!(
            drafts.get("POS-0001").unwrap().last_error.as_deref(),
            Some("Order has no items")
        );
    }

    #[test]
    fn test_next_order_id_uses_prefix() {
        let drafts = store();
        assert_eq!(drafts.next_order_id("POS").unwrap(), "POS-0001");
        assert_eq!(drafts.next_order_id("POS").unwrap(), "POS-0002");
    }
}
