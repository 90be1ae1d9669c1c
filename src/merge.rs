//! Merge-on-upsert.
//!
//! Every store backend funnels its writes through these functions so the
//! completion rule lives in one place: items are matched by identity, a
//! stored `isDone = true` survives any incoming value, every other field is
//! last-write-wins.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::model::{now_millis, LineItem, Order, OrderStatus};
use crate::order_state::{self, StatusAction, Transition};

/// Stale values the merge overrode. Informational only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Items re-sent with `isDone = false` whose stored flag stayed `true`.
    pub preserved_completions: usize,
    /// Items present only in the incoming write.
    pub added_items: usize,
    /// Stored items the incoming write no longer carries.
    pub removed_items: usize,
    /// Incoming status ignored in favour of the stored one.
    pub status_kept: bool,
}

impl MergeReport {
    pub fn has_conflicts(&self) -> bool {
        self.preserved_completions > 0 || self.status_kept
    }
}

/// Merge incoming items over stored ones. Result follows the incoming order.
pub fn merge_items(stored: &[LineItem], incoming: Vec<LineItem>) -> (Vec<LineItem>, MergeReport) {
    let done_by_id: HashMap<&str, bool> = stored
        .iter()
        .map(|item| (item.id.as_str(), item.is_done))
        .collect();

    let mut report = MergeReport::default();
    let mut merged = Vec::with_capacity(incoming.len());
    let mut kept = 0usize;

    for mut item in incoming {
        match done_by_id.get(item.id.as_str()) {
            Some(true) => {
                kept += 1;
                if !item.is_done {
                    report.preserved_completions += 1;
                    item.is_done = true;
                }
            }
            Some(false) => kept += 1,
            None => report.added_items += 1,
        }
        merged.push(item);
    }
    report.removed_items = stored.len().saturating_sub(kept);

    (merged, report)
}

/// Merge a full incoming order over the stored record.
pub fn merge_order(stored: &Order, incoming: Order) -> (Order, MergeReport) {
    let (items, mut report) = merge_items(&stored.items, incoming.items);
    let status = order_state::merge_upsert_status(stored.status, incoming.status);
    report.status_kept = status != incoming.status;

    let merged = Order {
        id: stored.id.clone(),
        created_at: stored.created_at,
        updated_at: incoming.updated_at,
        customer_name: incoming.customer_name,
        order_type: incoming.order_type,
        total: incoming.total,
        paid: incoming.paid,
        payment_method: incoming.payment_method,
        status,
        items,
    };
    (merged, report)
}

/// Stamp for a record replacing one stamped `previous`. Always later than
/// `previous`, so stores can use it as a compare-and-swap token.
pub fn next_stamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    now_millis().max(previous + Duration::milliseconds(1))
}

/// Record to persist for an `upsert`, given whatever is stored under the id.
/// A write that changes nothing returns the stored record as it is.
pub fn apply_upsert(existing: Option<&Order>, incoming: Order) -> Order {
    let Some(stored) = existing else {
        let mut next = incoming;
        next.updated_at = now_millis();
        return next;
    };

    let (mut merged, report) = merge_order(stored, incoming);
    if report.has_conflicts() {
        debug!(
            order_id = %merged.id,
            preserved_completions = report.preserved_completions,
            status_kept = report.status_kept,
            "Stale upsert fields ignored during merge"
        );
    }
    merged.updated_at = stored.updated_at;
    if merged == *stored {
        return merged;
    }
    merged.updated_at = next_stamp(stored.updated_at);
    merged
}

/// Apply a completion flag change. Returns `None` when nothing changes,
/// including the ignored attempt to clear a completed item.
pub fn apply_item_completion(order: &Order, item_id: &str, done: bool) -> SyncResult<Option<Order>> {
    let current = order
        .item(item_id)
        .ok_or_else(|| SyncError::NotFound(format!("item {item_id} in order {}", order.id)))?;

    if current.is_done || !done {
        if current.is_done && !done {
            debug!(
                order_id = %order.id,
                item_id = %item_id,
                "Ignored attempt to clear a completed item"
            );
        }
        return Ok(None);
    }

    let mut next = order.clone();
    if let Some(item) = next.item_mut(item_id) {
        item.is_done = true;
    }
    next.updated_at = next_stamp(order.updated_at);
    Ok(Some(next))
}

/// Apply a status change through the state machine. Returns `None` for a
/// no-op transition.
pub fn apply_status(order: &Order, status: OrderStatus) -> SyncResult<Option<Order>> {
    match order_state::apply(order.status, StatusAction::for_target(status))? {
        Transition::NoOp => Ok(None),
        Transition::Applied(next_status) => {
            let mut next = order.clone();
            next.status = next_status;
            next.updated_at = next_stamp(order.updated_at);
            Ok(Some(next))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[test]
    fn test_completed_item_survives_stale_resend() {
        let mut stored = order("POS-0001", vec![food("a", 2, 10_000), drink("b", 1, 8_000)]);
        stored.items[0].is_done = true;

        let incoming = order("POS-0001", vec![food("a", 2, 10_000), drink("b", 1, 8_000)]);
        let (merged, report) = merge_order(&stored, incoming);

        assert!(merged.item("a").unwrap().is_done);
        assert!(!merged.item("b").unwrap().is_done);
        assert_eq!(report.preserved_completions, 1);
    }

    #[test]
    fn test_merge_matches_by_identity_not_position() {
        let mut stored = order("POS-0001", vec![food("a", 1, 100), food("b", 1, 100)]);
        stored.items[1].is_done = true;

        // Reordered: "b" is now first, "a" second.
        let incoming = order("POS-0001", vec![food("b", 1, 100), food("a", 1, 100)]);
        let (merged, _) = merge_order(&stored, incoming);

        assert_eq!(merged.items[0].id, "b");
        assert!(merged.items[0].is_done);
        assert!(!merged.items[1].is_done);
    }

    #[test]
    fn test_incoming_fields_win_except_completion() {
        let mut stored = order("POS-0001", vec![food("a", 2, 10_000), drink("b", 1, 8_000)]);
        stored.items[0].is_done = true;
        assert_eq!(stored.total, 28_000);

        let mut incoming = order(
            "POS-0001",
            vec![food("a", 2, 10_000), drink("b", 1, 8_000), drink("c", 1, 2_000)],
        );
        incoming.customer_name = "Budi".into();
        assert_eq!(incoming.total, 30_000);

        let (merged, report) = merge_order(&stored, incoming);
        assert_eq!(merged.total, 30_000);
        assert_eq!(merged.customer_name, "Budi");
        assert!(merged.item("a").unwrap().is_done);
        assert_eq!(report.added_items, 1);
        assert_eq!(merged.created_at, stored.created_at);
    }

    #[test]
    fn test_removed_items_are_dropped() {
        let stored = order("POS-0001", vec![food("a", 1, 100), food("b", 1, 100)]);
        let incoming = order("POS-0001", vec![food("a", 1, 100)]);
        let (merged, report) = merge_order(&stored, incoming);
        assert_eq!(merged.items.len(), 1);
        assert_eq!(report.removed_items, 1);
    }

    #[test]
    fn test_reupsert_is_idempotent() {
        let mut stored = order("POS-0001", vec![food("a", 1, 100)]);
        stored.items[0].is_done = true;
        let resend = order("POS-0001", vec![food("a", 1, 100)]);

        let once = apply_upsert(Some(&stored), resend.clone());
        let twice = apply_upsert(Some(&once), resend);
        assert_eq!(once, stored);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_stamps_strictly_increase_within_one_millisecond() {
        let mut stored = order("POS-0001", vec![food("a", 1, 100), food("b", 1, 100)]);
        stored.updated_at = now_millis() + Duration::seconds(60);

        let first = apply_item_completion(&stored, "a", true).unwrap().unwrap();
        let second = apply_item_completion(&first, "b", true).unwrap().unwrap();
        assert!(first.updated_at > stored.updated_at);
        assert!(second.updated_at > first.updated_at);

        let mut edited = second.clone();
        edited.customer_name = "Budi".into();
        let third = apply_upsert(Some(&second), edited);
        assert!(third.updated_at > second.updated_at);
    }

    #[test]
    fn test_item_completion_is_monotonic() {
        let mut stored = order("POS-0001", vec![food("a", 1, 100)]);
        let done = apply_item_completion(&stored, "a", true).unwrap().unwrap();
        assert!(done.item("a").unwrap().is_done);

        stored = done;
        assert!(apply_item_completion(&stored, "a", false).unwrap().is_none());
        assert!(apply_item_completion(&stored, "a", true).unwrap().is_none());
        assert!(matches!(
            apply_item_completion(&stored, "zzz", true),
            Err(SyncError::NotFound(_))
        ));
    }

    #[test]
    fn test_apply_status_finalize_twice() {
        let stored = order("POS-0001", vec![food("a", 1, 100)]);
        let completed = apply_status(&stored, OrderStatus::Completed).unwrap().unwrap();
        assert_eq!(completed.status, OrderStatus::Completed);
        assert!(apply_status(&completed, OrderStatus::Completed).unwrap().is_none());
    }
}
