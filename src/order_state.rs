//! Order status transitions.
//!
//! `PENDING -> PREPARING -> READY` moves forward only. `COMPLETED` is reached
//! through [`StatusAction::Finalize`] and `CANCELLED` through
//! [`StatusAction::Void`], both from any non-terminal status. Repeating a
//! terminal action is a no-op so retried requests stay harmless.

use crate::error::{SyncError, SyncResult};
use crate::model::{CategoryType, Order, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Kitchen progress: `PREPARING` or `READY`.
    Advance(OrderStatus),
    /// Kitchen marks the whole order done.
    Finalize,
    /// POS voids the order.
    Void,
}

impl StatusAction {
    pub fn for_target(target: OrderStatus) -> Self {
        match target {
            OrderStatus::Completed => StatusAction::Finalize,
            OrderStatus::Cancelled => StatusAction::Void,
            other => StatusAction::Advance(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(OrderStatus),
    NoOp,
}

fn progress_rank(status: OrderStatus) -> u8 {
    match status {
        OrderStatus::Pending => 0,
        OrderStatus::Preparing => 1,
        OrderStatus::Ready => 2,
        OrderStatus::Completed | OrderStatus::Cancelled => 3,
    }
}

/// Decide what `action` does to an order currently in `current`.
pub fn apply(current: OrderStatus, action: StatusAction) -> SyncResult<Transition> {
    match action {
        StatusAction::Finalize => {
            if current.is_terminal() {
                Ok(Transition::NoOp)
            } else {
                Ok(Transition::Applied(OrderStatus::Completed))
            }
        }
        StatusAction::Void => match current {
            OrderStatus::Cancelled => Ok(Transition::NoOp),
            OrderStatus::Completed => Err(SyncError::Validation(
                "A completed order cannot be voided".into(),
            )),
            _ => Ok(Transition::Applied(OrderStatus::Cancelled)),
        },
        StatusAction::Advance(target) => {
            if target.is_terminal() {
                return Err(SyncError::Validation(format!(
                    "{target} must be set through finalize or void"
                )));
            }
            if current.is_terminal() {
                return Err(SyncError::Validation(format!(
                    "Order is already {current}"
                )));
            }
            if progress_rank(target) <= progress_rank(current) {
                Ok(Transition::NoOp)
            } else {
                Ok(Transition::Applied(target))
            }
        }
    }
}

/// Status kept when an upsert carries `incoming` over a stored `stored`.
///
/// Upserts may advance or void an order but never complete it and never move
/// it backwards. Anything else keeps the stored status.
pub fn merge_upsert_status(stored: OrderStatus, incoming: OrderStatus) -> OrderStatus {
    if incoming == OrderStatus::Completed {
        return stored;
    }
    match apply(stored, StatusAction::for_target(incoming)) {
        Ok(Transition::Applied(next)) => next,
        Ok(Transition::NoOp) | Err(_) => stored,
    }
}

/// Finalize precondition used by kitchen displays: every item routed to
/// `station` (or every item when `None`) is done.
pub fn is_ready_to_finalize(order: &Order, station: Option<CategoryType>) -> bool {
    order
        .items
        .iter()
        .filter(|item| station.map_or(true, |s| item.category_type == s))
        .all(|item| item.is_done)
}
