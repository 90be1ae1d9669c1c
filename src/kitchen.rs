//! Kitchen Reconciliation Controller.
//!
//! Per-display projection of active orders with an optimistic overlay.
//! Everything here is synchronous bookkeeping; `crate::display` drives it
//! from the poll ticker, the notification stream and the write queue.
//!
//! Two rules keep stale reads from clobbering local state:
//!
//! * an order with a toggle or finalize in flight is in the suppression set
//!   and no pull result touches it;
//! * every pull carries the [`LoadTicket`] it was issued with, and an order
//!   whose local state changed after that ticket is skipped, so a poll that
//!   was already in flight when a write resolved cannot undo it.

use std::collections::HashMap;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::model::{CategoryType, Order};
use crate::order_state::is_ready_to_finalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StationFilter {
    #[default]
    All,
    Food,
    Drink,
}

impl StationFilter {
    pub fn category(self) -> Option<CategoryType> {
        match self {
            StationFilter::All => None,
            StationFilter::Food => Some(CategoryType::Food),
            StationFilter::Drink => Some(CategoryType::Drink),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StationFilter::All => "all",
            StationFilter::Food => "food",
            StationFilter::Drink => "drink",
        }
    }

    /// Whether the station has anything to prepare for `order`.
    pub fn shows(self, order: &Order) -> bool {
        match self.category() {
            None => true,
            Some(category) => order.items.iter().any(|i| i.category_type == category),
        }
    }
}

impl FromStr for StationFilter {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(StationFilter::All),
            "food" | "kitchen" => Ok(StationFilter::Food),
            "drink" | "drinks" | "bar" => Ok(StationFilter::Drink),
            other => Err(SyncError::Validation(format!("Unknown station: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    Idle,
    Loading,
    Synced,
}

/// Issued by [`KitchenController::begin_load`] and handed back with the
/// pull result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleRequest {
    pub op_id: u64,
    pub order_id: String,
    pub item_id: String,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeRequest {
    pub op_id: u64,
    pub order_id: String,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Toggle {
        op_id: u64,
        item_id: String,
        previous: bool,
    },
    Finalize {
        op_id: u64,
        snapshot: Option<Order>,
    },
}

impl PendingOp {
    fn op_id(&self) -> u64 {
        match self {
            PendingOp::Toggle { op_id, .. } | PendingOp::Finalize { op_id, .. } => *op_id,
        }
    }
}

/// What a display renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionSnapshot {
    pub station: StationFilter,
    pub phase: ControllerPhase,
    /// Active orders, oldest first.
    pub orders: Vec<Order>,
    /// Orders with a toggle or finalize in flight.
    pub pending_order_ids: Vec<String>,
    /// Bumped once per detected increase of the active order count.
    pub alert_seq: u64,
    pub last_error: Option<String>,
}

pub struct KitchenController {
    station: StationFilter,
    phase: ControllerPhase,
    orders: Vec<Order>,
    pending: HashMap<String, Vec<PendingOp>>,
    /// Ticket value current when each order's local state last changed.
    touched: HashMap<String, u64>,
    next_ticket: u64,
    last_full_pull: u64,
    next_op_id: u64,
    previous_count: Option<usize>,
    alert_seq: u64,
    last_error: Option<String>,
    mounted: bool,
}

impl KitchenController {
    pub fn new(station: StationFilter) -> Self {
        Self {
            station,
            phase: ControllerPhase::Idle,
            orders: Vec::new(),
            pending: HashMap::new(),
            touched: HashMap::new(),
            next_ticket: 0,
            last_full_pull: 0,
            next_op_id: 0,
            previous_count: None,
            alert_seq: 0,
            last_error: None,
            mounted: true,
        }
    }

    pub fn phase(&self) -> ControllerPhase {
        self.phase
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn is_suppressed(&self, order_id: &str) -> bool {
        self.pending.contains_key(order_id)
    }

    pub fn order(&self, order_id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == order_id)
    }

    pub fn snapshot(&self) -> ProjectionSnapshot {
        let mut pending_order_ids: Vec<String> = self.pending.keys().cloned().collect();
        pending_order_ids.sort();
        ProjectionSnapshot {
            station: self.station,
            phase: self.phase,
            orders: self.orders.clone(),
            pending_order_ids,
            alert_seq: self.alert_seq,
            last_error: self.last_error.clone(),
        }
    }

    fn touch(&mut self, order_id: &str) {
        self.touched.insert(order_id.to_string(), self.next_ticket);
    }

    fn changed_since(&self, order_id: &str, ticket: LoadTicket) -> bool {
        self.touched
            .get(order_id)
            .is_some_and(|&changed| changed >= ticket.0)
    }

    fn visible(&self, order: &Order) -> bool {
        order.status.is_active() && self.station.shows(order)
    }

    fn put(&mut self, order: Order) {
        match self.orders.iter_mut().find(|o| o.id == order.id) {
            Some(existing) => *existing = order,
            None => self.orders.push(order),
        }
    }

    fn remove(&mut self, order_id: &str) -> Option<Order> {
        let idx = self.orders.iter().position(|o| o.id == order_id)?;
        Some(self.orders.remove(idx))
    }

    fn sort(&mut self) {
        self.orders
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }

    fn finalizing_count(&self) -> usize {
        self.pending
            .values()
            .filter(|ops| {
                ops.iter()
                    .any(|op| matches!(op, PendingOp::Finalize { snapshot: Some(_), .. }))
            })
            .count()
    }

    /// Signal once when the active count grew since the previous pull.
    /// Orders being finalized still count, so a rollback never looks new.
    fn detect_new_orders(&mut self) {
        let count = self.orders.len() + self.finalizing_count();
        if let Some(previous) = self.previous_count {
            if count > previous {
                self.alert_seq += 1;
                info!(previous, count, "New kitchen order detected");
            }
        }
        self.previous_count = Some(count);
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    pub fn begin_load(&mut self) -> LoadTicket {
        self.next_ticket += 1;
        if self.mounted {
            self.phase = ControllerPhase::Loading;
        }
        LoadTicket(self.next_ticket)
    }

    /// Reconcile the full active set from a poll tick or the initial load.
    pub fn apply_full_pull(&mut self, ticket: LoadTicket, pulled: Vec<Order>) {
        if !self.mounted {
            return;
        }
        if ticket.0 < self.last_full_pull {
            debug!(ticket = ticket.0, "Discarding superseded full pull");
            return;
        }
        self.last_full_pull = ticket.0;

        let mut incoming: HashMap<String, Order> = pulled
            .into_iter()
            .filter(|o| self.visible(o))
            .map(|o| (o.id.clone(), o))
            .collect();

        let mut next = Vec::with_capacity(incoming.len());
        for local in std::mem::take(&mut self.orders) {
            if self.is_suppressed(&local.id) || self.changed_since(&local.id, ticket) {
                incoming.remove(&local.id);
                next.push(local);
            } else if let Some(fresh) = incoming.remove(&local.id) {
                next.push(fresh);
            }
        }
        for (id, fresh) in incoming {
            if !self.is_suppressed(&id) && !self.changed_since(&id, ticket) {
                next.push(fresh);
            }
        }
        self.orders = next;
        self.sort();

        self.touched.retain(|_, changed| *changed >= ticket.0);
        self.phase = ControllerPhase::Synced;
        self.detect_new_orders();
    }

    /// Reconcile the orders named by a change notification. `ids` missing
    /// from `pulled` no longer exist and leave the projection.
    pub fn apply_partial_pull(&mut self, ticket: LoadTicket, ids: &[String], pulled: Vec<Order>) {
        if !self.mounted {
            return;
        }
        let mut incoming: HashMap<String, Order> =
            pulled.into_iter().map(|o| (o.id.clone(), o)).collect();

        for id in ids {
            if self.is_suppressed(id) || self.changed_since(id, ticket) {
                debug!(order_id = %id, "Change notification suppressed");
                continue;
            }
            match incoming.remove(id) {
                Some(order) if self.visible(&order) => self.put(order),
                _ => {
                    self.remove(id);
                }
            }
            self.touch(id);
        }
        self.sort();
        self.phase = ControllerPhase::Synced;
        self.detect_new_orders();
    }

    /// A pull failed. The projection is kept as it was.
    pub fn load_failed(&mut self, err: &SyncError) {
        if !self.mounted {
            return;
        }
        warn!(error = %err, "Kitchen refresh failed");
        self.phase = if self.previous_count.is_some() {
            ControllerPhase::Synced
        } else {
            ControllerPhase::Idle
        };
        self.last_error = Some(err.operator_message());
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }

    // -----------------------------------------------------------------------
    // Optimistic toggles
    // -----------------------------------------------------------------------

    /// Mark an item done locally and return the write to send. `None` when
    /// the item is already done.
    pub fn begin_toggle(&mut self, order_id: &str, item_id: &str) -> SyncResult<Option<ToggleRequest>> {
        if !self.mounted {
            return Err(SyncError::Validation("Display is closed".into()));
        }
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| SyncError::NotFound(format!("order {order_id}")))?;
        let item = order
            .item_mut(item_id)
            .ok_or_else(|| SyncError::NotFound(format!("item {item_id} in order {order_id}")))?;
        if item.is_done {
            return Ok(None);
        }
        item.is_done = true;

        self.next_op_id += 1;
        let op_id = self.next_op_id;
        self.pending
            .entry(order_id.to_string())
            .or_default()
            .push(PendingOp::Toggle {
                op_id,
                item_id: item_id.to_string(),
                previous: false,
            });
        self.touch(order_id);
        debug!(order_id = %order_id, item_id = %item_id, op_id, "Optimistic toggle applied");

        Ok(Some(ToggleRequest {
            op_id,
            order_id: order_id.to_string(),
            item_id: item_id.to_string(),
            done: true,
        }))
    }

    fn take_op(&mut self, order_id: &str, op_id: u64) -> Option<PendingOp> {
        let ops = self.pending.get_mut(order_id)?;
        let idx = ops.iter().position(|op| op.op_id() == op_id)?;
        let op = ops.remove(idx);
        if ops.is_empty() {
            self.pending.remove(order_id);
        }
        Some(op)
    }

    /// Restore an item in the projection and in any finalize snapshot
    /// parked for the same order, so a failed finalize cannot bring the
    /// toggle back.
    fn rollback_item(&mut self, order_id: &str, item_id: &str, previous: bool) {
        let in_view = self.orders.iter_mut().find(|o| o.id == order_id);
        let parked = self
            .pending
            .get_mut(order_id)
            .into_iter()
            .flatten()
            .find_map(|op| match op {
                PendingOp::Finalize {
                    snapshot: Some(order),
                    ..
                } => Some(order),
                _ => None,
            });
        for order in in_view.into_iter().chain(parked) {
            if let Some(item) = order.item_mut(item_id) {
                item.is_done = previous;
            }
        }
    }

    /// Apply the store's answer to a toggle. Returns `false` when the result
    /// was discarded (display closed or unknown op).
    pub fn resolve_toggle(&mut self, request: &ToggleRequest, result: SyncResult<Order>) -> bool {
        if !self.mounted {
            return false;
        }
        let Some(PendingOp::Toggle { item_id, previous, .. }) =
            self.take_op(&request.order_id, request.op_id)
        else {
            return false;
        };
        self.touch(&request.order_id);

        match result {
            Ok(confirmed) => {
                if self.is_suppressed(&request.order_id) {
                    // Later ops still in flight: only fold in completions.
                    if let Some(local) = self.orders.iter_mut().find(|o| o.id == confirmed.id) {
                        for item in &mut local.items {
                            if confirmed.item(&item.id).is_some_and(|c| c.is_done) {
                                item.is_done = true;
                            }
                        }
                    }
                } else if self.visible(&confirmed) {
                    self.put(confirmed);
                    self.sort();
                } else {
                    self.remove(&request.order_id);
                }
            }
            Err(SyncError::NotFound(msg)) => {
                warn!(order_id = %request.order_id, "Toggled order no longer exists");
                self.pending.remove(&request.order_id);
                self.remove(&request.order_id);
                self.last_error = Some(SyncError::NotFound(msg).operator_message());
            }
            Err(e) => {
                self.rollback_item(&request.order_id, &item_id, previous);
                warn!(
                    order_id = %request.order_id,
                    item_id = %item_id,
                    error = %e,
                    "Toggle failed, rolled back"
                );
                self.last_error = Some(e.operator_message());
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Optimistic finalize
    // -----------------------------------------------------------------------

    /// Remove an order locally and return the write to send. `None` when a
    /// finalize for it is already in flight.
    pub fn begin_finalize(&mut self, order_id: &str) -> SyncResult<Option<FinalizeRequest>> {
        if !self.mounted {
            return Err(SyncError::Validation("Display is closed".into()));
        }
        let already = self.pending.get(order_id).is_some_and(|ops| {
            ops.iter()
                .any(|op| matches!(op, PendingOp::Finalize { .. }))
        });
        if already {
            return Ok(None);
        }
        if let Some(order) = self.order(order_id) {
            if !is_ready_to_finalize(order, self.station.category()) {
                return Err(SyncError::Validation(format!(
                    "Order {order_id} still has items to prepare"
                )));
            }
        }

        let snapshot = self.remove(order_id);
        self.next_op_id += 1;
        let op_id = self.next_op_id;
        self.pending
            .entry(order_id.to_string())
            .or_default()
            .push(PendingOp::Finalize { op_id, snapshot });
        self.touch(order_id);
        debug!(order_id = %order_id, op_id, "Optimistic finalize applied");

        Ok(Some(FinalizeRequest {
            op_id,
            order_id: order_id.to_string(),
        }))
    }

    pub fn resolve_finalize(&mut self, request: &FinalizeRequest, result: SyncResult<Order>) -> bool {
        if !self.mounted {
            return false;
        }
        let Some(PendingOp::Finalize { snapshot, .. }) =
            self.take_op(&request.order_id, request.op_id)
        else {
            return false;
        };
        self.touch(&request.order_id);

        match result {
            Ok(order) => {
                info!(order_id = %order.id, status = %order.status, "Order finalized");
                if self.visible(&order) {
                    self.put(order);
                    self.sort();
                }
            }
            Err(SyncError::NotFound(msg)) => {
                warn!(order_id = %request.order_id, "Finalized order no longer exists");
                self.last_error = Some(SyncError::NotFound(msg).operator_message());
            }
            Err(e) => {
                warn!(order_id = %request.order_id, error = %e, "Finalize failed, order restored");
                if let Some(order) = snapshot {
                    self.put(order);
                    self.sort();
                }
                self.last_error = Some(e.operator_message());
            }
        }
        true
    }

    /// Detach the display. Late results are discarded from here on.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.pending.clear();
        self.phase = ControllerPhase::Idle;
    }
}
