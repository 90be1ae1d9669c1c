//! Order and line item records as stored in the canonical `orders` table.
//!
//! Amounts are integer minor units. `items` is serialized as one JSON array
//! per order: `{id, name, qty, price, categoryType, notes, isDone}`.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{SyncError, SyncResult};

/// Current time truncated to milliseconds so timestamps survive a round trip
/// through stores with coarser precision.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Fixed-width RFC 3339 text (`2026-01-02T03:04:05.678Z`). Sorts
/// lexicographically in SQLite.
pub(crate) fn db_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_db_timestamp(raw: &str) -> SyncResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| SyncError::Storage(format!("bad timestamp {raw:?}: {e}")))
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Statuses shown on kitchen displays.
    pub const ACTIVE: [OrderStatus; 3] = [
        OrderStatus::Pending,
        OrderStatus::Preparing,
        OrderStatus::Ready,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Preparing => "PREPARING",
            OrderStatus::Ready => "READY",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "preparing" | "in_progress" => Ok(OrderStatus::Preparing),
            "ready" => Ok(OrderStatus::Ready),
            "completed" | "done" => Ok(OrderStatus::Completed),
            "cancelled" | "canceled" | "void" => Ok(OrderStatus::Cancelled),
            other => Err(SyncError::Validation(format!("Unknown order status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "dine-in")]
    DineIn,
    #[serde(rename = "take-away")]
    TakeAway,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::DineIn => "dine-in",
            OrderType::TakeAway => "take-away",
        }
    }
}

impl FromStr for OrderType {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dine-in" | "dine_in" | "dinein" => Ok(OrderType::DineIn),
            "take-away" | "take_away" | "takeaway" | "pickup" => Ok(OrderType::TakeAway),
            other => Err(SyncError::Validation(format!("Unknown order type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Qris,
    Transfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Qris => "qris",
            PaymentMethod::Transfer => "transfer",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "qris" => Ok(PaymentMethod::Qris),
            "transfer" => Ok(PaymentMethod::Transfer),
            other => Err(SyncError::Validation(format!(
                "Unknown payment method: {other}"
            ))),
        }
    }
}

/// Catalog category of a line item. Also the kitchen station it is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryType {
    Food,
    Drink,
}

// ---------------------------------------------------------------------------
// Line item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(deserialize_with = "deserialize_item_id")]
    pub id: String,
    pub name: String,
    pub qty: u32,
    pub price: i64,
    pub category_type: CategoryType,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub is_done: bool,
}

impl LineItem {
    pub fn line_total(&self) -> i64 {
        i64::from(self.qty) * self.price
    }
}

/// Older rows carry numeric item ids. They are read as their decimal string
/// so every lookup goes through identity, never through array position.
fn deserialize_item_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s.trim().to_string(),
        RawId::Int(n) => n.to_string(),
        RawId::Uint(n) => n.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "now_millis")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub customer_name: String,
    pub order_type: OrderType,
    pub total: i64,
    #[serde(default)]
    pub paid: i64,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    pub status: OrderStatus,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

impl Order {
    /// New PENDING order with `total` computed from the item snapshot.
    pub fn new(
        id: impl Into<String>,
        customer_name: impl Into<String>,
        order_type: OrderType,
        items: Vec<LineItem>,
    ) -> Self {
        let now = now_millis();
        let total = items.iter().map(LineItem::line_total).sum();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            customer_name: customer_name.into(),
            order_type,
            total,
            paid: 0,
            payment_method: None,
            status: OrderStatus::Pending,
            items,
        }
    }

    pub fn items_total(&self) -> i64 {
        self.items.iter().map(LineItem::line_total).sum()
    }

    pub fn item(&self, item_id: &str) -> Option<&LineItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut LineItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    /// Structural checks applied before a draft is accepted for push.
    pub fn validate(&self) -> SyncResult<()> {
        if self.id.trim().is_empty() {
            return Err(SyncError::Validation("Missing order id".into()));
        }
        if self.items.is_empty() {
            return Err(SyncError::Validation("Order has no items".into()));
        }
        if self.status == OrderStatus::Completed {
            return Err(SyncError::Validation(
                "Orders can only be completed from the kitchen".into(),
            ));
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            if item.id.is_empty() {
                return Err(SyncError::Validation(format!(
                    "Item '{}' has no id",
                    item.name
                )));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(SyncError::Validation(format!(
                    "Duplicate item id {}",
                    item.id
                )));
            }
            if item.qty == 0 {
                return Err(SyncError::Validation(format!(
                    "Item '{}' has zero quantity",
                    item.name
                )));
            }
            if item.price < 0 {
                return Err(SyncError::Validation(format!(
                    "Item '{}' has a negative price",
                    item.name
                )));
            }
        }

        let computed = self.items_total();
        if computed != self.total {
            return Err(SyncError::Validation(format!(
                "Order total {} does not match items ({computed})",
                self.total
            )));
        }
        if self.paid < 0 {
            return Err(SyncError::Validation("Amount paid is negative".into()));
        }
        Ok(())
    }
}
