//! SQLite-backed canonical store.
//!
//! Each write is a read-merge-write inside one `BEGIN IMMEDIATE` transaction,
//! so concurrent writers on the same file serialize per write and no partial
//! record is ever visible.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

use crate::db::DbState;
use crate::error::{SyncError, SyncResult};
use crate::merge;
use crate::model::{db_timestamp as ts, parse_db_timestamp, Order, OrderStatus};

use super::OrderStore;

const ORDER_COLUMNS: &str = "id, created_at, updated_at, total, paid, payment_method,
     customer_name, order_type, status, items";

pub struct SqliteOrderStore {
    db: Arc<DbState>,
}

fn store_err(e: rusqlite::Error) -> SyncError {
    SyncError::Transient(format!("order store: {e}"))
}

struct OrderRow {
    id: String,
    created_at: String,
    updated_at: String,
    total: i64,
    paid: i64,
    payment_method: Option<String>,
    customer_name: String,
    order_type: String,
    status: String,
    items: String,
}

impl OrderRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            updated_at: row.get(2)?,
            total: row.get(3)?,
            paid: row.get(4)?,
            payment_method: row.get(5)?,
            customer_name: row.get(6)?,
            order_type: row.get(7)?,
            status: row.get(8)?,
            items: row.get(9)?,
        })
    }

    fn into_order(self) -> SyncResult<Order> {
        let items = serde_json::from_str(&self.items).map_err(|e| {
            SyncError::Storage(format!("corrupt items for order {}: {e}", self.id))
        })?;
        let payment_method = match self.payment_method.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(raw.parse()?),
            _ => None,
        };
        Ok(Order {
            created_at: parse_db_timestamp(&self.created_at)?,
            updated_at: parse_db_timestamp(&self.updated_at)?,
            total: self.total,
            paid: self.paid,
            payment_method,
            customer_name: self.customer_name,
            order_type: self.order_type.parse()?,
            status: self.status.parse()?,
            items,
            id: self.id,
        })
    }
}

fn read_order(conn: &Connection, id: &str) -> SyncResult<Option<Order>> {
    let row = conn
        .query_row(
            &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"),
            params![id],
            OrderRow::from_row,
        )
        .optional()
        .map_err(store_err)?;
    row.map(OrderRow::into_order).transpose()
}

fn write_order(conn: &Connection, order: &Order) -> SyncResult<()> {
    let items = serde_json::to_string(&order.items)
        .map_err(|e| SyncError::Validation(format!("serialize items: {e}")))?;
    conn.execute(
        "INSERT INTO orders (
            id, created_at, updated_at, total, paid, payment_method,
            customer_name, order_type, status, items
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(id) DO UPDATE SET
            updated_at = excluded.updated_at,
            total = excluded.total,
            paid = excluded.paid,
            payment_method = excluded.payment_method,
            customer_name = excluded.customer_name,
            order_type = excluded.order_type,
            status = excluded.status,
            items = excluded.items",
        params![
            order.id,
            ts(&order.created_at),
            ts(&order.updated_at),
            order.total,
            order.paid,
            order.payment_method.map(|m| m.as_str()),
            order.customer_name,
            order.order_type.as_str(),
            order.status.as_str(),
            items,
        ],
    )
    .map_err(store_err)?;
    Ok(())
}

/// Run `f` inside one immediate transaction; commit only on `Ok`.
fn in_transaction<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Connection) -> SyncResult<T>,
) -> SyncResult<T> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(store_err)?;
    let value = f(&*tx)?;
    tx.commit().map_err(store_err)?;
    Ok(value)
}

fn list_orders(conn: &Connection, statuses: &[OrderStatus]) -> SyncResult<Vec<Order>> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = (1..=statuses.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {ORDER_COLUMNS} FROM orders
         WHERE status IN ({placeholders})
         ORDER BY created_at ASC, id ASC"
    );

    let mut stmt = conn.prepare(&sql).map_err(store_err)?;
    let rows = stmt
        .query_map(
            params_from_iter(statuses.iter().map(|s| s.as_str())),
            OrderRow::from_row,
        )
        .map_err(store_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(store_err)?;

    rows.into_iter().map(OrderRow::into_order).collect()
}

impl SqliteOrderStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Run `f` against the connection on the blocking pool, so a busy
    /// database never stalls the runtime's workers.
    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&mut Connection) -> SyncResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock()?;
            f(&mut *conn)
        })
        .await
        .map_err(|e| SyncError::Transient(format!("order store task failed: {e}")))?
    }

    /// Load an order, apply `change`, and persist the result when it differs.
    async fn modify<F>(&self, order_id: &str, change: F) -> SyncResult<Order>
    where
        F: FnOnce(&Order) -> SyncResult<Option<Order>> + Send + 'static,
    {
        let order_id = order_id.to_string();
        self.blocking(move |conn| {
            in_transaction(conn, |conn| {
                let current = read_order(conn, &order_id)?
                    .ok_or_else(|| SyncError::NotFound(format!("order {order_id}")))?;
                match change(&current)? {
                    Some(next) => {
                        write_order(conn, &next)?;
                        Ok(next)
                    }
                    None => Ok(current),
                }
            })
        })
        .await
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn upsert(&self, order: Order) -> SyncResult<Order> {
        let stored = self
            .blocking(move |conn| {
                in_transaction(conn, |conn| {
                    let existing = read_order(conn, &order.id)?;
                    let next = merge::apply_upsert(existing.as_ref(), order);
                    if existing.as_ref() != Some(&next) {
                        write_order(conn, &next)?;
                    }
                    Ok(next)
                })
            })
            .await?;
        info!(order_id = %stored.id, status = %stored.status, "Order upserted");
        Ok(stored)
    }

    async fn get(&self, id: &str) -> SyncResult<Order> {
        let id = id.to_string();
        self.blocking(move |conn| {
            read_order(conn, &id)?.ok_or_else(|| SyncError::NotFound(format!("order {id}")))
        })
        .await
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> SyncResult<Vec<Order>> {
        let statuses = statuses.to_vec();
        self.blocking(move |conn| list_orders(conn, &statuses)).await
    }

    async fn update_item_completion(
        &self,
        order_id: &str,
        item_id: &str,
        done: bool,
    ) -> SyncResult<Order> {
        let item = item_id.to_string();
        let order = self
            .modify(order_id, move |current| {
                merge::apply_item_completion(current, &item, done)
            })
            .await?;
        debug!(order_id = %order_id, item_id = %item_id, done, "Item completion stored");
        Ok(order)
    }

    async fn update_status(&self, order_id: &str, status: OrderStatus) -> SyncResult<Order> {
        let order = self
            .modify(order_id, move |current| merge::apply_status(current, status))
            .await?;
        info!(order_id = %order_id, status = %order.status, "Order status stored");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::model::fixtures::*;
    use crate::model::PaymentMethod;

    fn store() -> SqliteOrderStore {
        SqliteOrderStore::new(Arc::new(test_db()))
    }

    #[tokio::test]
    async fn test_upsert_then_get_round_trips_all_columns() {
        let store = store();
        let mut order = order("POS-0001", vec![food("a", 2, 10_000), drink("b", 1, 8_000)]);
        order.paid = 30_000;
        order.payment_method = Some(PaymentMethod::Cash);
        order.items[1].notes = "less sugar".into();

        store.upsert(order.clone()).await.unwrap();
        let loaded = store.get("POS-0001").await.unwrap();

        assert_eq!(loaded.items, order.items);
        assert_eq!(loaded.total, 28_000);
        assert_eq!(loaded.paid, 30_000);
        assert_eq!(loaded.payment_method, Some(PaymentMethod::Cash));
        assert_eq!(loaded.created_at, order.created_at);
    }

    #[tokio::test]
    async fn test_reupsert_keeps_completed_items_and_takes_new_total() {
        let store = store();
        store
            .upsert(order("POS-0001", vec![food("a", 2, 10_000), drink("b", 1, 8_000)]))
            .await
            .unwrap();
        store.update_item_completion("POS-0001", "a", true).await.unwrap();

        let edited = order(
            "POS-0001",
            vec![food("a", 2, 10_000), drink("b", 1, 8_000), drink("c", 1, 2_000)],
        );
        assert!(!edited.items[0].is_done);
        let stored = store.upsert(edited).await.unwrap();

        assert_eq!(stored.total, 30_000);
        assert!(stored.item("a").unwrap().is_done);
        assert_eq!(store.get("POS-0001").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_clearing_completion_is_ignored() {
        let store = store();
        store.upsert(order("POS-0001", vec![food("a", 1, 100)])).await.unwrap();
        store.update_item_completion("POS-0001", "a", true).await.unwrap();
        let after = store.update_item_completion("POS-0001", "a", false).await.unwrap();
        assert!(after.item("a").unwrap().is_done);
    }

    #[tokio::test]
    async fn test_list_by_status_excludes_finalized_orders() {
        let store = store();
        store.upsert(order("POS-0001", vec![food("a", 1, 100)])).await.unwrap();
        store.upsert(order("POS-0002", vec![food("a", 1, 100)])).await.unwrap();

        store.update_status("POS-0001", OrderStatus::Completed).await.unwrap();
        let again = store.update_status("POS-0001", OrderStatus::Completed).await.unwrap();
        assert_eq!(again.status, OrderStatus::Completed);

        let active = store.list_by_status(&OrderStatus::ACTIVE).await.unwrap();
        let ids: Vec<_> = active.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["POS-0002"]);
    }

    #[tokio::test]
    async fn test_missing_order_reports_not_found() {
        let store = store();
        assert!(matches!(store.get("POS-9999").await, Err(SyncError::NotFound(_))));
        assert!(matches!(
            store.update_status("POS-9999", OrderStatus::Ready).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_record_untouched() {
        let store = store();
        store.upsert(order("POS-0001", vec![food("a", 1, 100)])).await.unwrap();
        store.update_status("POS-0001", OrderStatus::Completed).await.unwrap();

        // Voiding a completed order is rejected; nothing is written.
        let err = store
            .update_status("POS-0001", OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(
            store.get("POS-0001").await.unwrap().status,
            OrderStatus::Completed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_toggles_all_land() {
        let store = Arc::new(store());
        let items: Vec<_> = (0..8).map(|i| food(&format!("i{i}"), 1, 100)).collect();
        store.upsert(order("POS-0001", items)).await.unwrap();

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .update_item_completion("POS-0001", &format!("i{i}"), true)
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let stored = store.get("POS-0001").await.unwrap();
        assert!(stored.items.iter().all(|item| item.is_done));
    }
}
