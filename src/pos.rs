//! POS cart session.
//!
//! `PosSession` owns one cashier's cart and hands finished carts to the
//! orchestrator. There is one session per register; nothing here is global.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use crate::drafts::{DraftKind, LocalDraft};
use crate::error::{SyncError, SyncResult};
use crate::model::{now_millis, CategoryType, LineItem, Order, OrderType, PaymentMethod};
use crate::sync::{PushOutcome, SyncOrchestrator};

/// Product fields snapshotted into a line item when it is added to a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogProduct {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub category_type: CategoryType,
}

/// A draft handed to the orchestrator. `outcome` resolves once the push
/// finished (or was queued for retry).
#[derive(Debug)]
pub struct SubmittedDraft {
    pub draft: LocalDraft,
    pub outcome: oneshot::Receiver<SyncResult<PushOutcome>>,
}

pub struct PosSession {
    sync: Arc<SyncOrchestrator>,
    cart: Vec<LineItem>,
    customer_name: String,
    order_type: OrderType,
    /// Order being edited after `resume_draft`; its id is reused on submit.
    resumed: Option<Order>,
}

impl PosSession {
    pub fn new(sync: Arc<SyncOrchestrator>) -> Self {
        Self {
            sync,
            cart: Vec::new(),
            customer_name: String::new(),
            order_type: OrderType::DineIn,
            resumed: None,
        }
    }

    pub fn cart(&self) -> &[LineItem] {
        &self.cart
    }

    pub fn cart_total(&self) -> i64 {
        self.cart.iter().map(LineItem::line_total).sum()
    }

    pub fn resumed_order_id(&self) -> Option<&str> {
        self.resumed.as_ref().map(|o| o.id.as_str())
    }

    pub fn set_customer(&mut self, customer_name: impl Into<String>, order_type: OrderType) {
        self.customer_name = customer_name.into();
        self.order_type = order_type;
    }

    /// Add `qty` of `product` as a new line. Returns the line id.
    pub fn add_item(
        &mut self,
        product: &CatalogProduct,
        qty: u32,
        notes: impl Into<String>,
    ) -> SyncResult<String> {
        if qty == 0 {
            return Err(SyncError::Validation("Quantity must be at least 1".into()));
        }
        if product.price < 0 {
            return Err(SyncError::Validation(format!(
                "Product '{}' has a negative price",
                product.name
            )));
        }
        let line_id = Uuid::new_v4().to_string();
        self.cart.push(LineItem {
            id: line_id.clone(),
            name: product.name.clone(),
            qty,
            price: product.price,
            category_type: product.category_type,
            notes: notes.into(),
            is_done: false,
        });
        debug!(line_id = %line_id, product_id = %product.id, qty, "Cart line added");
        Ok(line_id)
    }

    /// Quantity 0 removes the line.
    pub fn set_quantity(&mut self, line_id: &str, qty: u32) -> SyncResult<()> {
        if qty == 0 {
            return self.remove_item(line_id);
        }
        let line = self
            .cart
            .iter_mut()
            .find(|l| l.id == line_id)
            .ok_or_else(|| SyncError::NotFound(format!("cart line {line_id}")))?;
        line.qty = qty;
        Ok(())
    }

    pub fn remove_item(&mut self, line_id: &str) -> SyncResult<()> {
        let before = self.cart.len();
        self.cart.retain(|l| l.id != line_id);
        if self.cart.len() == before {
            return Err(SyncError::NotFound(format!("cart line {line_id}")));
        }
        Ok(())
    }

    /// Drop the cart and forget any resumed order.
    pub fn clear(&mut self) {
        self.cart.clear();
        self.customer_name.clear();
        self.order_type = OrderType::DineIn;
        self.resumed = None;
    }

    fn build_order(&self) -> SyncResult<Order> {
        if self.cart.is_empty() {
            return Err(SyncError::Validation("Cart is empty".into()));
        }
        let mut order = match &self.resumed {
            Some(resumed) => {
                let mut order = resumed.clone();
                order.items = self.cart.clone();
                order.customer_name = self.customer_name.clone();
                order.order_type = self.order_type;
                order.total = self.cart_total();
                order
            }
            None => {
                let id = self
                    .sync
                    .drafts()
                    .next_order_id(&self.sync.config().order_id_prefix)?;
                Order::new(id, self.customer_name.clone(), self.order_type, self.cart.clone())
            }
        };
        order.updated_at = now_millis();
        Ok(order)
    }

    /// Turn the cart into a draft of `kind` and push it in the background.
    /// The cart is cleared once the draft is accepted locally.
    pub fn create_draft(&mut self, kind: DraftKind) -> SyncResult<SubmittedDraft> {
        let order = self.build_order()?;
        self.submit(LocalDraft::new(order, kind))
    }

    fn submit(&mut self, draft: LocalDraft) -> SyncResult<SubmittedDraft> {
        draft.order.validate()?;
        let outcome = self.sync.push_in_background(draft.clone());
        info!(order_id = %draft.order.id, kind = %draft.kind, total = draft.order.total, "Draft submitted");
        self.clear();
        Ok(SubmittedDraft { draft, outcome })
    }

    /// Park the cart as a held order. Resuming and holding again reuses the id.
    pub fn hold_draft(&mut self) -> SyncResult<SubmittedDraft> {
        self.create_draft(DraftKind::Hold)
    }

    /// Load a held order into the cart. A hold whose push is still pending
    /// is pushed again right away.
    pub fn resume_draft(&mut self, order_id: &str) -> SyncResult<Option<SubmittedDraft>> {
        let draft = self.sync.drafts().get(order_id)?;
        if draft.kind != DraftKind::Hold {
            return Err(SyncError::Validation(format!("{order_id} is not a held order")));
        }

        self.cart = draft.order.items.clone();
        self.customer_name = draft.order.customer_name.clone();
        self.order_type = draft.order.order_type;
        self.resumed = Some(draft.order.clone());
        info!(order_id = %order_id, "Held order resumed");

        if !draft.pending_sync {
            return Ok(None);
        }
        let outcome = self.sync.push_in_background(draft.clone());
        Ok(Some(SubmittedDraft { draft, outcome }))
    }

    /// Take payment for the cart and submit it as a sale.
    pub fn finalize_sale(
        &mut self,
        paid: i64,
        payment_method: PaymentMethod,
    ) -> SyncResult<SubmittedDraft> {
        let total = self.cart_total();
        if paid < total {
            return Err(SyncError::Validation(format!(
                "Amount paid {paid} is less than total {total}"
            )));
        }
        let mut order = self.build_order()?;
        order.paid = paid;
        order.payment_method = Some(payment_method);
        self.submit(LocalDraft::new(order, DraftKind::Sale))
    }

    /// Void an order. Clears the cart when it holds that order.
    pub async fn void_order(&mut self, order_id: &str) -> SyncResult<Order> {
        let voided = self.sync.void_order(order_id).await?;
        if self.resumed_order_id() == Some(order_id) {
            self.clear();
        }
        Ok(voided)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::db::test_db;
    use crate::drafts::DraftStore;
    use crate::model::OrderStatus;
    use crate::store::memory::InMemoryOrderStore;
    use crate::store::OrderStore;

    fn nasi_goreng() -> CatalogProduct {
        CatalogProduct {
            id: "p-1".into(),
            name: "Nasi Goreng".into(),
            price: 10_000,
            category_type: CategoryType::Food,
        }
    }

    fn es_teh() -> CatalogProduct {
        CatalogProduct {
            id: "p-2".into(),
            name: "Es Teh".into(),
            price: 8_000,
            category_type: CategoryType::Drink,
        }
    }

    fn session() -> (PosSession, Arc<SyncOrchestrator>, Arc<InMemoryOrderStore>) {
        let store = Arc::new(InMemoryOrderStore::new());
        let sync = Arc::new(SyncOrchestrator::new(
            DraftStore::new(Arc::new(test_db())),
            store.clone(),
            SyncConfig::default(),
        ));
        (PosSession::new(sync.clone()), sync, store)
    }

    #[tokio::test]
    async fn test_finalize_sale_pushes_and_clears_cart() {
        let (mut pos, sync, store) = session();
        pos.set_customer("Table 4", OrderType::DineIn);
        pos.add_item(&nasi_goreng(), 2, "").unwrap();
        pos.add_item(&es_teh(), 1, "less sugar").unwrap();
        assert_eq!(pos.cart_total(), 28_000);

        let submitted = pos.finalize_sale(30_000, PaymentMethod::Cash).unwrap();
        assert_eq!(submitted.draft.order.id, "POS-0001");
        assert!(pos.cart().is_empty());

        let outcome = submitted.outcome.await.unwrap().unwrap();
        assert!(outcome.is_synced());
        let stored = store.get("POS-0001").await.unwrap();
        assert_eq!(stored.paid, 30_000);
        assert_eq!(stored.payment_method, Some(PaymentMethod::Cash));
        assert!(sync.drafts().get_reference("POS-0001").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_underpaid_sale_is_rejected_and_cart_kept() {
        let (mut pos, _sync, _store) = session();
        pos.add_item(&nasi_goreng(), 1, "").unwrap();

        let err = pos.finalize_sale(5_000, PaymentMethod::Cash).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(pos.cart().len(), 1);
    }

    #[tokio::test]
    async fn test_hold_resume_edit_reuses_order_id() {
        let (mut pos, sync, store) = session();
        pos.add_item(&nasi_goreng(), 2, "").unwrap();
        pos.add_item(&es_teh(), 1, "").unwrap();
        let held = pos.hold_draft().unwrap();
        held.outcome.await.unwrap().unwrap();

        let first_line = held.draft.order.items[0].id.clone();
        sync.persist_item_completion("POS-0001", &first_line, true)
            .await
            .unwrap();

        assert!(pos.resume_draft("POS-0001").unwrap().is_none());
        pos.add_item(
            &CatalogProduct {
                id: "p-3".into(),
                name: "Kerupuk".into(),
                price: 2_000,
                category_type: CategoryType::Food,
            },
            1,
            "",
        )
        .unwrap();
        let again = pos.hold_draft().unwrap();
        assert_eq!(again.draft.order.id, "POS-0001");
        again.outcome.await.unwrap().unwrap();

        let stored = store.get("POS-0001").await.unwrap();
        assert_eq!(stored.total, 30_000);
        assert!(stored.item(&first_line).unwrap().is_done);
        assert_eq!(
            store.list_by_status(&OrderStatus::ACTIVE).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_void_resumed_order_clears_cart() {
        let (mut pos, _sync, _store) = session();
        pos.add_item(&es_teh(), 1, "").unwrap();
        pos.hold_draft().unwrap().outcome.await.unwrap().unwrap();
        pos.resume_draft("POS-0001").unwrap();

        let voided = pos.void_order("POS-0001").await.unwrap();
        assert_eq!(voided.status, OrderStatus::Cancelled);
        assert!(pos.cart().is_empty());
        assert!(pos.resumed_order_id().is_none());
    }

    #[tokio::test]
    async fn test_cart_line_editing() {
        let (mut pos, _sync, _store) = session();
        let line = pos.add_item(&nasi_goreng(), 1, "").unwrap();
        pos.set_quantity(&line, 3).unwrap();
        assert_eq!(pos.cart_total(), 30_000);
        pos.set_quantity(&line, 0).unwrap();
        assert!(pos.cart().is_empty());
        assert!(pos.remove_item(&line).is_err());
        assert!(pos.add_item(&nasi_goreng(), 0, "").is_err());
        assert!(matches!(pos.hold_draft(), Err(SyncError::Validation(_))));
    }
}
