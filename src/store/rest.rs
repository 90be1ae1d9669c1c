//! Remote canonical store over a PostgREST-style HTTP API.
//!
//! The `orders` table is exposed at `{base}/rest/v1/orders` with the row
//! shape of [`Order`] (items in one JSON column). Writes are
//! read-merge-compare-and-swap: the PATCH is filtered on the `updatedAt`
//! value that was read, so a concurrent writer makes it match zero rows and
//! the merge is redone against the fresh record.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::merge;
use crate::model::{Order, OrderStatus};
use crate::storage::StoreCredentials;

use super::OrderStore;

/// Lost compare-and-swap races tolerated before reporting a transient error.
const MAX_CAS_ATTEMPTS: u32 = 5;

pub struct RestOrderStore {
    client: Client,
    base_url: String,
    api_key: String,
}

/// What a write wants to do with the record it just read.
enum WritePlan {
    Insert(Order),
    Replace { prev: Order, next: Order },
    Unchanged(Order),
}

// ---------------------------------------------------------------------------
// URL normalisation / error mapping
// ---------------------------------------------------------------------------

/// Normalise the store URL: ensure a scheme, strip trailing slashes and a
/// trailing `/rest/v1` segment.
pub fn normalize_store_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/rest/v1") {
        url.truncate(url.len() - "/rest/v1".len());
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Convert a `reqwest::Error` into a transient store error.
fn friendly_error(url: &str, err: &reqwest::Error) -> SyncError {
    let message = if err.is_connect() {
        format!("Cannot reach order store at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    SyncError::Transient(message)
}

/// Map a non-success HTTP status into the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> SyncError {
    let detail = body.trim();
    match status.as_u16() {
        400 | 422 => SyncError::Validation(format!("Order store rejected the order: {detail}")),
        401 => SyncError::Transient("Order store API key is invalid or expired".to_string()),
        403 => SyncError::Transient("Terminal not authorized for order store".to_string()),
        404 => SyncError::Transient("Order store endpoint not found".to_string()),
        s if s >= 500 => SyncError::Transient(format!("Order store server error (HTTP {s})")),
        s => SyncError::Transient(format!("Unexpected response from order store (HTTP {s})")),
    }
}

impl RestOrderStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transient(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_store_url(base_url),
            api_key: api_key.trim().to_string(),
        })
    }

    pub fn from_credentials(credentials: &StoreCredentials, timeout: Duration) -> SyncResult<Self> {
        Self::new(&credentials.url, &credentials.api_key, timeout)
    }

    fn request(&self, method: Method, query: &[(&str, String)]) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/orders", self.base_url))
            .query(query)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }

    /// Send and decode a row array. `Ok(None)` on HTTP 409.
    async fn send_rows(&self, req: RequestBuilder) -> SyncResult<Option<Vec<Order>>> {
        let resp = req
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        if status == StatusCode::CONFLICT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        resp.json::<Vec<Order>>()
            .await
            .map(Some)
            .map_err(|e| SyncError::Transient(format!("Order store JSON parse error: {e}")))
    }

    async fn fetch(&self, id: &str) -> SyncResult<Option<Order>> {
        let req = self.request(
            Method::GET,
            &[("id", format!("eq.{id}")), ("select", "*".to_string())],
        );
        let rows = self.send_rows(req).await?.unwrap_or_default();
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, order: &Order) -> SyncResult<Option<Order>> {
        let req = self
            .request(Method::POST, &[])
            .header("Prefer", "return=representation")
            .json(&[order]);
        Ok(self
            .send_rows(req)
            .await?
            .and_then(|rows| rows.into_iter().next()))
    }

    /// Replace `prev` with `next` only if nobody wrote in between.
    async fn compare_and_swap(&self, prev: &Order, next: &Order) -> SyncResult<Option<Order>> {
        let req = self
            .request(
                Method::PATCH,
                &[
                    ("id", format!("eq.{}", prev.id)),
                    (
                        "updatedAt",
                        format!(
                            "eq.{}",
                            prev.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
                        ),
                    ),
                ],
            )
            .header("Prefer", "return=representation")
            .json(next);
        Ok(self
            .send_rows(req)
            .await?
            .and_then(|rows| rows.into_iter().next()))
    }

    /// Read, plan, and write until the write lands or attempts run out.
    async fn write<F>(&self, order_id: &str, mut plan: F) -> SyncResult<Order>
    where
        F: FnMut(Option<Order>) -> SyncResult<WritePlan> + Send,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.fetch(order_id).await?;
            let written = match plan(current)? {
                WritePlan::Unchanged(order) => return Ok(order),
                WritePlan::Insert(order) => self.insert(&order).await?,
                WritePlan::Replace { prev, next } => self.compare_and_swap(&prev, &next).await?,
            };
            if let Some(order) = written {
                return Ok(order);
            }
            debug!(order_id = %order_id, attempt, "Order changed concurrently, re-merging");
        }
        warn!(order_id = %order_id, "Gave up after repeated concurrent modifications");
        Err(SyncError::Transient(format!(
            "order {order_id} is being modified concurrently"
        )))
    }

    fn require(order_id: &str, current: Option<Order>) -> SyncResult<Order> {
        current.ok_or_else(|| SyncError::NotFound(format!("order {order_id}")))
    }
}

#[async_trait]
impl OrderStore for RestOrderStore {
    async fn upsert(&self, order: Order) -> SyncResult<Order> {
        let order_id = order.id.clone();
        let stored = self
            .write(&order_id, |current| {
                Ok(match current {
                    None => WritePlan::Insert(merge::apply_upsert(None, order.clone())),
                    Some(prev) => {
                        let next = merge::apply_upsert(Some(&prev), order.clone());
                        if next == prev {
                            WritePlan::Unchanged(prev)
                        } else {
                            WritePlan::Replace { prev, next }
                        }
                    }
                })
            })
            .await?;
        info!(order_id = %stored.id, status = %stored.status, "Order upserted to remote store");
        Ok(stored)
    }

    async fn get(&self, id: &str) -> SyncResult<Order> {
        Self::require(id, self.fetch(id).await?)
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> SyncResult<Vec<Order>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let filter = statuses
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let req = self.request(
            Method::GET,
            &[
                ("status", format!("in.({filter})")),
                ("order", "createdAt.asc".to_string()),
                ("select", "*".to_string()),
            ],
        );
        Ok(self.send_rows(req).await?.unwrap_or_default())
    }

    async fn update_item_completion(
        &self,
        order_id: &str,
        item_id: &str,
        done: bool,
    ) -> SyncResult<Order> {
        self.write(order_id, |current| {
            let prev = Self::require(order_id, current)?;
            Ok(match merge::apply_item_completion(&prev, item_id, done)? {
                Some(next) => WritePlan::Replace { prev, next },
                None => WritePlan::Unchanged(prev),
            })
        })
        .await
    }

    async fn update_status(&self, order_id: &str, status: OrderStatus) -> SyncResult<Order> {
        self.write(order_id, |current| {
            let prev = Self::require(order_id, current)?;
            Ok(match merge::apply_status(&prev, status)? {
                Some(next) => WritePlan::Replace { prev, next },
                None => WritePlan::Unchanged(prev),
            })
        })
        .await
    }
}
