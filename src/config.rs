//! Sync engine configuration.
//!
//! Values live in `local_settings` under category `sync`; missing keys fall
//! back to defaults and `POS_SYNC_*` environment variables override both.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::error::SyncResult;

const SETTINGS_CATEGORY: &str = "sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Kitchen display full refresh interval.
    pub poll_interval_secs: u64,
    /// Background push loop interval for queued drafts.
    pub push_interval_secs: u64,
    /// Failed pushes after which the draft is flagged as exhausted.
    pub max_push_retries: u32,
    pub retry_base_delay_ms: i64,
    pub retry_max_delay_ms: i64,
    /// Drafts pushed per background cycle.
    pub push_batch_size: usize,
    pub order_id_prefix: String,
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            push_interval_secs: 15,
            max_push_retries: 5,
            retry_base_delay_ms: 5_000,
            retry_max_delay_ms: 300_000,
            push_batch_size: 10,
            order_id_prefix: "POS".to_string(),
            request_timeout_secs: 20,
        }
    }
}

impl SyncConfig {
    /// Load persisted settings, then apply environment overrides.
    pub fn load(db: &DbState) -> SyncResult<Self> {
        let mut config = Self::default();
        {
            let conn = db.lock()?;
            let get = |key: &str| db::get_setting(&conn, SETTINGS_CATEGORY, key);
            config.apply(|key| get(key));
        }
        config.apply(|key| std::env::var(format!("POS_SYNC_{}", key.to_ascii_uppercase())).ok());
        config.normalize();
        Ok(config)
    }

    /// Persist every field to `local_settings`.
    pub fn save(&self, db: &DbState) -> SyncResult<()> {
        let conn = db.lock()?;
        let entries = [
            ("poll_interval_secs", self.poll_interval_secs.to_string()),
            ("push_interval_secs", self.push_interval_secs.to_string()),
            ("max_push_retries", self.max_push_retries.to_string()),
            ("retry_base_delay_ms", self.retry_base_delay_ms.to_string()),
            ("retry_max_delay_ms", self.retry_max_delay_ms.to_string()),
            ("push_batch_size", self.push_batch_size.to_string()),
            ("order_id_prefix", self.order_id_prefix.clone()),
            ("request_timeout_secs", self.request_timeout_secs.to_string()),
        ];
        for (key, value) in entries {
            db::set_setting(&conn, SETTINGS_CATEGORY, key, &value)?;
        }
        Ok(())
    }

    /// Drop the stored sync settings so the next `load` falls back to
    /// defaults. The order counter is not touched.
    pub fn reset(db: &DbState) -> SyncResult<()> {
        let conn = db.lock()?;
        db::delete_all_settings(&conn, SETTINGS_CATEGORY)?;
        info!("Sync settings reset to defaults");
        Ok(())
    }

    fn apply(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        set_parsed(&mut self.poll_interval_secs, "poll_interval_secs", &lookup);
        set_parsed(&mut self.push_interval_secs, "push_interval_secs", &lookup);
        set_parsed(&mut self.max_push_retries, "max_push_retries", &lookup);
        set_parsed(&mut self.retry_base_delay_ms, "retry_base_delay_ms", &lookup);
        set_parsed(&mut self.retry_max_delay_ms, "retry_max_delay_ms", &lookup);
        set_parsed(&mut self.push_batch_size, "push_batch_size", &lookup);
        set_parsed(&mut self.request_timeout_secs, "request_timeout_secs", &lookup);
        if let Some(prefix) = lookup("order_id_prefix") {
            let prefix = prefix.trim();
            if !prefix.is_empty() {
                self.order_id_prefix = prefix.to_ascii_uppercase();
            }
        }
    }

    fn normalize(&mut self) {
        self.poll_interval_secs = self.poll_interval_secs.max(1);
        self.push_interval_secs = self.push_interval_secs.max(1);
        self.push_batch_size = self.push_batch_size.max(1);
        self.retry_base_delay_ms = self.retry_base_delay_ms.max(1_000);
        self.retry_max_delay_ms = self.retry_max_delay_ms.max(self.retry_base_delay_ms);
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_secs(self.push_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn set_parsed<T: std::str::FromStr>(
    slot: &mut T,
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparsable sync setting"),
        }
    }
}
