//! Canonical store credentials kept in the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Headless deployments can supply the
//! same values through `POS_ORDER_STORE_URL` / `POS_ORDER_STORE_KEY`.

use keyring::Entry;
use tracing::warn;

const SERVICE_NAME: &str = "pos-order-sync";

pub const KEY_STORE_URL: &str = "order_store_url";
pub const KEY_STORE_KEY: &str = "order_store_key";

/// Base URL and API key of the remote order store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub url: String,
    pub api_key: String,
}

fn entry(key: &str) -> Result<Entry, String> {
    Entry::new(SERVICE_NAME, key).map_err(|e| format!("keyring entry {key}: {e}"))
}

/// Stored value for `key`. A missing entry and an unreadable keyring both
/// read as "not configured"; the latter is logged.
pub fn get_credential(key: &str) -> Option<String> {
    let stored = entry(key)
        .map_err(|e| warn!(key, error = %e, "Order store credential unavailable"))
        .ok()?;
    match stored.get_password() {
        Ok(value) => Some(value),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "Order store credential unreadable");
            None
        }
    }
}

pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    entry(key)?
        .set_password(value)
        .map_err(|e| format!("store {key}: {e}"))
}

/// Forget `key`. Forgetting an entry that was never stored is fine.
pub fn delete_credential(key: &str) -> Result<(), String> {
    match entry(key)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(format!("delete {key}: {e}")),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve remote store credentials: environment first, then keyring.
pub fn store_credentials() -> Option<StoreCredentials> {
    let url = non_empty(std::env::var("POS_ORDER_STORE_URL").ok())
        .or_else(|| non_empty(get_credential(KEY_STORE_URL)))?;
    let api_key = non_empty(std::env::var("POS_ORDER_STORE_KEY").ok())
        .or_else(|| non_empty(get_credential(KEY_STORE_KEY)))?;
    Some(StoreCredentials { url, api_key })
}

/// Persist remote store credentials received during terminal setup.
pub fn save_store_credentials(credentials: &StoreCredentials) -> Result<(), String> {
    set_credential(KEY_STORE_URL, credentials.url.trim())?;
    set_credential(KEY_STORE_KEY, credentials.api_key.trim())?;
    Ok(())
}

/// Remove stored credentials (terminal reset).
pub fn clear_store_credentials() -> Result<(), String> {
    delete_credential(KEY_STORE_URL)?;
    delete_credential(KEY_STORE_KEY)?;
    Ok(())
}
