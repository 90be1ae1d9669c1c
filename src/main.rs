//! Headless kitchen display.
//!
//! Mounts one display against the configured order store and logs every
//! projection change. Uses the remote store when credentials are available
//! (`POS_ORDER_STORE_URL` / `POS_ORDER_STORE_KEY` or the OS keyring),
//! otherwise the `orders` table of the local database. Writes from other
//! processes reach this display through the poll interval.
//!
//! Usage: `pos-order-sync [all|food|drink]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use pos_order_sync::{
    db, init_logging, spawn_kitchen_display, storage, ChangeBus, DraftStore, NotifyingStore,
    OrderStore, ProjectionSnapshot, RestOrderStore, SqliteOrderStore, StationFilter, SyncConfig,
    SyncOrchestrator,
};

fn log_snapshot(snapshot: &ProjectionSnapshot, last_alert: &mut u64) {
    if snapshot.alert_seq > *last_alert {
        *last_alert = snapshot.alert_seq;
        info!("*** New order ***");
    }
    if let Some(err) = &snapshot.last_error {
        warn!(error = %err, "Display error");
    }
    info!(
        phase = ?snapshot.phase,
        orders = snapshot.orders.len(),
        pending = snapshot.pending_order_ids.len(),
        "Projection updated"
    );
    for order in &snapshot.orders {
        let done = order.items.iter().filter(|i| i.is_done).count();
        info!(
            order_id = %order.id,
            status = %order.status,
            customer = %order.customer_name,
            "{done}/{} items done",
            order.items.len()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let data_dir = std::env::var_os("POS_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("pos-data"));
    let _log_guard = init_logging(&data_dir.join("logs"));
    info!("Starting pos-order-sync v{}", env!("CARGO_PKG_VERSION"));

    let station: StationFilter = std::env::args()
        .nth(1)
        .unwrap_or_default()
        .parse()
        .context("invalid station argument")?;

    let db = Arc::new(db::init(&data_dir, "pos.db").context("failed to open local database")?);
    let config = SyncConfig::load(&db).context("failed to load sync config")?;

    let bus = ChangeBus::default();
    let store: Arc<dyn OrderStore> = match storage::store_credentials() {
        Some(credentials) => {
            info!(url = %credentials.url, "Using remote order store");
            let rest = RestOrderStore::from_credentials(&credentials, config.request_timeout())
                .context("failed to create order store client")?;
            Arc::new(NotifyingStore::new(rest, bus.clone()))
        }
        None => {
            info!("No store credentials, using local orders table");
            Arc::new(NotifyingStore::new(SqliteOrderStore::new(db.clone()), bus.clone()))
        }
    };

    let sync = Arc::new(SyncOrchestrator::new(
        DraftStore::new(db.clone()),
        store,
        config,
    ));
    let sync_loop = sync.start_sync_loop();
    let display = spawn_kitchen_display(sync.clone(), &bus, station);
    let mut snapshots = display.subscribe_active_orders();
    let mut last_alert = 0;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                log_snapshot(&snapshot, &mut last_alert);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    display.shutdown();
    sync.stop();
    sync_loop.abort();
    Ok(())
}
