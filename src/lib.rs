//! POS order sync
//!
//! Keeps an order consistent between a POS client that creates, holds and
//! resumes orders (possibly offline), a canonical order store, and any number
//! of kitchen displays marking items done concurrently.
//!
//! * [`store`]: canonical Order Record Store backends behind [`OrderStore`].
//! * [`drafts`]: device-local drafts and the push queue.
//! * [`sync`]: the orchestrator, the only component talking to both stores.
//! * [`pos`]: the cashier's cart session.
//! * [`kitchen`] / [`display`]: per-display optimistic projection and its
//!   poll, notification and write tasks.

pub mod config;
pub mod db;
pub mod display;
pub mod drafts;
pub mod error;
pub mod kitchen;
pub mod logging;
pub mod merge;
pub mod model;
pub mod notify;
pub mod order_state;
pub mod pos;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use display::{spawn_kitchen_display, KitchenDisplay};
pub use drafts::{DraftKind, DraftStore, LocalDraft};
pub use error::{SyncError, SyncResult};
pub use kitchen::{KitchenController, ProjectionSnapshot, StationFilter};
pub use logging::init_logging;
pub use model::{CategoryType, LineItem, Order, OrderStatus, OrderType, PaymentMethod};
pub use notify::{ChangeBus, ChangeEvent, ChangeKind};
pub use pos::{CatalogProduct, PosSession};
pub use store::{NotifyingStore, OrderStore, RestOrderStore, SqliteOrderStore};
pub use sync::{PushOutcome, SyncOrchestrator, SyncStatus};
