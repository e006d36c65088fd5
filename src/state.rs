use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::storage::Storage;

/// Shared application state, injected into every handler via `axum::State`.
/// Nothing in here is mutated after startup except through `db`/`storage`'s
/// own interior concurrency control (§9: config is immutable after load).
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: Arc<dyn Storage>,
    pub config: Arc<Config>,
}
