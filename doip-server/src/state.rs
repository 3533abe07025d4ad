//! Shared application state passed to all connection tasks.

use std::sync::Arc;

use crate::config::Config;
use crate::registry::Registry;
use crate::storage::ObjectStore;

/// Central state shared by both listeners and every connection.
///
/// Everything here is immutable after startup except the registry's internal
/// manifest cache, which carries its own lock.
pub struct AppState {
    pub config: Arc<Config>,
    /// Manifest registry with its in-memory cache (shared).
    pub registry: Arc<Registry>,
    /// Blob store handle, configured once at startup (shared).
    pub store: Arc<dyn ObjectStore>,
    /// Reqwest client for RO-Crate downloads and MediaWiki calls (shared).
    pub http: reqwest::Client,
}
