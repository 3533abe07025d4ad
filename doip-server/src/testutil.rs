//! Shared fixtures for the unit-test suites.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Config, LakeFsSettings};
use crate::error::DoipError;
use crate::registry::{ManifestFetcher, Registry};
use crate::state::AppState;
use crate::storage::{MemoryStore, ObjectStore};

/// Canned manifest source; optionally counts upstream hits or always fails.
pub struct StubFetcher {
    manifest: Option<Value>,
    error: Option<String>,
    hits: Option<Arc<AtomicUsize>>,
}

impl StubFetcher {
    pub fn new(manifest: Value) -> Self {
        Self {
            manifest: Some(manifest),
            error: None,
            hits: None,
        }
    }

    pub fn counting(manifest: Value, hits: Arc<AtomicUsize>) -> Self {
        Self {
            manifest: Some(manifest),
            error: None,
            hits: Some(hits),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            manifest: None,
            error: Some(message.to_string()),
            hits: None,
        }
    }
}

#[async_trait]
impl ManifestFetcher for StubFetcher {
    async fn fetch_manifest(&self, _identifier: &str) -> Result<Value, DoipError> {
        if let Some(hits) = &self.hits {
            hits.fetch_add(1, Ordering::SeqCst);
        }
        match (&self.manifest, &self.error) {
            (Some(manifest), _) => Ok(manifest.clone()),
            (None, Some(message)) => Err(DoipError::Storage(message.clone())),
            (None, None) => unreachable!("stub has neither manifest nor error"),
        }
    }
}

/// Config pointing every outbound collaborator at unroutable endpoints.
///
/// Port 9 (discard) refuses connections immediately, so best-effort calls
/// fail fast instead of reaching the network.
pub fn test_config() -> Config {
    Config {
        port: 0,
        fdo_api: "https://fdo.test/fdo/".to_string(),
        mediawiki_api: "http://127.0.0.1:9/w/api.php".to_string(),
        lakefs: LakeFsSettings::default(),
        ollama_api_key: None,
    }
}

/// AppState over a stub manifest and an in-memory store.
pub fn test_state(manifest: Value, store: Arc<MemoryStore>) -> AppState {
    let store_handle: Arc<dyn ObjectStore> = store.clone();
    let registry = Arc::new(Registry::new(
        Box::new(StubFetcher::new(manifest)),
        Arc::clone(&store_handle),
    ));
    AppState {
        config: Arc::new(test_config()),
        registry,
        store: store_handle,
        http: reqwest::Client::new(),
    }
}
