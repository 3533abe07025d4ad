//! Manifest registry: FDO manifest fetch, in-memory cache, and component
//! resolution against the blob store.
//!
//! The cache mutex guards only the lookup and the insert, never the HTTPS
//! fetch itself; concurrent fetches for one identifier may issue duplicate
//! requests and the last successful response wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use doip_wire::consts::DEFAULT_MEDIA_TYPE;
use doip_wire::shard;

use crate::error::{from_reqwest, DoipError};
use crate::storage::{ObjectStore, StoreError};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Component descriptor resolved from a manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub component_id: String,
    pub media_type: String,
    pub extension: String,
}

/// Source of raw manifest documents, split out so tests can stub the HTTPS
/// round trip while exercising the real cache and resolution logic.
#[async_trait]
pub trait ManifestFetcher: Send + Sync {
    async fn fetch_manifest(&self, identifier: &str) -> Result<Value, DoipError>;
}

/// Fetches manifests from the FDO portal at `<base>/<identifier>`.
pub struct HttpManifestFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpManifestFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ManifestFetcher for HttpManifestFetcher {
    async fn fetch_manifest(&self, identifier: &str) -> Result<Value, DoipError> {
        let url = format!("{}{}", self.base_url, identifier);
        debug!(url = %url, "fetching manifest");
        let response = self.http.get(&url).send().await.map_err(from_reqwest)?;
        let response = response
            .error_for_status()
            .map_err(|err| DoipError::Storage(format!("manifest fetch failed: {err}")))?;
        response.json().await.map_err(from_reqwest)
    }
}

/// Caches manifests per normalized identifier and resolves components.
pub struct Registry {
    fetcher: Box<dyn ManifestFetcher>,
    store: Arc<dyn ObjectStore>,
    cache: Mutex<HashMap<String, Value>>,
}

impl Registry {
    pub fn new(fetcher: Box<dyn ManifestFetcher>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            fetcher,
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fdo_api(base_url: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self::new(Box::new(HttpManifestFetcher::new(base_url)), store)
    }

    /// Cached manifest for `identifier`, fetching and caching on miss.
    ///
    /// Failed fetches are never cached.
    pub async fn fetch(&self, identifier: &str) -> Result<Value, DoipError> {
        let id = identifier.to_uppercase();
        {
            let cache = self.cache.lock().await;
            if let Some(manifest) = cache.get(&id) {
                debug!(identifier = %id, "manifest cache hit");
                return Ok(manifest.clone());
            }
        }
        let manifest = self.fetcher.fetch_manifest(&id).await?;
        info!(identifier = %id, "manifest cached");
        let mut cache = self.cache.lock().await;
        cache.insert(id, manifest.clone());
        Ok(manifest)
    }

    /// Resolve one component against the manifest and fetch its bytes.
    pub async fn get_component(
        &self,
        identifier: &str,
        component_id: &str,
    ) -> Result<(ComponentRecord, Bytes), DoipError> {
        if !self.store.ensure_available().await {
            return Err(DoipError::StorageUnavailable(
                "blob store endpoint not configured or unreachable".to_string(),
            ));
        }
        let manifest = self.fetch(identifier).await?;
        let record = manifest_components(&manifest)
            .into_iter()
            .find(|r| r.component_id == component_id)
            .ok_or_else(|| {
                DoipError::ComponentNotFound(format!(
                    "object {identifier} has no component '{component_id}'"
                ))
            })?;
        let key = shard::component_path(identifier, component_id, &record.extension)?;
        let content = self.store.get(&key).await.map_err(store_error)?;
        Ok((record, content))
    }
}

/// Map a blob-store failure onto the taxonomy.
pub fn store_error(err: StoreError) -> DoipError {
    match err {
        StoreError::Missing(key) => DoipError::ComponentNotFound(format!("missing object {key}")),
        StoreError::Backend(message) => DoipError::Storage(message),
    }
}

/// Component records listed under `kernel."fdo:hasComponent"`.
///
/// Entries without a `componentId` are skipped; unknown keys pass through
/// untouched in the manifest itself.
pub fn manifest_components(manifest: &Value) -> Vec<ComponentRecord> {
    manifest
        .pointer("/kernel/fdo:hasComponent")
        .and_then(Value::as_array)
        .map(|entries| entries.iter().filter_map(record_from_entry).collect())
        .unwrap_or_default()
}

fn record_from_entry(entry: &Value) -> Option<ComponentRecord> {
    let component_id = entry.get("componentId").and_then(Value::as_str)?.to_string();
    let media_type = ["mediaType", "mimeType"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_MEDIA_TYPE)
        .to_string();
    let extension = entry
        .get("location")
        .and_then(Value::as_str)
        .and_then(location_extension)
        .or_else(|| shard::extension_for_media_type(&media_type).map(str::to_string))
        .unwrap_or_else(|| "bin".to_string());
    Some(ComponentRecord {
        component_id,
        media_type,
        extension,
    })
}

fn location_extension(location: &str) -> Option<String> {
    let name = location.rsplit('/').next().unwrap_or(location);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
