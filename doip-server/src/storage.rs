//! Blob-store access for component bytes on an S3-compatible endpoint.
//!
//! Keys handed to a store are branch-relative (`<shard>/components/...`);
//! the store prepends its configured branch. The production backend is a
//! lakeFS repository spoken to over the S3 gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::LakeFsSettings;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no such key: {0}")]
    Missing(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Shared handle onto the component blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Probe the endpoint root; false when unconfigured or unreachable.
    async fn ensure_available(&self) -> bool;
    /// Fetch one object, fully buffered.
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;
    /// Store one object and return the branch-qualified key.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String, StoreError>;
    /// List keys below `prefix`, relative to it, across all pages.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Build the store the configuration describes, or a stub that reports
/// itself unavailable when the endpoint is not configured.
pub async fn from_settings(settings: &LakeFsSettings) -> Arc<dyn ObjectStore> {
    match (&settings.url, &settings.repo) {
        (Some(url), Some(repo)) => Arc::new(
            LakeFsStore::connect(url.clone(), repo.clone(), settings).await,
        ),
        _ => {
            warn!("lakeFS endpoint not configured; component storage disabled");
            Arc::new(UnconfiguredStore)
        }
    }
}

/// lakeFS repository spoken to through its S3-compatible gateway.
pub struct LakeFsStore {
    client: aws_sdk_s3::Client,
    probe: reqwest::Client,
    endpoint: String,
    repo: String,
    branch: String,
}

impl LakeFsStore {
    pub async fn connect(endpoint: String, repo: String, settings: &LakeFsSettings) -> Self {
        let credentials = aws_sdk_s3::config::Credentials::new(
            settings.user.clone().unwrap_or_default(),
            settings.password.clone().unwrap_or_default(),
            None,
            None,
            "lakefs",
        );
        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(&endpoint)
            .region(aws_config::Region::new("us-east-1"))
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&base)
            .force_path_style(true)
            .build();
        let probe = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to build reqwest client");
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            probe,
            endpoint,
            repo,
            branch: settings.branch.clone(),
        }
    }

    fn branch_key(&self, key: &str) -> String {
        format!("{}/{}", self.branch, key)
    }
}

#[async_trait]
impl ObjectStore for LakeFsStore {
    async fn ensure_available(&self) -> bool {
        debug!(endpoint = %self.endpoint, "probing blob store");
        match self.probe.get(&self.endpoint).send().await {
            Ok(resp) => resp.error_for_status().is_ok(),
            Err(_) => false,
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let full_key = self.branch_key(key);
        debug!(key = %full_key, "fetching object");
        let output = self
            .client
            .get_object()
            .bucket(&self.repo)
            .key(&full_key)
            .send()
            .await
            .map_err(|err| {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    StoreError::Missing(full_key.clone())
                } else {
                    StoreError::Backend(service.to_string())
                }
            })?;
        output
            .body
            .collect()
            .await
            .map(|data| data.into_bytes())
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String, StoreError> {
        let full_key = self.branch_key(key);
        debug!(key = %full_key, size = data.len(), "storing object");
        self.client
            .put_object()
            .bucket(&self.repo)
            .key(&full_key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| StoreError::Backend(err.into_service_error().to_string()))?;
        Ok(full_key)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let full_prefix = self.branch_key(prefix);
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.repo)
            .prefix(&full_prefix)
            .into_paginator()
            .send();
        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| StoreError::Backend(err.to_string()))?;
            for object in page.contents() {
                if let Some(relative) = object.key().and_then(|k| k.strip_prefix(&full_prefix)) {
                    keys.push(relative.to_string());
                }
            }
        }
        Ok(keys)
    }
}

/// Placeholder store used when no endpoint is configured; the availability
/// probe fails, so callers surface `StorageUnavailable` before touching it.
pub struct UnconfiguredStore;

#[async_trait]
impl ObjectStore for UnconfiguredStore {
    async fn ensure_available(&self) -> bool {
        false
    }

    async fn get(&self, _key: &str) -> Result<Bytes, StoreError> {
        Err(StoreError::Backend("blob store not configured".to_string()))
    }

    async fn put(&self, _key: &str, _data: Bytes, _content_type: &str) -> Result<String, StoreError> {
        Err(StoreError::Backend("blob store not configured".to_string()))
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Backend("blob store not configured".to_string()))
    }
}

/// In-memory store used by the test suites.
///
/// Mirrors the branch-prefix behavior of [`LakeFsStore`] so sharded keys in
/// fixtures look exactly like production keys.
pub struct MemoryStore {
    branch: String,
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Seed an object under its full, branch-qualified key.
    pub async fn insert(&self, full_key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.lock().await.insert(full_key.into(), data.into());
    }

    fn branch_key(&self, key: &str) -> String {
        format!("{}/{}", self.branch, key)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_available(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let full_key = self.branch_key(key);
        self.objects
            .lock()
            .await
            .get(&full_key)
            .cloned()
            .ok_or(StoreError::Missing(full_key))
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<String, StoreError> {
        let full_key = self.branch_key(key);
        self.objects.lock().await.insert(full_key.clone(), data);
        Ok(full_key)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let full_prefix = self.branch_key(prefix);
        let objects = self.objects.lock().await;
        let mut keys: Vec<String> = objects
            .keys()
            .filter_map(|k| k.strip_prefix(&full_prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
