//! Typed manifest and fragment access over a document store
//!
//! Every call is bounded by a per-operation timeout and retried with
//! exponential backoff on transient failures.

use super::pacing::ExponentialBackoff;
use super::{DirectRecord, DocumentStore, FragmentRecord, MediaRecord};
use crate::chunk::{fragment_key, parse_fragment_key, ChunkManifest};
use crate::config::{CollectionPaths, StoreConfig};
use crate::error::{Error, Result};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Timeout and retry settings for store calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub attempts: u32,
    /// Base delay for exponential backoff (ms)
    pub base_delay_ms: u64,
    /// Bound on a single attempt
    pub op_timeout: Duration,
}

impl RetryPolicy {
    /// Build a policy from store configuration
    pub fn from_config(config: &StoreConfig) -> Self {
        RetryPolicy {
            attempts: config.retry_attempts,
            base_delay_ms: config.retry_base_delay_ms,
            op_timeout: config.op_timeout(),
        }
    }

    /// Single attempt, no retries (for tests)
    pub fn no_retry() -> Self {
        RetryPolicy {
            attempts: 0,
            base_delay_ms: 0,
            op_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

/// Manifest, record and fragment storage for chunked media
#[derive(Clone)]
pub struct FragmentStore {
    backend: Arc<dyn DocumentStore>,
    paths: CollectionPaths,
    retry: RetryPolicy,
}

impl FragmentStore {
    /// Create a fragment store over `backend`
    pub fn new(backend: Arc<dyn DocumentStore>, paths: CollectionPaths, retry: RetryPolicy) -> Self {
        FragmentStore {
            backend,
            paths,
            retry,
        }
    }

    /// Collection paths in use
    pub fn paths(&self) -> &CollectionPaths {
        &self.paths
    }

    /// Run `op` with the configured timeout, retrying transient failures
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(self.retry.base_delay_ms),
            self.retry.attempts,
        );

        loop {
            let outcome = match tokio::time::timeout(self.retry.op_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.retry.op_timeout)),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if let Some(delay) = backoff.next_delay() {
                        warn!("{} failed, retrying in {:?}: {}", what, delay, e);
                        tokio::time::sleep(delay).await;
                    } else {
                        error!("{} failed after {} retries: {}", what, backoff.retries(), e);
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write (or overwrite) a chunk manifest
    pub async fn put_manifest(&self, id: &str, manifest: &ChunkManifest) -> Result<()> {
        let doc = serde_json::to_value(manifest).map_err(|e| Error::Serialization(e.to_string()))?;
        let collection = self.paths.manifests();
        debug!("Writing manifest {} ({:?})", id, manifest.status);

        self.with_retry("manifest write", || {
            self.backend.set_document(collection, id, doc.clone())
        })
        .await
    }

    /// Create a direct record under a store-generated id
    pub async fn add_record(&self, record: &DirectRecord) -> Result<String> {
        let doc = serde_json::to_value(record).map_err(|e| Error::Serialization(e.to_string()))?;
        let collection = self.paths.manifests();

        let id = self
            .with_retry("record write", || {
                self.backend.add_document(collection, doc.clone())
            })
            .await?;
        debug!("Wrote direct record {} ({} chars)", id, record.payload.len());
        Ok(id)
    }

    /// Read a record or manifest
    pub async fn get_record(&self, id: &str) -> Result<Option<MediaRecord>> {
        let collection = self.paths.manifests();
        let doc = self
            .with_retry("record read", || self.backend.get_document(collection, id))
            .await?;

        doc.map(|doc| {
            serde_json::from_value(doc)
                .map_err(|e| Error::Deserialization(format!("record {}: {}", id, e)))
        })
        .transpose()
    }

    /// Read a manifest, or None if absent or a direct record
    pub async fn get_manifest(&self, id: &str) -> Result<Option<ChunkManifest>> {
        Ok(match self.get_record(id).await? {
            Some(MediaRecord::Chunked(manifest)) => Some(manifest),
            _ => None,
        })
    }

    /// Delete a record or manifest
    pub async fn delete_record(&self, id: &str) -> Result<()> {
        let collection = self.paths.manifests();
        self.with_retry("record delete", || {
            self.backend.delete_document(collection, id)
        })
        .await
    }

    /// List every record and manifest
    pub async fn list_records(&self) -> Result<Vec<(String, MediaRecord)>> {
        let collection = self.paths.manifests();
        let ids = self
            .with_retry("record list", || self.backend.list_ids(collection, ""))
            .await?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_record(&id).await {
                Ok(Some(record)) => records.push((id, record)),
                Ok(None) => {}
                Err(Error::Deserialization(e)) => warn!("Skipping unreadable record: {}", e),
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// Write fragment `index` of media `id`
    pub async fn put_fragment(&self, id: &str, index: usize, data: &str) -> Result<()> {
        let key = fragment_key(id, index);
        let doc = serde_json::to_value(FragmentRecord {
            data: data.to_string(),
        })
        .map_err(|e| Error::Serialization(e.to_string()))?;
        let collection = self.paths.fragments();

        self.with_retry("fragment write", || {
            self.backend.set_document(collection, &key, doc.clone())
        })
        .await
    }

    /// Read fragment `index` of media `id`
    pub async fn get_fragment(&self, id: &str, index: usize) -> Result<Option<String>> {
        let key = fragment_key(id, index);
        let collection = self.paths.fragments();

        let doc = self
            .with_retry("fragment read", || {
                self.backend.get_document(collection, &key)
            })
            .await?;

        match doc {
            Some(doc) => {
                let record: FragmentRecord = serde_json::from_value(doc)
                    .map_err(|e| Error::Deserialization(format!("fragment {}: {}", key, e)))?;
                Ok(Some(record.data))
            }
            None => Ok(None),
        }
    }

    /// Delete fragment `index` of media `id`
    pub async fn delete_fragment(&self, id: &str, index: usize) -> Result<()> {
        let key = fragment_key(id, index);
        let collection = self.paths.fragments();

        self.with_retry("fragment delete", || {
            self.backend.delete_document(collection, &key)
        })
        .await
    }

    /// Indices of every stored fragment belonging to media `id`
    pub async fn fragment_indices(&self, id: &str) -> Result<Vec<usize>> {
        let prefix = format!("{}_", id);
        let collection = self.paths.fragments();

        let keys = self
            .with_retry("fragment list", || self.backend.list_ids(collection, &prefix))
            .await?;

        let mut indices: Vec<usize> = keys
            .iter()
            .filter_map(|key| parse_fragment_key(key))
            .filter(|(owner, _)| *owner == id)
            .map(|(_, index)| index)
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }

    /// Delete every fragment belonging to media `id`, returning the count removed
    pub async fn delete_by_prefix(&self, id: &str) -> Result<usize> {
        let indices = self.fragment_indices(id).await?;
        for &index in &indices {
            self.delete_fragment(id, index).await?;
        }
        if !indices.is_empty() {
            debug!("Deleted {} fragments of {}", indices.len(), id);
        }
        Ok(indices.len())
    }

    /// Every fragment key in the fragments collection
    pub async fn list_fragment_keys(&self) -> Result<Vec<String>> {
        let collection = self.paths.fragments();
        self.with_retry("fragment list", || self.backend.list_ids(collection, ""))
            .await
    }
}
