//! Chunked media resolution
//!
//! Resolves a `MediaReference` into a `ResourceHandle`. Fragments are
//! fetched in sequential batches of bounded concurrency and placed by
//! index, so arrival order never affects the reassembled payload.

use super::reference::MediaReference;
use super::resource::{decode_data_uri, ResourceHandle};
use crate::cache::MediaCache;
use crate::chunk::{fragment_key, ChunkManifest, Chunker, ManifestStatus};
use crate::config::DEFAULT_READ_BATCH_SIZE;
use crate::error::FetchError;
use crate::store::{FragmentStore, MediaRecord};

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolves references through the shared cache
#[derive(Clone)]
pub struct ChunkedReader {
    store: FragmentStore,
    cache: Arc<MediaCache>,
    batch_size: usize,
}

impl ChunkedReader {
    /// Create a reader over `store`, publishing into `cache`
    pub fn new(store: FragmentStore, cache: Arc<MediaCache>) -> Self {
        ChunkedReader {
            store,
            cache,
            batch_size: DEFAULT_READ_BATCH_SIZE,
        }
    }

    /// Set the number of concurrent fragment reads per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The cache results are published to
    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    /// Resolve a reference, consulting the cache first
    ///
    /// Inline and external references wrap directly without store access.
    /// Stored references are fetched once per cache lifetime; concurrent
    /// callers share the fetch.
    pub async fn resolve(&self, reference: &MediaReference) -> Result<ResourceHandle, FetchError> {
        match reference {
            MediaReference::Inline(payload) => return Ok(ResourceHandle::Url(payload.clone())),
            MediaReference::External(url) => return Ok(ResourceHandle::Url(url.clone())),
            MediaReference::Record(_) | MediaReference::Chunked { .. } => {}
        }

        let key = reference.to_string();
        let reader = self.clone();
        let reference = reference.clone();

        self.cache
            .get_or_resolve(&key, async move { reader.fetch(&reference).await })
            .await
    }

    /// Fetch a stored reference, bypassing the cache
    pub async fn fetch(&self, reference: &MediaReference) -> Result<ResourceHandle, FetchError> {
        match reference {
            MediaReference::Inline(payload) => Ok(ResourceHandle::Url(payload.clone())),
            MediaReference::External(url) => Ok(ResourceHandle::Url(url.clone())),
            MediaReference::Record(id) => self.fetch_record(id).await,
            MediaReference::Chunked { id, fragment_count } => {
                let manifest = match self.read_record(id).await? {
                    Some(MediaRecord::Chunked(manifest)) => manifest,
                    Some(MediaRecord::Direct(record)) => {
                        return Ok(ResourceHandle::Url(record.payload));
                    }
                    None => return Err(FetchError::NotFound(id.clone())),
                };

                if manifest.fragment_count != *fragment_count {
                    warn!(
                        "Reference to {} declares {} fragments, manifest declares {}",
                        id, fragment_count, manifest.fragment_count
                    );
                }
                self.fetch_chunked(id, &manifest).await
            }
        }
    }

    /// Resolve a bare record id: direct payload or manifest
    async fn fetch_record(&self, id: &str) -> Result<ResourceHandle, FetchError> {
        match self.read_record(id).await? {
            Some(MediaRecord::Direct(record)) => Ok(ResourceHandle::Url(record.payload)),
            Some(MediaRecord::Chunked(manifest)) => self.fetch_chunked(id, &manifest).await,
            None => Err(FetchError::NotFound(id.to_string())),
        }
    }

    async fn read_record(&self, id: &str) -> Result<Option<MediaRecord>, FetchError> {
        self.store.get_record(id).await.map_err(|e| {
            warn!("Manifest read failed for {}: {}", id, e);
            FetchError::StoreRead {
                key: id.to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Fetch, verify and decode every fragment a manifest declares
    async fn fetch_chunked(
        &self,
        id: &str,
        manifest: &ChunkManifest,
    ) -> Result<ResourceHandle, FetchError> {
        let declared = manifest.fragment_count;

        if let Err(reason) = manifest.check_fragment_count() {
            warn!("Manifest {} rejected: {}", id, reason);
            return Err(FetchError::InvalidManifest {
                id: id.to_string(),
                reason,
            });
        }

        if manifest.status == ManifestStatus::Pending {
            let present = match self.store.fragment_indices(id).await {
                Ok(indices) => indices.len(),
                Err(e) => {
                    warn!("Fragment listing failed for pending {}: {}", id, e);
                    0
                }
            };
            debug!("Media {} still uploading ({}/{})", id, present, declared);
            return Err(FetchError::UploadPending {
                id: id.to_string(),
                present,
                declared,
            });
        }

        let slots = self.fetch_fragments(id, declared).await?;

        let missing: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .collect();
        if !missing.is_empty() {
            warn!("Media {} is missing {} of {} fragments", id, missing.len(), declared);
            return Err(FetchError::MissingFragments {
                id: id.to_string(),
                missing,
            });
        }

        let payload: String = slots.into_iter().flatten().collect();

        if let Some(expected) = &manifest.payload_hash {
            if Chunker::default().payload_hash(&payload) != *expected {
                warn!("Media {} failed integrity check", id);
                return Err(FetchError::Integrity { id: id.to_string() });
            }
        }

        let blob = decode_data_uri(&payload)?;
        info!(
            "Resolved {} from {} fragments ({} bytes, {})",
            id,
            declared,
            blob.len(),
            blob.mime
        );
        Ok(ResourceHandle::Blob(Arc::new(blob)))
    }

    /// Fetch fragments `0..count` in sequential batches, placed by index
    async fn fetch_fragments(&self, id: &str, count: usize) -> Result<Vec<Option<String>>, FetchError> {
        let mut slots: Vec<Option<String>> = vec![None; count];
        let indices: Vec<usize> = (0..count).collect();

        for batch in indices.chunks(self.batch_size) {
            let results: Vec<_> = stream::iter(batch.iter().copied())
                .map(|index| {
                    let store = self.store.clone();
                    let id = id.to_string();
                    async move { (index, store.get_fragment(&id, index).await) }
                })
                .buffer_unordered(self.batch_size)
                .collect()
                .await;

            for (index, result) in results {
                match result {
                    Ok(data) => slots[index] = data,
                    Err(e) => {
                        let key = fragment_key(id, index);
                        warn!("Fragment fetch failed for {}: {}", key, e);
                        return Err(FetchError::StoreRead {
                            key,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        Ok(slots)
    }
}
