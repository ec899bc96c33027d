//! Media pipeline module
//!
//! Write path: file → `MediaEncoder` → `ChunkedWriter` → store, returning a
//! `MediaReference` the caller keeps (usually in a `MediaSlots` map).
//! Read path: reference → `ChunkedReader` → store → `MediaCache` → handle.

mod encoder;
mod reader;
mod reference;
mod resource;
mod writer;

pub use encoder::{
    estimated_decoded_size, mime_for_path, scaled_dimensions, to_data_uri, MediaEncoder, MediaKind,
};
pub use reader::ChunkedReader;
pub use reference::{
    is_chunked_form, parse_chunked, IndexEntry, ManifestIndex, MediaReference, MediaSlots,
    ReferenceResolver, CHUNKED_PREFIX,
};
pub use resource::{decode_data_uri, MediaBlob, ResourceHandle};
pub use writer::ChunkedWriter;

use crate::cache::MediaCache;
use crate::chunk::{parse_fragment_key, Chunker, ManifestStatus};
use crate::config::Config;
use crate::error::Result;
use crate::store::{DocumentStore, FragmentStore, MediaRecord, Pacer, RetryPolicy};

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// What `MediaService::delete` removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Whether a record or manifest existed
    pub record_deleted: bool,
    /// Fragment documents deleted
    pub fragments_deleted: usize,
}

/// What `MediaService::sweep_orphans` removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Fragments whose manifest was absent, failed or stale
    pub fragments_removed: usize,
    /// Failed or stale pending manifests
    pub manifests_removed: usize,
}

/// Upload, resolution and cleanup of stored media
pub struct MediaService {
    store: FragmentStore,
    encoder: MediaEncoder,
    writer: ChunkedWriter,
    reader: ChunkedReader,
}

impl MediaService {
    /// Assemble the pipeline from configuration
    pub fn new(config: &Config, backend: Arc<dyn DocumentStore>, cache: Arc<MediaCache>) -> Self {
        let store = FragmentStore::new(
            backend,
            config.store.paths(),
            RetryPolicy::from_config(&config.store),
        );

        MediaService {
            encoder: MediaEncoder::new(config.encoder.clone()),
            writer: ChunkedWriter::new(
                store.clone(),
                Chunker::new(&config.chunk),
                Pacer::new(config.chunk.write_pause()),
            ),
            reader: ChunkedReader::new(store.clone(), cache)
                .with_batch_size(config.chunk.read_batch_size),
            store,
        }
    }

    /// The underlying fragment store
    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    /// The resolved-media cache
    pub fn cache(&self) -> &Arc<MediaCache> {
        self.reader.cache()
    }

    /// Encode and store raw bytes
    ///
    /// Encoding errors (`ReadError`, `SizeExceeded`) surface before any store call.
    pub async fn upload(&self, bytes: Vec<u8>, kind: MediaKind, mime: &str) -> Result<MediaReference> {
        let payload = self.encoder.encode(bytes, kind, mime).await?;
        self.writer.write(&payload).await
    }

    /// Read, encode and store a file
    pub async fn upload_file(&self, path: &Path, kind: Option<MediaKind>) -> Result<MediaReference> {
        let payload = self.encoder.encode_file(path, kind).await?;
        self.writer.write(&payload).await
    }

    /// Store an already-encoded payload
    pub async fn store_payload(&self, payload: &str) -> Result<MediaReference> {
        self.writer.write(payload).await
    }

    /// Resolve a reference through the cache
    pub async fn resolve(&self, reference: &MediaReference) -> Result<ResourceHandle> {
        Ok(self.reader.resolve(reference).await?)
    }

    /// Parse a stored reference string and resolve it
    pub async fn resolve_str(&self, raw: &str) -> Result<ResourceHandle> {
        let reference = MediaReference::parse(raw)?;
        self.resolve(&reference).await
    }

    /// Delete stored media and drop its cache entries
    ///
    /// Inline and external references own nothing in the store; deleting
    /// them is a no-op. Slots still holding the reference are not touched.
    pub async fn delete(&self, reference: &MediaReference) -> Result<DeleteReport> {
        let id = match reference.stored_id() {
            Some(id) => id.to_string(),
            None => return Ok(DeleteReport::default()),
        };

        let record = self.store.get_record(&id).await?;

        let mut indices: BTreeSet<usize> = self.store.fragment_indices(&id).await?.into_iter().collect();
        if let Some(MediaRecord::Chunked(manifest)) = &record {
            indices.extend(0..manifest.fragment_count);
        }
        for &index in &indices {
            self.store.delete_fragment(&id, index).await?;
        }

        if record.is_some() {
            self.store.delete_record(&id).await?;
        }

        let cache = self.cache();
        cache.invalidate(&reference.to_string());
        cache.invalidate(&id);
        if let Some(MediaRecord::Chunked(manifest)) = &record {
            cache.invalidate(
                &MediaReference::Chunked {
                    id: id.clone(),
                    fragment_count: manifest.fragment_count,
                }
                .to_string(),
            );
        }

        info!("Deleted media {} ({} fragments)", id, indices.len());
        Ok(DeleteReport {
            record_deleted: record.is_some(),
            fragments_deleted: indices.len(),
        })
    }

    /// Every record and manifest in the store
    pub async fn list(&self) -> Result<Vec<(String, MediaRecord)>> {
        self.store.list_records().await
    }

    /// Snapshot the manifests collection into an index
    pub async fn load_index(&self) -> Result<ManifestIndex> {
        let records = self.store.list_records().await?;
        debug!("Loaded media index with {} entries", records.len());
        Ok(ManifestIndex::from_records(&records))
    }

    /// Resolver over a fresh index snapshot
    pub async fn resolver(&self) -> Result<ReferenceResolver> {
        Ok(ReferenceResolver::new(self.load_index().await?))
    }

    /// Delete fragments no live manifest accounts for
    ///
    /// Removes fragments with no manifest, fragments past a manifest's
    /// declared count, and `failed` manifests with their fragments. With
    /// `stale_pending`, pending manifests older than that age count as failed.
    ///
    /// Fragment keys are listed before manifests. Uploads write their
    /// manifest before any fragment, so every listed fragment of a running
    /// upload already has its manifest in the later listing.
    pub async fn sweep_orphans(&self, stale_pending: Option<Duration>) -> Result<SweepReport> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut live: HashMap<String, usize> = HashMap::new();
        let mut report = SweepReport::default();

        let fragment_keys = self.store.list_fragment_keys().await?;

        for (id, record) in self.store.list_records().await? {
            let MediaRecord::Chunked(manifest) = record else {
                continue;
            };

            let stale = match (manifest.status, stale_pending) {
                (ManifestStatus::Failed, _) => true,
                (ManifestStatus::Pending, Some(max_age)) => {
                    now_ms.saturating_sub(manifest.created_at) > max_age.as_millis() as i64
                }
                _ => false,
            };

            if stale {
                self.store.delete_record(&id).await?;
                report.manifests_removed += 1;
            } else {
                live.insert(id, manifest.fragment_count);
            }
        }

        for key in fragment_keys {
            let Some((owner, index)) = parse_fragment_key(&key) else {
                continue;
            };

            let orphaned = match live.get(owner) {
                Some(&declared) => index >= declared,
                None => true,
            };
            if orphaned {
                self.store.delete_fragment(owner, index).await?;
                report.fragments_removed += 1;
            }
        }

        info!(
            "Sweep removed {} fragments and {} manifests",
            report.fragments_removed, report.manifests_removed
        );
        Ok(report)
    }
}
