//! Chunked media writing
//!
//! Payloads up to one fragment long are stored as a single direct record.
//! Longer payloads are written as a manifest plus ordered fragments:
//!
//! 1. manifest with `status: pending`
//! 2. fragments `0..n`, strictly one after another, paced
//! 3. manifest rewritten with `status: complete`
//!
//! Readers treat a pending manifest as "still uploading". If a fragment
//! write fails, the fragments written so far and the manifest are removed;
//! if that cleanup fails too, the manifest is left marked `failed`.

use super::reference::MediaReference;
use crate::chunk::{ChunkManifest, Chunker, ManifestStatus};
use crate::error::{Error, Result};
use crate::store::{DirectRecord, FragmentStore, Pacer};

use tracing::{debug, error, info, warn};

/// Writes encoded payloads to the store
pub struct ChunkedWriter {
    store: FragmentStore,
    chunker: Chunker,
    pacer: Pacer,
}

impl ChunkedWriter {
    /// Create a writer
    pub fn new(store: FragmentStore, chunker: Chunker, pacer: Pacer) -> Self {
        ChunkedWriter {
            store,
            chunker,
            pacer,
        }
    }

    /// The fragmenting policy in use
    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Persist a payload, returning a reference that already carries its shape
    pub async fn write(&self, payload: &str) -> Result<MediaReference> {
        if !self.chunker.needs_split(payload) {
            let id = self
                .store
                .add_record(&DirectRecord::new(payload))
                .await
                .map_err(|e| Error::StoreWrite {
                    media_id: String::new(),
                    written: 0,
                    message: e.to_string(),
                })?;
            info!("Stored media {} as a single record", id);
            return Ok(MediaReference::Record(id));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let fragments = self.chunker.split(payload);
        let count = fragments.len();
        let manifest = ChunkManifest::pending(
            count,
            payload.chars().count(),
            self.chunker.payload_hash(payload),
        );

        info!("Uploading media {} as {} fragments", id, count);

        self.store
            .put_manifest(&id, &manifest)
            .await
            .map_err(|e| Error::StoreWrite {
                media_id: id.clone(),
                written: 0,
                message: e.to_string(),
            })?;

        for fragment in &fragments {
            self.pacer.pace().await;

            if let Err(e) = self.store.put_fragment(&id, fragment.index, &fragment.data).await {
                error!(
                    "Fragment {} of {} failed after {} written: {}",
                    fragment.index, id, fragment.index, e
                );
                self.abandon(&id, &manifest).await;
                return Err(Error::StoreWrite {
                    media_id: id,
                    written: fragment.index,
                    message: e.to_string(),
                });
            }
            debug!("Wrote fragment {}/{} of {}", fragment.index + 1, count, id);
        }

        let complete = manifest.with_status(ManifestStatus::Complete);
        if let Err(e) = self.store.put_manifest(&id, &complete).await {
            error!("Could not mark {} complete: {}", id, e);
            self.abandon(&id, &manifest).await;
            return Err(Error::StoreWrite {
                media_id: id,
                written: count,
                message: e.to_string(),
            });
        }

        info!("Uploaded media {} ({} fragments)", id, count);
        Ok(MediaReference::Chunked {
            id,
            fragment_count: count,
        })
    }

    /// Remove a partial upload, or mark it failed if removal is impossible
    async fn abandon(&self, id: &str, manifest: &ChunkManifest) {
        let cleanup = async {
            let removed = self.store.delete_by_prefix(id).await?;
            self.store.delete_record(id).await?;
            Ok::<_, Error>(removed)
        };

        match cleanup.await {
            Ok(removed) => info!("Rolled back media {} ({} fragments removed)", id, removed),
            Err(e) => {
                warn!("Rollback of {} failed, marking manifest failed: {}", id, e);
                let failed = manifest.with_status(ManifestStatus::Failed);
                if let Err(e) = self.store.put_manifest(id, &failed).await {
                    error!("Could not mark {} failed: {}", id, e);
                }
            }
        }
    }
}
