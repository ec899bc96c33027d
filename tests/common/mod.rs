//! Common test utilities: store wrappers and fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use mediachunk::chunk::parse_fragment_key;
use mediachunk::media::MediaService;
use mediachunk::store::{Document, DocumentStore, MemoryStore};
use mediachunk::{Config, Error, Result};
use mediachunk::cache::MediaCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config with small fragments, no pacing and no retries
pub fn test_config(chunk_size: usize) -> Config {
    let mut config = Config::default();
    config.store.app_id = "test-app".to_string();
    config.store.retry_attempts = 0;
    config.store.op_timeout_ms = 5_000;
    config.chunk.chunk_size = chunk_size;
    config.chunk.write_pause_ms = 0;
    config
}

pub fn fragments_collection(config: &Config) -> String {
    config.store.paths().fragments().to_string()
}

pub fn manifests_collection(config: &Config) -> String {
    config.store.paths().manifests().to_string()
}

/// Build a service over `backend` with a fresh unbounded cache
pub fn service(config: &Config, backend: Arc<dyn DocumentStore>) -> MediaService {
    MediaService::new(config, backend, Arc::new(MediaCache::unbounded()))
}

/// Counts reads and writes per collection
pub struct CountingStore {
    inner: Arc<dyn DocumentStore>,
    reads: Mutex<HashMap<String, usize>>,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        CountingStore {
            inner,
            reads: Mutex::new(HashMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// `get_document` calls against `collection`
    pub fn reads(&self, collection: &str) -> usize {
        self.reads.lock().get(collection).copied().unwrap_or(0)
    }

    /// Every set, add and delete call
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        *self.reads.lock().entry(collection.to_string()).or_insert(0) += 1;
        self.inner.get_document(collection, id).await
    }

    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_document(collection, id, doc).await
    }

    async fn add_document(&self, collection: &str, doc: Document) -> Result<String> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.add_document(collection, doc).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_document(collection, id).await
    }

    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_ids(collection, prefix).await
    }
}

/// Delays fragment reads so that later indices in a batch finish first
pub struct ReversedDelayStore {
    inner: Arc<dyn DocumentStore>,
    fragments: String,
    batch: usize,
    step: Duration,
}

impl ReversedDelayStore {
    pub fn new(inner: Arc<dyn DocumentStore>, fragments: &str, batch: usize, step: Duration) -> Self {
        ReversedDelayStore {
            inner,
            fragments: fragments.to_string(),
            batch: batch.max(1),
            step,
        }
    }
}

#[async_trait]
impl DocumentStore for ReversedDelayStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        if collection == self.fragments {
            if let Some((_, index)) = parse_fragment_key(id) {
                let slot = (self.batch - index % self.batch) as u32;
                tokio::time::sleep(self.step * slot).await;
            }
        }
        self.inner.get_document(collection, id).await
    }

    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        self.inner.set_document(collection, id, doc).await
    }

    async fn add_document(&self, collection: &str, doc: Document) -> Result<String> {
        self.inner.add_document(collection, doc).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.inner.delete_document(collection, id).await
    }

    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_ids(collection, prefix).await
    }
}

/// Fails fragment writes after a number of successes, optionally failing deletes
pub struct FailingStore {
    inner: MemoryStore,
    fragments: String,
    fragment_writes_allowed: usize,
    fragment_writes: AtomicUsize,
    fail_deletes: bool,
}

impl FailingStore {
    pub fn new(fragments: &str, fragment_writes_allowed: usize, fail_deletes: bool) -> Self {
        FailingStore {
            inner: MemoryStore::new(),
            fragments: fragments.to_string(),
            fragment_writes_allowed,
            fragment_writes: AtomicUsize::new(0),
            fail_deletes,
        }
    }

    pub fn len(&self, collection: &str) -> usize {
        self.inner.len(collection)
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(collection, id).await
    }

    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        if collection == self.fragments {
            let written = self.fragment_writes.fetch_add(1, Ordering::SeqCst);
            if written >= self.fragment_writes_allowed {
                return Err(Error::Backend(format!("quota exceeded writing {}", id)));
            }
        }
        self.inner.set_document(collection, id, doc).await
    }

    async fn add_document(&self, collection: &str, doc: Document) -> Result<String> {
        self.inner.add_document(collection, doc).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        if self.fail_deletes {
            return Err(Error::Backend(format!("permission denied deleting {}", id)));
        }
        self.inner.delete_document(collection, id).await
    }

    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_ids(collection, prefix).await
    }
}

/// Tracks how many fragment reads overlap and in which order they start and end
pub struct ConcurrencyStore {
    inner: Arc<dyn DocumentStore>,
    fragments: String,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<ReadEvent>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    Start(usize),
    End(usize),
}

impl ConcurrencyStore {
    pub fn new(inner: Arc<dyn DocumentStore>, fragments: &str, delay: Duration) -> Self {
        ConcurrencyStore {
            inner,
            fragments: fragments.to_string(),
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Most fragment reads ever in flight at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<ReadEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl DocumentStore for ConcurrencyStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let index = match parse_fragment_key(id) {
            Some((_, index)) if collection == self.fragments => index,
            _ => return self.inner.get_document(collection, id).await,
        };

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.events.lock().push(ReadEvent::Start(index));

        tokio::time::sleep(self.delay).await;
        let result = self.inner.get_document(collection, id).await;

        self.events.lock().push(ReadEvent::End(index));
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        self.inner.set_document(collection, id, doc).await
    }

    async fn add_document(&self, collection: &str, doc: Document) -> Result<String> {
        self.inner.add_document(collection, doc).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.inner.delete_document(collection, id).await
    }

    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_ids(collection, prefix).await
    }
}

/// Records every `set_document` call and the peak number of overlapping writes
pub struct WriteLogStore {
    inner: MemoryStore,
    manifests: String,
    log: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl WriteLogStore {
    pub fn new(manifests: &str) -> Self {
        WriteLogStore {
            inner: MemoryStore::new(),
            manifests: manifests.to_string(),
            log: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Written keys in order; manifest writes read `{id}:{status}`
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for WriteLogStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(collection, id).await
    }

    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let entry = if collection == self.manifests {
            format!("{}:{}", id, doc["status"].as_str().unwrap_or("none"))
        } else {
            id.to_string()
        };
        self.log.lock().push(entry);

        tokio::task::yield_now().await;
        let result = self.inner.set_document(collection, id, doc).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn add_document(&self, collection: &str, doc: Document) -> Result<String> {
        self.inner.add_document(collection, doc).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.inner.delete_document(collection, id).await
    }

    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_ids(collection, prefix).await
    }
}

/// Applies queued writes right after the first listing, as a concurrent
/// upload landing in the middle of a sweep would
pub struct InterleavingStore {
    inner: MemoryStore,
    fired: AtomicBool,
    queued: Mutex<Vec<(String, String, Document)>>,
}

impl InterleavingStore {
    pub fn new() -> Self {
        InterleavingStore {
            inner: MemoryStore::new(),
            fired: AtomicBool::new(false),
            queued: Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, collection: &str, id: &str, doc: Document) {
        self.queued
            .lock()
            .push((collection.to_string(), id.to_string(), doc));
    }
}

#[async_trait]
impl DocumentStore for InterleavingStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.get_document(collection, id).await
    }

    async fn set_document(&self, collection: &str, id: &str, doc: Document) -> Result<()> {
        self.inner.set_document(collection, id, doc).await
    }

    async fn add_document(&self, collection: &str, doc: Document) -> Result<String> {
        self.inner.add_document(collection, doc).await
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.inner.delete_document(collection, id).await
    }

    async fn list_ids(&self, collection: &str, prefix: &str) -> Result<Vec<String>> {
        let ids = self.inner.list_ids(collection, prefix).await?;
        if !self.fired.swap(true, Ordering::SeqCst) {
            let queued: Vec<_> = self.queued.lock().drain(..).collect();
            for (collection, id, doc) in queued {
                self.inner.set_document(&collection, &id, doc).await?;
            }
        }
        Ok(ids)
    }
}

/// Encode a solid-colour PNG of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

/// Deterministic pseudo-random bytes
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}
