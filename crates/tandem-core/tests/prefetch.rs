use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use tandem_core::cache::ImageCache;
use tandem_core::remote::ImageStore;
use tandem_types::models::{Attachment, CalendarEntry};

/// Counts fetches per storage path so tests can assert dedup behavior.
struct CountingStore {
    fetches: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            fetches: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    fn fail_path(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    fn heal_path(&self, path: &str) {
        self.failing.lock().unwrap().remove(path);
    }

    fn fetch_count(&self, path: &str) -> usize {
        self.fetches.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ImageStore for CountingStore {
    async fn fetch(&self, storage_path: &str) -> Result<Vec<u8>> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(storage_path.to_string())
            .or_insert(0) += 1;
        if self.failing.lock().unwrap().contains(storage_path) {
            bail!("storage unavailable for {}", storage_path);
        }
        Ok(storage_path.as_bytes().to_vec())
    }

    async fn access_url(&self, storage_path: &str) -> Result<String> {
        Ok(format!("https://store.test/{}", storage_path))
    }

    async fn upload(&self, _storage_path: &str, _bytes: Vec<u8>, _mime_type: &str) -> Result<()> {
        Ok(())
    }
}

fn entry(path: &str) -> CalendarEntry {
    CalendarEntry {
        id: Uuid::new_v4(),
        couple_id: Uuid::new_v4(),
        author: Uuid::new_v4(),
        date: Utc::now().date_naive(),
        attachment: Attachment {
            storage_path: path.to_string(),
            file_name: "photo.jpg".to_string(),
            size_bytes: 1024,
            mime_type: "image/jpeg".to_string(),
            width: 400,
            height: 400,
        },
        created_at: Utc::now(),
    }
}

async fn cache() -> (ImageCache, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let cache = ImageCache::new(dir.path().to_path_buf()).await.unwrap();
    (cache, dir)
}

#[tokio::test]
async fn overlapping_batches_fetch_each_path_once() {
    let (cache, _dir) = cache().await;
    let store: Arc<CountingStore> = Arc::new(CountingStore::new());
    let dyn_store: Arc<dyn ImageStore> = store.clone();

    let first = [entry("uploads/a/1.jpg"), entry("uploads/a/2.jpg")];
    let second = [entry("uploads/a/2.jpg"), entry("uploads/a/3.jpg")];

    let fetched = cache.prefetch_all(&first, &dyn_store).await;
    assert_eq!(fetched, 2);
    let fetched = cache.prefetch_all(&second, &dyn_store).await;
    assert_eq!(fetched, 1);

    for path in ["uploads/a/1.jpg", "uploads/a/2.jpg", "uploads/a/3.jpg"] {
        assert_eq!(store.fetch_count(path), 1, "{} fetched more than once", path);
        assert!(cache.get(path).await.is_some());
    }
}

#[tokio::test]
async fn duplicate_paths_within_one_batch_dispatch_once() {
    let (cache, _dir) = cache().await;
    let store: Arc<CountingStore> = Arc::new(CountingStore::new());
    let dyn_store: Arc<dyn ImageStore> = store.clone();

    // Two distinct entries sharing one storage path.
    let batch = [entry("uploads/shared.jpg"), entry("uploads/shared.jpg")];
    let fetched = cache.prefetch_all(&batch, &dyn_store).await;

    assert_eq!(fetched, 1);
    assert_eq!(store.fetch_count("uploads/shared.jpg"), 1);
}

#[tokio::test]
async fn failed_fetch_leaves_key_absent_and_siblings_intact() {
    let (cache, _dir) = cache().await;
    let store = Arc::new(CountingStore::new());
    store.fail_path("uploads/bad.jpg");
    let dyn_store: Arc<dyn ImageStore> = store.clone();

    let batch = [entry("uploads/bad.jpg"), entry("uploads/good.jpg")];
    let fetched = cache.prefetch_all(&batch, &dyn_store).await;

    assert_eq!(fetched, 1);
    assert!(cache.get("uploads/bad.jpg").await.is_none());
    assert!(cache.get("uploads/good.jpg").await.is_some());

    // The absent key is retried on the next pass.
    store.heal_path("uploads/bad.jpg");
    let fetched = cache.prefetch_all(&batch, &dyn_store).await;
    assert_eq!(fetched, 1);
    assert!(cache.get("uploads/bad.jpg").await.is_some());
    assert_eq!(store.fetch_count("uploads/good.jpg"), 1);
}

#[tokio::test]
async fn large_batch_completes_under_bounded_concurrency() {
    let (cache, _dir) = cache().await;
    let store: Arc<CountingStore> = Arc::new(CountingStore::new());
    let dyn_store: Arc<dyn ImageStore> = store.clone();

    let batch: Vec<CalendarEntry> = (0..32)
        .map(|i| entry(&format!("uploads/bulk/{}.jpg", i)))
        .collect();
    let fetched = cache.prefetch_all(&batch, &dyn_store).await;

    assert_eq!(fetched, 32);
    for i in 0..32 {
        assert_eq!(store.fetch_count(&format!("uploads/bulk/{}.jpg", i)), 1);
    }
}
