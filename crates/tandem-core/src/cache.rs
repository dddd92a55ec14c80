use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Months, Utc};
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use tandem_types::models::CalendarEntry;

use crate::remote::ImageStore;

/// Keep the current month plus the previous one.
pub const DEFAULT_RETENTION_MONTHS: u32 = 2;

const MAX_CONCURRENT_FETCHES: usize = 4;

/// Flat cache key: path separators, colons and spaces collapse to `_`.
pub fn sanitize_key(storage_path: &str) -> String {
    storage_path
        .chars()
        .map(|c| match c {
            '/' | ':' | ' ' => '_',
            c => c,
        })
        .collect()
}

/// Content-addressed local cache of fetched image bytes.
///
/// Each image is one flat file under the cache directory, named by its
/// sanitized storage path. Not authoritative: everything here is
/// reconstructible from the binary store, so failures degrade to a miss.
#[derive(Clone)]
pub struct ImageCache {
    dir: PathBuf,
}

impl ImageCache {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Image cache directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, storage_path: &str) -> PathBuf {
        self.dir.join(sanitize_key(storage_path))
    }

    /// Cached bytes, or None on a miss. The caller falls back to a remote
    /// fetch.
    pub async fn get(&self, storage_path: &str) -> Option<Vec<u8>> {
        fs::read(self.path_for(storage_path)).await.ok()
    }

    pub async fn put(&self, storage_path: &str, bytes: &[u8]) -> Result<()> {
        fs::write(self.path_for(storage_path), bytes).await?;
        Ok(())
    }

    async fn contains(&self, storage_path: &str) -> bool {
        fs::metadata(self.path_for(storage_path)).await.is_ok()
    }

    /// Fetch every uncached entry image into the cache, fanning out with
    /// bounded concurrency and joining before returning.
    ///
    /// Keys are deduplicated before dispatch so overlapping batches and
    /// repeated paths within one batch never race into duplicate downloads.
    /// Per-entry failures are logged and leave the key absent for the next
    /// pass. Returns the number of images fetched.
    pub async fn prefetch_all(
        &self,
        entries: &[CalendarEntry],
        store: &Arc<dyn ImageStore>,
    ) -> usize {
        let mut seen = HashSet::new();
        let mut jobs = Vec::new();
        for entry in entries {
            let path = &entry.attachment.storage_path;
            if !seen.insert(sanitize_key(path)) {
                continue;
            }
            if self.contains(path).await {
                continue;
            }
            jobs.push(path.clone());
        }
        if jobs.is_empty() {
            return 0;
        }

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
        let mut tasks = JoinSet::new();
        for path in jobs {
            let cache = self.clone();
            let store = store.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match store.fetch(&path).await {
                    Ok(bytes) => match cache.put(&path, &bytes).await {
                        Ok(()) => Some(()),
                        Err(e) => {
                            warn!("Failed to cache image {}: {}", path, e);
                            None
                        }
                    },
                    Err(e) => {
                        warn!("Image fetch failed for {}: {}", path, e);
                        None
                    }
                }
            });
        }

        let mut fetched = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(())) => fetched += 1,
                Ok(None) => {}
                Err(e) => warn!("Prefetch task failed to join: {}", e),
            }
        }
        fetched
    }

    /// Remove cache files older than the retention window. Driven by the
    /// sync coordinator on month-boundary transitions, not a timer.
    pub async fn evict_older_than(&self, retention_months: u32) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_months(Months::new(retention_months)) else {
            return Ok(0);
        };
        self.evict_before(cutoff).await
    }

    /// Remove cache files whose creation time predates `cutoff`.
    pub async fn evict_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let created: DateTime<Utc> = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(ts) => ts.into(),
                Err(e) => {
                    warn!("Skipping unreadable cache file {:?}: {}", entry.file_name(), e);
                    continue;
                }
            };
            if created < cutoff {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        info!("Evicted cached image {:?}", entry.file_name());
                        removed += 1;
                    }
                    Err(e) => warn!("Failed to evict {:?}: {}", entry.file_name(), e),
                }
            }
        }
        Ok(removed)
    }

    /// Full flush.
    pub async fn clear(&self) -> Result<()> {
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            fs::remove_file(entry.path()).await?;
        }
        info!("Image cache cleared");
        Ok(())
    }

    /// Total bytes on disk; 0 when unreadable.
    pub async fn cache_size(&self) -> u64 {
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return 0;
        };
        let mut total = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(meta) = entry.metadata().await {
                total += meta.len();
            }
        }
        total
    }
}
