use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Months, NaiveDate, Utc};
use tokio::task;
use tracing::warn;
use uuid::Uuid;

use tandem_db::Database;
use tandem_types::models::{CalendarEntry, Couple, ImageSource};

use crate::cache::{DEFAULT_RETENTION_MONTHS, ImageCache};
use crate::error::TimelineError;
use crate::remote::ImageStore;
use crate::timeline::{TimelineStore, is_visible};

/// Result of one poll pass. `watermark` is the value to pass as `since` on
/// the next call; unchanged when nothing new arrived.
pub struct PollOutcome {
    pub entries: Vec<CalendarEntry>,
    pub watermark: DateTime<Utc>,
}

/// Drives the remote-to-local flow: month loads into the timeline store,
/// incremental polls, image prefetch, and retention eviction on visible-month
/// changes.
pub struct SyncCoordinator {
    db: Arc<Database>,
    timeline: Arc<TimelineStore>,
    cache: ImageCache,
    store: Arc<dyn ImageStore>,
    last_month: Mutex<Option<(i32, u32)>>,
}

impl SyncCoordinator {
    pub fn new(
        db: Arc<Database>,
        timeline: Arc<TimelineStore>,
        cache: ImageCache,
        store: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            db,
            timeline,
            cache,
            store,
            last_month: Mutex::new(None),
        }
    }

    /// Load one month of the couple's timeline for the viewer, prefetch its
    /// images, and run retention eviction when the visible month changed
    /// since the previous load.
    pub async fn load_month(
        &self,
        couple_id: Uuid,
        viewer: Uuid,
        year: i32,
        month: u32,
    ) -> Result<BTreeMap<NaiveDate, Vec<CalendarEntry>>, TimelineError> {
        self.resolve_member(couple_id, viewer).await?;

        let (start, end) = month_bounds(year, month)
            .ok_or_else(|| anyhow::anyhow!("invalid month {}-{}", year, month))?;

        let timeline = self.timeline.clone();
        let view = task::spawn_blocking(move || timeline.fetch_range(couple_id, start, end, viewer))
            .await
            .map_err(join_err)??;

        let entries: Vec<CalendarEntry> = view.values().flatten().cloned().collect();
        self.cache.prefetch_all(&entries, &self.store).await;

        // Prefetch has joined, so eviction runs against a settled cache.
        let month_changed = {
            let mut last = self.last_month.lock().unwrap_or_else(|e| e.into_inner());
            last.replace((year, month)) != Some((year, month))
        };
        if month_changed {
            if let Err(e) = self.cache.evict_older_than(DEFAULT_RETENTION_MONTHS).await {
                warn!("Cache eviction failed: {}", e);
            }
        }

        Ok(view)
    }

    /// Fetch entries created after `since`, merge them into the timeline
    /// view, prefetch images for the polled entries only, and advance the
    /// watermark to the max `created_at` observed.
    ///
    /// Safe on any cadence: with zero new entries this is a no-op and the
    /// watermark is returned unchanged.
    pub async fn poll_new(
        &self,
        couple_id: Uuid,
        viewer: Uuid,
        since: DateTime<Utc>,
    ) -> Result<PollOutcome, TimelineError> {
        self.resolve_member(couple_id, viewer).await?;

        let db = self.db.clone();
        let rows = task::spawn_blocking(move || db.entries_created_after(couple_id, since))
            .await
            .map_err(join_err)??;
        if rows.is_empty() {
            return Ok(PollOutcome {
                entries: Vec::new(),
                watermark: since,
            });
        }

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(row.into_model()?);
        }
        let watermark = entries
            .iter()
            .map(|e| e.created_at)
            .max()
            .unwrap_or(since)
            .max(since);

        // Fold into the view (dedup by id) and warm the cache for the polled
        // window only; already-cached keys are skipped inside prefetch_all.
        self.timeline.merge(couple_id, entries.clone());
        self.cache.prefetch_all(&entries, &self.store).await;

        // The merged view keeps everything; the poll response itself still
        // honors the privacy filter.
        let today = Utc::now().date_naive();
        let visible = entries
            .into_iter()
            .filter(|e| is_visible(e, viewer, today))
            .collect();

        Ok(PollOutcome {
            entries: visible,
            watermark,
        })
    }

    /// The partner's most recent entry whose date has arrived, with the
    /// current source of its image.
    pub async fn latest_partner_entry(
        &self,
        account: Uuid,
    ) -> Result<Option<(CalendarEntry, ImageSource)>, TimelineError> {
        let db = self.db.clone();
        let row = task::spawn_blocking(move || db.active_couple_for(account))
            .await
            .map_err(join_err)??;
        let Some(row) = row else {
            return Ok(None);
        };
        let couple = row.into_model()?;
        let Some(partner) = couple.partner_of(account) else {
            return Ok(None);
        };

        let today = Utc::now().date_naive();
        let db = self.db.clone();
        let couple_id = couple.id;
        let row =
            task::spawn_blocking(move || db.latest_entry_by_author(couple_id, partner, today))
                .await
                .map_err(join_err)??;
        let Some(row) = row else {
            return Ok(None);
        };

        let entry = row.into_model()?;
        let image = self.image_source(&entry).await;
        Ok(Some((entry, image)))
    }

    /// Tri-state image lookup: local bytes, a remote access URL, or unknown
    /// when the binary store cannot resolve the path right now.
    pub async fn image_source(&self, entry: &CalendarEntry) -> ImageSource {
        let path = &entry.attachment.storage_path;
        if let Some(bytes) = self.cache.get(path).await {
            return ImageSource::Cached(bytes);
        }
        match self.store.access_url(path).await {
            Ok(url) => ImageSource::Remote(url),
            Err(e) => {
                warn!("No access URL for {}: {}", path, e);
                ImageSource::Unknown
            }
        }
    }

    async fn resolve_member(&self, couple_id: Uuid, viewer: Uuid) -> Result<Couple, TimelineError> {
        let db = self.db.clone();
        let row = task::spawn_blocking(move || db.couple_by_id(couple_id))
            .await
            .map_err(join_err)??;
        let couple = row.ok_or(TimelineError::NoSuchCouple)?.into_model()?;
        if !couple.has_member(viewer) {
            return Err(TimelineError::NotAMember);
        }
        Ok(couple)
    }
}

pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((start, end))
}

fn join_err(e: task::JoinError) -> TimelineError {
    TimelineError::Storage(anyhow::anyhow!("task join error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_bounds_cover_whole_month() {
        let (start, end) = month_bounds(2026, 2).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());

        let (_, end) = month_bounds(2026, 12).unwrap();
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 12, 31).unwrap());
    }

    #[test]
    fn month_bounds_reject_bad_month() {
        assert!(month_bounds(2026, 13).is_none());
        assert!(month_bounds(2026, 0).is_none());
    }
}
