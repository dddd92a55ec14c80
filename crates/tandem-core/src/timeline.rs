use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, SubsecRound, Utc};
use uuid::Uuid;

use tandem_db::Database;
use tandem_types::models::{Attachment, CalendarEntry};

use crate::error::TimelineError;

/// Date-grouped entries for one couple, deduplicated by entry id.
///
/// Raw entries are retained and the privacy filter is applied at read time:
/// a partner-authored entry hidden because its date is still in the future
/// becomes visible exactly when the date arrives, without any re-fetch
/// bookkeeping.
#[derive(Default)]
struct GroupedView {
    days: BTreeMap<NaiveDate, Vec<CalendarEntry>>,
    seen: HashSet<Uuid>,
}

impl GroupedView {
    /// Fold an entry in; duplicates (by id) are ignored.
    fn insert(&mut self, entry: CalendarEntry) -> bool {
        if !self.seen.insert(entry.id) {
            return false;
        }
        self.days.entry(entry.date).or_default().push(entry);
        true
    }

    fn visible(
        &self,
        viewer: Uuid,
        today: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    ) -> BTreeMap<NaiveDate, Vec<CalendarEntry>> {
        let mut out = BTreeMap::new();
        for (day, entries) in self.days.range(start..=end) {
            let kept: Vec<CalendarEntry> = entries
                .iter()
                .filter(|e| is_visible(e, viewer, today))
                .cloned()
                .collect();
            if !kept.is_empty() {
                out.insert(*day, kept);
            }
        }
        out
    }
}

/// Entries authored by the viewer are never filtered; a partner's entry is
/// hidden while its date is still in the future.
pub(crate) fn is_visible(entry: &CalendarEntry, viewer: Uuid, today: NaiveDate) -> bool {
    entry.author == viewer || entry.date <= today
}

/// Holds and queries the shared timeline for each couple.
///
/// Methods are blocking (record-store bound); async callers run them via
/// `spawn_blocking`.
pub struct TimelineStore {
    db: Arc<Database>,
    views: Mutex<HashMap<Uuid, GroupedView>>,
}

impl TimelineStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Load entries with `date ∈ [start, end]`, fold them into the in-memory
    /// view, and return the privacy-filtered day grouping for the viewer.
    /// "Today" is the UTC calendar day at query time.
    pub fn fetch_range(
        &self,
        couple_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        viewer: Uuid,
    ) -> Result<BTreeMap<NaiveDate, Vec<CalendarEntry>>, TimelineError> {
        self.fetch_range_at(couple_id, start, end, viewer, Utc::now().date_naive())
    }

    pub fn fetch_range_at(
        &self,
        couple_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        viewer: Uuid,
        today: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, Vec<CalendarEntry>>, TimelineError> {
        let rows = self.db.entries_in_range(couple_id, start, end)?;

        let mut views = self.lock_views();
        let view = views.entry(couple_id).or_default();
        for row in rows {
            view.insert(row.into_model()?);
        }
        Ok(view.visible(viewer, today, start, end))
    }

    /// Persist a new entry and fold it into the view. The only validation is
    /// attachment completeness; there is no per-day entry cap.
    pub fn append(
        &self,
        couple_id: Uuid,
        author: Uuid,
        date: NaiveDate,
        attachment: Attachment,
    ) -> Result<CalendarEntry, TimelineError> {
        if !attachment.is_complete() {
            return Err(TimelineError::IncompleteAttachment);
        }

        let entry = CalendarEntry {
            id: Uuid::new_v4(),
            couple_id,
            author,
            date,
            attachment,
            // Microsecond precision, matching what the record store persists,
            // so in-memory and re-read timestamps compare equal.
            created_at: Utc::now().trunc_subsecs(6),
        };
        self.db.insert_entry(&entry)?;

        self.lock_views()
            .entry(couple_id)
            .or_default()
            .insert(entry.clone());
        Ok(entry)
    }

    /// Fold freshly-polled entries into the view without duplicating entries
    /// already present. Returns the entries actually added.
    pub fn merge(&self, couple_id: Uuid, entries: Vec<CalendarEntry>) -> Vec<CalendarEntry> {
        let mut views = self.lock_views();
        let view = views.entry(couple_id).or_default();
        entries
            .into_iter()
            .filter(|e| view.insert(e.clone()))
            .collect()
    }

    fn lock_views(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, GroupedView>> {
        // Recover from poisoning: the view is reconstructible from the record
        // store at any time.
        self.views.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_attachment(path: &str) -> Attachment {
        Attachment {
            storage_path: path.to_string(),
            file_name: "photo.jpg".to_string(),
            size_bytes: 2048,
            mime_type: "image/jpeg".to_string(),
            width: 400,
            height: 400,
        }
    }

    fn store() -> TimelineStore {
        TimelineStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn partner_future_entries_hidden_until_date_arrives() {
        let store = store();
        let couple_id = Uuid::new_v4();
        let (viewer, partner) = (Uuid::new_v4(), Uuid::new_v4());

        let today = Utc::now().date_naive();
        let tomorrow = today + Duration::days(1);

        store
            .append(couple_id, partner, tomorrow, test_attachment("a/tomorrow.jpg"))
            .unwrap();

        let view = store
            .fetch_range_at(couple_id, today, tomorrow, viewer, today)
            .unwrap();
        assert!(view.is_empty(), "future partner entry must be hidden");

        // Same query once the date has arrived.
        let view = store
            .fetch_range_at(couple_id, today, tomorrow, viewer, tomorrow)
            .unwrap();
        assert_eq!(view.get(&tomorrow).map(Vec::len), Some(1));
    }

    #[test]
    fn own_entries_always_visible_regardless_of_date() {
        let store = store();
        let couple_id = Uuid::new_v4();
        let viewer = Uuid::new_v4();

        let today = Utc::now().date_naive();
        let next_week = today + Duration::days(7);

        store
            .append(couple_id, viewer, next_week, test_attachment("a/future.jpg"))
            .unwrap();

        let view = store
            .fetch_range_at(couple_id, today, next_week, viewer, today)
            .unwrap();
        assert_eq!(view.get(&next_week).map(Vec::len), Some(1));
    }

    #[test]
    fn merge_deduplicates_by_entry_id() {
        let store = store();
        let couple_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let today = Utc::now().date_naive();

        let entry = store
            .append(couple_id, author, today, test_attachment("a/1.jpg"))
            .unwrap();

        // Re-merging the same entry adds nothing.
        let added = store.merge(couple_id, vec![entry.clone()]);
        assert!(added.is_empty());

        let mut other = entry.clone();
        other.id = Uuid::new_v4();
        let added = store.merge(couple_id, vec![entry, other]);
        assert_eq!(added.len(), 1);
    }

    #[test]
    fn append_rejects_incomplete_attachment() {
        let store = store();
        let mut att = test_attachment("a/1.jpg");
        att.mime_type.clear();

        let err = store
            .append(Uuid::new_v4(), Uuid::new_v4(), Utc::now().date_naive(), att)
            .unwrap_err();
        assert!(matches!(err, TimelineError::IncompleteAttachment));
    }

    #[test]
    fn many_entries_share_a_day() {
        let store = store();
        let couple_id = Uuid::new_v4();
        let author = Uuid::new_v4();
        let today = Utc::now().date_naive();

        for i in 0..3 {
            store
                .append(
                    couple_id,
                    author,
                    today,
                    test_attachment(&format!("a/{}.jpg", i)),
                )
                .unwrap();
        }

        let view = store
            .fetch_range_at(couple_id, today, today, author, today)
            .unwrap();
        assert_eq!(view.get(&today).map(Vec::len), Some(3));
    }
}
