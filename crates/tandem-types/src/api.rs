use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, CalendarEntry, Couple};

// -- Identity claims --

/// Bearer-token claims shared between the API middleware and the server.
/// The identity provider issues these tokens; Tandem only validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Pairing --

#[derive(Debug, Serialize)]
pub struct IssueCodeResponse {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindEntitlementRequest {
    pub entitlement_ref: String,
}

#[derive(Debug, Serialize)]
pub struct CoupleResponse {
    pub id: Uuid,
    pub member_a: Uuid,
    pub member_b: Uuid,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Couple> for CoupleResponse {
    fn from(c: Couple) -> Self {
        Self {
            id: c.id,
            member_a: c.member_a,
            member_b: c.member_b,
            active: c.active,
            created_at: c.created_at,
        }
    }
}

// -- Entitlement --

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub has_access: bool,
    /// False when no bound entitlement ref could be resolved; the client
    /// should treat the answer as unknown rather than "not subscribed".
    pub confirmed: bool,
    pub checked_at: Option<DateTime<Utc>>,
}

// -- Calendar --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateEntryRequest {
    pub date: NaiveDate,
    pub attachment: Attachment,
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub id: Uuid,
    pub author: Uuid,
    pub date: NaiveDate,
    pub attachment: Attachment,
    pub created_at: DateTime<Utc>,
}

impl From<CalendarEntry> for EntryResponse {
    fn from(e: CalendarEntry) -> Self {
        Self {
            id: e.id,
            author: e.author,
            date: e.date,
            attachment: e.attachment,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MonthViewResponse {
    pub year: i32,
    pub month: u32,
    pub days: BTreeMap<NaiveDate, Vec<EntryResponse>>,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub since: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub entries: Vec<EntryResponse>,
    /// High-water mark to pass as `since` on the next poll.
    pub watermark: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LatestEntryResponse {
    pub entry: Option<EntryResponse>,
    /// Access URL for the entry's image, when resolvable.
    pub image_url: Option<String>,
}
