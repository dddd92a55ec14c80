//! Database row types — these map directly to SQLite rows.
//! Distinct from the tandem-types domain models to keep the DB layer
//! independent; `into_model` conversions parse the TEXT columns.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use uuid::Uuid;

use tandem_types::models::{Attachment, CalendarEntry, Couple, PairingCode};

use crate::parse_ts;

pub struct PairingCodeRow {
    pub id: String,
    pub code: String,
    pub issuer_id: String,
    pub issued_at: String,
    pub expires_at: String,
    pub redeemed_by: Option<String>,
    pub redeemed_at: Option<String>,
}

impl PairingCodeRow {
    pub fn into_model(self) -> Result<PairingCode> {
        Ok(PairingCode {
            code: self.code,
            issuer: parse_uuid(&self.issuer_id, "pairing code issuer")?,
            issued_at: parse_ts(&self.issued_at)?,
            expires_at: parse_ts(&self.expires_at)?,
            redeemed_by: self
                .redeemed_by
                .as_deref()
                .map(|v| parse_uuid(v, "pairing code redeemer"))
                .transpose()?,
            redeemed_at: self.redeemed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

pub struct CoupleRow {
    pub id: String,
    pub member_a: String,
    pub member_b: String,
    pub active: bool,
    pub member_a_entitlement_ref: Option<String>,
    pub member_b_entitlement_ref: Option<String>,
    pub created_at: String,
}

impl CoupleRow {
    pub fn into_model(self) -> Result<Couple> {
        Ok(Couple {
            id: parse_uuid(&self.id, "couple id")?,
            member_a: parse_uuid(&self.member_a, "couple member_a")?,
            member_b: parse_uuid(&self.member_b, "couple member_b")?,
            active: self.active,
            member_a_entitlement_ref: self.member_a_entitlement_ref,
            member_b_entitlement_ref: self.member_b_entitlement_ref,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

pub struct EntryRow {
    pub id: String,
    pub couple_id: String,
    pub author_id: String,
    pub entry_date: String,
    pub storage_path: String,
    pub file_name: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub width: i64,
    pub height: i64,
    pub created_at: String,
}

impl EntryRow {
    pub fn into_model(self) -> Result<CalendarEntry> {
        Ok(CalendarEntry {
            id: parse_uuid(&self.id, "entry id")?,
            couple_id: parse_uuid(&self.couple_id, "entry couple_id")?,
            author: parse_uuid(&self.author_id, "entry author")?,
            date: NaiveDate::parse_from_str(&self.entry_date, "%Y-%m-%d")
                .with_context(|| format!("Bad entry date '{}'", self.entry_date))?,
            attachment: Attachment {
                storage_path: self.storage_path,
                file_name: self.file_name,
                size_bytes: self.size_bytes.max(0) as u64,
                mime_type: self.mime_type,
                width: self.width.max(0) as u32,
                height: self.height.max(0) as u32,
            },
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("Corrupt {}: '{}'", what, raw))
}
