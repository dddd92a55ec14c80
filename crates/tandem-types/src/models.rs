use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The durable two-account pairing. At most one active couple exists per
/// account at any time; deactivated couples are kept for audit/undo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Couple {
    pub id: Uuid,
    pub member_a: Uuid,
    pub member_b: Uuid,
    pub active: bool,
    pub member_a_entitlement_ref: Option<String>,
    pub member_b_entitlement_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Couple {
    pub fn has_member(&self, account: Uuid) -> bool {
        self.member_a == account || self.member_b == account
    }

    /// The other member, or None if the account is not part of this couple.
    pub fn partner_of(&self, account: Uuid) -> Option<Uuid> {
        if self.member_a == account {
            Some(self.member_b)
        } else if self.member_b == account {
            Some(self.member_a)
        } else {
            None
        }
    }

    /// The entitlement ref bound to the given member's slot.
    pub fn entitlement_ref_of(&self, account: Uuid) -> Option<&str> {
        if self.member_a == account {
            self.member_a_entitlement_ref.as_deref()
        } else if self.member_b == account {
            self.member_b_entitlement_ref.as_deref()
        } else {
            None
        }
    }
}

/// Single-use, ephemeral pairing code. Terminal once redeemed or expired;
/// mutated exactly once, on redemption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingCode {
    pub code: String,
    pub issuer: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub redeemed_by: Option<Uuid>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl PairingCode {
    pub fn is_redeemed(&self) -> bool {
        self.redeemed_by.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Image metadata attached to a calendar entry. The bytes themselves live in
/// the external binary store under `storage_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub storage_path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

impl Attachment {
    /// An attachment is complete when every descriptive field is present.
    pub fn is_complete(&self) -> bool {
        !self.storage_path.is_empty()
            && !self.file_name.is_empty()
            && !self.mime_type.is_empty()
            && self.size_bytes > 0
    }
}

/// One dated memory on the shared timeline. Immutable after creation; many
/// entries may share a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: Uuid,
    pub couple_id: Uuid,
    pub author: Uuid,
    pub date: NaiveDate,
    pub attachment: Attachment,
    pub created_at: DateTime<Utc>,
}

/// Result of an entitlement check. Derived, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    pub couple_id: Uuid,
    pub either_member_active: bool,
    pub checked_at: DateTime<Utc>,
}

/// Outcome of `has_access`. `Indeterminate` means every bound entitlement
/// ref failed to resolve — distinct from a confirmed `Denied`.
#[derive(Debug, Clone)]
pub enum AccessDecision {
    Granted(EntitlementSnapshot),
    Denied(EntitlementSnapshot),
    /// The account has no active couple to check against.
    Unpaired,
    Indeterminate,
}

impl AccessDecision {
    pub fn allowed(&self) -> bool {
        matches!(self, AccessDecision::Granted(_))
    }
}

/// Where an entry's image can currently be found, from the renderer's point
/// of view.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Bytes already present in the local cache.
    Cached(Vec<u8>),
    /// Not cached; fetchable at this URL.
    Remote(String),
    /// Neither cached nor resolvable right now.
    Unknown,
}
