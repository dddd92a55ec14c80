use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use tandem_types::models::{CalendarEntry, Couple, PairingCode};

use crate::models::{CoupleRow, EntryRow, PairingCodeRow};
use crate::{Database, format_ts};

/// Result of the transactional redemption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    Paired,
    /// Another redemption consumed the code first.
    Lost,
    /// One of the parties already has an active couple.
    AlreadyPaired,
}

impl Database {
    // -- Pairing codes --

    pub fn insert_pairing_code(&self, id: &str, code: &PairingCode) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO pairing_codes (id, code, issuer_id, issued_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id,
                    code.code,
                    code.issuer.to_string(),
                    format_ts(code.issued_at),
                    format_ts(code.expires_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Is there an unredeemed, unexpired row for this code string?
    pub fn live_code_exists(&self, code: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pairing_codes
                 WHERE code = ?1 AND redeemed_by IS NULL AND expires_at > ?2",
                rusqlite::params![code, format_ts(now)],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Newest row for a code string. Codes are not globally unique by policy,
    /// so redemption targets the most recently issued row.
    pub fn newest_code(&self, code: &str) -> Result<Option<PairingCodeRow>> {
        self.with_conn(|conn| query_newest_code(conn, code))
    }

    /// Mark the code redeemed and create the couple in one transaction.
    ///
    /// The conditional UPDATE is the single-use serialization point: of two
    /// concurrent redemptions exactly one sees a changed row; the other gets
    /// `Lost`. The at-most-one-active-couple check runs inside the same
    /// transaction, and `AlreadyPaired` rolls back so the code is not burned.
    pub fn redeem_and_pair(
        &self,
        code_row_id: &str,
        couple: &Couple,
        redeemer: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let changed = tx.execute(
                "UPDATE pairing_codes SET redeemed_by = ?2, redeemed_at = ?3
                 WHERE id = ?1 AND redeemed_by IS NULL",
                rusqlite::params![code_row_id, redeemer.to_string(), format_ts(now)],
            )?;
            if changed == 0 {
                return Ok(RedeemOutcome::Lost);
            }

            let paired: i64 = tx.query_row(
                "SELECT COUNT(*) FROM couples
                 WHERE (member_a IN (?1, ?2) OR member_b IN (?1, ?2)) AND active = 1",
                rusqlite::params![couple.member_a.to_string(), couple.member_b.to_string()],
                |row| row.get(0),
            )?;
            if paired > 0 {
                return Ok(RedeemOutcome::AlreadyPaired);
            }

            tx.execute(
                "INSERT INTO couples
                    (id, member_a, member_b, active,
                     member_a_entitlement_ref, member_b_entitlement_ref, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)",
                rusqlite::params![
                    couple.id.to_string(),
                    couple.member_a.to_string(),
                    couple.member_b.to_string(),
                    couple.member_a_entitlement_ref,
                    couple.member_b_entitlement_ref,
                    format_ts(couple.created_at),
                ],
            )?;

            tx.commit()?;
            Ok(RedeemOutcome::Paired)
        })
    }

    // -- Couples --

    pub fn insert_couple(&self, couple: &Couple) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO couples
                    (id, member_a, member_b, active,
                     member_a_entitlement_ref, member_b_entitlement_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    couple.id.to_string(),
                    couple.member_a.to_string(),
                    couple.member_b.to_string(),
                    couple.active as i64,
                    couple.member_a_entitlement_ref,
                    couple.member_b_entitlement_ref,
                    format_ts(couple.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn active_couple_for(&self, account: Uuid) -> Result<Option<CoupleRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, member_a, member_b, active,
                        member_a_entitlement_ref, member_b_entitlement_ref, created_at
                 FROM couples
                 WHERE (member_a = ?1 OR member_b = ?1) AND active = 1
                 ORDER BY created_at DESC
                 LIMIT 1",
            )?;
            let row = stmt
                .query_row([account.to_string()], map_couple_row)
                .optional()?;
            Ok(row)
        })
    }

    pub fn couple_by_id(&self, id: Uuid) -> Result<Option<CoupleRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, member_a, member_b, active,
                        member_a_entitlement_ref, member_b_entitlement_ref, created_at
                 FROM couples WHERE id = ?1",
            )?;
            let row = stmt.query_row([id.to_string()], map_couple_row).optional()?;
            Ok(row)
        })
    }

    /// Soft-delete: couples are never removed, only deactivated.
    pub fn deactivate_couple(&self, id: Uuid) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE couples SET active = 0 WHERE id = ?1 AND active = 1",
                [id.to_string()],
            )?;
            Ok(n)
        })
    }

    /// Write the entitlement ref into whichever member slot matches the
    /// account. A non-member account changes nothing.
    pub fn bind_entitlement_ref(
        &self,
        couple_id: Uuid,
        account: Uuid,
        entitlement_ref: &str,
    ) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let n = conn.execute(
                "UPDATE couples SET
                    member_a_entitlement_ref = CASE WHEN member_a = ?2 THEN ?3
                        ELSE member_a_entitlement_ref END,
                    member_b_entitlement_ref = CASE WHEN member_b = ?2 THEN ?3
                        ELSE member_b_entitlement_ref END
                 WHERE id = ?1 AND (member_a = ?2 OR member_b = ?2)",
                rusqlite::params![couple_id.to_string(), account.to_string(), entitlement_ref],
            )?;
            Ok(n)
        })
    }

    // -- Calendar entries --

    pub fn insert_entry(&self, e: &CalendarEntry) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO calendar_entries
                    (id, couple_id, author_id, entry_date, storage_path, file_name,
                     size_bytes, mime_type, width, height, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    e.id.to_string(),
                    e.couple_id.to_string(),
                    e.author.to_string(),
                    e.date.format("%Y-%m-%d").to_string(),
                    e.attachment.storage_path,
                    e.attachment.file_name,
                    e.attachment.size_bytes as i64,
                    e.attachment.mime_type,
                    e.attachment.width as i64,
                    e.attachment.height as i64,
                    format_ts(e.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn entries_in_range(
        &self,
        couple_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<EntryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, couple_id, author_id, entry_date, storage_path, file_name,
                        size_bytes, mime_type, width, height, created_at
                 FROM calendar_entries
                 WHERE couple_id = ?1 AND entry_date >= ?2 AND entry_date <= ?3
                 ORDER BY entry_date, created_at",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        couple_id.to_string(),
                        start.format("%Y-%m-%d").to_string(),
                        end.format("%Y-%m-%d").to_string(),
                    ],
                    map_entry_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn entries_created_after(
        &self,
        couple_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<EntryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, couple_id, author_id, entry_date, storage_path, file_name,
                        size_bytes, mime_type, width, height, created_at
                 FROM calendar_entries
                 WHERE couple_id = ?1 AND created_at > ?2
                 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![couple_id.to_string(), format_ts(since)],
                    map_entry_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Most recent partner-authored entry whose date has arrived.
    pub fn latest_entry_by_author(
        &self,
        couple_id: Uuid,
        author: Uuid,
        up_to: NaiveDate,
    ) -> Result<Option<EntryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, couple_id, author_id, entry_date, storage_path, file_name,
                        size_bytes, mime_type, width, height, created_at
                 FROM calendar_entries
                 WHERE couple_id = ?1 AND author_id = ?2 AND entry_date <= ?3
                 ORDER BY created_at DESC
                 LIMIT 1",
            )?;
            let row = stmt
                .query_row(
                    rusqlite::params![
                        couple_id.to_string(),
                        author.to_string(),
                        up_to.format("%Y-%m-%d").to_string(),
                    ],
                    map_entry_row,
                )
                .optional()?;
            Ok(row)
        })
    }
}

fn query_newest_code(conn: &Connection, code: &str) -> Result<Option<PairingCodeRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, issuer_id, issued_at, expires_at, redeemed_by, redeemed_at
         FROM pairing_codes
         WHERE code = ?1
         ORDER BY issued_at DESC
         LIMIT 1",
    )?;

    let row = stmt
        .query_row([code], |row| {
            Ok(PairingCodeRow {
                id: row.get(0)?,
                code: row.get(1)?,
                issuer_id: row.get(2)?,
                issued_at: row.get(3)?,
                expires_at: row.get(4)?,
                redeemed_by: row.get(5)?,
                redeemed_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn map_couple_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CoupleRow> {
    Ok(CoupleRow {
        id: row.get(0)?,
        member_a: row.get(1)?,
        member_b: row.get(2)?,
        active: row.get::<_, i64>(3)? != 0,
        member_a_entitlement_ref: row.get(4)?,
        member_b_entitlement_ref: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok(EntryRow {
        id: row.get(0)?,
        couple_id: row.get(1)?,
        author_id: row.get(2)?,
        entry_date: row.get(3)?,
        storage_path: row.get(4)?,
        file_name: row.get(5)?,
        size_bytes: row.get(6)?,
        mime_type: row.get(7)?,
        width: row.get(8)?,
        height: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
