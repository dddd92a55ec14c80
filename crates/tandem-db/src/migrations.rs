use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pairing_codes (
            id              TEXT PRIMARY KEY,
            code            TEXT NOT NULL,
            issuer_id       TEXT NOT NULL,
            issued_at       TEXT NOT NULL,
            expires_at      TEXT NOT NULL,
            redeemed_by     TEXT,
            redeemed_at     TEXT
        );

        -- Codes are not globally unique by policy; lookups take the newest
        -- live row for a given code string.
        CREATE INDEX IF NOT EXISTS idx_pairing_codes_code
            ON pairing_codes(code, issued_at);

        CREATE TABLE IF NOT EXISTS couples (
            id                          TEXT PRIMARY KEY,
            member_a                    TEXT NOT NULL,
            member_b                    TEXT NOT NULL,
            active                      INTEGER NOT NULL DEFAULT 1,
            member_a_entitlement_ref    TEXT,
            member_b_entitlement_ref    TEXT,
            created_at                  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_couples_member_a
            ON couples(member_a, active);
        CREATE INDEX IF NOT EXISTS idx_couples_member_b
            ON couples(member_b, active);

        CREATE TABLE IF NOT EXISTS calendar_entries (
            id              TEXT PRIMARY KEY,
            couple_id       TEXT NOT NULL,
            author_id       TEXT NOT NULL,
            entry_date      TEXT NOT NULL,
            storage_path    TEXT NOT NULL,
            file_name       TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL,
            mime_type       TEXT NOT NULL,
            width           INTEGER NOT NULL,
            height          INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entries_couple_date
            ON calendar_entries(couple_id, entry_date);
        CREATE INDEX IF NOT EXISTS idx_entries_couple_created
            ON calendar_entries(couple_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
