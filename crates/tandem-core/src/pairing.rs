use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use tandem_db::Database;
use tandem_db::queries::RedeemOutcome;
use tandem_types::models::{Couple, PairingCode};

use crate::error::PairingError;

const CODE_LEN: usize = 6;
const CODE_TTL_MINUTES: i64 = 60;
const MAX_COLLISION_RETRIES: usize = 10;

/// 32-symbol alphabet without visually ambiguous glyphs (no 0/O, no 1/I).
const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Owns code issuance/redemption and the couple lifecycle.
///
/// All methods are blocking (record-store bound); async callers run them via
/// `spawn_blocking`.
pub struct PairingLedger {
    db: Arc<Database>,
}

impl PairingLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Issue a fresh single-use code for the account, valid for one hour.
    ///
    /// Regenerates up to `MAX_COLLISION_RETRIES` times when the candidate
    /// collides with a live code, then proceeds with the collision risk
    /// rather than failing.
    pub fn issue_code(&self, issuer: Uuid) -> Result<PairingCode, PairingError> {
        let now = Utc::now();

        let mut code = generate_code();
        for attempt in 0..MAX_COLLISION_RETRIES {
            if !self.db.live_code_exists(&code, now)? {
                break;
            }
            warn!("Pairing code collision (attempt {}), regenerating", attempt + 1);
            code = generate_code();
        }

        let pairing_code = PairingCode {
            code,
            issuer,
            issued_at: now,
            expires_at: now + Duration::minutes(CODE_TTL_MINUTES),
            redeemed_by: None,
            redeemed_at: None,
        };

        self.db
            .insert_pairing_code(&Uuid::new_v4().to_string(), &pairing_code)?;

        info!("Issued pairing code {} for {}", pairing_code.code, issuer);
        Ok(pairing_code)
    }

    /// Redeem a code and create the couple.
    ///
    /// The conditional mark-as-redeemed write inside `redeem_and_pair` is the
    /// serialization point: of two concurrent redemptions, exactly one wins
    /// and the loser sees `CodeConsumed`.
    pub fn redeem(&self, code: &str, redeemer: Uuid) -> Result<Couple, PairingError> {
        let now = Utc::now();
        let code = code.trim().to_uppercase();

        let row = self.db.newest_code(&code)?.ok_or(PairingError::NotFound)?;
        let row_id = row.id.clone();
        let record = row.into_model()?;

        if record.issuer == redeemer {
            return Err(PairingError::SelfPairing);
        }
        if record.is_redeemed() {
            return Err(PairingError::CodeConsumed);
        }
        if record.is_expired(now) {
            return Err(PairingError::CodeExpired);
        }

        // The redeemer's entitlement ref is seeded immediately; the issuer's
        // stays unset until their client calls bind_entitlement.
        let couple = Couple {
            id: Uuid::new_v4(),
            member_a: record.issuer,
            member_b: redeemer,
            active: true,
            member_a_entitlement_ref: None,
            member_b_entitlement_ref: Some(redeemer.to_string()),
            created_at: now,
        };

        match self.db.redeem_and_pair(&row_id, &couple, redeemer, now)? {
            RedeemOutcome::Paired => {}
            RedeemOutcome::Lost => return Err(PairingError::CodeConsumed),
            RedeemOutcome::AlreadyPaired => return Err(PairingError::AlreadyPaired),
        }

        info!("Code {} redeemed: couple {} formed", code, couple.id);
        Ok(couple)
    }

    /// Deactivate the account's current couple, if any. Idempotent.
    pub fn unpair(&self, account: Uuid) -> Result<(), PairingError> {
        if let Some(row) = self.db.active_couple_for(account)? {
            let couple = row.into_model()?;
            self.db.deactivate_couple(couple.id)?;
            info!("Couple {} deactivated by {}", couple.id, account);
        }
        Ok(())
    }

    /// Bind the caller's entitlement ref to their slot on the active couple.
    /// No-op when the account is not currently paired.
    pub fn bind_entitlement(
        &self,
        account: Uuid,
        entitlement_ref: &str,
    ) -> Result<(), PairingError> {
        if let Some(row) = self.db.active_couple_for(account)? {
            let couple = row.into_model()?;
            self.db
                .bind_entitlement_ref(couple.id, account, entitlement_ref)?;
        }
        Ok(())
    }

    pub fn active_couple(&self, account: Uuid) -> Result<Option<Couple>, PairingError> {
        match self.db.active_couple_for(account)? {
            Some(row) => Ok(Some(row.into_model()?)),
            None => Ok(None),
        }
    }
}

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_32_unambiguous_symbols() {
        assert_eq!(CODE_ALPHABET.len(), 32);
        for ambiguous in [b'0', b'O', b'1', b'I'] {
            assert!(!CODE_ALPHABET.contains(&ambiguous));
        }
    }

    #[test]
    fn generated_codes_are_six_chars_from_the_alphabet() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }
}
