use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use tandem_core::error::PairingError;
use tandem_core::pairing::PairingLedger;
use tandem_db::Database;
use tandem_types::models::PairingCode;

fn ledger() -> PairingLedger {
    PairingLedger::new(Arc::new(Database::open_in_memory().unwrap()))
}

#[test]
fn issue_and_redeem_forms_couple() {
    let ledger = ledger();
    let (issuer, redeemer) = (Uuid::new_v4(), Uuid::new_v4());

    let code = ledger.issue_code(issuer).unwrap();
    assert_eq!(code.code.len(), 6);
    assert!(code.expires_at > code.issued_at);

    let couple = ledger.redeem(&code.code, redeemer).unwrap();
    assert_eq!(couple.member_a, issuer);
    assert_eq!(couple.member_b, redeemer);
    assert!(couple.active);
    // The redeemer's entitlement ref is seeded immediately; the issuer's
    // waits for bind_entitlement.
    assert_eq!(
        couple.member_b_entitlement_ref.as_deref(),
        Some(redeemer.to_string().as_str())
    );
    assert!(couple.member_a_entitlement_ref.is_none());

    // Both members now resolve the same active couple.
    assert_eq!(ledger.active_couple(issuer).unwrap().unwrap().id, couple.id);
    assert_eq!(ledger.active_couple(redeemer).unwrap().unwrap().id, couple.id);
}

#[test]
fn redeem_by_issuer_fails_self_pairing() {
    let ledger = ledger();
    let issuer = Uuid::new_v4();

    let code = ledger.issue_code(issuer).unwrap();
    let err = ledger.redeem(&code.code, issuer).unwrap_err();
    assert!(matches!(err, PairingError::SelfPairing));
    assert!(ledger.active_couple(issuer).unwrap().is_none());
}

#[test]
fn second_redeem_fails_code_consumed() {
    let ledger = ledger();
    let (issuer, redeemer) = (Uuid::new_v4(), Uuid::new_v4());

    let code = ledger.issue_code(issuer).unwrap();
    ledger.redeem(&code.code, redeemer).unwrap();

    let err = ledger.redeem(&code.code, redeemer).unwrap_err();
    assert!(matches!(err, PairingError::CodeConsumed));
}

#[test]
fn unknown_code_fails_not_found() {
    let ledger = ledger();
    let err = ledger.redeem("K7M3XQ", Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, PairingError::NotFound));
}

#[test]
fn expired_code_fails_code_expired() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let ledger = PairingLedger::new(db.clone());
    let issuer = Uuid::new_v4();

    let now = Utc::now();
    let stale = PairingCode {
        code: "K7M3XQ".to_string(),
        issuer,
        issued_at: now - Duration::hours(2),
        expires_at: now - Duration::hours(1),
        redeemed_by: None,
        redeemed_at: None,
    };
    db.insert_pairing_code(&Uuid::new_v4().to_string(), &stale)
        .unwrap();

    let err = ledger.redeem("K7M3XQ", Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, PairingError::CodeExpired));
}

#[test]
fn redeem_normalizes_code_input() {
    let ledger = ledger();
    let (issuer, redeemer) = (Uuid::new_v4(), Uuid::new_v4());

    let code = ledger.issue_code(issuer).unwrap();
    let sloppy = format!("  {}  ", code.code.to_lowercase());
    assert!(ledger.redeem(&sloppy, redeemer).is_ok());
}

#[test]
fn concurrent_redemptions_form_exactly_one_couple() {
    let ledger = Arc::new(ledger());
    let issuer = Uuid::new_v4();
    let code = ledger.issue_code(issuer).unwrap().code;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let ledger = ledger.clone();
        let code = code.clone();
        handles.push(std::thread::spawn(move || {
            ledger.redeem(&code, Uuid::new_v4())
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one redemption must win");
    for r in results {
        if let Err(e) = r {
            assert!(matches!(e, PairingError::CodeConsumed));
        }
    }
}

#[test]
fn redeem_fails_when_either_party_already_paired() {
    let ledger = ledger();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let code = ledger.issue_code(a).unwrap();
    ledger.redeem(&code.code, b).unwrap();

    // a is paired; a new code from a cannot form a second active couple.
    let second = ledger.issue_code(a).unwrap();
    let err = ledger.redeem(&second.code, c).unwrap_err();
    assert!(matches!(err, PairingError::AlreadyPaired));
}

#[test]
fn unpair_is_idempotent_and_allows_repairing() {
    let ledger = ledger();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let code = ledger.issue_code(a).unwrap();
    ledger.redeem(&code.code, b).unwrap();

    ledger.unpair(a).unwrap();
    ledger.unpair(a).unwrap();
    assert!(ledger.active_couple(a).unwrap().is_none());
    assert!(ledger.active_couple(b).unwrap().is_none());

    // The old couple is soft-deleted, so the pair can form again.
    let code = ledger.issue_code(a).unwrap();
    assert!(ledger.redeem(&code.code, b).is_ok());
}

#[test]
fn bind_entitlement_fills_matching_slot_only() {
    let ledger = ledger();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let code = ledger.issue_code(a).unwrap();
    ledger.redeem(&code.code, b).unwrap();

    ledger.bind_entitlement(a, "issuer-ref").unwrap();
    let couple = ledger.active_couple(a).unwrap().unwrap();
    assert_eq!(couple.member_a_entitlement_ref.as_deref(), Some("issuer-ref"));
    assert_eq!(
        couple.member_b_entitlement_ref.as_deref(),
        Some(b.to_string().as_str())
    );

    // No active couple: a no-op, not an error.
    ledger.bind_entitlement(Uuid::new_v4(), "stray-ref").unwrap();
}
