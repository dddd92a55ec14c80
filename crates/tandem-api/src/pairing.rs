use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use tandem_core::error::PairingError;
use tandem_types::api::{
    BindEntitlementRequest, Claims, CoupleResponse, IssueCodeResponse, RedeemRequest,
};

use crate::AppState;

/// Terminal pairing errors map to stable statuses and are never retried
/// server-side; storage failures surface as 500 for the client to retry.
fn pairing_status(e: PairingError) -> StatusCode {
    match e {
        PairingError::NotFound => StatusCode::NOT_FOUND,
        PairingError::SelfPairing => StatusCode::BAD_REQUEST,
        PairingError::CodeConsumed => StatusCode::CONFLICT,
        PairingError::CodeExpired => StatusCode::GONE,
        PairingError::AlreadyPaired => StatusCode::CONFLICT,
        PairingError::Storage(e) => {
            error!("Pairing storage error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn join_500(e: tokio::task::JoinError) -> StatusCode {
    error!("spawn_blocking join error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

pub async fn issue_code(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let issuer = claims.sub;
    let st = state.clone();
    let code = tokio::task::spawn_blocking(move || st.ledger.issue_code(issuer))
        .await
        .map_err(join_500)?
        .map_err(pairing_status)?;

    Ok((
        StatusCode::CREATED,
        Json(IssueCodeResponse {
            code: code.code,
            expires_at: code.expires_at,
        }),
    ))
}

pub async fn redeem(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RedeemRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let redeemer = claims.sub;
    let st = state.clone();
    let couple = tokio::task::spawn_blocking(move || st.ledger.redeem(&req.code, redeemer))
        .await
        .map_err(join_500)?
        .map_err(pairing_status)?;

    Ok((StatusCode::CREATED, Json(CoupleResponse::from(couple))))
}

pub async fn unpair(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let account = claims.sub;
    let st = state.clone();
    tokio::task::spawn_blocking(move || st.ledger.unpair(account))
        .await
        .map_err(join_500)?
        .map_err(pairing_status)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn bind_entitlement(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BindEntitlementRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let account = claims.sub;
    let st = state.clone();
    tokio::task::spawn_blocking(move || st.ledger.bind_entitlement(account, &req.entitlement_ref))
        .await
        .map_err(join_500)?
        .map_err(pairing_status)?;

    Ok(StatusCode::NO_CONTENT)
}
