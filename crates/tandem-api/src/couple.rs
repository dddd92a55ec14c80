use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use tandem_types::api::{AccessResponse, Claims, CoupleResponse};
use tandem_types::models::AccessDecision;

use crate::AppState;

pub async fn get_couple(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let account = claims.sub;
    let st = state.clone();
    let couple = tokio::task::spawn_blocking(move || st.ledger.active_couple(account))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Couple lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(CoupleResponse::from(couple)))
}

pub async fn access(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let decision = state.resolver.has_access(claims.sub).await.map_err(|e| {
        error!("Entitlement check failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let response = match decision {
        AccessDecision::Granted(s) => AccessResponse {
            has_access: true,
            confirmed: true,
            checked_at: Some(s.checked_at),
        },
        AccessDecision::Denied(s) => AccessResponse {
            has_access: false,
            confirmed: true,
            checked_at: Some(s.checked_at),
        },
        AccessDecision::Unpaired => AccessResponse {
            has_access: false,
            confirmed: true,
            checked_at: None,
        },
        AccessDecision::Indeterminate => AccessResponse {
            has_access: false,
            confirmed: false,
            checked_at: None,
        },
    };

    Ok(Json(response))
}
