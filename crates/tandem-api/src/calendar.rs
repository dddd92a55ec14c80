use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use tandem_core::error::TimelineError;
use tandem_types::api::{
    Claims, CreateEntryRequest, EntryResponse, LatestEntryResponse, MonthViewResponse, PollQuery,
    PollResponse,
};
use tandem_types::models::{Couple, ImageSource};

use crate::AppState;

fn timeline_status(e: TimelineError) -> StatusCode {
    match e {
        TimelineError::IncompleteAttachment => StatusCode::BAD_REQUEST,
        TimelineError::NoSuchCouple => StatusCode::NOT_FOUND,
        TimelineError::NotAMember => StatusCode::FORBIDDEN,
        TimelineError::Storage(e) => {
            error!("Timeline storage error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn join_500(e: tokio::task::JoinError) -> StatusCode {
    error!("spawn_blocking join error: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

/// The caller's active couple, or 404 when unpaired.
async fn resolve_couple(state: &AppState, account: Uuid) -> Result<Couple, StatusCode> {
    let st = state.clone();
    tokio::task::spawn_blocking(move || st.ledger.active_couple(account))
        .await
        .map_err(join_500)?
        .map_err(|e| {
            error!("Couple lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn month_view(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let account = claims.sub;
    let couple = resolve_couple(&state, account).await?;

    let view = state
        .sync
        .load_month(couple.id, account, year, month)
        .await
        .map_err(timeline_status)?;

    let days = view
        .into_iter()
        .map(|(day, entries)| (day, entries.into_iter().map(EntryResponse::from).collect()))
        .collect();

    Ok(Json(MonthViewResponse { year, month, days }))
}

pub async fn poll(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let account = claims.sub;
    let couple = resolve_couple(&state, account).await?;

    let outcome = state
        .sync
        .poll_new(couple.id, account, query.since)
        .await
        .map_err(timeline_status)?;

    Ok(Json(PollResponse {
        entries: outcome.entries.into_iter().map(EntryResponse::from).collect(),
        watermark: outcome.watermark,
    }))
}

pub async fn create_entry(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateEntryRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let account = claims.sub;
    let couple = resolve_couple(&state, account).await?;

    let st = state.clone();
    let entry = tokio::task::spawn_blocking(move || {
        st.timeline
            .append(couple.id, account, req.date, req.attachment)
    })
    .await
    .map_err(join_500)?
    .map_err(timeline_status)?;

    Ok((StatusCode::CREATED, Json(EntryResponse::from(entry))))
}

pub async fn latest(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let latest = state
        .sync
        .latest_partner_entry(claims.sub)
        .await
        .map_err(timeline_status)?;

    let Some((entry, image)) = latest else {
        return Ok(Json(LatestEntryResponse {
            entry: None,
            image_url: None,
        }));
    };

    let image_url = match image {
        ImageSource::Remote(url) => Some(url),
        // Cached locally on the server; hand the client the store URL.
        ImageSource::Cached(_) => state
            .store
            .access_url(&entry.attachment.storage_path)
            .await
            .ok(),
        ImageSource::Unknown => None,
    };

    Ok(Json(LatestEntryResponse {
        entry: Some(EntryResponse::from(entry)),
        image_url,
    }))
}
