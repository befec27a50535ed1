use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::error;
use validator::Validate;

use super::dto::{ClipListEntry, JobAccepted, ListQuery, ProcessRequest};
use super::service::ClipService;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;

/// Queue a clip request
#[utoipa::path(
    post,
    path = "/api/v1/request",
    request_body = ProcessRequest,
    responses(
        (status = 202, description = "Job queued", body = ApiResponse<JobAccepted>),
        (status = 400, description = "Invalid request"),
        (status = 500, description = "Queue unavailable")
    ),
    tag = "Clips"
)]
pub async fn submit_request(
    State(state): State<AppState>,
    Json(payload): Json<ProcessRequest>,
) -> impl IntoResponse {
    if let Err(e) = payload.validate() {
        return ApiError::bad_request(e.to_string()).into_response();
    }

    match ClipService::submit(state, payload).await {
        Ok(accepted) => ApiSuccess(
            ApiResponse::success(accepted, "Request queued"),
            StatusCode::ACCEPTED,
        )
        .into_response(),
        Err(e) => {
            error!("Failed to queue request: {:#}", e);
            ApiError::internal(e.to_string()).into_response()
        }
    }
}

/// Redirect to the user's latest clip
#[utoipa::path(
    get,
    path = "/api/v1/user/{user_id}",
    params(
        ("user_id" = String, Path, description = "User ID")
    ),
    responses(
        (status = 301, description = "Redirect to the clip"),
        (status = 404, description = "No clip for this user")
    ),
    tag = "Clips"
)]
pub async fn latest_clip(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match ClipService::latest_for_user(state.clone(), &user_id).await {
        Ok(Some(record)) => (
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, ClipService::public_url(&state, &record))],
        )
            .into_response(),
        Ok(None) => ApiError::not_found(format!("No clip for user {}", user_id)).into_response(),
        Err(e) => {
            error!("Lookup for user {} failed: {:#}", user_id, e);
            ApiError::internal(e.to_string()).into_response()
        }
    }
}

/// List completed clips, newest first
#[utoipa::path(
    get,
    path = "/api/v1/clips",
    params(ListQuery),
    responses(
        (status = 200, description = "Completed clips", body = Vec<ClipListEntry>)
    ),
    tag = "Clips"
)]
pub async fn list_clips(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match ClipService::list(state, query.limit()).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => {
            error!("Listing clips failed: {:#}", e);
            ApiError::internal(e.to_string()).into_response()
        }
    }
}
