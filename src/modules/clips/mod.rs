use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub mod dto;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/request", post(handler::submit_request))
        .route("/user/{user_id}", get(handler::latest_clip))
        .route("/clips", get(handler::list_clips))
}
