use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::common::error::{ClipError, ClipResult};

/// Queue message body as published by producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub src: String,
    /// Informational only; the worker derives the real destination.
    #[serde(default)]
    pub dst: String,
    pub start: f64,
    pub end: f64,
    pub user_id: String,
}

/// Destination key for the clip produced from a message.
///
/// Depends on the message id alone so every redelivery targets the same object.
pub fn dest_key_for(message_id: &str) -> String {
    format!("{}.mp4", message_id)
}

/// A decoded, validated clip request bound to one queue message.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipJob {
    pub source_key: String,
    pub dest_key: String,
    pub start: f64,
    pub end: f64,
    pub user_id: String,
    pub process_host: String,
}

impl ClipJob {
    pub fn decode(message_id: &str, payload: &[u8], process_host: &str) -> ClipResult<Self> {
        let payload: JobPayload = serde_json::from_slice(payload)?;

        if payload.src.trim().is_empty() {
            return Err(ClipError::malformed("src is empty"));
        }
        if payload.user_id.trim().is_empty() {
            return Err(ClipError::malformed("user_id is empty"));
        }
        if !payload.start.is_finite() || !payload.end.is_finite() || payload.start < 0.0 {
            return Err(ClipError::malformed(format!(
                "invalid bounds {}..{}",
                payload.start, payload.end
            )));
        }
        if payload.end <= payload.start {
            return Err(ClipError::malformed(format!(
                "end {} is not after start {}",
                payload.end, payload.start
            )));
        }

        Ok(Self {
            source_key: payload.src,
            dest_key: dest_key_for(message_id),
            start: payload.start,
            end: payload.end,
            user_id: payload.user_id,
            process_host: process_host.to_string(),
        })
    }
}

/// Stored outcome of one completed job, keyed by `message_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClipRecord {
    pub message_id: String,
    pub src: String,
    pub dst: String,
    pub start: f64,
    pub end: f64,
    pub user_id: String,
    pub process_host: String,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub completed_at: OffsetDateTime,
}

impl ClipRecord {
    pub fn from_job(message_id: &str, job: &ClipJob) -> Self {
        Self {
            message_id: message_id.to_string(),
            src: job.source_key.clone(),
            dst: job.dest_key.clone(),
            start: job.start,
            end: job.end,
            user_id: job.user_id.clone(),
            process_host: job.process_host.clone(),
            completed_at: OffsetDateTime::now_utc(),
        }
    }
}
