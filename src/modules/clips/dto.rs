use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use super::model::{ClipRecord, JobPayload};

/// Default page size of the clip listing.
pub const DEFAULT_LIST_LIMIT: usize = 1000;
/// Largest page the listing will return.
pub const MAX_LIST_LIMIT: usize = 10_000;

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[validate(schema(function = "validate_bounds"))]
pub struct ProcessRequest {
    #[validate(length(min = 1, message = "src is required"))]
    pub src: String,
    #[serde(default)]
    pub dst: String,
    #[validate(range(min = 0.0, message = "start must not be negative"))]
    pub start: f64,
    pub end: f64,
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
}

fn validate_bounds(req: &ProcessRequest) -> Result<(), ValidationError> {
    if !req.start.is_finite() || !req.end.is_finite() || req.end <= req.start {
        let mut err = ValidationError::new("bounds");
        err.message = Some("end must be after start".into());
        return Err(err);
    }
    Ok(())
}

impl From<ProcessRequest> for JobPayload {
    fn from(req: ProcessRequest) -> Self {
        Self {
            src: req.src,
            dst: req.dst,
            start: req.start,
            end: req.end,
            user_id: req.user_id,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobAccepted {
    pub message_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClipListEntry {
    pub dst: String,
}

impl From<ClipRecord> for ClipListEntry {
    fn from(record: ClipRecord) -> Self {
        Self { dst: record.dst }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Maximum number of entries, newest first.
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: f64, end: f64) -> ProcessRequest {
        ProcessRequest {
            src: "movies/a.mp4".into(),
            dst: String::new(),
            start,
            end,
            user_id: "u1".into(),
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request(0.0, 5.0).validate().is_ok());
    }

    #[test]
    fn test_end_must_follow_start() {
        assert!(request(5.0, 5.0).validate().is_err());
        assert!(request(6.0, 5.0).validate().is_err());
    }

    #[test]
    fn test_negative_start_rejected() {
        assert!(request(-1.0, 5.0).validate().is_err());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut req = request(0.0, 5.0);
        req.user_id.clear();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_list_limit_is_clamped() {
        assert_eq!(ListQuery { limit: None }.limit(), DEFAULT_LIST_LIMIT);
        assert_eq!(ListQuery { limit: Some(5) }.limit(), 5);
        assert_eq!(ListQuery { limit: Some(usize::MAX) }.limit(), MAX_LIST_LIMIT);
    }

    #[test]
    fn test_missing_dst_defaults_to_empty() {
        let req: ProcessRequest =
            serde_json::from_str(r#"{"src":"a.mp4","start":1,"end":6,"user_id":"u"}"#).unwrap();
        assert!(req.dst.is_empty());
        assert_eq!(JobPayload::from(req).end, 6.0);
    }
}
