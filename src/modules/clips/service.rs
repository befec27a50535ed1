use anyhow::Result;
use tracing::info;

use super::dto::{ClipListEntry, JobAccepted, ProcessRequest};
use super::model::{ClipRecord, JobPayload};
use crate::state::AppState;

pub struct ClipService;

impl ClipService {
    /// Publish a validated request to the job queue.
    pub async fn submit(state: AppState, req: ProcessRequest) -> Result<JobAccepted> {
        let payload = serde_json::to_vec(&JobPayload::from(req))?;
        let message_id = state
            .queue
            .publish(&state.config.queue.subscription, &payload)
            .await?;

        info!(message_id = %message_id, "Accepted clip request");
        Ok(JobAccepted { message_id })
    }

    pub async fn latest_for_user(state: AppState, user_id: &str) -> Result<Option<ClipRecord>> {
        let record = state
            .clips
            .latest_for_user(&state.config.register.collection, user_id)
            .await?;
        Ok(record)
    }

    pub async fn list(state: AppState, limit: usize) -> Result<Vec<ClipListEntry>> {
        let records = state
            .clips
            .list(&state.config.register.collection, limit)
            .await?;
        Ok(records.into_iter().map(ClipListEntry::from).collect())
    }

    pub fn public_url(state: &AppState, record: &ClipRecord) -> String {
        format!("https://{}/{}", state.config.base_host, record.dst)
    }
}
