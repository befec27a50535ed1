//! Load-generating producer: posts randomized clip requests to the intake API.

use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::common::dispatcher::{BoundedDispatcher, DispatchError, DispatchReport, TaskError};
use crate::common::error::{ClipError, ClipResult};
use crate::modules::clips::model::JobPayload;

/// Clip length of every generated request, in seconds.
const CLIP_LENGTH: u32 = 5;
/// Generated start offsets fall in `[0, MAX_START)`.
const MAX_START: u32 = 30;

/// Read source keys, one per line. Blank lines are skipped.
pub async fn load_sources(path: &Path) -> ClipResult<Vec<String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ClipError::Fatal(format!("cannot read {}: {}", path.display(), e)))?;

    let sources: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if sources.is_empty() {
        return Err(ClipError::Fatal(format!("{} lists no sources", path.display())));
    }
    Ok(sources)
}

pub fn random_job(sources: &[String], rng: &mut impl Rng) -> JobPayload {
    let start = rng.random_range(0..MAX_START);
    let src = sources[rng.random_range(0..sources.len())].clone();
    JobPayload {
        src,
        dst: String::new(),
        start: f64::from(start),
        end: f64::from(start + CLIP_LENGTH),
        user_id: Uuid::new_v4().to_string(),
    }
}

pub struct ClipRequester {
    http: reqwest::Client,
    post_url: Arc<str>,
}

impl ClipRequester {
    pub fn new(http: reqwest::Client, post_url: &str) -> Self {
        Self {
            http,
            post_url: Arc::from(post_url),
        }
    }

    /// Post `count` random requests with at most `limit` in flight.
    pub async fn run(
        &self,
        sources: &[String],
        count: usize,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        if sources.is_empty() {
            return Err(DispatchError::Fatal {
                message: "no sources to request clips from".to_string(),
                report: DispatchReport::default(),
            });
        }

        let jobs: Vec<JobPayload> = {
            let mut rng = rand::rng();
            (0..count).map(|_| random_job(sources, &mut rng)).collect()
        };
        info!("Posting {} requests to {} with concurrency {}", count, self.post_url, limit);

        let http = self.http.clone();
        let post_url = self.post_url.clone();
        BoundedDispatcher::new(limit, cancel)
            .run(jobs, move |job, cancel| {
                let http = http.clone();
                let post_url = post_url.clone();
                async move { post_job(&http, &post_url, &job, &cancel).await }
            })
            .await
    }
}

async fn post_job(
    http: &reqwest::Client,
    post_url: &str,
    job: &JobPayload,
    cancel: &CancellationToken,
) -> Result<(), TaskError> {
    debug!(src = %job.src, start = job.start, user_id = %job.user_id, "Posting request");

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TaskError::failed("cancelled")),
        sent = http.post(post_url).json(job).send() => sent.map_err(|e| {
            error!("POST {} failed: {}", post_url, e);
            TaskError::failed(e.to_string())
        })?,
    };

    let status = response.status();
    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TaskError::failed("cancelled")),
        body = response.text() => match body {
            Ok(body) => body,
            Err(e) => {
                warn!(status = status.as_u16(), "Reading response from {} failed: {}", post_url, e);
                String::new()
            }
        },
    };
    if !status.is_success() {
        error!(status = status.as_u16(), "Request rejected: {}", body);
        return Err(TaskError::failed(format!("HTTP {}", status)));
    }
    debug!("Accepted: {}", body);
    Ok(())
}
