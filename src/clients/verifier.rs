use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::token::TokenCache;
use crate::common::bounded::pause;
use crate::common::dispatcher::{BoundedDispatcher, DispatchError, DispatchReport, TaskError};
use crate::common::error::{ClipError, ClipResult};

/// One entry of the artifact listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListedArtifact {
    pub dst: String,
}

pub async fn fetch_listing(
    http: &reqwest::Client,
    list_url: &str,
    cancel: &CancellationToken,
) -> ClipResult<Vec<ListedArtifact>> {
    let request = async {
        let response = http
            .get(list_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ClipError::transient(format!("GET {}: {}", list_url, e)))?;

        response
            .json::<Vec<ListedArtifact>>()
            .await
            .map_err(|e| ClipError::malformed(format!("listing from {}: {}", list_url, e)))
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClipError::Cancelled),
        listing = request => listing,
    }
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub batch: DispatchReport,
    pub bytes: u64,
}

/// Re-downloads delivered clips to confirm they are served.
#[derive(Clone)]
pub struct DeliveryVerifier {
    http: reqwest::Client,
    base_url: String,
    tokens: Option<Arc<TokenCache>>,
    pacing: Duration,
    bytes: Arc<AtomicU64>,
}

impl DeliveryVerifier {
    pub fn new(http: reqwest::Client, base_url: &str, tokens: Option<Arc<TokenCache>>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            pacing: Duration::ZERO,
            bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Delay before each request.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn artifact_url(&self, dst: &str) -> String {
        format!("{}/{}", self.base_url, dst.trim_start_matches('/'))
    }

    pub async fn verify_all(
        &self,
        artifacts: Vec<ListedArtifact>,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<VerifyReport, DispatchError> {
        let before = self.bytes.load(Ordering::Relaxed);
        info!("Verifying {} artifacts with concurrency {}", artifacts.len(), limit);

        let verifier = self.clone();
        let batch = BoundedDispatcher::new(limit, cancel)
            .run(artifacts, move |artifact, cancel| {
                let verifier = verifier.clone();
                async move { verifier.verify_one(&artifact.dst, &cancel).await.map(|_| ()) }
            })
            .await?;

        Ok(VerifyReport {
            batch,
            bytes: self.bytes.load(Ordering::Relaxed) - before,
        })
    }

    /// Download one artifact into a discard sink. Returns the body size.
    pub async fn verify_one(&self, dst: &str, cancel: &CancellationToken) -> Result<u64, TaskError> {
        let url = self.artifact_url(dst);
        if !pause(self.pacing, cancel).await {
            return Err(TaskError::failed(format!("{}: cancelled", url)));
        }

        let mut request = self.http.get(&url);
        if let Some(tokens) = &self.tokens {
            let token = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TaskError::failed(format!("{}: cancelled", url))),
                token = tokens.get_token() => token.map_err(|e| {
                    error!("Credential error for {}: {}", url, e);
                    TaskError::failed(format!("{}: {}", url, e))
                })?,
            };
            request = request.bearer_auth(token);
        }

        let mut response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TaskError::failed(format!("{}: cancelled", url))),
            sent = request.send() => sent.map_err(|e| {
                error!("GET {} failed: {}", url, e);
                TaskError::failed(format!("{}: {}", url, e))
            })?,
        };

        let status = response.status();
        let mut received = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TaskError::failed(format!("{}: cancelled", url))),
                chunk = response.chunk() => chunk,
            };
            match chunk {
                Ok(Some(bytes)) => {
                    received += bytes.len() as u64;
                    self.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Reading {} failed after {} bytes: {}", url, received, e);
                    return Err(TaskError::failed(format!("{}: {}", url, e)));
                }
            }
        }

        if status != StatusCode::OK {
            if status == StatusCode::UNAUTHORIZED {
                if let Some(tokens) = &self.tokens {
                    tokens.invalidate().await;
                }
            }
            error!(status = status.as_u16(), "Error fetching {}", url);
            return Err(TaskError::failed(format!("{}: HTTP {}", url, status)));
        }

        debug!("Fetched {} ({} bytes)", url, received);
        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::token::StaticTokenProvider;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_with_clips() -> MockServer {
        let server = MockServer::start().await;
        for name in ["a.mp4", "b.mp4"] {
            Mock::given(method("GET"))
                .and(path(format!("/user/{}", name)))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 1024]))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/user/missing.mp4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        server
    }

    fn artifacts(names: &[&str]) -> Vec<ListedArtifact> {
        names
            .iter()
            .map(|n| ListedArtifact { dst: n.to_string() })
            .collect()
    }

    #[tokio::test]
    async fn test_non_200_is_counted_but_not_fatal() {
        let server = server_with_clips().await;
        let verifier = DeliveryVerifier::new(
            reqwest::Client::new(),
            &format!("{}/user/", server.uri()),
            None,
        );
        let cancel = CancellationToken::new();

        let report = verifier
            .verify_all(artifacts(&["a.mp4", "missing.mp4", "b.mp4"]), 2, &cancel)
            .await
            .unwrap();

        assert_eq!(report.batch.admitted, 3);
        assert_eq!(report.batch.succeeded, 2);
        assert_eq!(report.batch.failed, 1);
        assert_eq!(report.bytes, 2048);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_bearer_token_is_attached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clip.mp4"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(2)
            .mount(&server)
            .await;

        let tokens = Arc::new(TokenCache::new(Arc::new(StaticTokenProvider::new(
            "secret-token",
        ))));
        let verifier = DeliveryVerifier::new(reqwest::Client::new(), &server.uri(), Some(tokens));
        let cancel = CancellationToken::new();

        let report = verifier
            .verify_all(artifacts(&["clip.mp4", "/clip.mp4"]), 1, &cancel)
            .await
            .unwrap();
        assert_eq!(report.batch.succeeded, 2);
        assert_eq!(report.bytes, 4);
    }

    #[tokio::test]
    async fn test_fetch_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"dst": "m1.mp4"},
                {"dst": "m2.mp4"}
            ])))
            .mount(&server)
            .await;

        let listing = fetch_listing(
            &reqwest::Client::new(),
            &format!("{}/list", server.uri()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        let names: Vec<_> = listing.into_iter().map(|a| a.dst).collect();
        assert_eq!(names, vec!["m1.mp4", "m2.mp4"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let verifier = DeliveryVerifier::new(reqwest::Client::new(), "http://127.0.0.1:9", None)
            .with_pacing(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(verifier.verify_one("x.mp4", &cancel).await.is_err());
    }

    struct StalledProvider;

    #[async_trait::async_trait]
    impl crate::clients::token::TokenProvider for StalledProvider {
        async fn fetch_token(&self) -> ClipResult<crate::clients::token::AccessToken> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ClipError::transient("unreachable"))
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_token_fetch() {
        let tokens = Arc::new(TokenCache::new(Arc::new(StalledProvider)));
        let verifier =
            DeliveryVerifier::new(reqwest::Client::new(), "http://127.0.0.1:9", Some(tokens));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome =
            tokio::time::timeout(Duration::from_secs(2), verifier.verify_one("x.mp4", &cancel))
                .await
                .expect("verify_one kept waiting on the token after cancellation");
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([]))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(2),
            fetch_listing(&reqwest::Client::new(), &format!("{}/list", server.uri()), &cancel),
        )
        .await
        .expect("listing ignored cancellation")
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_artifact_url_joins_cleanly() {
        let verifier = DeliveryVerifier::new(reqwest::Client::new(), "https://cdn.example.com/", None);
        assert_eq!(verifier.artifact_url("/m1.mp4"), "https://cdn.example.com/m1.mp4");
        assert_eq!(verifier.artifact_url("m1.mp4"), "https://cdn.example.com/m1.mp4");
    }
}
