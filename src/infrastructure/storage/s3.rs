use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ObjectStore;
use crate::common::bounded::bounded;
use crate::common::error::{ClipError, ClipResult};
use crate::config::settings::StorageConfig;

const PRECONDITION_FAILED: u16 = 412;

#[derive(Clone)]
pub struct StorageService {
    client: Client,
    bucket: String,
    timeout: Duration,
}

impl StorageService {
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "static",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint {
            // Path-style addressing for MinIO and other S3-compatible endpoints.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        info!("Object store ready (bucket '{}')", config.bucket);

        Self {
            client,
            bucket: config.bucket.clone(),
            timeout: config.timeout,
        }
    }

    async fn fetch_unbounded(&self, key: &str, dest: &Path) -> ClipResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_no_such_key() => ClipError::not_found(key),
                _ => ClipError::transient(format!(
                    "get_object {}: {}",
                    key,
                    DisplayErrorContext(&e)
                )),
            })?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.body.into_async_read();
        let written = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(|e| ClipError::transient(format!("read {}: {}", key, e)))?;
        file.sync_all().await?;

        Ok(written)
    }

    async fn put_if_absent_unbounded(&self, key: &str, src: &Path) -> ClipResult<()> {
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| ClipError::transient(format!("open {}: {}", src.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type("video/mp4")
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| {
                let status = e.raw_response().map(|r| r.status().as_u16());
                if status == Some(PRECONDITION_FAILED) {
                    ClipError::already_exists(key)
                } else {
                    ClipError::transient(format!("put_object {}: {}", key, DisplayErrorContext(&e)))
                }
            })?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for StorageService {
    async fn fetch(&self, key: &str, dest: &Path, cancel: &CancellationToken) -> ClipResult<u64> {
        debug!("Downloading s3://{}/{} to {}", self.bucket, key, dest.display());
        let bytes = bounded(self.timeout, cancel, self.fetch_unbounded(key, dest)).await?;
        debug!("Downloaded {} bytes from {}", bytes, key);
        Ok(bytes)
    }

    async fn put_if_absent(
        &self,
        key: &str,
        src: &Path,
        cancel: &CancellationToken,
    ) -> ClipResult<()> {
        debug!("Uploading {} to s3://{}/{}", src.display(), self.bucket, key);
        bounded(self.timeout, cancel, self.put_if_absent_unbounded(key, src)).await?;
        info!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }
}
