pub mod s3;

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::error::ClipResult;

/// Bucket storage for source and derived media. The bucket is fixed per instance.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy `key` into `dest`, returning the number of bytes written.
    ///
    /// Fails with `NotFound`, `TransientIo`, `Timeout` or `Cancelled`.
    async fn fetch(&self, key: &str, dest: &Path, cancel: &CancellationToken) -> ClipResult<u64>;

    /// Store `src` under `key` only if nothing is there yet.
    ///
    /// An existing object yields `AlreadyExists`, which callers treat as delivered.
    async fn put_if_absent(
        &self,
        key: &str,
        src: &Path,
        cancel: &CancellationToken,
    ) -> ClipResult<()>;
}
