use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;
use time::OffsetDateTime;
use tracing::debug;

use super::model::ClipRecord;
use crate::common::bounded::bounded;
use crate::common::error::ClipResult;
use crate::infrastructure::redis::client::RedisService;

/// Keyed document store for completed jobs.
#[async_trait]
pub trait MetadataRegister: Send + Sync {
    /// Insert or replace the record stored under `key` in `collection`.
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        record: &ClipRecord,
        cancel: &CancellationToken,
    ) -> ClipResult<()>;
}

fn record_key(namespace: &str, collection: &str, key: &str) -> String {
    format!("{}:{}:clip:{}", namespace, collection, key)
}

fn user_key(namespace: &str, collection: &str, user_id: &str) -> String {
    format!("{}:{}:user:{}", namespace, collection, user_id)
}

fn index_key(namespace: &str, collection: &str) -> String {
    format!("{}:{}:index", namespace, collection)
}

/// Sorted-set score: completion time in microseconds, exact as a Redis double.
fn completion_score(completed_at: OffsetDateTime) -> i64 {
    (completed_at.unix_timestamp_nanos() / 1_000) as i64
}

/// Read side used by the intake API.
#[async_trait]
pub trait ClipLookup: Send + Sync {
    /// Most recently completed clip for `user_id`.
    async fn latest_for_user(&self, collection: &str, user_id: &str) -> ClipResult<Option<ClipRecord>>;

    /// Up to `limit` records, newest first.
    async fn list(&self, collection: &str, limit: usize) -> ClipResult<Vec<ClipRecord>>;
}

/// Redis-backed register.
///
/// Layout under `{namespace}:{collection}`:
/// - `:clip:{message_id}` holds the record JSON
/// - `:user:{user_id}` is a sorted set of that user's message ids by completion time
/// - `:index` is a sorted set of every message id by completion time
#[derive(Clone)]
pub struct ClipRepository {
    redis: RedisService,
    namespace: String,
    timeout: Duration,
}

impl ClipRepository {
    pub fn new(redis: RedisService, namespace: &str, timeout: Duration) -> Self {
        Self {
            redis,
            namespace: namespace.to_string(),
            timeout,
        }
    }

    fn record_key(&self, collection: &str, key: &str) -> String {
        record_key(&self.namespace, collection, key)
    }

    fn user_key(&self, collection: &str, user_id: &str) -> String {
        user_key(&self.namespace, collection, user_id)
    }

    fn index_key(&self, collection: &str) -> String {
        index_key(&self.namespace, collection)
    }

    async fn upsert_unbounded(&self, collection: &str, key: &str, record: &ClipRecord) -> ClipResult<()> {
        let mut conn = self.redis.conn();
        let json = serde_json::to_string(record)?;
        let score = completion_score(record.completed_at);

        let _: () = redis::pipe()
            .atomic()
            .set(self.record_key(collection, key), json)
            .ignore()
            .zadd(self.user_key(collection, &record.user_id), key, score)
            .ignore()
            .zadd(self.index_key(collection), key, score)
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %key, "Registered clip in '{}'", collection);
        Ok(())
    }

    pub async fn get(&self, collection: &str, key: &str) -> ClipResult<Option<ClipRecord>> {
        let mut conn = self.redis.conn();
        let raw: Option<String> = conn.get(self.record_key(collection, key)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }
}

#[async_trait]
impl MetadataRegister for ClipRepository {
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        record: &ClipRecord,
        cancel: &CancellationToken,
    ) -> ClipResult<()> {
        bounded(self.timeout, cancel, self.upsert_unbounded(collection, key, record)).await
    }
}

#[async_trait]
impl ClipLookup for ClipRepository {
    async fn latest_for_user(&self, collection: &str, user_id: &str) -> ClipResult<Option<ClipRecord>> {
        let mut conn = self.redis.conn();
        let ids: Vec<String> = conn.zrevrange(self.user_key(collection, user_id), 0, 0).await?;
        match ids.first() {
            Some(id) => self.get(collection, id).await,
            None => Ok(None),
        }
    }

    async fn list(&self, collection: &str, limit: usize) -> ClipResult<Vec<ClipRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.conn();
        let ids: Vec<String> = conn
            .zrevrange(self.index_key(collection), 0, last_rank(limit))
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.record_key(collection, id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        raw.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(Into::into))
            .collect()
    }
}

fn last_rank(limit: usize) -> isize {
    isize::try_from(limit).unwrap_or(isize::MAX) - 1
}
