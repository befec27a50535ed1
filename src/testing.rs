//! In-memory collaborators for exercising the clip pipeline without a broker,
//! bucket or Redis.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::error::{ClipError, ClipResult};
use crate::infrastructure::queue::{JobPublisher, QueueError, QueueResult};
use crate::infrastructure::storage::ObjectStore;
use crate::media::trim::Trimmer;
use crate::modules::clips::model::ClipRecord;
use crate::modules::clips::repository::{ClipLookup, MetadataRegister};

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fetch_failures: AtomicUsize,
    put_failures: AtomicUsize,
    fetches: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn with_object(key: &str, bytes: &[u8]) -> Self {
        let store = Self::default();
        store.insert(key, bytes);
        store
    }

    pub fn insert(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }

    pub fn fail_next_fetches(&self, n: usize) {
        self.fetch_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_puts(&self, n: usize) {
        self.put_failures.store(n, Ordering::SeqCst);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch(&self, key: &str, dest: &Path, cancel: &CancellationToken) -> ClipResult<u64> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ClipError::Cancelled);
        }
        if take_one(&self.fetch_failures) {
            return Err(ClipError::transient(format!("injected fetch failure for {}", key)));
        }
        let bytes = self.object(key).ok_or_else(|| ClipError::not_found(key))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn put_if_absent(
        &self,
        key: &str,
        src: &Path,
        cancel: &CancellationToken,
    ) -> ClipResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ClipError::Cancelled);
        }
        if take_one(&self.put_failures) {
            return Err(ClipError::transient(format!("injected put failure for {}", key)));
        }
        let bytes = tokio::fs::read(src).await?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(key) {
            return Err(ClipError::already_exists(key));
        }
        objects.insert(key.to_string(), bytes);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRegister {
    records: Mutex<HashMap<String, ClipRecord>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryRegister {
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn record(&self, collection: &str, key: &str) -> Option<ClipRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&format!("{}/{}", collection, key))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn insert(&self, collection: &str, record: ClipRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(format!("{}/{}", collection, record.message_id), record);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataRegister for MemoryRegister {
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        record: &ClipRecord,
        cancel: &CancellationToken,
    ) -> ClipResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ClipError::Cancelled);
        }
        if take_one(&self.failures) {
            return Err(ClipError::transient("injected register failure"));
        }
        self.records
            .lock()
            .unwrap()
            .insert(format!("{}/{}", collection, key), record.clone());
        Ok(())
    }
}

#[async_trait]
impl ClipLookup for MemoryRegister {
    async fn latest_for_user(&self, collection: &str, user_id: &str) -> ClipResult<Option<ClipRecord>> {
        let prefix = format!("{}/", collection);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, r)| key.starts_with(&prefix) && r.user_id == user_id)
            .map(|(_, r)| r.clone())
            .max_by_key(|r| r.completed_at))
    }

    async fn list(&self, collection: &str, limit: usize) -> ClipResult<Vec<ClipRecord>> {
        let prefix = format!("{}/", collection);
        let mut records: Vec<ClipRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, r)| r.clone())
            .collect();
        records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        records.truncate(limit);
        Ok(records)
    }
}

/// Captures published payloads; optionally refuses them.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
    refuse: AtomicBool,
}

impl RecordingPublisher {
    pub fn refusing() -> Self {
        let publisher = Self::default();
        publisher.refuse.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobPublisher for RecordingPublisher {
    async fn publish(&self, queue: &str, payload: &[u8]) -> QueueResult<String> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(QueueError::PublishFailed("broker unavailable".to_string()));
        }
        let mut published = self.published.lock().unwrap();
        published.push((queue.to_string(), payload.to_vec()));
        Ok(format!("msg-{}", published.len()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimBehavior {
    Copy,
    Reject,
    Unavailable,
}

/// Writes `clip[start..end]:` followed by the source bytes.
pub struct FakeTrimmer {
    behavior: Mutex<TrimBehavior>,
    calls: AtomicUsize,
}

impl FakeTrimmer {
    pub fn new(behavior: TrimBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: TrimBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trimmer for FakeTrimmer {
    async fn trim(
        &self,
        src: &Path,
        start: f64,
        end: f64,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> ClipResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(ClipError::Cancelled);
        }
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            TrimBehavior::Reject => Err(ClipError::TrimRejected("invalid data found".into())),
            TrimBehavior::Unavailable => Err(ClipError::TrimUnavailable("no such binary".into())),
            TrimBehavior::Copy => {
                let mut out = format!("clip[{}..{}]:", start, end).into_bytes();
                out.extend(tokio::fs::read(src).await?);
                tokio::fs::write(dst, out).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::error::ErrorKind;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_conditional_puts() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mp4");
        let b = dir.path().join("b.mp4");
        tokio::fs::write(&a, b"first").await.unwrap();
        tokio::fs::write(&b, b"second").await.unwrap();

        let store = MemoryStore::default();
        let cancel = CancellationToken::new();
        let (ra, rb) = tokio::join!(
            store.put_if_absent("m1.mp4", &a, &cancel),
            store.put_if_absent("m1.mp4", &b, &cancel),
        );

        let outcomes = [ra, rb];
        let created = outcomes.iter().filter(|r| r.is_ok()).count();
        let conflicts: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().err()).collect();
        assert_eq!(created, 1);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind(), ErrorKind::ResourceConflict);
        assert_ne!(conflicts[0].kind(), ErrorKind::Fatal);
        assert_eq!(store.object_count(), 1);
    }
}
