//! Clip worker: turns one queue delivery into one clip and one disposition.
//!
//! Each delivery walks `Received → Decoded → Downloaded → Trimmed → Uploaded →
//! Registered` and ends `Acked` or `Nacked`. The first failing stage decides the
//! disposition through [`disposition_for`]; nothing past this module sees the error.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::common::error::{ClipError, ClipResult, ErrorKind};
use crate::infrastructure::queue::{Disposition, MessageHandler, QueueMessage};
use crate::infrastructure::storage::ObjectStore;
use crate::media::trim::Trimmer;
use crate::modules::clips::model::{ClipJob, ClipRecord};
use crate::modules::clips::repository::MetadataRegister;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Decoded,
    Downloaded,
    Trimmed,
    Uploaded,
    Registered,
    Acked,
    Nacked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Download,
    Trim,
    Upload,
    Register,
}

impl Stage {
    fn reached(self) -> JobState {
        match self {
            Stage::Decode => JobState::Decoded,
            Stage::Download => JobState::Downloaded,
            Stage::Trim => JobState::Trimmed,
            Stage::Upload => JobState::Uploaded,
            Stage::Register => JobState::Registered,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Decode => "decode",
            Stage::Download => "download",
            Stage::Trim => "trim",
            Stage::Upload => "upload",
            Stage::Register => "register",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct StageFailure {
    stage: Stage,
    error: ClipError,
}

fn at(stage: Stage) -> impl FnOnce(ClipError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Disposition for a failure at `stage`.
///
/// Cancellation always returns the message to the queue. Trim failures are
/// dropped unless the tool itself could not run.
pub fn disposition_for(stage: Stage, error: &ClipError) -> Disposition {
    if error.is_cancelled() {
        return Disposition::Nack;
    }
    match stage {
        Stage::Decode => Disposition::Ack,
        Stage::Download | Stage::Upload | Stage::Register => Disposition::Nack,
        Stage::Trim if error.kind().is_retryable() => Disposition::Nack,
        Stage::Trim => Disposition::Ack,
    }
}

/// Per-attempt scratch directory, removed when dropped.
struct Scratch {
    root: PathBuf,
    dir: Option<TempDir>,
}

impl Scratch {
    fn create(work_dir: &Path, job_id: &str) -> ClipResult<Self> {
        let prefix: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .chain(std::iter::once('-'))
            .collect();
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(work_dir)?;
        Ok(Self {
            root: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("cleanup {}", path.display()),
                Err(e) => warn!("Failed to remove scratch dir {}: {}", path.display(), e),
            }
        }
    }
}

fn source_file_name(source_key: &str) -> String {
    match Path::new(source_key).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("source.{}", ext),
        None => "source".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ClipWorkerSettings {
    /// Parent directory for per-attempt scratch space.
    pub work_dir: PathBuf,
    /// Register collection receiving one record per job.
    pub collection: String,
    /// Provenance written into every record.
    pub process_host: String,
}

pub struct ClipWorker {
    store: Arc<dyn ObjectStore>,
    register: Arc<dyn MetadataRegister>,
    trimmer: Arc<dyn Trimmer>,
    settings: ClipWorkerSettings,
}

impl ClipWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        register: Arc<dyn MetadataRegister>,
        trimmer: Arc<dyn Trimmer>,
        settings: ClipWorkerSettings,
    ) -> Self {
        Self {
            store,
            register,
            trimmer,
            settings,
        }
    }

    /// Run one delivery through the pipeline and decide its disposition.
    pub async fn process(&self, message: &QueueMessage, cancel: &CancellationToken) -> Disposition {
        let span = info_span!("clip_job", job_id = %message.id);
        async move {
            info!(redelivered = message.redelivered, "Start processing");

            let disposition = match self.run(message, cancel).await {
                Ok(record) => {
                    info!(dst = %record.dst, "Entry has been registered");
                    Disposition::Ack
                }
                Err(StageFailure { stage, error }) => {
                    let disposition = disposition_for(stage, &error);
                    match disposition {
                        Disposition::Ack => error!(
                            stage = %stage,
                            kind = ?error.kind(),
                            "Dropping job: {}",
                            error
                        ),
                        Disposition::Nack => warn!(
                            stage = %stage,
                            kind = ?error.kind(),
                            "Returning job for redelivery: {}",
                            error
                        ),
                    }
                    disposition
                }
            };

            let terminal = match disposition {
                Disposition::Ack => JobState::Acked,
                Disposition::Nack => JobState::Nacked,
            };
            debug!(state = ?terminal, "Job finished");
            disposition
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        message: &QueueMessage,
        cancel: &CancellationToken,
    ) -> Result<ClipRecord, StageFailure> {
        debug!(state = ?JobState::Received, "State");

        let job = ClipJob::decode(&message.id, &message.payload, &self.settings.process_host)
            .map_err(at(Stage::Decode))?;
        self.reached(Stage::Decode);
        debug!(?job, "Decoded job");

        // Dropped on every return below, which removes both local files.
        let scratch =
            Scratch::create(&self.settings.work_dir, &message.id).map_err(at(Stage::Download))?;
        let source = scratch.path(&source_file_name(&job.source_key));
        let clip = scratch.path("clip.mp4");

        self.store
            .fetch(&job.source_key, &source, cancel)
            .await
            .map_err(at(Stage::Download))?;
        self.reached(Stage::Download);

        self.trimmer
            .trim(&source, job.start, job.end, &clip, cancel)
            .await
            .map_err(at(Stage::Trim))?;
        self.reached(Stage::Trim);

        match self.store.put_if_absent(&job.dest_key, &clip, cancel).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::ResourceConflict => {
                info!(dst = %job.dest_key, "Clip already delivered by an earlier attempt");
            }
            Err(e) => return Err(at(Stage::Upload)(e)),
        }
        self.reached(Stage::Upload);

        let record = ClipRecord::from_job(&message.id, &job);
        self.register
            .upsert(&self.settings.collection, &message.id, &record, cancel)
            .await
            .map_err(at(Stage::Register))?;
        self.reached(Stage::Register);

        Ok(record)
    }

    fn reached(&self, stage: Stage) {
        debug!(state = ?stage.reached(), "State");
    }
}

#[async_trait]
impl MessageHandler for ClipWorker {
    async fn handle(&self, message: QueueMessage, cancel: CancellationToken) -> Disposition {
        self.process(&message, &cancel).await
    }
}
