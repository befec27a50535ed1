use std::path::PathBuf;
use std::time::Duration;

use crate::config::env::{self, ConfigError, EnvKey};
use crate::infrastructure::queue::ReceiveSettings;

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub url: String,
    pub subscription: String,
    pub concurrency: usize,
    pub max_outstanding: u16,
    pub synchronous: bool,
}

impl QueueConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env::get(EnvKey::RabbitMqUrl)?,
            subscription: env::get_or(EnvKey::Subscription, "clip_jobs"),
            concurrency: env::get_parsed(EnvKey::QueueConcurrency, 2),
            max_outstanding: env::get_parsed(EnvKey::QueueMaxOutstanding, 1),
            synchronous: env::get_flag(EnvKey::QueueSynchronous, false),
        })
    }

    pub fn receive_settings(&self) -> ReceiveSettings {
        ReceiveSettings {
            concurrency: self.concurrency,
            max_outstanding: self.max_outstanding,
            synchronous: self.synchronous,
            ..ReceiveSettings::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub timeout: Duration,
}

impl StorageConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: env::get_opt(EnvKey::S3Endpoint),
            region: env::get_or(EnvKey::S3Region, "us-east-1"),
            access_key: env::get(EnvKey::S3AccessKey)?,
            secret_key: env::get(EnvKey::S3SecretKey)?,
            bucket: env::get(EnvKey::Bucket)?,
            timeout: Duration::from_secs(env::get_parsed(EnvKey::StorageTimeoutSecs, 50)),
        })
    }
}

#[derive(Clone, Debug)]
pub struct RegisterConfig {
    pub redis_url: String,
    pub namespace: String,
    pub collection: String,
    pub timeout: Duration,
}

impl RegisterConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            redis_url: env::get(EnvKey::RedisUrl)?,
            namespace: env::get_or(EnvKey::ProjectId, "clipcut"),
            collection: env::get_or(EnvKey::Collection, "data"),
            timeout: Duration::from_secs(env::get_parsed(EnvKey::RegisterTimeoutSecs, 10)),
        })
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub register: RegisterConfig,
    pub work_dir: PathBuf,
    pub process_host: Option<String>,
    pub ffmpeg_bin: String,
}

impl WorkerConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            queue: QueueConfig::new()?,
            storage: StorageConfig::new()?,
            register: RegisterConfig::new()?,
            work_dir: env::get_opt(EnvKey::WorkDir)
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            process_host: env::get_opt(EnvKey::ProcessHost),
            ffmpeg_bin: env::get_or(EnvKey::FfmpegBin, "ffmpeg"),
        })
    }
}

/// Settings for the job intake API.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub base_host: String,
    pub queue: QueueConfig,
    pub register: RegisterConfig,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            base_host: env::get_or(EnvKey::BaseHost, "example.com"),
            queue: QueueConfig::new()?,
            register: RegisterConfig::new()?,
        })
    }
}
