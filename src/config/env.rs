use std::env;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    Missing(&'static str),
}

pub enum EnvKey {
    ServerPort,
    RabbitMqUrl,
    Subscription,
    QueueConcurrency,
    QueueMaxOutstanding,
    QueueSynchronous,
    S3Endpoint,
    S3Region,
    S3AccessKey,
    S3SecretKey,
    Bucket,
    StorageTimeoutSecs,
    RedisUrl,
    ProjectId,
    Collection,
    RegisterTimeoutSecs,
    WorkDir,
    ProcessHost,
    FfmpegBin,
    BaseHost,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::Subscription => "SUBSCRIPTION",
            EnvKey::QueueConcurrency => "QUEUE_CONCURRENCY",
            EnvKey::QueueMaxOutstanding => "QUEUE_MAX_OUTSTANDING",
            EnvKey::QueueSynchronous => "QUEUE_SYNCHRONOUS",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::S3Region => "S3_REGION",
            EnvKey::S3AccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::S3SecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::Bucket => "BUCKET",
            EnvKey::StorageTimeoutSecs => "STORAGE_TIMEOUT_SECS",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::ProjectId => "PROJECT_ID",
            EnvKey::Collection => "COLLECTION",
            EnvKey::RegisterTimeoutSecs => "REGISTER_TIMEOUT_SECS",
            EnvKey::WorkDir => "WORK_DIR",
            EnvKey::ProcessHost => "PROCESS_HOST",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::BaseHost => "BASE_HOST",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, ConfigError> {
    let name = key.as_str();
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    get_opt(key).unwrap_or_else(|| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get_opt(key) {
        Some(val) => val.parse::<T>().unwrap_or(default),
        None => default,
    }
}

pub fn get_flag(key: EnvKey, default: bool) -> bool {
    get_opt(key).map(|v| parse_flag(&v, default)).unwrap_or(default)
}

fn parse_flag(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
