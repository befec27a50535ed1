use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use clipcut::app;
use clipcut::clients::requester::{self, ClipRequester};
use clipcut::clients::token::{GcpTokenProvider, StaticTokenProvider, TokenCache, TokenProvider};
use clipcut::clients::verifier::{self, DeliveryVerifier};
use clipcut::common::host::resolve_process_host;
use clipcut::config::settings::{AppConfig, WorkerConfig};
use clipcut::infrastructure::queue::rabbitmq::RabbitMqService;
use clipcut::infrastructure::redis::client::RedisService;
use clipcut::infrastructure::storage::s3::StorageService;
use clipcut::media::trim::FfmpegTrimmer;
use clipcut::modules::clips::repository::ClipRepository;
use clipcut::state::AppState;
use clipcut::workers::clipper::{ClipWorker, ClipWorkerSettings};

#[derive(Parser)]
#[command(name = "clipcut", version, about = "Clip cutting worker and companion tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume clip jobs from the queue
    Worker,
    /// Serve the job intake API
    Serve,
    /// Post randomized clip requests
    Request {
        #[arg(long = "posturl")]
        post_url: String,
        #[arg(long = "listfile", default_value = "movies.txt")]
        list_file: PathBuf,
        #[arg(long = "procnum", default_value_t = 10)]
        procnum: usize,
        #[arg(long = "requestnum", default_value_t = 100)]
        requestnum: usize,
    },
    /// Re-download every listed clip
    Verify {
        #[arg(long = "list-url")]
        list_url: String,
        #[arg(long = "movie-url")]
        movie_url: String,
        #[arg(long = "procnum", default_value_t = 10)]
        procnum: usize,
        /// Send a bearer token with each request
        #[arg(long)]
        auth: bool,
        #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
        #[arg(long = "pacing-ms", default_value_t = 1000)]
        pacing_ms: u64,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clipcut=info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cancel = shutdown_token();

    let result = match cli.command {
        Command::Worker => run_worker(&cancel).await,
        Command::Serve => run_server(&cancel).await,
        Command::Request {
            post_url,
            list_file,
            procnum,
            requestnum,
        } => run_requests(&post_url, &list_file, procnum, requestnum, &cancel).await,
        Command::Verify {
            list_url,
            movie_url,
            procnum,
            auth,
            access_token,
            pacing_ms,
        } => {
            run_verify(
                &list_url,
                &movie_url,
                procnum,
                auth,
                access_token,
                Duration::from_millis(pacing_ms),
                &cancel,
            )
            .await
        }
    };

    if let Err(e) = result {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_worker(cancel: &CancellationToken) -> Result<()> {
    let config = WorkerConfig::new()?;
    info!("Starting clip worker on '{}'", config.queue.subscription);

    let queue = RabbitMqService::new(&config.queue.url).await?;
    let storage = StorageService::new(&config.storage);
    let redis = RedisService::new(&config.register.redis_url, config.register.timeout)
        .await
        .context("connecting to Redis")?;
    let register = ClipRepository::new(redis, &config.register.namespace, config.register.timeout);
    let process_host = resolve_process_host(config.process_host.as_deref()).await;

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("creating {}", config.work_dir.display()))?;

    let worker = ClipWorker::new(
        Arc::new(storage),
        Arc::new(register),
        Arc::new(FfmpegTrimmer::new(config.ffmpeg_bin.clone())),
        ClipWorkerSettings {
            work_dir: config.work_dir.clone(),
            collection: config.register.collection.clone(),
            process_host,
        },
    );

    queue
        .subscribe(
            &config.queue.subscription,
            &config.queue.receive_settings(),
            Arc::new(worker),
            cancel,
        )
        .await?;

    info!("Worker stopped");
    Ok(())
}

async fn run_server(cancel: &CancellationToken) -> Result<()> {
    let config = AppConfig::new()?;
    let queue = RabbitMqService::new(&config.queue.url).await?;
    let redis = RedisService::new(&config.register.redis_url, config.register.timeout)
        .await
        .context("connecting to Redis")?;
    let clips = ClipRepository::new(redis, &config.register.namespace, config.register.timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let app = app::create_app(AppState::new(config, Arc::new(queue), Arc::new(clips))).await;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;
    Ok(())
}

async fn run_requests(
    post_url: &str,
    list_file: &Path,
    procnum: usize,
    requestnum: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    let sources = requester::load_sources(list_file).await?;
    let report = ClipRequester::new(reqwest::Client::new(), post_url)
        .run(&sources, requestnum, procnum, cancel)
        .await?;

    info!(
        admitted = report.admitted,
        succeeded = report.succeeded,
        failed = report.failed,
        cancelled = report.cancelled,
        "Requests finished"
    );
    Ok(())
}

async fn run_verify(
    list_url: &str,
    movie_url: &str,
    procnum: usize,
    auth: bool,
    access_token: Option<String>,
    pacing: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let tokens = if auth {
        let provider: Arc<dyn TokenProvider> = match access_token {
            Some(token) => Arc::new(StaticTokenProvider::new(token)),
            None => Arc::new(GcpTokenProvider::discover().await?),
        };
        Some(Arc::new(TokenCache::new(provider)))
    } else {
        None
    };

    let http = reqwest::Client::new();
    let listing = verifier::fetch_listing(&http, list_url, cancel).await?;
    info!("Listed {} clips", listing.len());

    let report = DeliveryVerifier::new(http, movie_url, tokens)
        .with_pacing(pacing)
        .verify_all(listing, procnum, cancel)
        .await?;

    info!(
        bytes = report.bytes,
        succeeded = report.batch.succeeded,
        failed = report.batch.failed,
        cancelled = report.batch.cancelled,
        "Verification finished"
    );
    Ok(())
}
