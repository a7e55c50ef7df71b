use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sukudo_enhancer::config::{self, AppConfig, FileConfig, Role};
use sukudo_enhancer::enhance::{
    DemucsSeparator, DisabledSeparator, EnhancePipeline, FfmpegTranscoder, StemSeparator,
};
use sukudo_enhancer::jobs::{EnhanceWorker, SqliteJobStore, WorkerConfig};
use sukudo_enhancer::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use sukudo_enhancer::storage::{LocalObjectStorage, UrlSigner};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding jobs.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Root of the local object storage. Defaults to <db_dir>/storage.
    #[clap(long, value_parser = parse_path)]
    pub storage_dir: Option<PathBuf>,

    /// Parent directory for per-job scratch space.
    #[clap(long, value_parser = parse_path)]
    pub scratch_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3100)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9100)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Run the HTTP API, the workers, or both.
    #[clap(long, value_enum, default_value = "all")]
    pub role: Role,

    /// Number of independent worker loops in this process.
    #[clap(long, default_value_t = 1)]
    pub workers: usize,

    /// Milliseconds between claim attempts of each worker.
    #[clap(long, default_value_t = 2000)]
    pub poll_interval_ms: u64,

    /// Seconds without progress after which a running job is reported as stale.
    #[clap(long, default_value_t = 3600)]
    pub stale_after_secs: u64,

    /// Base URL clients use to reach this server, used in signed asset URLs.
    #[clap(long)]
    pub public_base_url: Option<String>,

    /// Secret for signing asset URLs.
    #[clap(long, env = "ENHANCER_SIGNING_SECRET", hide_env_values = true)]
    pub signing_secret: Option<String>,

    /// Lifetime of signed asset URLs in seconds.
    #[clap(long, default_value_t = 3600)]
    pub asset_url_ttl_secs: u64,

    /// ffmpeg binary.
    #[clap(long)]
    pub ffmpeg_path: Option<PathBuf>,

    /// ffprobe binary.
    #[clap(long)]
    pub ffprobe_path: Option<PathBuf>,

    /// Never attempt source separation; Max quality runs single pass.
    #[clap(long)]
    pub no_separator: bool,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            storage_dir: args.storage_dir.clone(),
            scratch_dir: args.scratch_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            role: args.role,
            workers: args.workers,
            poll_interval_ms: args.poll_interval_ms,
            stale_after_secs: args.stale_after_secs,
            public_base_url: args.public_base_url.clone(),
            signing_secret: args.signing_secret.clone(),
            asset_url_ttl_secs: args.asset_url_ttl_secs,
            ffmpeg_path: args.ffmpeg_path.clone(),
            ffprobe_path: args.ffprobe_path.clone(),
            no_separator: args.no_separator,
        }
    }
}

fn make_separator(app_config: &AppConfig) -> Arc<dyn StemSeparator> {
    let settings = &app_config.separator;
    if !settings.enabled {
        info!("Source separation disabled, Max quality will run single pass");
        return Arc::new(DisabledSeparator);
    }
    info!(
        "Source separation candidates: {:?} (model {})",
        settings.commands, settings.model
    );
    Arc::new(DemucsSeparator::from_command_lines(
        &settings.commands,
        settings.model.clone(),
        settings.jobs,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&config::CliConfig::from(&cli_args), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening jobs database at {:?}", app_config.jobs_db_path());
    let job_store = Arc::new(SqliteJobStore::new(app_config.jobs_db_path())?);

    let url_signer = UrlSigner::new(app_config.signing_secret.as_bytes());
    let storage = Arc::new(
        LocalObjectStorage::new(
            &app_config.storage_dir,
            &app_config.public_base_url,
            url_signer.clone(),
        )
        .with_context(|| format!("Failed to open storage at {:?}", app_config.storage_dir))?,
    );

    let shutdown_token = CancellationToken::new();
    let mut worker_handles = Vec::new();

    if app_config.role.runs_workers() {
        let transcoder = Arc::new(FfmpegTranscoder::new(
            app_config.tools.ffmpeg.clone(),
            app_config.tools.ffprobe.clone(),
        ));
        if let Err(e) = transcoder.check_available().await {
            warn!("Transcoding engine not usable yet, jobs will fail: {}", e);
        }
        let pipeline = Arc::new(EnhancePipeline::new(transcoder, make_separator(&app_config)));

        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
        for index in 0..app_config.worker.count {
            let mut worker_config = WorkerConfig::new(
                format!("{}-{}-{}", host, std::process::id(), index),
                &app_config.scratch_dir,
            );
            worker_config.poll_interval = app_config.worker.poll_interval;
            worker_config.stale_after = app_config.worker.stale_after;

            let worker = EnhanceWorker::new(
                worker_config,
                job_store.clone(),
                job_store.clone(),
                storage.clone(),
                pipeline.clone(),
            );
            let token = shutdown_token.child_token();
            worker_handles.push(tokio::spawn(async move { worker.run(token).await }));
        }
        info!("Started {} worker(s)", app_config.worker.count);
    }

    let mut server_task = if app_config.role.runs_api() {
        let server_config = ServerConfig {
            requests_logging_level: app_config.logging_level.clone(),
            port: app_config.port,
            asset_url_ttl: app_config.asset_url_ttl,
            feed: app_config.feed.clone(),
            ..ServerConfig::default()
        };
        let metrics_port = app_config.metrics_port;
        let token = shutdown_token.clone();
        let job_store = job_store.clone();
        let storage = storage.clone();
        Some(tokio::spawn(async move {
            run_server(
                server_config,
                job_store.clone(),
                job_store,
                storage,
                Arc::new(url_signer),
                metrics_port,
                token,
            )
            .await
        }))
    } else {
        None
    };

    // The server stopping on its own (e.g. a port already in use) also shuts down the workers
    let early_exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            None
        }
        result = async {
            match server_task.as_mut() {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        } => Some(result),
    };
    shutdown_token.cancel();

    let server_result = match (early_exit, server_task) {
        (Some(result), _) => Some(result),
        (None, Some(task)) => Some(task.await),
        (None, None) => None,
    };
    let mut outcome = Ok(());
    match server_result {
        Some(Ok(Ok(()))) => info!("HTTP server stopped"),
        Some(Ok(Err(e))) => {
            error!("HTTP server failed: {:#}", e);
            outcome = Err(e);
        }
        Some(Err(e)) => error!("HTTP server task panicked: {}", e),
        None => {}
    }

    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!("Worker task panicked: {}", e);
        }
    }
    info!("Shutdown complete");
    outcome
}
