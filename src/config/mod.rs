mod file_config;

pub use file_config::{FeedFileConfig, FileConfig, SeparatorConfig};

use crate::server::{FeedConfig, RequestsLoggingLevel};
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SEPARATOR_COMMANDS: &[&str] = &["demucs", "python -m demucs", "py -m demucs"];
pub const DEFAULT_SEPARATOR_MODEL: &str = "htdemucs";
pub const DEFAULT_SEPARATOR_JOBS: u32 = 2;

/// Which halves of the service this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Role {
    /// HTTP API and workers.
    #[default]
    All,
    Api,
    Worker,
}

impl Role {
    pub fn runs_api(&self) -> bool {
        matches!(self, Role::All | Role::Api)
    }

    pub fn runs_workers(&self) -> bool {
        matches!(self, Role::All | Role::Worker)
    }
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub role: Role,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub stale_after_secs: u64,
    pub public_base_url: Option<String>,
    pub signing_secret: Option<String>,
    pub asset_url_ttl_secs: u64,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub no_separator: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub role: Role,
    pub public_base_url: String,
    pub signing_secret: String,
    pub asset_url_ttl: Duration,

    // Feature configs (with defaults)
    pub worker: WorkerSettings,
    pub tools: ToolSettings,
    pub separator: SeparatorSettings,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub count: usize,
    pub poll_interval: Duration,
    pub stale_after: Duration,
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SeparatorSettings {
    pub enabled: bool,
    pub commands: Vec<String>,
    pub model: String,
    pub jobs: u32,
}

impl Default for SeparatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            commands: DEFAULT_SEPARATOR_COMMANDS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            model: DEFAULT_SEPARATOR_MODEL.to_string(),
            jobs: DEFAULT_SEPARATOR_JOBS,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let storage_dir = file
            .storage_dir
            .map(PathBuf::from)
            .or_else(|| cli.storage_dir.clone())
            .unwrap_or_else(|| db_dir.join("storage"));
        let scratch_dir = file
            .scratch_dir
            .map(PathBuf::from)
            .or_else(|| cli.scratch_dir.clone())
            .unwrap_or_else(|| std::env::temp_dir().join("sukudo-enhancer"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let role = match file.role {
            Some(s) => match Role::from_str(&s, true) {
                Ok(role) => role,
                Err(_) => bail!("Unknown role {:?}, expected all, api or worker", s),
            },
            None => cli.role,
        };

        let public_base_url = file
            .public_base_url
            .or_else(|| cli.public_base_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let signing_secret = match file
            .signing_secret
            .or_else(|| cli.signing_secret.clone())
            .filter(|s| !s.is_empty())
        {
            Some(secret) => secret,
            // A worker-only process never issues or checks asset URLs
            None if !role.runs_api() => uuid::Uuid::new_v4().to_string(),
            None => bail!("signing_secret must be set via --signing-secret, ENHANCER_SIGNING_SECRET or in config file"),
        };

        let asset_url_ttl =
            Duration::from_secs(file.asset_url_ttl_secs.unwrap_or(cli.asset_url_ttl_secs));

        let worker = WorkerSettings {
            count: file.workers.unwrap_or(cli.workers),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(cli.poll_interval_ms),
            ),
            stale_after: Duration::from_secs(
                file.stale_after_secs.unwrap_or(cli.stale_after_secs),
            ),
        };
        if role.runs_workers() && worker.count == 0 {
            bail!("workers must be at least 1 when the role runs workers");
        }
        if worker.poll_interval.is_zero() {
            bail!("poll_interval_ms must be greater than zero");
        }

        let tools = ToolSettings {
            ffmpeg: file
                .ffmpeg_path
                .map(PathBuf::from)
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            ffprobe: file
                .ffprobe_path
                .map(PathBuf::from)
                .or_else(|| cli.ffprobe_path.clone())
                .unwrap_or_else(|| PathBuf::from("ffprobe")),
        };

        // Separator settings - merge file config with defaults
        let sep_file = file.separator.unwrap_or_default();
        let sep_default = SeparatorSettings::default();
        let separator = SeparatorSettings {
            enabled: sep_file.enabled.unwrap_or(!cli.no_separator),
            commands: sep_file.commands.unwrap_or(sep_default.commands),
            model: sep_file.model.unwrap_or(sep_default.model),
            jobs: sep_file.jobs.unwrap_or(sep_default.jobs),
        };

        let feed_file = file.feed.unwrap_or_default();
        let feed_default = FeedConfig::default();
        let feed = FeedConfig {
            poll_interval: feed_file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(feed_default.poll_interval),
            page_size: feed_file.page_size.unwrap_or(feed_default.page_size),
            ceiling: feed_file
                .ceiling_secs
                .map(Duration::from_secs)
                .unwrap_or(feed_default.ceiling),
        };
        if feed.poll_interval.is_zero() {
            bail!("feed.poll_interval_ms must be greater than zero");
        }
        if feed.page_size == 0 {
            bail!("feed.page_size must be greater than zero");
        }

        Ok(Self {
            db_dir,
            storage_dir,
            scratch_dir,
            port,
            metrics_port,
            logging_level,
            role,
            public_base_url,
            signing_secret,
            asset_url_ttl,
            worker,
            tools,
            separator,
            feed,
        })
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_with_db(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            port: 3100,
            metrics_port: 9100,
            workers: 1,
            poll_interval_ms: 2000,
            stale_after_secs: 3600,
            asset_url_ttl_secs: 3600,
            signing_secret: Some("cli-secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("BODY"),
            Some(RequestsLoggingLevel::Body)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_with_db(&temp_dir);

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.storage_dir, temp_dir.path().join("storage"));
        assert_eq!(config.port, 3100);
        assert_eq!(config.role, Role::All);
        assert_eq!(config.public_base_url, "http://localhost:3100");
        assert_eq!(config.signing_secret, "cli-secret");
        assert_eq!(config.worker.count, 1);
        assert_eq!(config.worker.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.worker.stale_after, Duration::from_secs(3600));
        assert_eq!(config.tools.ffmpeg, PathBuf::from("ffmpeg"));
        assert!(config.separator.enabled);
        assert_eq!(config.separator.commands.len(), 3);
        assert_eq!(config.separator.model, "htdemucs");
        assert_eq!(config.separator.jobs, 2);
        assert_eq!(config.feed.page_size, 50);
        assert_eq!(config.feed.ceiling, Duration::from_secs(900));
        assert_eq!(config.jobs_db_path(), temp_dir.path().join("jobs.db"));
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            no_separator: true,
            ..cli_with_db(&temp_dir)
        };

        let file_config = FileConfig {
            db_dir: Some(temp_dir.path().to_string_lossy().to_string()),
            port: Some(4000),
            logging_level: Some("headers".to_string()),
            role: Some("Worker".to_string()),
            workers: Some(4),
            signing_secret: Some("toml-secret".to_string()),
            separator: Some(SeparatorConfig {
                enabled: Some(true),
                commands: Some(vec!["python3 -m demucs".to_string()]),
                ..Default::default()
            }),
            feed: Some(FeedFileConfig {
                page_size: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.role, Role::Worker);
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.signing_secret, "toml-secret");
        assert!(config.separator.enabled);
        assert_eq!(config.separator.commands, vec!["python3 -m demucs"]);
        assert_eq!(config.feed.page_size, 10);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.metrics_port, 9100);
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_signing_secret_required_for_api() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            signing_secret: None,
            ..cli_with_db(&temp_dir)
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("signing_secret"));

        let worker_only = CliConfig {
            role: Role::Worker,
            ..cli.clone()
        };
        let config = AppConfig::resolve(&worker_only, None).unwrap();
        assert!(!config.signing_secret.is_empty());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_with_db(&temp_dir);

        let bad_role = FileConfig {
            role: Some("janitor".to_string()),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, Some(bad_role)).is_err());

        let no_workers = CliConfig {
            workers: 0,
            ..cli.clone()
        };
        assert!(AppConfig::resolve(&no_workers, None).is_err());

        let api_only = CliConfig {
            workers: 0,
            role: Role::Api,
            ..cli.clone()
        };
        assert!(AppConfig::resolve(&api_only, None).is_ok());
    }

    #[test]
    fn test_zero_feed_poll_interval_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_with_db(&temp_dir);

        let busy_feed = FileConfig {
            feed: Some(FeedFileConfig {
                poll_interval_ms: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, Some(busy_feed)).unwrap_err();
        assert!(err.to_string().contains("feed.poll_interval_ms"));

        let slow_feed = FileConfig {
            feed: Some(FeedFileConfig {
                poll_interval_ms: Some(250),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, Some(slow_feed)).unwrap();
        assert_eq!(config.feed.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_no_separator_flag_disables_separation() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            no_separator: true,
            ..cli_with_db(&temp_dir)
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert!(!config.separator.enabled);
    }
}
