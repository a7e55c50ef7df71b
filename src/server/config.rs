use super::RequestsLoggingLevel;
use std::time::Duration;

/// Paging and lifetime of the live event feed.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub poll_interval: Duration,
    pub page_size: usize,
    /// The stream is closed after this long even if the job is still running.
    pub ceiling: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            poll_interval: Duration::from_millis(1000),
            page_size: 50,
            ceiling: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Lifetime of signed asset URLs.
    pub asset_url_ttl: Duration,
    /// Largest accepted input upload.
    pub max_upload_bytes: usize,
    pub feed: FeedConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3100,
            asset_url_ttl: Duration::from_secs(3600),
            max_upload_bytes: 2 * 1024 * 1024 * 1024,
            feed: FeedConfig::default(),
        }
    }
}
