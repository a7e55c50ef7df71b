use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub storage_dir: Option<String>,
    pub scratch_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub role: Option<String>,
    pub workers: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub stale_after_secs: Option<u64>,
    pub public_base_url: Option<String>,
    pub signing_secret: Option<String>,
    pub asset_url_ttl_secs: Option<u64>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,

    // Feature configs
    pub separator: Option<SeparatorConfig>,
    pub feed: Option<FeedFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SeparatorConfig {
    pub enabled: Option<bool>,
    /// Command lines tried in order, e.g. `"python -m demucs"`.
    pub commands: Option<Vec<String>>,
    pub model: Option<String>,
    pub jobs: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct FeedFileConfig {
    pub poll_interval_ms: Option<u64>,
    pub page_size: Option<usize>,
    pub ceiling_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
