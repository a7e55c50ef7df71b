//! Source separation into vocal and background stems.
//!
//! The separation tool is optional. Its absence is reported as
//! [`SeparationError::Unavailable`] and callers downgrade to the mid/side
//! approximation instead of failing the job.

use super::process::{run_captured, Diagnostic};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use walkdir::WalkDir;

pub const VOCALS_STEM: &str = "vocals.wav";
pub const BACKGROUND_STEM: &str = "no_vocals.wav";

#[derive(Debug, Error)]
pub enum SeparationError {
    #[error("separation tool unavailable: {0}")]
    Unavailable(String),

    #[error("separation failed with {0}")]
    Failed(Diagnostic),

    #[error("no stems found under {0:?}")]
    StemsMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Vocal and residual stems of one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stems {
    pub vocals: PathBuf,
    pub background: PathBuf,
}

#[async_trait]
pub trait StemSeparator: Send + Sync {
    /// Lightweight availability check, run before committing to separation.
    async fn probe(&self) -> Result<(), SeparationError>;

    /// Splits a stereo file into stems written below `out_dir`.
    async fn separate(&self, input: &Path, out_dir: &Path) -> Result<Stems, SeparationError>;
}

/// Separator used when separation is switched off in the configuration.
pub struct DisabledSeparator;

#[async_trait]
impl StemSeparator for DisabledSeparator {
    async fn probe(&self) -> Result<(), SeparationError> {
        Err(Self::disabled())
    }

    async fn separate(&self, _input: &Path, _out_dir: &Path) -> Result<Stems, SeparationError> {
        Err(Self::disabled())
    }
}

impl DisabledSeparator {
    fn disabled() -> SeparationError {
        SeparationError::Unavailable("separation disabled by configuration".to_string())
    }
}

/// Demucs two-stem separation.
///
/// The first candidate command that answers `--version` is remembered for
/// the lifetime of the separator; failed probes are retried on the next job.
pub struct DemucsSeparator {
    candidates: Vec<Vec<String>>,
    model: String,
    jobs: u32,
    resolved: OnceCell<Vec<String>>,
}

impl DemucsSeparator {
    pub fn new(candidates: Vec<Vec<String>>, model: String, jobs: u32) -> Self {
        DemucsSeparator {
            candidates,
            model,
            jobs,
            resolved: OnceCell::new(),
        }
    }

    /// Parses whitespace-separated command lines such as `python -m demucs`.
    pub fn from_command_lines(lines: &[String], model: String, jobs: u32) -> Self {
        let candidates = lines
            .iter()
            .map(|line| line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|argv| !argv.is_empty())
            .collect();
        DemucsSeparator::new(candidates, model, jobs)
    }

    async fn answers_version(argv: &[String]) -> bool {
        let Some((program, rest)) = argv.split_first() else {
            return false;
        };
        match Command::new(program)
            .args(rest)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
        {
            Ok(status) => status.success(),
            Err(e) => {
                debug!("Separator candidate {:?} not launchable: {}", argv, e);
                false
            }
        }
    }

    async fn resolve(&self) -> Result<&Vec<String>, SeparationError> {
        self.resolved
            .get_or_try_init(|| async {
                for argv in &self.candidates {
                    if Self::answers_version(argv).await {
                        info!("Using separator command {:?}", argv.join(" "));
                        return Ok(argv.clone());
                    }
                }
                Err(SeparationError::Unavailable(format!(
                    "none of {} candidate command(s) answered --version",
                    self.candidates.len()
                )))
            })
            .await
    }
}

#[async_trait]
impl StemSeparator for DemucsSeparator {
    async fn probe(&self) -> Result<(), SeparationError> {
        self.resolve().await.map(|_| ())
    }

    async fn separate(&self, input: &Path, out_dir: &Path) -> Result<Stems, SeparationError> {
        let argv = self.resolve().await?;
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| SeparationError::Unavailable("empty command".to_string()))?;

        tokio::fs::create_dir_all(out_dir).await?;

        let mut command = Command::new(program);
        command
            .args(rest)
            .arg("--two-stems=vocals")
            .arg("-n")
            .arg(&self.model)
            .arg("-j")
            .arg(self.jobs.to_string())
            .arg("-o")
            .arg(out_dir)
            .arg(input);

        run_captured(command)
            .await?
            .map_err(SeparationError::Failed)?;

        let track = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        discover_stems(out_dir, &self.model, &track)
    }
}

fn stems_in(dir: &Path) -> Option<Stems> {
    let vocals = dir.join(VOCALS_STEM);
    let background = dir.join(BACKGROUND_STEM);
    (vocals.is_file() && background.is_file()).then_some(Stems { vocals, background })
}

/// Finds the stem pair produced for `track` below `out_dir/model`.
///
/// Prefers `out_dir/model/<track>/`, then any directory below the model
/// directory holding both stem files, in file-name order.
pub fn discover_stems(out_dir: &Path, model: &str, track: &str) -> Result<Stems, SeparationError> {
    let model_dir = out_dir.join(model);
    if !track.is_empty() {
        if let Some(stems) = stems_in(&model_dir.join(track)) {
            return Ok(stems);
        }
    }

    WalkDir::new(&model_dir)
        .min_depth(0)
        .max_depth(3)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .find_map(|entry| stems_in(entry.path()))
        .ok_or(SeparationError::StemsMissing(model_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch_stems(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(VOCALS_STEM), b"v").unwrap();
        std::fs::write(dir.join(BACKGROUND_STEM), b"b").unwrap();
    }

    #[test]
    fn discovers_conventional_layout() {
        let out = TempDir::new().unwrap();
        touch_stems(&out.path().join("htdemucs").join("a-decoy"));
        touch_stems(&out.path().join("htdemucs").join("speech"));

        let stems = discover_stems(out.path(), "htdemucs", "speech").unwrap();
        assert_eq!(stems.vocals, out.path().join("htdemucs/speech/vocals.wav"));
        assert_eq!(stems.background, out.path().join("htdemucs/speech/no_vocals.wav"));
    }

    #[test]
    fn discovers_nested_and_flat_layouts() {
        let out = TempDir::new().unwrap();
        touch_stems(&out.path().join("htdemucs").join("run1").join("other"));
        let stems = discover_stems(out.path(), "htdemucs", "speech").unwrap();
        assert!(stems.vocals.ends_with("run1/other/vocals.wav"));

        let flat = TempDir::new().unwrap();
        touch_stems(&flat.path().join("htdemucs"));
        let stems = discover_stems(flat.path(), "htdemucs", "speech").unwrap();
        assert_eq!(stems.vocals, flat.path().join("htdemucs/vocals.wav"));
    }

    #[test]
    fn half_a_stem_pair_is_missing() {
        let out = TempDir::new().unwrap();
        let dir = out.path().join("htdemucs").join("speech");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(VOCALS_STEM), b"v").unwrap();

        let err = discover_stems(out.path(), "htdemucs", "speech").unwrap_err();
        assert!(matches!(err, SeparationError::StemsMissing(_)));

        let empty = TempDir::new().unwrap();
        assert!(discover_stems(empty.path(), "htdemucs", "speech").is_err());
    }

    #[tokio::test]
    async fn unavailable_when_no_candidate_answers() {
        let separator = DemucsSeparator::from_command_lines(
            &["no-such-demucs-91ab".to_string(), "   ".to_string()],
            "htdemucs".to_string(),
            2,
        );
        assert!(matches!(
            separator.probe().await,
            Err(SeparationError::Unavailable(_))
        ));

        let out = TempDir::new().unwrap();
        let err = separator
            .separate(Path::new("in.wav"), out.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SeparationError::Unavailable(_)));
    }

    #[tokio::test]
    async fn disabled_separator_is_unavailable() {
        assert!(matches!(
            DisabledSeparator.probe().await,
            Err(SeparationError::Unavailable(_))
        ));
    }
}
