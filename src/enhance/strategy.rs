//! Separation strategy selection and the per-input enhancement pipeline.

use super::controls::{ControlSet, Quality};
use super::filter_graph::{build, build_stem_remix, ChannelLayout, MediaKind};
use super::separator::{SeparationError, StemSeparator};
use super::transcoder::{Artifact, TranscodeError, TranscodeRequest, Transcoder};
use crate::server::metrics;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Mid/side filtering in one transcode.
    SinglePass,
    /// Extract, separate into stems, then remix.
    TwoStage,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SinglePass => "single_pass",
            Strategy::TwoStage => "two_stage",
        }
    }
}

/// Two-stage separation is only worth its cost at Max quality.
pub fn select(controls: &ControlSet) -> Strategy {
    match controls.quality {
        Quality::Max => Strategy::TwoStage,
        Quality::Fast | Quality::Balanced => Strategy::SinglePass,
    }
}

/// One local input file to enhance.
#[derive(Debug, Clone, Copy)]
pub struct EnhanceInput<'a> {
    pub source: &'a Path,
    pub kind: MediaKind,
    pub layout: ChannelLayout,
    pub output: &'a Path,
    /// Job-scoped directory for intermediates.
    pub scratch: &'a Path,
}

#[derive(Debug)]
pub struct EnhanceOutcome {
    pub artifact: Artifact,
    /// Strategy that actually produced the artifact.
    pub strategy: Strategy,
    /// Why two-stage was abandoned, if it was.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Error)]
enum TwoStageError {
    #[error(transparent)]
    Separation(#[from] SeparationError),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TwoStageError {
    fn metric_label(&self) -> &'static str {
        match self {
            TwoStageError::Separation(_) => "separation_failed",
            TwoStageError::Transcode(_) => "transcode_failed",
            TwoStageError::Io(_) => "io",
        }
    }
}

pub struct EnhancePipeline {
    transcoder: Arc<dyn Transcoder>,
    separator: Arc<dyn StemSeparator>,
}

impl EnhancePipeline {
    pub fn new(transcoder: Arc<dyn Transcoder>, separator: Arc<dyn StemSeparator>) -> Self {
        EnhancePipeline {
            transcoder,
            separator,
        }
    }

    pub fn transcoder(&self) -> &Arc<dyn Transcoder> {
        &self.transcoder
    }

    /// Enhances one input. Two-stage problems never fail the call: the
    /// input is re-run single-pass and the reason is reported in the outcome.
    /// Only a single-pass failure is returned as an error.
    pub async fn enhance(
        &self,
        controls: &ControlSet,
        input: &EnhanceInput<'_>,
    ) -> Result<EnhanceOutcome, TranscodeError> {
        let mut fallback_reason = None;

        if select(controls) == Strategy::TwoStage {
            let attempt = match self.separator.probe().await {
                Ok(()) => self.run_two_stage(controls, input).await,
                Err(e) => Err(TwoStageError::Separation(e)),
            };
            match attempt {
                Ok(artifact) => {
                    return Ok(EnhanceOutcome {
                        artifact,
                        strategy: Strategy::TwoStage,
                        fallback_reason: None,
                    })
                }
                Err(e) => {
                    let label = match &e {
                        TwoStageError::Separation(SeparationError::Unavailable(_)) => {
                            "unavailable"
                        }
                        other => other.metric_label(),
                    };
                    warn!(
                        "Two-stage enhancement of {:?} abandoned, falling back to single pass: {}",
                        input.source, e
                    );
                    metrics::record_separation_fallback(label);
                    // A failed remix may have left a partial file behind
                    let _ = tokio::fs::remove_file(input.output).await;
                    fallback_reason = Some(e.to_string());
                }
            }
        }

        let chain = build(controls, input.kind, input.layout);
        let request =
            TranscodeRequest::enhance(vec![input.source.to_path_buf()], chain, input.output);
        let artifact = self.transcoder.run(request).await?;

        Ok(EnhanceOutcome {
            artifact,
            strategy: Strategy::SinglePass,
            fallback_reason,
        })
    }

    async fn run_two_stage(
        &self,
        controls: &ControlSet,
        input: &EnhanceInput<'_>,
    ) -> Result<Artifact, TwoStageError> {
        // Dropping the directory removes the intermediate and the stems on
        // every exit path.
        let work = tempfile::Builder::new()
            .prefix("stems-")
            .tempdir_in(input.scratch)?;

        let track = input
            .source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        let wav = work.path().join(format!("{}.wav", track));

        self.transcoder
            .run(TranscodeRequest::extract_stereo(input.source, &wav))
            .await?;

        let stems = self
            .separator
            .separate(&wav, &work.path().join("separated"))
            .await?;
        info!("Separated {:?} into stems", input.source);

        let mut inputs = Vec::with_capacity(3);
        if input.kind == MediaKind::Video {
            inputs.push(input.source.to_path_buf());
        }
        inputs.push(stems.vocals);
        inputs.push(stems.background);

        let chain = build_stem_remix(controls, input.kind);
        let artifact = self
            .transcoder
            .run(TranscodeRequest::enhance(inputs, chain, input.output))
            .await?;
        Ok(artifact)
    }
}
