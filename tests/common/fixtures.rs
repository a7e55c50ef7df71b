//! Stand-ins for the external tools
//!
//! The worker runs against these instead of ffmpeg and Demucs, so the
//! end-to-end suite needs neither installed.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use sukudo_enhancer::enhance::{
    Artifact, Diagnostic, MediaProbe, TranscodeError, TranscodeRequest, Transcoder,
};

/// Writes the stage name as the "encoded" output.
///
/// With `fail_on_call = Some(n)`, the n-th `run` (0-based) fails with an
/// ffmpeg-style diagnostic.
#[derive(Default)]
pub struct ScriptedTranscoder {
    pub fail_on_call: Option<usize>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTranscoder {
    pub fn failing_on_call(n: usize) -> Self {
        ScriptedTranscoder {
            fail_on_call: Some(n),
            ..Default::default()
        }
    }

    /// Stage names of every `run` so far.
    pub fn stages(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for ScriptedTranscoder {
    async fn probe(&self, _input: &Path) -> Result<MediaProbe, TranscodeError> {
        Ok(MediaProbe {
            has_video: false,
            audio_channels: Some(2),
            duration_ms: Some(2_000),
        })
    }

    async fn run(&self, request: TranscodeRequest) -> Result<Artifact, TranscodeError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.stage().to_string());
            calls.len() - 1
        };
        if self.fail_on_call == Some(call) {
            return Err(TranscodeError::Failed {
                program: "ffmpeg".to_string(),
                diagnostic: Diagnostic::from_stderr(
                    Some(234),
                    b"[aac @ 0x5581] Too many bits per frame\nConversion failed!\n",
                ),
            });
        }
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = format!("{} of {} input(s)", request.stage(), request.inputs.len());
        tokio::fs::write(&request.output, &bytes).await?;
        Ok(Artifact {
            path: request.output.clone(),
            content_type: request.content_type(),
            size_bytes: bytes.len() as u64,
        })
    }
}
