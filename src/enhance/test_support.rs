use super::process::Diagnostic;
use super::separator::{discover_stems, SeparationError, StemSeparator, Stems, BACKGROUND_STEM, VOCALS_STEM};
use super::transcoder::{Artifact, MediaProbe, TranscodeError, TranscodeRequest, Transcoder};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Transcoder that writes a small placeholder file instead of running ffmpeg.
pub struct FakeTranscoder {
    requests: Mutex<Vec<TranscodeRequest>>,
    fail_stage: Option<&'static str>,
    fail_after: usize,
    pub probe: MediaProbe,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        FakeTranscoder {
            requests: Mutex::new(Vec::new()),
            fail_stage: None,
            fail_after: 0,
            probe: MediaProbe {
                has_video: false,
                audio_channels: Some(2),
                duration_ms: Some(1_000),
            },
        }
    }

    /// Fails every `stage` invocation after `successes` successful ones.
    pub fn failing_stage(stage: &'static str, successes: usize) -> Self {
        FakeTranscoder {
            fail_stage: Some(stage),
            fail_after: successes,
            ..FakeTranscoder::new()
        }
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn stages(&self) -> Vec<&'static str> {
        self.requests().iter().map(|r| r.stage()).collect()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, _input: &Path) -> Result<MediaProbe, TranscodeError> {
        Ok(self.probe.clone())
    }

    async fn run(&self, request: TranscodeRequest) -> Result<Artifact, TranscodeError> {
        let stage = request.stage();
        let previous = {
            let mut requests = self.requests.lock().unwrap();
            let previous = requests.iter().filter(|r| r.stage() == stage).count();
            requests.push(request.clone());
            previous
        };
        if self.fail_stage == Some(stage) && previous >= self.fail_after {
            return Err(TranscodeError::Failed {
                program: "ffmpeg".to_string(),
                diagnostic: Diagnostic::from_stderr(
                    Some(1),
                    b"Error initializing complex filters.\nInvalid argument\n",
                ),
            });
        }
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.output, stage.as_bytes()).await?;
        Ok(Artifact {
            path: request.output.clone(),
            content_type: request.content_type(),
            size_bytes: stage.len() as u64,
        })
    }
}

enum SeparatorMode {
    Available,
    Unavailable,
    Failing,
}

/// Separator that writes empty stems in the conventional layout.
pub struct FakeSeparator {
    mode: SeparatorMode,
    probes: AtomicUsize,
    separations: AtomicUsize,
}

impl FakeSeparator {
    fn with_mode(mode: SeparatorMode) -> Self {
        FakeSeparator {
            mode,
            probes: AtomicUsize::new(0),
            separations: AtomicUsize::new(0),
        }
    }

    pub fn available() -> Self {
        Self::with_mode(SeparatorMode::Available)
    }

    pub fn unavailable() -> Self {
        Self::with_mode(SeparatorMode::Unavailable)
    }

    /// Probes fine but fails every separation.
    pub fn failing() -> Self {
        Self::with_mode(SeparatorMode::Failing)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn separations(&self) -> usize {
        self.separations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StemSeparator for FakeSeparator {
    async fn probe(&self) -> Result<(), SeparationError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            SeparatorMode::Unavailable => {
                Err(SeparationError::Unavailable("fake separator".to_string()))
            }
            SeparatorMode::Available | SeparatorMode::Failing => Ok(()),
        }
    }

    async fn separate(&self, input: &Path, out_dir: &Path) -> Result<Stems, SeparationError> {
        self.separations.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            SeparatorMode::Unavailable => {
                Err(SeparationError::Unavailable("fake separator".to_string()))
            }
            SeparatorMode::Failing => Err(SeparationError::Failed(Diagnostic::from_stderr(
                Some(1),
                b"RuntimeError: out of memory\n",
            ))),
            SeparatorMode::Available => {
                let track = input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let dir = out_dir.join("htdemucs").join(&track);
                tokio::fs::create_dir_all(&dir).await?;
                tokio::fs::write(dir.join(VOCALS_STEM), b"v").await?;
                tokio::fs::write(dir.join(BACKGROUND_STEM), b"b").await?;
                discover_stems(out_dir, "htdemucs", &track)
            }
        }
    }
}
