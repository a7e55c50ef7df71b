//! Transcode executor backed by ffmpeg and ffprobe.

use super::filter_graph::{ChannelLayout, FilterChain, MediaKind, AUDIO_OUT_LABEL};
use super::process::{run_captured, Diagnostic};
use crate::server::metrics;
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Sample rate of the intermediate handed to the separation model.
pub const EXTRACT_SAMPLE_RATE: u32 = 48_000;

const VIDEO_AUDIO_BITRATE: &str = "192k";
const AUDIO_BITRATE: &str = "160k";

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed with {diagnostic}")]
    Failed {
        program: String,
        diagnostic: Diagnostic,
    },

    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            TranscodeError::Failed { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}

/// What a transcode invocation produces.
#[derive(Debug, Clone)]
pub enum TranscodeTarget {
    /// Stereo, fixed-rate WAV intermediate without video.
    StereoWav,
    /// Enhanced audio (and copied video) rendered through a filter chain.
    Enhanced(FilterChain),
}

/// One invocation of the transcoding engine.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub target: TranscodeTarget,
}

impl TranscodeRequest {
    pub fn extract_stereo(input: &Path, output: &Path) -> Self {
        TranscodeRequest {
            inputs: vec![input.to_path_buf()],
            output: output.to_path_buf(),
            target: TranscodeTarget::StereoWav,
        }
    }

    pub fn enhance(inputs: Vec<PathBuf>, chain: FilterChain, output: &Path) -> Self {
        TranscodeRequest {
            inputs,
            output: output.to_path_buf(),
            target: TranscodeTarget::Enhanced(chain),
        }
    }

    /// Short stage name, used for logging and metrics.
    pub fn stage(&self) -> &'static str {
        match &self.target {
            TranscodeTarget::StereoWav => "extract",
            TranscodeTarget::Enhanced(chain) if chain.input_count() > 1 => "remix",
            TranscodeTarget::Enhanced(_) => "enhance",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match &self.target {
            TranscodeTarget::StereoWav => "audio/wav",
            TranscodeTarget::Enhanced(chain) => chain.kind().content_type(),
        }
    }

    /// Full ffmpeg argument list, inputs and output included.
    pub fn ffmpeg_args(&self) -> Result<Vec<OsString>, TranscodeError> {
        let expected = match &self.target {
            TranscodeTarget::StereoWav => 1,
            TranscodeTarget::Enhanced(chain) => chain.input_count(),
        };
        if self.inputs.len() != expected {
            return Err(TranscodeError::InvalidRequest(format!(
                "{} stage expects {} input(s), got {}",
                self.stage(),
                expected,
                self.inputs.len()
            )));
        }

        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y"]
            .iter()
            .map(OsString::from)
            .collect();
        for input in &self.inputs {
            args.push("-i".into());
            args.push(input.as_os_str().to_owned());
        }

        match &self.target {
            TranscodeTarget::StereoWav => {
                args.extend(
                    [
                        "-vn".to_string(),
                        "-ac".to_string(),
                        "2".to_string(),
                        "-ar".to_string(),
                        EXTRACT_SAMPLE_RATE.to_string(),
                        "-c:a".to_string(),
                        "pcm_s16le".to_string(),
                    ]
                    .into_iter()
                    .map(OsString::from),
                );
            }
            TranscodeTarget::Enhanced(chain) => {
                args.push("-filter_complex".into());
                args.push(chain.filter_complex().into());
                let bitrate = match chain.kind() {
                    MediaKind::Video => {
                        for arg in ["-map", "0:v?", "-c:v", "copy"] {
                            args.push(arg.into());
                        }
                        VIDEO_AUDIO_BITRATE
                    }
                    MediaKind::Audio => AUDIO_BITRATE,
                };
                args.push("-map".into());
                args.push(format!("[{}]", AUDIO_OUT_LABEL).into());
                for arg in ["-c:a", "aac", "-b:a", bitrate] {
                    args.push(arg.into());
                }
                if chain.kind() == MediaKind::Video {
                    args.push("-movflags".into());
                    args.push("+faststart".into());
                }
            }
        }

        args.push(self.output.as_os_str().to_owned());
        Ok(args)
    }
}

/// A file produced by the transcoding engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub size_bytes: u64,
}

/// Stream layout reported by ffprobe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaProbe {
    pub has_video: bool,
    pub audio_channels: Option<u32>,
    pub duration_ms: Option<i64>,
}

impl MediaProbe {
    pub fn layout(&self) -> ChannelLayout {
        self.audio_channels
            .map(ChannelLayout::from_channel_count)
            .unwrap_or(ChannelLayout::Stereo)
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Inspects the streams of a media file.
    async fn probe(&self, input: &Path) -> Result<MediaProbe, TranscodeError>;

    /// Runs one stage. Never retries.
    async fn run(&self, request: TranscodeRequest) -> Result<Artifact, TranscodeError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    channels: Option<u32>,
    #[serde(default)]
    disposition: Option<FfprobeDisposition>,
}

#[derive(Debug, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    attached_pic: u8,
}

fn parse_probe(stdout: &[u8]) -> Result<MediaProbe, TranscodeError> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| TranscodeError::ProbeFailed(format!("JSON parse error: {}", e)))?;

    // Cover art shows up as a video stream with the attached_pic disposition
    let has_video = probe.streams.iter().any(|s| {
        s.codec_type == "video"
            && s.disposition
                .as_ref()
                .map(|d| d.attached_pic == 0)
                .unwrap_or(true)
    });
    let audio_channels = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .and_then(|s| s.channels);
    let duration_ms = probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as i64);

    Ok(MediaProbe {
        has_video,
        audio_channels,
        duration_ms,
    })
}

/// [`Transcoder`] that shells out to ffmpeg/ffprobe.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        FfmpegTranscoder::new(PathBuf::from("ffmpeg"), PathBuf::from("ffprobe"))
    }
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        FfmpegTranscoder { ffmpeg, ffprobe }
    }

    /// Checks that both binaries can be launched.
    pub async fn check_available(&self) -> Result<(), TranscodeError> {
        for program in [&self.ffmpeg, &self.ffprobe] {
            let status = Command::new(program)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|source| TranscodeError::Spawn {
                    program: program.display().to_string(),
                    source,
                })?;
            if !status.success() {
                return Err(TranscodeError::ProbeFailed(format!(
                    "{} -version exited with {}",
                    program.display(),
                    status
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, input: &Path) -> Result<MediaProbe, TranscodeError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn {
                program: self.ffprobe.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let diagnostic = Diagnostic::from_stderr(output.status.code(), &output.stderr);
            return Err(TranscodeError::ProbeFailed(diagnostic.to_string()));
        }

        parse_probe(&output.stdout)
    }

    async fn run(&self, request: TranscodeRequest) -> Result<Artifact, TranscodeError> {
        let args = request.ffmpeg_args()?;
        let stage = request.stage();

        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Running ffmpeg {} stage -> {:?}", stage, request.output);
        let start = Instant::now();
        let mut command = Command::new(&self.ffmpeg);
        command.args(&args);
        let result = run_captured(command)
            .await
            .map_err(|source| TranscodeError::Spawn {
                program: self.ffmpeg.display().to_string(),
                source,
            })?;
        metrics::record_transcode(stage, result.is_ok(), start.elapsed());

        if let Err(diagnostic) = result {
            return Err(TranscodeError::Failed {
                program: self.ffmpeg.display().to_string(),
                diagnostic,
            });
        }

        let size_bytes = match tokio::fs::metadata(&request.output).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                return Err(TranscodeError::InvalidOutput(format!(
                    "{} stage produced no output at {:?}",
                    stage, request.output
                )))
            }
        };

        Ok(Artifact {
            path: request.output.clone(),
            content_type: request.content_type(),
            size_bytes,
        })
    }
}
