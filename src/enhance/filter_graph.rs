//! Filter graph construction.
//!
//! Turns a [`ControlSet`] into an ordered, immutable [`FilterChain`] and
//! serializes it into an ffmpeg `-filter_complex` expression. Everything
//! in here is pure: the same controls always produce a byte-identical graph.

use super::controls::ControlSet;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Label of the processed audio bus in the serialized graph.
pub const AUDIO_OUT_LABEL: &str = "aout";

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "m4v", "avi"];

/// (Q, gain dB) for the 1st..4th hum harmonic.
const HUM_NOTCHES: [(f64, f64); 4] = [(40.0, -25.0), (30.0, -18.0), (20.0, -14.0), (15.0, -10.0)];

const DEESS_CENTER_HZ: f64 = 6800.0;
const DEESS_MAX_DEPTH_DB: f64 = 10.0;
const CRACKLE_FLOOR_HZ: f64 = 4000.0;
const BACKGROUND_CUT_RATIO: f64 = 0.6;
const TRUE_PEAK_DB: f64 = -1.2;
const LOUDNESS_RANGE: f64 = 11.0;
const LIMITER_CEILING: &str = "-1dB";

const STEREO_FORMAT: &str = "aformat=channel_layouts=stereo";
const MID_MATRIX: &str = "pan=stereo|c0=0.5*c0+0.5*c1|c1=0.5*c0+0.5*c1";
const SIDE_MATRIX: &str = "pan=stereo|c0=0.5*c0-0.5*c1|c1=0.5*c1-0.5*c0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Detects the kind from the file name and the first bytes of the file.
    /// Either signal saying "video" wins.
    pub fn detect(file_name: &str, head: &[u8]) -> Self {
        let by_extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        let by_magic = infer::get(head)
            .map(|kind| kind.matcher_type() == infer::MatcherType::Video)
            .unwrap_or(false);

        if by_extension || by_magic {
            MediaKind::Video
        } else {
            MediaKind::Audio
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn output_extension(&self) -> &'static str {
        match self {
            MediaKind::Audio => "m4a",
            MediaKind::Video => "mp4",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio/mp4",
            MediaKind::Video => "video/mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn from_channel_count(channels: u32) -> Self {
        if channels <= 1 {
            ChannelLayout::Mono
        } else {
            ChannelLayout::Stereo
        }
    }
}

/// Where the vocal and background signals come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSource {
    /// Mid/side approximation of a single mixed input.
    MidSide,
    /// Real vocal and background stems from a separation model.
    Stems,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPath {
    /// Mid, or the vocal stem.
    Vocal,
    /// Side, or the background stem.
    Background,
    /// The recombined full mix.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRole {
    HighPass,
    DeHum,
    ClipRepair,
    Denoise,
    DeEss,
    ClickControl,
    CrackleSmoothing,
    DeReverb,
    VoiceGain,
    MonoFold,
    LowShelf,
    HighShelf,
    BackgroundGain,
    Mix,
    LoudnessNormalize,
    Limiter,
}

#[derive(Debug, Clone, PartialEq)]
struct StageArg {
    key: Option<&'static str>,
    value: String,
}

/// One named filter with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterStage {
    pub role: StageRole,
    pub filter: &'static str,
    args: Vec<StageArg>,
}

impl FilterStage {
    fn new(role: StageRole, filter: &'static str) -> Self {
        FilterStage {
            role,
            filter,
            args: Vec::new(),
        }
    }

    fn arg(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.args.push(StageArg {
            key: Some(key),
            value: value.into(),
        });
        self
    }

    fn positional(mut self, value: impl Into<String>) -> Self {
        self.args.push(StageArg {
            key: None,
            value: value.into(),
        });
        self
    }

    pub fn arg_value(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|arg| arg.key == Some(key))
            .map(|arg| arg.value.as_str())
    }

    /// Renders the stage as `name=key=value:key=value`.
    pub fn render(&self) -> String {
        if self.args.is_empty() {
            return self.filter.to_string();
        }
        let args = self
            .args
            .iter()
            .map(|arg| match arg.key {
                Some(key) => format!("{}={}", key, arg.value),
                None => arg.value.clone(),
            })
            .collect::<Vec<_>>()
            .join(":");
        format!("{}={}", self.filter, args)
    }
}

/// Ordered filter stages for each signal path. Built fresh per input and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    kind: MediaKind,
    source: VoiceSource,
    vocal: Vec<FilterStage>,
    background: Vec<FilterStage>,
    master: Vec<FilterStage>,
}

impl FilterChain {
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn source(&self) -> VoiceSource {
        self.source
    }

    pub fn stages_on(&self, path: SignalPath) -> &[FilterStage] {
        match path {
            SignalPath::Vocal => &self.vocal,
            SignalPath::Background => &self.background,
            SignalPath::Full => &self.master,
        }
    }

    /// All stages in processing order: vocal, background, then the full mix.
    pub fn stages(&self) -> impl Iterator<Item = (SignalPath, &FilterStage)> {
        self.vocal
            .iter()
            .map(|s| (SignalPath::Vocal, s))
            .chain(self.background.iter().map(|s| (SignalPath::Background, s)))
            .chain(self.master.iter().map(|s| (SignalPath::Full, s)))
    }

    /// Index of the first stage with `role` in [`FilterChain::stages`] order.
    pub fn position(&self, role: StageRole) -> Option<usize> {
        self.stages().position(|(_, stage)| stage.role == role)
    }

    /// Number of `-i` inputs the serialized graph expects.
    pub fn input_count(&self) -> usize {
        match (self.source, self.kind) {
            (VoiceSource::MidSide, _) => 1,
            (VoiceSource::Stems, MediaKind::Audio) => 2,
            (VoiceSource::Stems, MediaKind::Video) => 3,
        }
    }

    /// Serializes the chain into an ffmpeg filter-complex expression whose
    /// output bus is labelled [`AUDIO_OUT_LABEL`].
    ///
    /// For stems of a video input, input 0 is the original file (kept for
    /// its video stream) and the stems are inputs 1 and 2.
    pub fn filter_complex(&self) -> String {
        let mut graph = Vec::new();
        let vocal = join_stages(&self.vocal);

        match self.source {
            VoiceSource::MidSide if self.background.is_empty() => {
                graph.push(format!("[0:a]{},{}[voice]", STEREO_FORMAT, vocal));
            }
            VoiceSource::MidSide => {
                graph.push(format!("[0:a]{},asplit=2[mid][side]", STEREO_FORMAT));
                graph.push(format!("[mid]{},{}[voice]", MID_MATRIX, vocal));
                graph.push(format!(
                    "[side]{},{}[bg]",
                    SIDE_MATRIX,
                    join_stages(&self.background)
                ));
            }
            VoiceSource::Stems => {
                let first = match self.kind {
                    MediaKind::Audio => 0,
                    MediaKind::Video => 1,
                };
                graph.push(format!("[{}:a]{},{}[voice]", first, STEREO_FORMAT, vocal));
                graph.push(format!(
                    "[{}:a]{},{}[bg]",
                    first + 1,
                    STEREO_FORMAT,
                    join_stages(&self.background)
                ));
            }
        }

        let bus = if self.background.is_empty() {
            "[voice]"
        } else {
            "[voice][bg]"
        };
        graph.push(format!(
            "{}{}[{}]",
            bus,
            join_stages(&self.master),
            AUDIO_OUT_LABEL
        ));

        graph.join(";")
    }
}

fn join_stages(stages: &[FilterStage]) -> String {
    stages
        .iter()
        .map(FilterStage::render)
        .collect::<Vec<_>>()
        .join(",")
}

/// Formats a number with at most three decimals and without a negative zero.
pub fn fmt_num(value: f64) -> String {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded == 0.0 {
        return "0".to_string();
    }
    let text = format!("{:.3}", rounded);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Single-pass chain over a mixed input, using mid/side as the vocal and
/// background approximation. Mono inputs get an empty background path.
pub fn build(controls: &ControlSet, kind: MediaKind, layout: ChannelLayout) -> FilterChain {
    let background = match layout {
        ChannelLayout::Mono => Vec::new(),
        ChannelLayout::Stereo => background_stages(controls),
    };
    let master = master_stages(controls, !background.is_empty());

    FilterChain {
        kind,
        source: VoiceSource::MidSide,
        vocal: vocal_stages(controls),
        background,
        master,
    }
}

/// Remix chain over separated stems: the vocal path runs on the vocal stem
/// and the background path on the residual stem.
pub fn build_stem_remix(controls: &ControlSet, kind: MediaKind) -> FilterChain {
    FilterChain {
        kind,
        source: VoiceSource::Stems,
        vocal: vocal_stages(controls),
        background: background_stages(controls),
        master: master_stages(controls, true),
    }
}

fn vocal_stages(controls: &ControlSet) -> Vec<FilterStage> {
    let mut stages = Vec::new();

    let cutoff = controls
        .hpf
        .frequency()
        .map(f64::from)
        .unwrap_or_else(|| 70.0 + (controls.plosive * 0.8).round());
    stages.push(FilterStage::new(StageRole::HighPass, "highpass").arg("f", fmt_num(cutoff)));

    if let Some(base) = controls.dehum.base_frequency() {
        for (harmonic, (q, gain)) in HUM_NOTCHES.iter().enumerate() {
            let frequency = base * (harmonic as u32 + 1);
            stages.push(
                FilterStage::new(StageRole::DeHum, "equalizer")
                    .arg("f", frequency.to_string())
                    .arg("t", "q")
                    .arg("w", fmt_num(*q))
                    .arg("g", fmt_num(*gain)),
            );
        }
    }

    if controls.clip_repair {
        stages.push(FilterStage::new(StageRole::ClipRepair, "adeclip"));
    }

    let attenuation = 10.0 + (controls.noise_percent / 100.0 * 16.0).round();
    stages.push(FilterStage::new(StageRole::Denoise, "afftdn").arg("nr", fmt_num(attenuation)));

    let deess_depth = controls.deess / 100.0 * DEESS_MAX_DEPTH_DB;
    stages.push(
        FilterStage::new(StageRole::DeEss, "equalizer")
            .arg("f", fmt_num(DEESS_CENTER_HZ))
            .arg("t", "q")
            .arg("w", "1.2")
            .arg("g", fmt_num(-deess_depth)),
    );

    let mouth = controls.mouth;
    stages.push(
        FilterStage::new(StageRole::ClickControl, "acompressor")
            .arg("threshold", "-18dB")
            .arg("ratio", fmt_num(2.0 + mouth * 0.06))
            .arg("attack", fmt_num(5.0 - mouth * 0.04))
            .arg("release", fmt_num(60.0 + mouth * 0.6)),
    );

    let crackle_cutoff = (20000.0 - (controls.crackle * 160.0).round()).max(CRACKLE_FLOOR_HZ);
    stages.push(
        FilterStage::new(StageRole::CrackleSmoothing, "lowpass").arg("f", fmt_num(crackle_cutoff)),
    );

    let knee = -50.0 + (controls.dereverb / 100.0 * 20.0).round();
    stages.push(
        FilterStage::new(StageRole::DeReverb, "compand")
            .arg("attacks", "0.005")
            .arg("decays", "0.25")
            .arg(
                "points",
                format!("-90/-105|{}/{}|0/0", fmt_num(knee), fmt_num(knee)),
            ),
    );

    stages.push(
        FilterStage::new(StageRole::VoiceGain, "volume")
            .positional(format!("{}dB", fmt_num(controls.voice_gain_db))),
    );

    if controls.mono_voice {
        stages.push(FilterStage::new(StageRole::MonoFold, "pan").positional(
            "stereo|c0=0.5*c0+0.5*c1|c1=0.5*c0+0.5*c1",
        ));
    }

    stages
}

fn background_stages(controls: &ControlSet) -> Vec<FilterStage> {
    let noise_cut = (controls.noise_percent / 100.0 * 16.0).round();
    let shelf_gain = fmt_num(-BACKGROUND_CUT_RATIO * noise_cut);

    vec![
        FilterStage::new(StageRole::LowShelf, "lowshelf")
            .arg("f", "150")
            .arg("g", shelf_gain.clone()),
        FilterStage::new(StageRole::HighShelf, "highshelf")
            .arg("f", "9000")
            .arg("g", shelf_gain),
        FilterStage::new(StageRole::BackgroundGain, "volume")
            .positional(fmt_num((100.0 - controls.bg_percent) / 100.0)),
    ]
}

fn master_stages(controls: &ControlSet, has_background: bool) -> Vec<FilterStage> {
    let mut stages = Vec::new();
    if has_background {
        stages.push(
            FilterStage::new(StageRole::Mix, "amix")
                .arg("inputs", "2")
                .arg("normalize", "0"),
        );
    }
    stages.push(
        FilterStage::new(StageRole::LoudnessNormalize, "loudnorm")
            .arg("I", controls.lufs.lufs().to_string())
            .arg("TP", fmt_num(TRUE_PEAK_DB))
            .arg("LRA", fmt_num(LOUDNESS_RANGE)),
    );
    stages.push(FilterStage::new(StageRole::Limiter, "alimiter").arg("limit", LIMITER_CEILING));
    stages
}
