//! Audio enhancement: control normalization, filter graph construction and
//! the external tools that render it.

pub mod controls;
pub mod filter_graph;
pub mod process;
pub mod separator;
pub mod strategy;
pub mod transcoder;

#[cfg(test)]
pub(crate) mod test_support;

pub use controls::{normalize, ControlSet, Quality};
pub use filter_graph::{build, build_stem_remix, ChannelLayout, FilterChain, MediaKind};
pub use process::Diagnostic;
pub use separator::{DemucsSeparator, DisabledSeparator, SeparationError, StemSeparator, Stems};
pub use strategy::{select, EnhanceInput, EnhanceOutcome, EnhancePipeline, Strategy};
pub use transcoder::{
    Artifact, FfmpegTranscoder, MediaProbe, TranscodeError, TranscodeRequest, Transcoder,
};
