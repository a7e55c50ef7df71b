//! User-facing enhancement controls and their normalization.
//!
//! Raw parameters arrive as loosely typed JSON from the submitting client.
//! [`normalize`] turns them into a [`ControlSet`] where every field is
//! populated and inside its domain, so graph construction never has to
//! branch on invalid input.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const VOICE_GAIN_MIN_DB: f64 = -60.0;
pub const VOICE_GAIN_MAX_DB: f64 = 24.0;

/// Integrated loudness target in LUFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoudnessTarget {
    #[serde(rename = "-16")]
    Minus16,
    #[serde(rename = "-14")]
    Minus14,
    #[serde(rename = "-12")]
    Minus12,
}

impl LoudnessTarget {
    pub fn lufs(&self) -> i32 {
        match self {
            LoudnessTarget::Minus16 => -16,
            LoudnessTarget::Minus14 => -14,
            LoudnessTarget::Minus12 => -12,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        let lufs = match value {
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
        match lufs {
            x if x == -16.0 => Some(LoudnessTarget::Minus16),
            x if x == -14.0 => Some(LoudnessTarget::Minus14),
            x if x == -12.0 => Some(LoudnessTarget::Minus12),
            _ => None,
        }
    }
}

/// Mains hum notch base frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeHum {
    Off,
    #[serde(rename = "50Hz")]
    Hz50,
    #[serde(rename = "60Hz")]
    Hz60,
    Auto,
}

impl DeHum {
    /// Base frequency of the notch bank, `None` when de-hum is disabled.
    /// Auto assumes 50 Hz mains.
    pub fn base_frequency(&self) -> Option<u32> {
        match self {
            DeHum::Off => None,
            DeHum::Hz50 | DeHum::Auto => Some(50),
            DeHum::Hz60 => Some(60),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value.as_str()?.trim().to_ascii_lowercase().as_str() {
            "off" => Some(DeHum::Off),
            "50hz" | "50" => Some(DeHum::Hz50),
            "60hz" | "60" => Some(DeHum::Hz60),
            "auto" => Some(DeHum::Auto),
            _ => None,
        }
    }
}

/// Explicit high-pass override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighPass {
    Off,
    #[serde(rename = "60Hz")]
    Hz60,
    #[serde(rename = "80Hz")]
    Hz80,
}

impl HighPass {
    pub fn frequency(&self) -> Option<u32> {
        match self {
            HighPass::Off => None,
            HighPass::Hz60 => Some(60),
            HighPass::Hz80 => Some(80),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value.as_str()?.trim().to_ascii_lowercase().as_str() {
            "off" => Some(HighPass::Off),
            "60hz" | "60" => Some(HighPass::Hz60),
            "80hz" | "80" => Some(HighPass::Hz80),
            _ => None,
        }
    }
}

/// Quality tier, which decides the separation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    Fast,
    Balanced,
    Max,
}

impl Quality {
    fn from_value(value: &Value) -> Option<Self> {
        match value.as_str()?.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(Quality::Fast),
            "balanced" => Some(Quality::Balanced),
            "max" => Some(Quality::Max),
            _ => None,
        }
    }
}

/// Canonical, clamped enhancement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSet {
    pub voice_gain_db: f64,
    pub noise_percent: f64,
    pub bg_percent: f64,
    pub lufs: LoudnessTarget,
    pub dehum: DeHum,
    pub deess: f64,
    pub mouth: f64,
    pub crackle: f64,
    pub plosive: f64,
    pub dereverb: f64,
    pub hpf: HighPass,
    pub clip_repair: bool,
    pub mono_voice: bool,
    pub quality: Quality,
}

impl Default for ControlSet {
    fn default() -> Self {
        ControlSet {
            voice_gain_db: 3.0,
            noise_percent: 50.0,
            bg_percent: 20.0,
            lufs: LoudnessTarget::Minus14,
            dehum: DeHum::Auto,
            deess: 30.0,
            mouth: 30.0,
            crackle: 0.0,
            plosive: 0.0,
            dereverb: 20.0,
            hpf: HighPass::Off,
            clip_repair: false,
            mono_voice: false,
            quality: Quality::Balanced,
        }
    }
}

impl ControlSet {
    pub fn to_json(&self) -> Value {
        // Every field is a plain number, bool or unit enum.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Reads a finite number from a JSON number or a numeric string.
fn finite_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

fn percent(raw: &Value, key: &str, default: f64) -> f64 {
    finite_number(raw.get(key))
        .map(|v| v.clamp(0.0, 100.0))
        .unwrap_or(default)
}

fn flag(raw: &Value, key: &str, default: bool) -> bool {
    raw.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Validates and clamps raw user parameters into a [`ControlSet`].
///
/// Never fails: a missing field, a non-number, or an unknown enum value
/// falls back to the field's default, and numbers are clamped to their
/// domain. Anything that isn't a JSON object yields the defaults.
pub fn normalize(raw: &Value) -> ControlSet {
    let defaults = ControlSet::default();

    ControlSet {
        voice_gain_db: finite_number(raw.get("voiceGainDb"))
            .map(|v| v.clamp(VOICE_GAIN_MIN_DB, VOICE_GAIN_MAX_DB))
            .unwrap_or(defaults.voice_gain_db),
        noise_percent: percent(raw, "noisePercent", defaults.noise_percent),
        bg_percent: percent(raw, "bgPercent", defaults.bg_percent),
        lufs: raw
            .get("lufs")
            .and_then(LoudnessTarget::from_value)
            .unwrap_or(defaults.lufs),
        dehum: raw
            .get("dehum")
            .and_then(DeHum::from_value)
            .unwrap_or(defaults.dehum),
        deess: percent(raw, "deess", defaults.deess),
        mouth: percent(raw, "mouth", defaults.mouth),
        crackle: percent(raw, "crackle", defaults.crackle),
        plosive: percent(raw, "plosive", defaults.plosive),
        dereverb: percent(raw, "dereverb", defaults.dereverb),
        hpf: raw
            .get("hpf")
            .and_then(HighPass::from_value)
            .unwrap_or(defaults.hpf),
        clip_repair: flag(raw, "clipRepair", defaults.clip_repair),
        mono_voice: flag(raw, "monoVoice", defaults.mono_voice),
        quality: raw
            .get("quality")
            .and_then(Quality::from_value)
            .unwrap_or(defaults.quality),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_yields_defaults() {
        assert_eq!(normalize(&json!({})), ControlSet::default());
    }

    #[test]
    fn non_object_yields_defaults() {
        assert_eq!(normalize(&Value::Null), ControlSet::default());
        assert_eq!(normalize(&json!([1, 2, 3])), ControlSet::default());
        assert_eq!(normalize(&json!("Max")), ControlSet::default());
    }

    #[test]
    fn clamps_numbers_to_their_domain() {
        let controls = normalize(&json!({
            "voiceGainDb": 99,
            "noisePercent": -5,
            "bgPercent": 250,
            "deess": 100.5,
            "mouth": 0,
        }));

        assert_eq!(controls.voice_gain_db, VOICE_GAIN_MAX_DB);
        assert_eq!(controls.noise_percent, 0.0);
        assert_eq!(controls.bg_percent, 100.0);
        assert_eq!(controls.deess, 100.0);
        assert_eq!(controls.mouth, 0.0);

        let controls = normalize(&json!({ "voiceGainDb": -1000 }));
        assert_eq!(controls.voice_gain_db, VOICE_GAIN_MIN_DB);
    }

    #[test]
    fn not_a_number_falls_back_to_default() {
        let controls = normalize(&json!({
            "voiceGainDb": "NaN",
            "noisePercent": "loud",
            "bgPercent": null,
            "deess": true,
            "mouth": "inf",
            "dereverb": {"value": 3},
        }));

        let defaults = ControlSet::default();
        assert_eq!(controls.voice_gain_db, defaults.voice_gain_db);
        assert_eq!(controls.noise_percent, defaults.noise_percent);
        assert_eq!(controls.bg_percent, defaults.bg_percent);
        assert_eq!(controls.deess, defaults.deess);
        assert_eq!(controls.mouth, defaults.mouth);
        assert_eq!(controls.dereverb, defaults.dereverb);
        assert!(controls.voice_gain_db.is_finite());
    }

    #[test]
    fn accepts_numeric_strings() {
        let controls = normalize(&json!({ "noisePercent": " 75 ", "voiceGainDb": "-6.5" }));
        assert_eq!(controls.noise_percent, 75.0);
        assert_eq!(controls.voice_gain_db, -6.5);
    }

    #[test]
    fn parses_enum_domains() {
        let controls = normalize(&json!({
            "lufs": "-16",
            "dehum": "60Hz",
            "hpf": "80hz",
            "quality": "max",
        }));
        assert_eq!(controls.lufs, LoudnessTarget::Minus16);
        assert_eq!(controls.dehum, DeHum::Hz60);
        assert_eq!(controls.hpf, HighPass::Hz80);
        assert_eq!(controls.quality, Quality::Max);

        assert_eq!(normalize(&json!({ "lufs": -12 })).lufs, LoudnessTarget::Minus12);
    }

    #[test]
    fn unknown_enum_values_fall_back_to_default() {
        let controls = normalize(&json!({
            "lufs": "-23",
            "dehum": "70Hz",
            "hpf": 120,
            "quality": "Ultra",
        }));
        let defaults = ControlSet::default();
        assert_eq!(controls.lufs, defaults.lufs);
        assert_eq!(controls.dehum, defaults.dehum);
        assert_eq!(controls.hpf, defaults.hpf);
        assert_eq!(controls.quality, defaults.quality);
    }

    #[test]
    fn flags_only_accept_booleans() {
        let controls = normalize(&json!({ "clipRepair": true, "monoVoice": "yes" }));
        assert!(controls.clip_repair);
        assert!(!controls.mono_voice);
    }

    #[test]
    fn normalize_is_idempotent() {
        let first = normalize(&json!({
            "voiceGainDb": 40,
            "noisePercent": 12.5,
            "lufs": "-12",
            "dehum": "Off",
            "hpf": "60Hz",
            "monoVoice": true,
            "quality": "Fast",
        }));
        let second = normalize(&first.to_json());
        assert_eq!(first, second);
    }

    #[test]
    fn serializes_with_client_field_names() {
        let json = ControlSet::default().to_json();
        assert_eq!(json["voiceGainDb"], json!(3.0));
        assert_eq!(json["lufs"], json!("-14"));
        assert_eq!(json["dehum"], json!("Auto"));
        assert_eq!(json["hpf"], json!("Off"));
        assert_eq!(json["clipRepair"], json!(false));
        assert_eq!(json["quality"], json!("Balanced"));
    }
}
