//! Typed configuration: the voice manifest, per-voice model config and
//! the pipeline's asset locations.

use std::collections::BTreeMap;

use derive_builder::Builder;
use serde::Deserialize;

use crate::error::SynthError;

/// Voice used when a request does not name one.
pub const DEFAULT_VOICE: &str = "en_US-lessac-medium";

/// Filename suffix of the ONNX weights inside a voice's file list.
pub const MODEL_SUFFIX: &str = ".onnx";

/// Filename suffix of the sidecar model config.
pub const MODEL_CONFIG_SUFFIX: &str = ".onnx.json";

/// Where the pipeline finds its assets.
///
/// ```rust
/// use piper_synth::config::PipelineConfigBuilder;
///
/// let config = PipelineConfigBuilder::default()
///     .manifest_url("https://example.com/voices.json")
///     .voices_base_url("https://example.com/voices/")
///     .phonemizer_engine_url("https://example.com/piper_phonemize")
///     .phonemizer_data_url("https://example.com/espeak-ng-data.zip")
///     .build()?;
/// assert_eq!(config.default_voice, "en_US-lessac-medium");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct PipelineConfig {
    /// URL of the voice manifest (`voices.json`).
    pub manifest_url: String,
    /// Base URL that manifest file paths are relative to.
    pub voices_base_url: String,
    /// URL of the `piper_phonemize` executable.
    pub phonemizer_engine_url: String,
    /// URL of the zipped `espeak-ng-data` rule tables.
    pub phonemizer_data_url: String,
    /// Voice used by requests that leave `voice_id` empty.
    #[builder(default = "DEFAULT_VOICE.to_string()")]
    pub default_voice: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub size_bytes: u64,
    #[serde(default)]
    pub md5_digest: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageInfo {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub name_native: String,
    #[serde(default)]
    pub name_english: String,
    #[serde(default)]
    pub country_english: String,
}

/// One entry of the voice manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub num_speakers: u32,
    pub files: BTreeMap<String, FileInfo>,
    #[serde(default)]
    pub speaker_id_map: BTreeMap<String, i64>,
    #[serde(default)]
    pub language: LanguageInfo,
}

/// Relative paths of a voice's weights and config, as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFiles {
    pub model: String,
    pub config: String,
}

impl VoiceEntry {
    /// Locate the `.onnx` weights and `.onnx.json` config by suffix.
    pub fn files_for(&self, voice_id: &str) -> Result<VoiceFiles, SynthError> {
        let find = |suffix: &'static str| {
            self.files
                .keys()
                .find(|path| path.ends_with(suffix))
                .cloned()
                .ok_or_else(|| SynthError::MissingVoiceFile {
                    voice: voice_id.to_string(),
                    suffix,
                })
        };
        Ok(VoiceFiles {
            model: find(MODEL_SUFFIX)?,
            config: find(MODEL_CONFIG_SUFFIX)?,
        })
    }

    /// Sum of all listed file sizes.
    pub fn total_size_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size_bytes).sum()
    }

    /// Human-readable one-line summary for voice pickers.
    pub fn describe(&self) -> String {
        let lang = &self.language;
        let mut text = format!(
            "{} ({}, {}) Voice:{} Quality:{}",
            lang.name_native, lang.name_english, lang.country_english, self.name, self.quality
        );
        if self.num_speakers > 1 {
            text.push_str(&format!(" Speakers:{}", self.num_speakers));
        }
        let megabytes = self.total_size_bytes() as f64 / 1_048_576.0;
        text.push_str(&format!(" Size:{megabytes:.0}MB"));
        text
    }
}

/// Mapping from voice identifier to its manifest entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct VoiceManifest {
    entries: BTreeMap<String, VoiceEntry>,
}

impl VoiceManifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SynthError> {
        parse_json("voice manifest", bytes)
    }

    pub fn get(&self, voice_id: &str) -> Result<&VoiceEntry, SynthError> {
        self.entries
            .get(voice_id)
            .ok_or_else(|| SynthError::VoiceNotFound(voice_id.to_string()))
    }

    /// Voice identifiers with their entries, sorted by identifier.
    pub fn voices(&self) -> impl Iterator<Item = (&str, &VoiceEntry)> {
        self.entries.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
}

/// Scalar hyperparameters fed to the acoustic model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct InferenceParams {
    pub noise_scale: f32,
    pub length_scale: f32,
    pub noise_w: f32,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            noise_scale: 0.667,
            length_scale: 1.0,
            noise_w: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EspeakConfig {
    pub voice: String,
}

/// The `.onnx.json` sidecar shipped with every voice.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub audio: AudioConfig,
    /// Older voice exports omit this block; Piper's stock scales apply then.
    #[serde(default)]
    pub inference: InferenceParams,
    pub espeak: EspeakConfig,
    #[serde(default)]
    pub speaker_id_map: BTreeMap<String, i64>,
}

impl ModelConfig {
    /// Parse and validate a model config.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SynthError> {
        let config: Self = parse_json("model config", bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        if self.audio.sample_rate == 0 {
            return Err(SynthError::InvalidConfig(
                "audio.sample_rate must be positive".to_string(),
            ));
        }
        if self.espeak.voice.trim().is_empty() {
            return Err(SynthError::InvalidConfig(
                "espeak.voice must not be empty".to_string(),
            ));
        }
        let p = &self.inference;
        for (name, value) in [
            ("noise_scale", p.noise_scale),
            ("length_scale", p.length_scale),
            ("noise_w", p.noise_w),
        ] {
            if !value.is_finite() {
                return Err(SynthError::InvalidConfig(format!(
                    "inference.{name} must be finite, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// A fully resolved voice: asset URLs plus its parsed config.
#[derive(Debug, Clone)]
pub struct VoiceModel {
    pub voice_id: String,
    pub model_url: String,
    pub config_url: String,
    pub config: ModelConfig,
}

impl VoiceModel {
    pub fn sample_rate(&self) -> u32 {
        self.config.audio.sample_rate
    }

    pub fn has_speakers(&self) -> bool {
        !self.config.speaker_id_map.is_empty()
    }

    /// Look up a speaker by name.
    pub fn speaker_id(&self, name: &str) -> Option<i64> {
        self.config.speaker_id_map.get(name).copied()
    }

    /// Validate a requested speaker id against the speaker map.
    ///
    /// Returns `None` for single-speaker voices, which take no speaker tensor.
    pub fn resolve_speaker(&self, speaker_id: i64) -> Result<Option<i64>, SynthError> {
        if !self.has_speakers() {
            return if speaker_id == 0 {
                Ok(None)
            } else {
                Err(SynthError::SpeakerUnavailable(speaker_id))
            };
        }
        if self.config.speaker_id_map.values().any(|&id| id == speaker_id) {
            Ok(Some(speaker_id))
        } else {
            Err(SynthError::UnknownSpeaker(speaker_id))
        }
    }
}

/// Join a manifest-relative path onto a base URL.
pub fn join_url(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) if !base.is_empty() => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(
    what: &'static str,
    bytes: &[u8],
) -> Result<T, SynthError> {
    serde_json::from_slice(bytes).map_err(|source| SynthError::ConfigParse {
        what,
        source,
        payload: String::from_utf8_lossy(bytes).into_owned(),
    })
}
