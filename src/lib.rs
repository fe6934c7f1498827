//! # piper-synth
//!
//! On-device neural text-to-speech for Piper voices.
//!
//! ## Features
//!
//! - **Asset cache**: model weights, configs and the phonemizer are fetched once per session, with progress events
//! - **Phonemization**: text to phoneme ids through the `piper_phonemize` engine
//! - **Inference**: VITS forward pass through ONNX Runtime
//! - **WAVE output**: bit-exact 16-bit PCM containers
//! - **Latest request wins**: starting a job supersedes the one in flight
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! piper-synth = { version = "2026.10", features = ["piper"] }
//! ```
//!
//! ```ignore
//! use std::sync::Arc;
//! use piper_synth::{
//!     config::PipelineConfigBuilder,
//!     engines::piper::PiperBackend,
//!     fetch::AssetCache,
//!     pipeline::{EventKind, SynthesisRequest, Synthesizer},
//! };
//!
//! let config = PipelineConfigBuilder::default()
//!     .manifest_url("assets/voices.json")
//!     .voices_base_url("assets/voices/")
//!     .phonemizer_engine_url("assets/piper_phonemize")
//!     .phonemizer_data_url("assets/espeak-ng-data.zip")
//!     .build()?;
//! let backend = Arc::new(PiperBackend::new("/tmp/piper-synth"));
//! let (mut synth, mut events) = Synthesizer::new(config, Arc::new(AssetCache::default()), backend);
//!
//! synth.start(SynthesisRequest::new("Hello world"))?;
//! while let Some(event) = events.recv().await {
//!     if let EventKind::Completed(wav) = event.kind {
//!         wav.write_wav("hello.wav".as_ref())?;
//!         break;
//!     }
//! }
//! ```

pub mod config;
pub mod engines;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod wav;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{InferenceParams, ModelConfig, PipelineConfig, VoiceManifest, VoiceModel};
pub use error::SynthError;
pub use fetch::{AssetCache, FetchEvent};
pub use pipeline::{EventKind, JobState, PipelineEvent, SynthesisRequest, Synthesizer};
pub use wav::AudioContainer;

/// Phoneme ids produced from one request's text, consumed by one inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhonemeSequence {
    ids: Vec<i64>,
}

impl PhonemeSequence {
    pub fn new(ids: Vec<i64>) -> Self {
        Self { ids }
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Raw mono waveform from the acoustic model.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    /// Samples, nominally in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate declared by the voice's config
    pub sample_rate: u32,
}

impl PcmBuffer {
    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Encode as a mono 16-bit WAVE container.
    pub fn to_container(&self) -> Result<AudioContainer, SynthError> {
        wav::encode(&self.samples, self.sample_rate, 1)
    }
}

/// Everything the acoustic model needs for one forward pass.
#[derive(Debug, Clone, Copy)]
pub struct InferenceInput<'a> {
    pub phonemes: &'a PhonemeSequence,
    pub params: InferenceParams,
    /// Only set for voices that declare a speaker map.
    pub speaker_id: Option<i64>,
}

/// Converts text into phoneme ids for a given espeak voice.
pub trait Phonemizer: Send {
    /// Phonemize `text` with the espeak voice `voice`.
    ///
    /// Lines from the engine's diagnostic stream are passed to `diagnostics`.
    fn phonemize(
        &mut self,
        text: &str,
        voice: &str,
        diagnostics: &mut dyn FnMut(String),
    ) -> Result<PhonemeSequence, SynthError>;
}

/// A loaded neural model turning phoneme ids into a waveform.
pub trait AcousticModel: Send {
    fn infer(&mut self, input: &InferenceInput<'_>) -> Result<Vec<f32>, SynthError>;
}

/// Builds engines from fetched asset bytes.
///
/// The orchestrator calls each loader once per session (phonemizer) or once
/// per voice (model) and reuses the result.
pub trait Backend: Send + Sync {
    /// Load the phonemizer from its engine binary and zipped data tables.
    fn load_phonemizer(&self, engine: &[u8], data: &[u8])
        -> Result<Box<dyn Phonemizer>, SynthError>;

    /// Load an acoustic model from ONNX weights.
    fn load_model(
        &self,
        weights: &[u8],
        config: &ModelConfig,
    ) -> Result<Box<dyn AcousticModel>, SynthError>;
}
