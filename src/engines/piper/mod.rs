//! Piper text-to-speech engine implementation.
//!
//! Piper voices are VITS models exported to ONNX. Text is turned into
//! phoneme ids by the `piper_phonemize` engine (espeak-ng rules), then a
//! single forward pass produces the waveform.
//!
//! # Assets
//!
//! ```text
//! assets/
//! ├── voices.json                     # voice manifest
//! ├── piper_phonemize                 # phonemizer engine executable
//! ├── espeak-ng-data.zip              # zipped espeak-ng rule tables
//! └── voices/en/en_US/lessac/medium/
//!     ├── en_US-lessac-medium.onnx        # model weights
//!     └── en_US-lessac-medium.onnx.json   # model config
//! ```
//!
//! Voices: <https://huggingface.co/rhasspy/piper-voices>
//!
//! # Model Inputs
//!
//! | Input | Type | Shape | Notes |
//! |---|---|---|---|
//! | `input` | i64 | `[1, N]` | phoneme ids |
//! | `input_lengths` | i64 | `[1]` | `N` |
//! | `scales` | f32 | `[3]` | noise_scale, length_scale, noise_w |
//! | `sid` | i64 | `[1]` | multi-speaker voices only |
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use piper_synth::{
//!     config::PipelineConfigBuilder,
//!     engines::piper::PiperBackend,
//!     pipeline::{await_result, SynthesisRequest, Synthesizer},
//!     AssetCache,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfigBuilder::default()
//!     .manifest_url("assets/voices.json")
//!     .voices_base_url("assets/voices/")
//!     .phonemizer_engine_url("assets/piper_phonemize")
//!     .phonemizer_data_url("assets/espeak-ng-data.zip")
//!     .build()?;
//! let backend = Arc::new(PiperBackend::new(std::env::temp_dir().join("piper-synth")));
//! let (mut synth, mut events) = Synthesizer::new(config, Arc::new(AssetCache::default()), backend);
//!
//! let job = synth.start(SynthesisRequest::new("Hello world"))?;
//! if let Some(Ok(wav)) = await_result(&mut events, job).await {
//!     wav.write_wav("hello.wav".as_ref())?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod model;
pub mod phonemizer;

pub use engine::{PiperBackend, PiperModelParams};
pub use model::PiperModel;
pub use phonemizer::PiperPhonemizer;
