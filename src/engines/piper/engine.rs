use std::path::{Path, PathBuf};

use crate::error::SynthError;
use crate::{AcousticModel, Backend, ModelConfig, Phonemizer};

use super::model::PiperModel;
use super::phonemizer::PiperPhonemizer;

/// Parameters for configuring Piper model loading.
#[derive(Debug, Clone, Default)]
pub struct PiperModelParams {
    /// Number of CPU threads to use for inference.
    /// `None` uses the available hardware concurrency.
    pub num_threads: Option<usize>,
}

/// [`Backend`] for Piper voices.
///
/// The phonemizer engine and its data are materialized under `workdir`
/// the first time they are loaded; models are built straight from the
/// cached weight bytes.
///
/// ```rust,no_run
/// use piper_synth::engines::piper::{PiperBackend, PiperModelParams};
///
/// let backend = PiperBackend::new("/var/cache/piper-synth")
///     .with_params(PiperModelParams { num_threads: Some(4) });
/// ```
#[derive(Debug, Clone)]
pub struct PiperBackend {
    workdir: PathBuf,
    params: PiperModelParams,
}

impl PiperBackend {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            params: PiperModelParams::default(),
        }
    }

    pub fn with_params(mut self, params: PiperModelParams) -> Self {
        self.params = params;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }
}

impl Backend for PiperBackend {
    fn load_phonemizer(
        &self,
        engine: &[u8],
        data: &[u8],
    ) -> Result<Box<dyn Phonemizer>, SynthError> {
        let phonemizer = PiperPhonemizer::install(&self.workdir, engine, data)?;
        Ok(Box::new(phonemizer))
    }

    fn load_model(
        &self,
        weights: &[u8],
        config: &ModelConfig,
    ) -> Result<Box<dyn AcousticModel>, SynthError> {
        let model = PiperModel::from_bytes(weights, self.params.num_threads)?;
        if !config.speaker_id_map.is_empty() && !model.has_speaker_input() {
            return Err(SynthError::Inference(format!(
                "config declares {} speakers but the model has no speaker input",
                config.speaker_id_map.len()
            )));
        }
        Ok(Box::new(model))
    }
}
