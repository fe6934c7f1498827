use ndarray::Array2;
use ort::execution_providers::CPUExecutionProvider;
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use crate::error::SynthError;
use crate::{AcousticModel, InferenceInput};

/// Name of the optional speaker-id input of multi-speaker voices.
const SPEAKER_INPUT: &str = "sid";

/// Name of the waveform output.
const AUDIO_OUTPUT: &str = "output";

/// A Piper VITS voice loaded into ONNX Runtime.
pub struct PiperModel {
    session: Session,
    has_speaker_input: bool,
}

impl PiperModel {
    /// Build a session from in-memory ONNX weights.
    ///
    /// `num_threads` bounds intra-op parallelism; `None` uses every available core.
    pub fn from_bytes(weights: &[u8], num_threads: Option<usize>) -> Result<Self, SynthError> {
        let session = init_session(weights, num_threads)?;
        let has_speaker_input = session
            .inputs()
            .iter()
            .any(|input| input.name() == SPEAKER_INPUT);
        log::info!(
            "Loaded Piper model ({:.1} MB, speaker input: {})",
            weights.len() as f64 / 1_048_576.0,
            has_speaker_input
        );
        Ok(Self {
            session,
            has_speaker_input,
        })
    }

    pub fn has_speaker_input(&self) -> bool {
        self.has_speaker_input
    }
}

impl AcousticModel for PiperModel {
    /// Run one forward pass.
    ///
    /// Feeds `input` `[1, N]` i64, `input_lengths` `[1]` i64 and `scales`
    /// `[noise_scale, length_scale, noise_w]` f32, plus `sid` `[1]` i64 only
    /// when a speaker id is given.
    fn infer(&mut self, input: &InferenceInput<'_>) -> Result<Vec<f32>, SynthError> {
        let ids = input.phonemes.ids();
        if ids.is_empty() {
            return Err(SynthError::EmptyPhonemes);
        }
        if input.speaker_id.is_some() && !self.has_speaker_input {
            return Err(SynthError::Inference(
                "speaker id given but the model has no 'sid' input".to_string(),
            ));
        }

        let ids_arr = Array2::from_shape_vec((1, ids.len()), ids.to_vec())?;
        let lengths_arr = ndarray::arr1(&[ids.len() as i64]);
        let p = input.params;
        let scales_arr = ndarray::arr1(&[p.noise_scale, p.length_scale, p.noise_w]);
        let sid_arr = ndarray::arr1(&[input.speaker_id.unwrap_or(0)]);

        let output = if input.speaker_id.is_some() {
            let inputs = inputs![
                "input" => TensorRef::from_array_view(ids_arr.view())?,
                "input_lengths" => TensorRef::from_array_view(lengths_arr.view())?,
                "scales" => TensorRef::from_array_view(scales_arr.view())?,
                SPEAKER_INPUT => TensorRef::from_array_view(sid_arr.view())?,
            ];
            self.session.run(inputs)?
        } else {
            let inputs = inputs![
                "input" => TensorRef::from_array_view(ids_arr.view())?,
                "input_lengths" => TensorRef::from_array_view(lengths_arr.view())?,
                "scales" => TensorRef::from_array_view(scales_arr.view())?,
            ];
            self.session.run(inputs)?
        };

        let audio = output
            .iter()
            .find(|(name, _)| *name == AUDIO_OUTPUT)
            .or_else(|| output.iter().next())
            .ok_or_else(|| SynthError::Inference("model produced no output".to_string()))?;
        let waveform = audio.1.try_extract_array::<f32>()?;

        Ok(waveform.iter().copied().collect())
    }
}

fn init_session(weights: &[u8], num_threads: Option<usize>) -> Result<Session, SynthError> {
    let threads = num_threads.unwrap_or_else(default_threads);
    let providers = vec![CPUExecutionProvider::default().build()];

    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_execution_providers(providers)?
        .with_intra_threads(threads)?
        .commit_from_memory(weights)?)
}

/// Hardware concurrency, falling back to a single thread.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::{default_threads, PiperModel};
    use crate::error::SynthError;

    #[test]
    fn default_threads_is_positive() {
        assert!(default_threads() >= 1);
    }

    #[test]
    fn garbage_weights_fail_to_load() {
        assert!(matches!(
            PiperModel::from_bytes(b"definitely not onnx", Some(1)),
            Err(SynthError::Ort(_))
        ));
    }
}
