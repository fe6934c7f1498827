//! In-memory transport and mock engines shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use async_trait::async_trait;

use crate::config::{PipelineConfig, PipelineConfigBuilder};
use crate::error::SynthError;
use crate::fetch::{ProgressFn, Transport};
use crate::{AcousticModel, Backend, InferenceInput, ModelConfig, PhonemeSequence, Phonemizer};

/// Samples the mock model emits per phoneme id.
pub const SAMPLES_PER_PHONEME: usize = 100;

pub const SINGLE_VOICE: &str = "en_US-test-medium";
pub const MULTI_VOICE: &str = "en_US-multi-medium";
pub const BROKEN_VOICE: &str = "en_US-broken-low";
pub const CORRUPT_VOICE: &str = "en_US-corrupt-low";

/// Phoneme ids the mock model refuses to run, spelled by the text "crash".
const CRASH_IDS: [i64; 5] = ['c' as i64, 'r' as i64, 'a' as i64, 's' as i64, 'h' as i64];

#[derive(Default)]
pub struct MemoryTransport {
    assets: HashMap<String, Vec<u8>>,
    requests: Mutex<HashMap<String, usize>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, bytes: &[u8]) -> Self {
        self.assets.insert(url.to_string(), bytes.to_vec());
        self
    }

    pub fn requests(&self, url: &str) -> usize {
        self.requests.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(&self, url: &str, progress: ProgressFn<'_>) -> Result<Vec<u8>, SynthError> {
        *self
            .requests
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        let bytes = self
            .assets
            .get(url)
            .cloned()
            .ok_or_else(|| SynthError::fetch(url, "404 Not Found"))?;
        let total = bytes.len() as u64;
        if total > 1 {
            progress(total / 2, Some(total));
        }
        progress(total, Some(total));
        Ok(bytes)
    }
}

/// Transport holding back the first request for one URL until released.
pub struct GatedTransport {
    inner: MemoryTransport,
    url: String,
    gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
}

impl GatedTransport {
    pub fn new(inner: MemoryTransport, url: &str) -> (Self, tokio::sync::oneshot::Sender<()>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let transport = Self {
            inner,
            url: url.to_string(),
            gate: Mutex::new(Some(rx)),
        };
        (transport, tx)
    }
}

#[async_trait]
impl Transport for GatedTransport {
    async fn get(&self, url: &str, progress: ProgressFn<'_>) -> Result<Vec<u8>, SynthError> {
        if url == self.url {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
        }
        self.inner.get(url, progress).await
    }
}

pub fn pipeline_config() -> PipelineConfig {
    PipelineConfigBuilder::default()
        .manifest_url("mem://voices.json")
        .voices_base_url("mem://voices/")
        .phonemizer_engine_url("mem://piper_phonemize")
        .phonemizer_data_url("mem://espeak-ng-data.zip")
        .default_voice(SINGLE_VOICE)
        .build()
        .unwrap()
}

fn model_config(sample_rate: u32, speakers: &str) -> String {
    format!(
        r#"{{
            "audio": {{"sample_rate": {sample_rate}}},
            "espeak": {{"voice": "en-us"}},
            "inference": {{"noise_scale": 0.667, "length_scale": 1.0, "noise_w": 0.8}},
            "speaker_id_map": {speakers}
        }}"#
    )
}

/// Transport serving a manifest with a single-speaker voice, a
/// multi-speaker voice, a voice whose weights do not load and a voice
/// missing its model files.
pub fn voice_transport() -> MemoryTransport {
    let manifest = format!(
        r#"{{
            "{SINGLE_VOICE}": {{
                "name": "test", "quality": "medium", "num_speakers": 1,
                "files": {{
                    "en/test/{SINGLE_VOICE}.onnx": {{"size_bytes": 5}},
                    "en/test/{SINGLE_VOICE}.onnx.json": {{"size_bytes": 100}}
                }}
            }},
            "{MULTI_VOICE}": {{
                "name": "multi", "quality": "medium", "num_speakers": 2,
                "speaker_id_map": {{"alice": 0, "bob": 1}},
                "files": {{
                    "en/multi/{MULTI_VOICE}.onnx": {{"size_bytes": 5}},
                    "en/multi/{MULTI_VOICE}.onnx.json": {{"size_bytes": 100}}
                }}
            }},
            "{CORRUPT_VOICE}": {{
                "files": {{
                    "en/corrupt/{CORRUPT_VOICE}.onnx": {{"size_bytes": 7}},
                    "en/corrupt/{CORRUPT_VOICE}.onnx.json": {{"size_bytes": 100}}
                }}
            }},
            "{BROKEN_VOICE}": {{
                "files": {{"en/broken/MODEL_CARD": {{"size_bytes": 1}}}}
            }}
        }}"#
    );
    MemoryTransport::new()
        .with("mem://voices.json", manifest.as_bytes())
        .with("mem://piper_phonemize", b"\x7fELF-engine")
        .with("mem://espeak-ng-data.zip", b"PK-data")
        .with(&format!("mem://voices/en/test/{SINGLE_VOICE}.onnx"), b"onnx1")
        .with(
            &format!("mem://voices/en/test/{SINGLE_VOICE}.onnx.json"),
            model_config(22050, "{}").as_bytes(),
        )
        .with(&format!("mem://voices/en/multi/{MULTI_VOICE}.onnx"), b"onnx2")
        .with(
            &format!("mem://voices/en/multi/{MULTI_VOICE}.onnx.json"),
            model_config(16000, r#"{"alice": 0, "bob": 1}"#).as_bytes(),
        )
        .with(&format!("mem://voices/en/corrupt/{CORRUPT_VOICE}.onnx"), b"garbage")
        .with(
            &format!("mem://voices/en/corrupt/{CORRUPT_VOICE}.onnx.json"),
            model_config(22050, "{}").as_bytes(),
        )
}

/// Backend producing deterministic mock engines.
///
/// The phonemizer maps every non-whitespace char to its code point. Text
/// starting with `"slow"` blocks until the gate sender fires, `"fail"` is
/// rejected, and text containing `"warn"` emits a diagnostic line. The
/// model loads only weights starting with `onnx` and fails the forward
/// pass on ids spelling `"crash"`.
#[derive(Default)]
pub struct MockBackend {
    pub phonemizer_loads: AtomicUsize,
    pub model_loads: AtomicUsize,
    pub speakers_seen: Arc<Mutex<Vec<Option<i64>>>>,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a gate for `"slow"` texts and return the sender releasing it.
    pub fn gated() -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let backend = Self {
            gate: Mutex::new(Some(rx)),
            ..Self::default()
        };
        (backend, tx)
    }
}

impl Backend for MockBackend {
    fn load_phonemizer(
        &self,
        engine: &[u8],
        data: &[u8],
    ) -> Result<Box<dyn Phonemizer>, SynthError> {
        assert_eq!(engine, b"\x7fELF-engine");
        assert_eq!(data, b"PK-data");
        self.phonemizer_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPhonemizer {
            gate: self.gate.lock().unwrap().take(),
        }))
    }

    fn load_model(
        &self,
        weights: &[u8],
        _config: &ModelConfig,
    ) -> Result<Box<dyn AcousticModel>, SynthError> {
        if !weights.starts_with(b"onnx") {
            return Err(SynthError::Inference("not an onnx model".to_string()));
        }
        self.model_loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockModel {
            speakers_seen: self.speakers_seen.clone(),
        }))
    }
}

struct MockPhonemizer {
    gate: Option<mpsc::Receiver<()>>,
}

impl Phonemizer for MockPhonemizer {
    fn phonemize(
        &mut self,
        text: &str,
        _voice: &str,
        diagnostics: &mut dyn FnMut(String),
    ) -> Result<PhonemeSequence, SynthError> {
        if text.starts_with("slow") {
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
        }
        if text.starts_with("fail") {
            return Err(SynthError::PhonemizerFailed("engine exited with 1".to_string()));
        }
        if text.contains("warn") {
            diagnostics("espeak: unknown word".to_string());
        }
        let ids = text
            .chars()
            .filter(|c| !c.is_whitespace() && c.is_alphanumeric())
            .map(|c| c as i64)
            .collect();
        Ok(PhonemeSequence::new(ids))
    }
}

struct MockModel {
    speakers_seen: Arc<Mutex<Vec<Option<i64>>>>,
}

impl AcousticModel for MockModel {
    fn infer(&mut self, input: &InferenceInput<'_>) -> Result<Vec<f32>, SynthError> {
        self.speakers_seen.lock().unwrap().push(input.speaker_id);
        if input.phonemes.ids().windows(CRASH_IDS.len()).any(|w| w == CRASH_IDS) {
            return Err(SynthError::Inference("missing tensor 'scales'".to_string()));
        }
        let offset = input.speaker_id.unwrap_or(0) as f32 * 0.01;
        Ok(input
            .phonemes
            .ids()
            .iter()
            .flat_map(|&id| {
                let level = (id % 7) as f32 / 10.0 + offset;
                std::iter::repeat(level).take(SAMPLES_PER_PHONEME)
            })
            .collect())
    }
}
