/// Errors produced anywhere in the synthesis pipeline.
///
/// Every variant except [`SynthError::Cancelled`] is fatal to the job that
/// raised it. `Cancelled` marks a superseded job and is swallowed by the
/// orchestrator instead of being reported.
#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    #[error("Failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("Failed to parse {what}: {source}. Payload: {payload}")]
    ConfigParse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
        payload: String,
    },
    #[error("Invalid model config: {0}")]
    InvalidConfig(String),
    #[error("Voice '{0}' not found in the voice manifest")]
    VoiceNotFound(String),
    #[error("Voice '{voice}' has no file ending in '{suffix}'")]
    MissingVoiceFile { voice: String, suffix: &'static str },
    #[error("Input text is empty")]
    EmptyText,
    #[error("Speaker {0} requested but the voice has no speakers")]
    SpeakerUnavailable(i64),
    #[error("Speaker {0} is not declared in the voice's speaker map")]
    UnknownSpeaker(i64),
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[error("Unparsable phonemizer output: {0:?}")]
    PhonemizerOutput(String),
    #[error("Phonemizer produced no phoneme ids")]
    EmptyPhonemes,
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid audio container: {0}")]
    Container(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Background task failed: {0}")]
    Task(String),
    #[error("Job superseded by a newer request")]
    Cancelled,
    #[cfg(feature = "piper")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[cfg(feature = "piper")]
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl From<tokio::task::JoinError> for SynthError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            SynthError::Cancelled
        } else {
            SynthError::Task(err.to_string())
        }
    }
}

impl SynthError {
    pub(crate) fn fetch(url: &str, message: impl std::fmt::Display) -> Self {
        SynthError::Fetch {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}
