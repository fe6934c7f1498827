//! Synthesis orchestration.
//!
//! A [`Synthesizer`] runs one job at a time on a background tokio task:
//!
//! ```text
//! Idle -> LoadingAssets -> Phonemizing -> Inferring -> Encoding -> Done
//!              \______________\______________\____________\-----> Failed | Cancelled
//! ```
//!
//! Results, failures and fetch progress reach the caller through an
//! unbounded channel. Starting a job bumps a generation counter and aborts
//! the previous task; a superseded job can no longer emit anything, even if
//! its blocking phonemizer or inference call is still running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

use crate::config::{join_url, ModelConfig, PipelineConfig, VoiceManifest, VoiceModel};
use crate::error::SynthError;
use crate::fetch::{Asset, AssetCache, FetchEvent};
use crate::wav::AudioContainer;
use crate::{AcousticModel, Backend, InferenceInput, PcmBuffer, Phonemizer};

pub type JobId = u64;

type SharedPhonemizer = Arc<Mutex<Box<dyn Phonemizer>>>;
type SharedModel = Arc<Mutex<Box<dyn AcousticModel>>>;

/// One request from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub speaker_id: i64,
    /// Voice identifier from the manifest. `None` uses the configured default.
    pub voice_id: Option<String>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_id: 0,
            voice_id: None,
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = Some(voice_id.into());
        self
    }

    pub fn with_speaker(mut self, speaker_id: i64) -> Self {
        self.speaker_id = speaker_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    LoadingAssets,
    Phonemizing,
    Inferring,
    Encoding,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    fn is_running(self) -> bool {
        !self.is_terminal() && self != JobState::Idle
    }
}

/// A message from a job to the caller.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub job: JobId,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    /// The job entered a new stage.
    State(JobState),
    /// Asset transfer progress.
    Fetch(FetchEvent),
    /// A line from the phonemizer's diagnostic stream.
    Diagnostic(String),
    /// The finished WAVE container.
    Completed(AudioContainer),
    /// The job failed; no output follows.
    Failed(String),
}

struct Tracker {
    generation: JobId,
    state: JobState,
}

struct Shared {
    config: PipelineConfig,
    cache: Arc<AssetCache>,
    backend: Arc<dyn Backend>,
    tracker: Mutex<Tracker>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    phonemizer: OnceCell<SharedPhonemizer>,
    models: Mutex<HashMap<String, SharedModel>>,
}

impl Shared {
    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Orchestrates synthesis jobs; the latest request wins.
///
/// Must be driven from within a tokio runtime.
pub struct Synthesizer {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
    last_job: Option<JobId>,
}

impl Synthesizer {
    /// Create a synthesizer and the receiver for its events.
    ///
    /// The cache is injected so several synthesizers (or tests) can share
    /// or isolate sessions.
    pub fn new(
        config: PipelineConfig,
        cache: Arc<AssetCache>,
        backend: Arc<dyn Backend>,
    ) -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            cache,
            backend,
            tracker: Mutex::new(Tracker {
                generation: 0,
                state: JobState::Idle,
            }),
            events,
            phonemizer: OnceCell::new(),
            models: Mutex::new(HashMap::new()),
        });
        (
            Self {
                shared,
                task: None,
                last_job: None,
            },
            rx,
        )
    }

    /// Start synthesizing `request`, superseding any job in flight.
    ///
    /// Empty or whitespace-only text is rejected here, before any job is
    /// created; the running job is left alone in that case.
    pub fn start(&mut self, request: SynthesisRequest) -> Result<JobId, SynthError> {
        if request.text.trim().is_empty() {
            return Err(SynthError::EmptyText);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SynthError::Task(e.to_string()))?;

        let id = self.supersede();
        self.last_job = Some(id);
        let voice_id = request
            .voice_id
            .clone()
            .unwrap_or_else(|| self.shared.config.default_voice.clone());
        log::info!("Starting job {id} with voice {voice_id}");

        let job = Job {
            id,
            shared: self.shared.clone(),
        };
        self.task = Some(runtime.spawn(job.run(request, voice_id)));
        Ok(id)
    }

    /// Cancel the job in flight, if any.
    pub fn cancel(&mut self) {
        self.supersede();
    }

    /// State of the most recent job.
    ///
    /// After a supersede this stays `Cancelled` until the new job starts
    /// loading its assets.
    pub fn state(&self) -> JobState {
        self.shared.tracker().state
    }

    /// Id of the most recently started job.
    pub fn current_job(&self) -> Option<JobId> {
        self.last_job
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.shared.cache
    }

    /// Invalidate the current generation and tear down its task.
    ///
    /// Returns the new generation.
    fn supersede(&mut self) -> JobId {
        let id = {
            let mut tracker = self.shared.tracker();
            if tracker.state.is_running() {
                log::info!(
                    "Job {} superseded during {:?}",
                    tracker.generation,
                    tracker.state
                );
                tracker.state = JobState::Cancelled;
            }
            tracker.generation += 1;
            tracker.generation
        };
        if let Some(task) = self.task.take() {
            task.abort();
        }
        id
    }
}

impl Drop for Synthesizer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Collapse whitespace runs, newlines included, into single spaces.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Wait for the terminal event of `job`, skipping older jobs' events.
///
/// Returns `None` if the channel closes first or an event of a newer job
/// shows that `job` was superseded. That newer event is consumed, but it is
/// never a terminal one: every job announces `LoadingAssets` first.
/// A job stopped with [`Synthesizer::cancel`] and never followed by another
/// leaves this waiting until the synthesizer is dropped.
pub async fn await_result(
    events: &mut mpsc::UnboundedReceiver<PipelineEvent>,
    job: JobId,
) -> Option<Result<AudioContainer, String>> {
    while let Some(event) = events.recv().await {
        if event.job > job {
            log::debug!("Job {job} superseded by job {}", event.job);
            return None;
        }
        if event.job != job {
            continue;
        }
        match event.kind {
            EventKind::Completed(container) => return Some(Ok(container)),
            EventKind::Failed(error) => return Some(Err(error)),
            _ => {}
        }
    }
    None
}

/// Handle held by a running job; every emission is checked against the
/// current generation.
#[derive(Clone)]
struct Job {
    id: JobId,
    shared: Arc<Shared>,
}

impl Job {
    async fn run(self, request: SynthesisRequest, voice_id: String) {
        match self.execute(&request, &voice_id).await {
            Ok(container) => {
                log::info!("Job {} done ({} bytes)", self.id, container.len());
                self.finish(JobState::Done, EventKind::Completed(container));
            }
            Err(SynthError::Cancelled) => {
                log::debug!("Job {} dropped after cancellation", self.id);
            }
            Err(err) => {
                log::warn!("Job {} failed: {err}", self.id);
                self.finish(JobState::Failed, EventKind::Failed(err.to_string()));
            }
        }
    }

    async fn execute(
        &self,
        request: &SynthesisRequest,
        voice_id: &str,
    ) -> Result<AudioContainer, SynthError> {
        self.enter(JobState::LoadingAssets)?;
        let voice = self.load_voice(voice_id).await?;
        let speaker_id = voice.resolve_speaker(request.speaker_id)?;
        let phonemizer = self.load_phonemizer().await?;
        let model = self.load_model(&voice).await?;

        self.enter(JobState::Phonemizing)?;
        let text = normalize_text(&request.text);
        let espeak_voice = voice.config.espeak.voice.clone();
        let diagnostics = self.clone();
        let phonemes = tokio::task::spawn_blocking(move || {
            let mut phonemizer = phonemizer.lock().unwrap_or_else(PoisonError::into_inner);
            phonemizer.phonemize(&text, &espeak_voice, &mut |line| {
                log::warn!("phonemizer: {line}");
                diagnostics.emit(EventKind::Diagnostic(line));
            })
        })
        .await??;
        if phonemes.is_empty() {
            return Err(SynthError::EmptyPhonemes);
        }
        log::debug!("Job {}: {} phoneme ids", self.id, phonemes.len());

        self.enter(JobState::Inferring)?;
        let params = voice.config.inference;
        let samples = tokio::task::spawn_blocking(move || {
            let mut model = model.lock().unwrap_or_else(PoisonError::into_inner);
            model.infer(&InferenceInput {
                phonemes: &phonemes,
                params,
                speaker_id,
            })
        })
        .await??;

        self.enter(JobState::Encoding)?;
        let pcm = PcmBuffer {
            samples,
            sample_rate: voice.sample_rate(),
        };
        log::debug!("Job {}: {:.2}s of audio", self.id, pcm.duration_secs());
        pcm.to_container()
    }

    /// Resolve the voice's asset URLs from the manifest and load its config.
    async fn load_voice(&self, voice_id: &str) -> Result<VoiceModel, SynthError> {
        let config = &self.shared.config;
        let manifest = VoiceManifest::from_slice(&self.fetch(&config.manifest_url).await?)?;
        let files = manifest.get(voice_id)?.files_for(voice_id)?;
        let model_url = join_url(&config.voices_base_url, &files.model);
        let config_url = join_url(&config.voices_base_url, &files.config);
        let model_config = ModelConfig::from_slice(&self.fetch(&config_url).await?)?;
        Ok(VoiceModel {
            voice_id: voice_id.to_string(),
            model_url,
            config_url,
            config: model_config,
        })
    }

    async fn load_phonemizer(&self) -> Result<SharedPhonemizer, SynthError> {
        let shared = &self.shared;
        let phonemizer = shared
            .phonemizer
            .get_or_try_init(|| async {
                let engine = self.fetch(&shared.config.phonemizer_engine_url).await?;
                let data = self.fetch(&shared.config.phonemizer_data_url).await?;
                let backend = shared.backend.clone();
                let loaded =
                    tokio::task::spawn_blocking(move || backend.load_phonemizer(&engine, &data))
                        .await??;
                log::info!("Phonemizer loaded");
                Ok::<_, SynthError>(Arc::new(Mutex::new(loaded)))
            })
            .await?;
        Ok(phonemizer.clone())
    }

    async fn load_model(&self, voice: &VoiceModel) -> Result<SharedModel, SynthError> {
        let cached = self.models().get(&voice.model_url).cloned();
        if let Some(model) = cached {
            return Ok(model);
        }

        let weights = self.fetch(&voice.model_url).await?;
        let backend = self.shared.backend.clone();
        let config = voice.config.clone();
        let loaded = tokio::task::spawn_blocking(move || backend.load_model(&weights, &config))
            .await??;
        log::info!("Loaded model for voice {}", voice.voice_id);

        Ok(self
            .models()
            .entry(voice.model_url.clone())
            .or_insert_with(|| Arc::new(Mutex::new(loaded)))
            .clone())
    }

    fn models(&self) -> MutexGuard<'_, HashMap<String, SharedModel>> {
        self.shared
            .models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch(&self, url: &str) -> Result<Asset, SynthError> {
        self.ensure_current()?;
        let job = self.clone();
        let relay = move |event: FetchEvent| {
            job.emit(EventKind::Fetch(event));
        };
        self.shared.cache.fetch(url, &relay).await
    }

    fn ensure_current(&self) -> Result<(), SynthError> {
        if self.shared.tracker().generation == self.id {
            Ok(())
        } else {
            Err(SynthError::Cancelled)
        }
    }

    /// Move to `state`, failing with `Cancelled` if superseded.
    fn enter(&self, state: JobState) -> Result<(), SynthError> {
        let mut tracker = self.shared.tracker();
        if tracker.generation != self.id {
            return Err(SynthError::Cancelled);
        }
        log::debug!("Job {}: {:?} -> {:?}", self.id, tracker.state, state);
        tracker.state = state;
        let _ = self.shared.events.send(PipelineEvent {
            job: self.id,
            kind: EventKind::State(state),
        });
        Ok(())
    }

    /// Send `kind` unless the job has been superseded.
    fn emit(&self, kind: EventKind) -> bool {
        let tracker = self.shared.tracker();
        if tracker.generation != self.id {
            return false;
        }
        self.shared
            .events
            .send(PipelineEvent { job: self.id, kind })
            .is_ok()
    }

    fn finish(&self, state: JobState, kind: EventKind) {
        let mut tracker = self.shared.tracker();
        if tracker.generation != self.id {
            return;
        }
        tracker.state = state;
        let _ = self
            .shared
            .events
            .send(PipelineEvent { job: self.id, kind });
        let _ = self.shared.events.send(PipelineEvent {
            job: self.id,
            kind: EventKind::State(state),
        });
    }
}
