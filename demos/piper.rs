use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use piper_synth::{
    config::PipelineConfigBuilder,
    engines::piper::{PiperBackend, PiperModelParams},
    pipeline::{EventKind, SynthesisRequest, Synthesizer},
    AssetCache, FetchEvent,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let assets = PathBuf::from("assets");
    let config = PipelineConfigBuilder::default()
        .manifest_url(assets.join("voices.json").display().to_string())
        .voices_base_url(format!("{}/voices/", assets.display()))
        .phonemizer_engine_url(assets.join("piper_phonemize").display().to_string())
        .phonemizer_data_url(assets.join("espeak-ng-data.zip").display().to_string())
        .build()?;

    let backend = PiperBackend::new(std::env::temp_dir().join("piper-synth"))
        .with_params(PiperModelParams::default());
    let (mut synth, mut events) =
        Synthesizer::new(config, Arc::new(AssetCache::default()), Arc::new(backend));

    let text = "Hello! This is Piper, a fast, local neural text to speech system.";

    let synth_start = Instant::now();
    let job = synth.start(SynthesisRequest::new(text))?;

    while let Some(event) = events.recv().await {
        if event.job != job {
            continue;
        }
        match event.kind {
            EventKind::Fetch(fetch @ FetchEvent::Progress { .. }) => {
                if let Some(fraction) = fetch.fraction() {
                    println!("fetching {} {:.0}%", fetch.url(), fraction * 100.0);
                }
            }
            EventKind::State(state) => println!("state: {state:?}"),
            EventKind::Diagnostic(line) => println!("phonemizer: {line}"),
            EventKind::Completed(wav) => {
                let synth_dur = synth_start.elapsed();
                let audio_duration = wav.duration_secs()?;
                println!(
                    "Synthesized {:.2}s audio in {:.2?} ({:.1}x real-time)",
                    audio_duration,
                    synth_dur,
                    audio_duration / synth_dur.as_secs_f64()
                );
                wav.write_wav(&PathBuf::from("output.wav"))?;
                println!("Saved to output.wav");
                break;
            }
            EventKind::Failed(error) => {
                eprintln!("Synthesis failed: {error}");
                break;
            }
            EventKind::Fetch(_) => {}
        }
    }

    Ok(())
}
