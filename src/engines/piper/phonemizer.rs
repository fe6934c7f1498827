use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::SynthError;
use crate::{PhonemeSequence, Phonemizer};

/// File name the engine binary is installed under.
pub const ENGINE_FILE: &str = "piper_phonemize";

/// Directory the espeak-ng rule tables are extracted into.
pub const DATA_DIR: &str = "espeak-ng-data";

#[derive(Serialize)]
struct PhonemizeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct PhonemizeResponse {
    phoneme_ids: Vec<i64>,
}

/// Phonemizer backed by the `piper_phonemize` executable.
///
/// The engine is invoked once per request as
/// `piper_phonemize -l <voice> --input '[{"text": ...}]' --espeak_data <dir>`
/// and answers with one JSON line per input item carrying `phoneme_ids`.
#[derive(Debug, Clone)]
pub struct PiperPhonemizer {
    program: PathBuf,
    espeak_data: PathBuf,
}

impl PiperPhonemizer {
    /// Use an already installed engine and data directory.
    pub fn new(program: PathBuf, espeak_data: PathBuf) -> Self {
        Self {
            program,
            espeak_data,
        }
    }

    /// Materialize the engine binary and unpack the zipped rule tables
    /// into `dir`.
    pub fn install(dir: &Path, engine: &[u8], data: &[u8]) -> Result<Self, SynthError> {
        fs::create_dir_all(dir)?;

        let program = dir.join(ENGINE_FILE);
        fs::write(&program, engine)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&program, fs::Permissions::from_mode(0o755))?;
        }

        let data_root = dir.join(DATA_DIR);
        let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(|e| {
            SynthError::PhonemizerFailed(format!("Failed to open phonemizer data archive: {e}"))
        })?;
        archive.extract(&data_root).map_err(|e| {
            SynthError::PhonemizerFailed(format!("Failed to extract phonemizer data: {e}"))
        })?;

        // Archives usually wrap their contents in a top-level espeak-ng-data/ folder.
        let nested = data_root.join(DATA_DIR);
        let espeak_data = if nested.is_dir() { nested } else { data_root };

        log::info!(
            "Installed phonemizer at {} (data: {})",
            program.display(),
            espeak_data.display()
        );
        Ok(Self::new(program, espeak_data))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn espeak_data(&self) -> &Path {
        &self.espeak_data
    }
}

impl Phonemizer for PiperPhonemizer {
    fn phonemize(
        &mut self,
        text: &str,
        voice: &str,
        diagnostics: &mut dyn FnMut(String),
    ) -> Result<PhonemeSequence, SynthError> {
        let output = Command::new(&self.program)
            .arg("-l")
            .arg(voice)
            .arg("--input")
            .arg(request_payload(text)?)
            .arg("--espeak_data")
            .arg(&self.espeak_data)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SynthError::PhonemizerFailed(format!(
                        "engine not found at {}",
                        self.program.display()
                    ))
                } else {
                    SynthError::Io(e)
                }
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            diagnostics(line.to_string());
        }

        if !output.status.success() {
            return Err(SynthError::PhonemizerFailed(format!(
                "{} exited with code {:?}: {}",
                ENGINE_FILE,
                output.status.code(),
                stderr.trim()
            )));
        }

        let ids = parse_phoneme_ids(&String::from_utf8_lossy(&output.stdout))?;
        Ok(PhonemeSequence::new(ids))
    }
}

fn request_payload(text: &str) -> Result<String, SynthError> {
    serde_json::to_string(&[PhonemizeRequest { text }])
        .map_err(|e| SynthError::PhonemizerFailed(format!("Failed to encode request: {e}")))
}

/// Collect the `phoneme_ids` of every non-empty output line, in order.
fn parse_phoneme_ids(stdout: &str) -> Result<Vec<i64>, SynthError> {
    let mut ids = Vec::new();
    let mut seen_line = false;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let response: PhonemizeResponse = serde_json::from_str(line)
            .map_err(|_| SynthError::PhonemizerOutput(line.to_string()))?;
        ids.extend(response.phoneme_ids);
        seen_line = true;
    }
    if !seen_line {
        return Err(SynthError::PhonemizerOutput(stdout.to_string()));
    }
    Ok(ids)
}
