//! Speech synthesis engines.
//!
//! This module contains the concrete phonemizer and acoustic model backends.
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `piper` - Piper VITS voices (ONNX format, `piper_phonemize` engine)

#[cfg(feature = "piper")]
pub mod piper;
