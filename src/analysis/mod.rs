//! # Acoustic Analysis
//!
//! Deterministic signal-processing chain that turns a known excitation signal and
//! the recordings made while it played into per-band room-acoustic parameters.
//!
//! ## Processing Chain:
//! 1. **decode**: encoded WAV payload → mono `f64` samples
//! 2. **impulse**: recording ÷ excitation in the frequency domain → impulse response
//! 3. **filter_bank**: 1/3-octave Butterworth band-pass filters
//! 4. **parameters**: Schroeder decay, RT60, C50, C80, D50 and G per band
//! 5. **pipeline**: fan-out over every (cycle, microphone) recording
//!
//! `excitation` produces the reference sweep and `calibration` estimates device
//! latency by cross-correlation.

pub mod calibration;
pub mod decode;
pub mod excitation;
pub mod filter_bank;
pub mod impulse;
pub mod parameters;
pub mod pipeline;

use thiserror::Error;

/// Errors that can occur while decoding or analysing audio.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Failed to decode audio payload: {0}")]
    Decode(#[from] hound::Error),

    #[error("Failed to encode audio: {0}")]
    Encode(String),

    #[error("Signal is empty")]
    EmptySignal,

    #[error("Sample rate mismatch: expected {expected} Hz, recording has {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    #[error("FFT failed: {0}")]
    Fft(String),

    #[error("Invalid filter design: {0}")]
    FilterDesign(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;
