//! # Analysis Pipeline
//!
//! Turns the `[cycle][microphone]` recordings of one measurement into the
//! matching `[cycle][microphone]` matrix of [`AcousticParameters`].
//!
//! Every (cycle, microphone) unit is independent, so units are processed in
//! parallel on the rayon pool. Output order always matches input order.

use super::decode::{decode_wav, DecodedAudio};
use super::filter_bank::OctaveBandFilterBank;
use super::impulse::ImpulseResponseExtractor;
use super::parameters::{AcousticParameterCalculator, AcousticParameters};
use super::{AnalysisError, AnalysisResult};
use rayon::prelude::*;
use tracing::debug;

/// `values[cycle][microphone]`.
pub type ResultMatrix = Vec<Vec<AcousticParameters>>;

#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    reference: Vec<f64>,
    sample_rate: u32,
    extractor: ImpulseResponseExtractor,
    calculator: AcousticParameterCalculator,
    include_impulse_response: bool,
}

impl AnalysisPipeline {
    /// Build a pipeline for one reference excitation at `sample_rate`.
    pub fn new(
        reference: Vec<f64>,
        sample_rate: u32,
        threshold_fraction: f64,
        include_impulse_response: bool,
    ) -> AnalysisResult<Self> {
        if reference.is_empty() {
            return Err(AnalysisError::EmptySignal);
        }

        let bank = OctaveBandFilterBank::new(sample_rate)?;

        Ok(Self {
            reference,
            sample_rate,
            extractor: ImpulseResponseExtractor::new(threshold_fraction),
            calculator: AcousticParameterCalculator::new(bank),
            include_impulse_response,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Band centers in the order every per-band sequence uses.
    pub fn center_frequencies(&self) -> &[f64] {
        self.calculator.filter_bank().center_frequencies()
    }

    /// Analyse a single recording.
    pub fn analyze_recording(&self, recording: &DecodedAudio) -> AnalysisResult<AcousticParameters> {
        if recording.sample_rate != self.sample_rate {
            return Err(AnalysisError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: recording.sample_rate,
            });
        }

        let ir = self.extractor.extract(&self.reference, &recording.samples)?;
        Ok(self.calculator.compute(&ir, self.include_impulse_response))
    }

    /// Analyse decoded recordings, preserving the `[cycle][microphone]` layout.
    pub fn analyze(&self, recordings: &[Vec<DecodedAudio>]) -> AnalysisResult<ResultMatrix> {
        debug!(
            cycles = recordings.len(),
            bands = self.center_frequencies().len(),
            "Running analysis pipeline"
        );

        recordings
            .par_iter()
            .map(|cycle| {
                cycle
                    .par_iter()
                    .map(|recording| self.analyze_recording(recording))
                    .collect::<AnalysisResult<Vec<_>>>()
            })
            .collect()
    }

    /// Decode encoded payloads and analyse them.
    pub fn analyze_payloads(&self, payloads: &[Vec<Vec<u8>>]) -> AnalysisResult<ResultMatrix> {
        let decoded = payloads
            .par_iter()
            .map(|cycle| {
                cycle
                    .par_iter()
                    .map(|payload| decode_wav(payload))
                    .collect::<AnalysisResult<Vec<_>>>()
            })
            .collect::<AnalysisResult<Vec<_>>>()?;

        self.analyze(&decoded)
    }
}
