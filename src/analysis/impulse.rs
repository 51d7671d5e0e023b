//! # Impulse Response Extraction
//!
//! Deconvolves a recording against the reference excitation in the frequency
//! domain, then moves the impulse onset to index 0. Circular deconvolution
//! wraps any energy arriving "before" the reference to the end of the buffer,
//! and every downstream decay computation assumes the onset sits at the front.

use super::{AnalysisError, AnalysisResult};
use realfft::RealFftPlanner;

/// Default threshold as a fraction of the impulse-response peak.
pub const DEFAULT_THRESHOLD_FRACTION: f64 = 1e-5;

#[derive(Debug, Clone, Copy)]
pub struct ImpulseResponseExtractor {
    threshold_fraction: f64,
}

impl Default for ImpulseResponseExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_FRACTION)
    }
}

impl ImpulseResponseExtractor {
    pub fn new(threshold_fraction: f64) -> Self {
        Self { threshold_fraction }
    }

    pub fn threshold_fraction(&self) -> f64 {
        self.threshold_fraction
    }

    /// Extract the impulse response of `recording` relative to `reference`.
    ///
    /// Both signals are truncated to the shorter length first. The transfer
    /// function is the plain bin-wise quotient with no regularisation.
    pub fn extract(&self, reference: &[f64], recording: &[f64]) -> AnalysisResult<Vec<f64>> {
        let len = reference.len().min(recording.len());
        if len == 0 {
            return Err(AnalysisError::EmptySignal);
        }

        let mut planner = RealFftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);

        let mut input = reference[..len].to_vec();
        let mut reference_spectrum = forward.make_output_vec();
        forward
            .process(&mut input, &mut reference_spectrum)
            .map_err(|e| AnalysisError::Fft(e.to_string()))?;

        let mut input = recording[..len].to_vec();
        let mut transfer = forward.make_output_vec();
        forward
            .process(&mut input, &mut transfer)
            .map_err(|e| AnalysisError::Fft(e.to_string()))?;

        for (bin, reference_bin) in transfer.iter_mut().zip(&reference_spectrum) {
            *bin /= *reference_bin;
        }
        // The inverse real transform requires purely real DC and Nyquist bins.
        if let Some(first) = transfer.first_mut() {
            first.im = 0.0;
        }
        if len % 2 == 0 {
            if let Some(last) = transfer.last_mut() {
                last.im = 0.0;
            }
        }

        let mut ir = inverse.make_output_vec();
        inverse
            .process(&mut transfer, &mut ir)
            .map_err(|e| AnalysisError::Fft(e.to_string()))?;

        let scale = 1.0 / len as f64;
        ir.iter_mut().for_each(|v| *v *= scale);

        Ok(self.align_onset(ir))
    }

    /// Rotate a raw circular impulse response so the onset comes first.
    ///
    /// ## Steps:
    /// 1. `end_idx`: last index (above 0) whose magnitude exceeds the threshold.
    ///    Without one, the tail from the peak is returned instead.
    /// 2. Walking back from `end_idx`, the first above-threshold sample that
    ///    follows a below-threshold gap becomes `start_idx` (default 0)
    /// 3. Rotate left by `start_idx`
    pub fn align_onset(&self, mut ir: Vec<f64>) -> Vec<f64> {
        let (peak_index, peak) = ir
            .iter()
            .enumerate()
            .fold((0, 0.0f64), |(best_i, best), (i, v)| {
                if v.abs() > best {
                    (i, v.abs())
                } else {
                    (best_i, best)
                }
            });
        let threshold = self.threshold_fraction * peak;
        let above = |v: f64| v.abs() > threshold;

        let end_idx = match (1..ir.len()).rev().find(|&i| above(ir[i])) {
            Some(i) => i,
            None => return ir.split_off(peak_index),
        };

        let mut found_low = false;
        let mut start_idx = 0;
        for i in (1..end_idx).rev() {
            if !above(ir[i]) {
                found_low = true;
            } else if found_low {
                start_idx = i;
                break;
            }
        }

        ir.rotate_left(start_idx);
        ir
    }
}

/// Circular convolution of `x` with a short kernel, used to build recordings
/// with a known impulse response.
#[cfg(test)]
pub(crate) fn circular_convolve(x: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = x.len();
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, h)| h * x[(i + n - k % n) % n])
                .sum()
        })
        .collect()
}
