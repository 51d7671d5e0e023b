//! Device latency estimation by full cross-correlation.
//!
//! The correlation is computed through the FFT on a buffer of
//! `len(recorded) + len(original) - 1` samples so that it matches the linear
//! ("full") correlation with no circular aliasing.

use super::{AnalysisError, AnalysisResult};
use realfft::RealFftPlanner;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct LatencyEstimate {
    pub lag_samples: i64,
    pub latency_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Vec<f64>>,
}

fn peak_normalized(signal: &[f64], name: &str) -> AnalysisResult<Vec<f64>> {
    let peak = signal.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if !(peak > 0.0) || !peak.is_finite() {
        return Err(AnalysisError::InvalidInput(format!(
            "{} signal is silent or not finite",
            name
        )));
    }
    Ok(signal.iter().map(|v| v / peak).collect())
}

/// Full cross-correlation of `recorded` against `original`.
///
/// Index `j` holds the correlation at lag `j - (len(original) - 1)`.
pub fn cross_correlate(recorded: &[f64], original: &[f64]) -> AnalysisResult<Vec<f64>> {
    if recorded.is_empty() || original.is_empty() {
        return Err(AnalysisError::EmptySignal);
    }

    let n = recorded.len() + original.len() - 1;
    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(n);

    let mut padded = vec![0.0; n];
    padded[..recorded.len()].copy_from_slice(recorded);
    let mut recorded_spectrum = forward.make_output_vec();
    forward
        .process(&mut padded, &mut recorded_spectrum)
        .map_err(|e| AnalysisError::Fft(e.to_string()))?;

    let mut padded = vec![0.0; n];
    padded[..original.len()].copy_from_slice(original);
    let mut original_spectrum = forward.make_output_vec();
    forward
        .process(&mut padded, &mut original_spectrum)
        .map_err(|e| AnalysisError::Fft(e.to_string()))?;

    for (r, o) in recorded_spectrum.iter_mut().zip(&original_spectrum) {
        *r *= o.conj();
    }
    if let Some(first) = recorded_spectrum.first_mut() {
        first.im = 0.0;
    }
    if n % 2 == 0 {
        if let Some(last) = recorded_spectrum.last_mut() {
            last.im = 0.0;
        }
    }

    let mut circular = inverse.make_output_vec();
    inverse
        .process(&mut recorded_spectrum, &mut circular)
        .map_err(|e| AnalysisError::Fft(e.to_string()))?;

    // Circular index of lag k is k for k >= 0 and n + k for k < 0.
    let scale = 1.0 / n as f64;
    let offset = original.len() - 1;
    Ok((0..n)
        .map(|j| circular[(j + n - offset) % n] * scale)
        .collect())
}

/// Estimate how many samples `recorded` lags behind `original`.
pub fn estimate_latency(
    original: &[f64],
    recorded: &[f64],
    sample_rate: u32,
    include_correlation: bool,
) -> AnalysisResult<LatencyEstimate> {
    if sample_rate == 0 {
        return Err(AnalysisError::InvalidInput(
            "sample rate must be greater than 0".to_string(),
        ));
    }

    let original = peak_normalized(original, "original")?;
    let recorded = peak_normalized(recorded, "recorded")?;
    let correlation = cross_correlate(&recorded, &original)?;

    // First maximum wins.
    let (peak_index, _) = correlation
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |(best_i, best), (i, &v)| {
            if v > best {
                (i, v)
            } else {
                (best_i, best)
            }
        });

    let lag_samples = peak_index as i64 - (original.len() as i64 - 1);
    let latency = lag_samples as f64 / sample_rate as f64;

    Ok(LatencyEstimate {
        lag_samples,
        latency_seconds: (latency * 1e6).round() / 1e6,
        correlation: include_correlation.then_some(correlation),
    })
}
