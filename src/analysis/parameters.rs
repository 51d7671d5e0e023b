//! # Room-Acoustic Parameters
//!
//! Per-band parameters computed from a band-filtered impulse response.
//!
//! ## Parameters:
//! - **RT60**: reverberation time extrapolated from the Schroeder decay
//! - **C50 / C80**: early-to-late energy ratio split at 50 ms / 80 ms (dB)
//! - **D50**: share of energy arriving within 50 ms (%)
//! - **G**: band energy relative to an equal share of the broadband energy (dB)
//!
//! Degenerate inputs produce `f64::NAN` rather than errors. NaN values are
//! serialised as JSON `null`.

use super::filter_bank::OctaveBandFilterBank;
use serde::Serialize;

/// Guards the logarithm of a fully decayed curve.
const EDC_EPSILON: f64 = 1e-12;

/// Minimum number of samples a regression span must contain.
const MIN_FIT_SAMPLES: usize = 3;

/// Parameters for one (cycle, microphone) analysis unit, one entry per band.
#[derive(Debug, Clone, Serialize)]
pub struct AcousticParameters {
    pub rt60: Vec<f64>,
    pub c50: Vec<f64>,
    pub c80: Vec<f64>,
    pub g: Vec<f64>,
    pub d50: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impulse_response: Option<Vec<f64>>,
}

impl AcousticParameters {
    fn with_capacity(bands: usize) -> Self {
        Self {
            rt60: Vec::with_capacity(bands),
            c50: Vec::with_capacity(bands),
            c80: Vec::with_capacity(bands),
            g: Vec::with_capacity(bands),
            d50: Vec::with_capacity(bands),
            impulse_response: None,
        }
    }

    /// Number of bands the record covers.
    pub fn band_count(&self) -> usize {
        self.rt60.len()
    }
}

fn energy(signal: &[f64]) -> f64 {
    signal.iter().map(|v| v * v).sum()
}

/// Schroeder backward integration in dB relative to the total energy.
///
/// Returns `None` for a signal without energy.
pub fn energy_decay_curve(ir: &[f64]) -> Option<Vec<f64>> {
    let mut remaining: Vec<f64> = Vec::with_capacity(ir.len());
    let mut acc = 0.0;
    for v in ir.iter().rev() {
        acc += v * v;
        remaining.push(acc);
    }
    remaining.reverse();

    let total = *remaining.first()?;
    if !(total > 0.0) {
        return None;
    }

    Some(
        remaining
            .into_iter()
            .map(|e| 10.0 * (e / total + EDC_EPSILON).log10())
            .collect(),
    )
}

/// First index at which the curve is at or below `level_db`, or 0 if never.
fn first_index_at_or_below(edc_db: &[f64], level_db: f64) -> usize {
    edc_db.iter().position(|&v| v <= level_db).unwrap_or(0)
}

/// Least-squares slope (dB per second) of `edc_db[start..end]`.
fn decay_slope(edc_db: &[f64], start: usize, end: usize, sample_rate: f64) -> Option<f64> {
    if end <= start || end - start < MIN_FIT_SAMPLES {
        return None;
    }

    let span = &edc_db[start..end];
    let n = span.len() as f64;
    let times = (start..end).map(|i| i as f64 / sample_rate);
    let mean_t = times.clone().sum::<f64>() / n;
    let mean_db = span.iter().sum::<f64>() / n;

    let (cov, var) = times
        .zip(span)
        .fold((0.0, 0.0), |(cov, var), (t, db)| {
            let dt = t - mean_t;
            (cov + dt * (db - mean_db), var + dt * dt)
        });

    if var > 0.0 {
        Some(cov / var)
    } else {
        None
    }
}

/// Reverberation time in seconds.
///
/// Prefers the -5 → -35 dB span (T30, doubled); falls back to -5 → -25 dB
/// (T20, tripled). NaN when neither span is usable.
pub fn reverberation_time(ir: &[f64], sample_rate: f64) -> f64 {
    let Some(edc) = energy_decay_curve(ir) else {
        return f64::NAN;
    };

    let i5 = first_index_at_or_below(&edc, -5.0);
    let i25 = first_index_at_or_below(&edc, -25.0);
    let i35 = first_index_at_or_below(&edc, -35.0);

    let spans = [(i35, -35.0, 30.0, 2.0), (i25, -25.0, 20.0, 3.0)];
    for (end, level, range_db, factor) in spans {
        if end > i5 && edc[end] <= level {
            if let Some(slope) = decay_slope(&edc, i5, end, sample_rate) {
                if slope < 0.0 {
                    return (-range_db / slope) * factor;
                }
            }
        }
    }

    f64::NAN
}

fn split_index(split_ms: f64, sample_rate: f64) -> usize {
    (split_ms / 1000.0 * sample_rate).round() as usize
}

/// Clarity in dB for an early/late split at `split_ms`.
///
/// Undefined without late energy; no early energy gives negative infinity.
pub fn clarity(ir: &[f64], sample_rate: f64, split_ms: f64) -> f64 {
    let split = split_index(split_ms, sample_rate).min(ir.len());
    let early = energy(&ir[..split]);
    let late = energy(&ir[split..]);

    if late > 0.0 {
        10.0 * (early / late).log10()
    } else {
        f64::NAN
    }
}

/// Definition D50 in percent.
pub fn definition(ir: &[f64], sample_rate: f64) -> f64 {
    let split = split_index(50.0, sample_rate);
    let total = energy(ir);
    if !(total > 0.0) || split > ir.len() {
        return f64::NAN;
    }

    100.0 * energy(&ir[..split]) / total
}

/// Strength G in dB against an equal share of the broadband energy.
pub fn strength(band_ir: &[f64], broadband_energy: f64, band_count: usize) -> f64 {
    if band_count == 0 {
        return f64::NAN;
    }
    let band_energy = energy(band_ir);
    let reference = broadband_energy / band_count as f64;

    if band_energy > 0.0 && reference > 0.0 {
        10.0 * (band_energy / reference).log10()
    } else {
        f64::NAN
    }
}

/// Band-wise parameter computation over a prepared filter bank.
#[derive(Debug, Clone)]
pub struct AcousticParameterCalculator {
    bank: OctaveBandFilterBank,
}

impl AcousticParameterCalculator {
    pub fn new(bank: OctaveBandFilterBank) -> Self {
        Self { bank }
    }

    pub fn filter_bank(&self) -> &OctaveBandFilterBank {
        &self.bank
    }

    /// Compute one record for an unfiltered impulse response.
    pub fn compute(&self, ir: &[f64], include_impulse_response: bool) -> AcousticParameters {
        let fs = self.bank.sample_rate() as f64;
        let band_count = self.bank.len();
        let broadband = energy(ir);

        let mut params = AcousticParameters::with_capacity(band_count);
        for filter in self.bank.filters() {
            let band = filter.apply(ir);
            params.rt60.push(reverberation_time(&band, fs));
            params.c50.push(clarity(&band, fs, 50.0));
            params.c80.push(clarity(&band, fs, 80.0));
            params.g.push(strength(&band, broadband, band_count));
            params.d50.push(definition(&band, fs));
        }

        if include_impulse_response {
            params.impulse_response = Some(ir.to_vec());
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential_decay(rt60: f64, sample_rate: f64, len: usize) -> Vec<f64> {
        // Amplitude falls 60 dB (energy) over rt60 seconds.
        let k = 3.0 * 10f64.ln() / (rt60 * sample_rate);
        (0..len).map(|n| (-k * n as f64).exp()).collect()
    }

    #[test]
    fn test_edc_starts_at_zero_db_and_decreases() {
        let ir = exponential_decay(0.5, 8000.0, 8000);
        let edc = energy_decay_curve(&ir).unwrap();

        assert!(edc[0].abs() < 1e-9);
        assert!(edc.windows(2).all(|w| w[1] <= w[0]));
        assert!(energy_decay_curve(&[0.0; 16]).is_none());
    }

    #[test]
    fn test_rt60_of_exponential_decay() {
        let ir = exponential_decay(0.5, 8000.0, 8000);
        let rt60 = reverberation_time(&ir, 8000.0);
        assert!((rt60 - 0.5).abs() < 0.01, "rt60 = {}", rt60);
    }

    #[test]
    fn test_rt60_falls_back_to_t20() {
        // Truncated so the decay curve ends near -30 dB.
        let full = exponential_decay(0.5, 1000.0, 2000);
        let ir = &full[..121];
        let edc = energy_decay_curve(ir).unwrap();
        let last = edc[edc.len() - 1];
        assert!(last > -35.0 && last <= -25.0, "last = {}", last);

        let rt60 = reverberation_time(ir, 1000.0);
        assert!(rt60.is_finite() && rt60 > 0.0, "rt60 = {}", rt60);
    }

    #[test]
    fn test_rt60_undefined_without_decay() {
        let mut ir = vec![0.0; 100];
        ir[99] = 1.0;
        assert!(reverberation_time(&ir, 8000.0).is_nan());
        assert!(reverberation_time(&[0.0; 100], 8000.0).is_nan());
        assert!(reverberation_time(&[], 8000.0).is_nan());
    }

    #[test]
    fn test_clarity_and_definition_of_two_equal_impulses() {
        let fs = 8000.0;
        let mut ir = vec![0.0; 1600];
        ir[0] = 1.0;
        ir[800] = 1.0;

        assert!(clarity(&ir, fs, 50.0).abs() < 1e-12);
        assert!(clarity(&ir, fs, 80.0).abs() < 1e-12);
        assert!((definition(&ir, fs) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_impulse_has_no_late_energy() {
        let fs = 8000.0;
        let mut ir = vec![0.0; 1600];
        ir[0] = 1.0;

        assert!(clarity(&ir, fs, 50.0).is_nan());
        assert!((definition(&ir, fs) - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_late_only_energy_has_infinitely_low_clarity() {
        let fs = 8000.0;
        let mut ir = vec![0.0; 1600];
        ir[1000] = 1.0;

        assert_eq!(clarity(&ir, fs, 50.0), f64::NEG_INFINITY);
        assert_eq!(clarity(&ir, fs, 80.0), f64::NEG_INFINITY);
        assert_eq!(definition(&ir, fs), 0.0);
    }

    #[test]
    fn test_definition_undefined_for_short_buffer() {
        // 50 ms at 8000 Hz is 400 samples.
        let ir = vec![1.0; 100];
        assert!(definition(&ir, 8000.0).is_nan());
        assert!(definition(&[0.0; 1000], 8000.0).is_nan());
    }

    #[test]
    fn test_strength_against_equal_share() {
        let band = vec![1.0, 1.0];
        // Band energy 2.0 equals broadband 8.0 split over 4 bands.
        assert!(strength(&band, 8.0, 4).abs() < 1e-12);
        assert!((strength(&band, 80.0, 4) + 10.0).abs() < 1e-9);
        assert!(strength(&[0.0], 8.0, 4).is_nan());
        assert!(strength(&band, 0.0, 4).is_nan());
    }

    #[test]
    fn test_calculator_emits_one_value_per_band() {
        let bank = OctaveBandFilterBank::new(8000).unwrap();
        let calculator = AcousticParameterCalculator::new(bank);
        let ir = exponential_decay(0.3, 8000.0, 4000);

        let params = calculator.compute(&ir, true);
        assert_eq!(params.band_count(), 16);
        assert_eq!(params.c50.len(), 16);
        assert_eq!(params.c80.len(), 16);
        assert_eq!(params.g.len(), 16);
        assert_eq!(params.d50.len(), 16);
        assert_eq!(params.impulse_response.as_ref().map(Vec::len), Some(4000));

        let json = serde_json::to_value(calculator.compute(&[0.0; 512], false)).unwrap();
        assert!(json["rt60"][0].is_null());
        assert!(json.get("impulse_response").is_none());
    }
}
