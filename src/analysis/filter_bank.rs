//! # 1/3-Octave Filter Bank
//!
//! Butterworth band-pass filters around the standard 1/3-octave center
//! frequencies, realised as cascaded biquad sections (Direct Form II Transposed,
//! `f64` throughout).
//!
//! ## Design:
//! 1. Prewarp the band edges for the bilinear transform
//! 2. Take the Butterworth low-pass prototype poles
//! 3. Low-pass → band-pass transform (each prototype pole yields two poles)
//! 4. Map every pole to the z-plane; each conjugate pair becomes one section
//!    with zeros at z = 1 and z = -1
//! 5. Normalise the cascade to unity gain at the band center

use super::{AnalysisError, AnalysisResult};
use realfft::num_complex::Complex;
use std::f64::consts::PI;

/// Candidate 1/3-octave center frequencies in Hz.
pub const CANDIDATE_CENTER_FREQUENCIES: [f64; 18] = [
    100.0, 125.0, 160.0, 200.0, 250.0, 315.0, 400.0, 500.0, 630.0, 800.0, 1000.0, 1250.0,
    1600.0, 2000.0, 2500.0, 3150.0, 4000.0, 5000.0,
];

/// Order of every band-pass filter in the bank.
pub const BAND_FILTER_ORDER: usize = 4;

/// Upper band edges are kept below this fraction of Nyquist.
const MAX_EDGE_FRACTION_OF_NYQUIST: f64 = 0.99;

/// Single second-order section, coefficients normalised so a0 = 1.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Filter `buffer` in place starting from a zero state.
    fn process_inplace(&self, buffer: &mut [f64]) {
        let mut z1 = 0.0;
        let mut z2 = 0.0;
        for sample in buffer.iter_mut() {
            let input = *sample;
            let output = self.b0 * input + z1;
            z1 = self.b1 * input - self.a1 * output + z2;
            z2 = self.b2 * input - self.a2 * output;
            *sample = output;
        }
    }

    fn response(&self, omega: f64) -> Complex<f64> {
        let z1 = Complex::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        (z1 * self.b1 + z2 * self.b2 + self.b0) / (z1 * self.a1 + z2 * self.a2 + 1.0)
    }
}

/// Butterworth band-pass filter as a cascade of biquads.
#[derive(Debug, Clone, PartialEq)]
pub struct BandPassFilter {
    sections: Vec<Biquad>,
    low_hz: f64,
    high_hz: f64,
}

impl BandPassFilter {
    /// Design a Butterworth band-pass of the given (even, multiple of 4) order.
    pub fn butterworth(
        order: usize,
        low_hz: f64,
        high_hz: f64,
        sample_rate: f64,
    ) -> AnalysisResult<Self> {
        if order == 0 || order % 4 != 0 {
            return Err(AnalysisError::FilterDesign(format!(
                "band-pass order must be a positive multiple of 4, got {}",
                order
            )));
        }
        let nyquist = sample_rate / 2.0;
        if !(low_hz > 0.0 && low_hz < high_hz && high_hz < nyquist) {
            return Err(AnalysisError::FilterDesign(format!(
                "band edges {:.1}-{:.1} Hz are invalid for {} Hz sampling",
                low_hz, high_hz, sample_rate
            )));
        }

        let fs2 = 2.0 * sample_rate;
        let w_low = fs2 * (PI * low_hz / sample_rate).tan();
        let w_high = fs2 * (PI * high_hz / sample_rate).tan();
        let bandwidth = w_high - w_low;
        let w0_sq = w_low * w_high;

        let prototype_order = order / 2;
        let mut sections = Vec::with_capacity(prototype_order);

        // Only upper-half-plane prototype poles; their conjugates give the
        // conjugate band-pass poles that complete each section.
        for k in 0..prototype_order / 2 {
            let theta = PI * (2 * k + prototype_order + 1) as f64 / (2 * prototype_order) as f64;
            let pole = Complex::from_polar(1.0, theta);
            let scaled = pole * bandwidth;
            let root = (scaled * scaled - 4.0 * w0_sq).sqrt();

            for analog in [(scaled + root) / 2.0, (scaled - root) / 2.0] {
                let digital = (analog + fs2) / (-analog + fs2);
                sections.push(Biquad {
                    b0: 1.0,
                    b1: 0.0,
                    b2: -1.0,
                    a1: -2.0 * digital.re,
                    a2: digital.norm_sqr(),
                });
            }
        }

        let center_omega = 2.0 * (w0_sq.sqrt() / fs2).atan();
        let magnitude: f64 = sections
            .iter()
            .map(|s| s.response(center_omega).norm())
            .product();
        if !(magnitude.is_finite() && magnitude > 0.0) {
            return Err(AnalysisError::FilterDesign(format!(
                "degenerate response for band {:.1}-{:.1} Hz",
                low_hz, high_hz
            )));
        }

        let per_section_gain = magnitude.powf(-1.0 / sections.len() as f64);
        for section in &mut sections {
            section.b0 *= per_section_gain;
            section.b2 *= per_section_gain;
        }

        Ok(Self {
            sections,
            low_hz,
            high_hz,
        })
    }

    pub fn low_hz(&self) -> f64 {
        self.low_hz
    }

    pub fn high_hz(&self) -> f64 {
        self.high_hz
    }

    /// Filter a signal (zero initial state, causal).
    pub fn apply(&self, signal: &[f64]) -> Vec<f64> {
        let mut output = signal.to_vec();
        for section in &self.sections {
            section.process_inplace(&mut output);
        }
        output
    }

    /// Magnitude response at `frequency_hz`.
    pub fn magnitude_at(&self, frequency_hz: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * frequency_hz / sample_rate;
        self.sections
            .iter()
            .map(|s| s.response(omega).norm())
            .product()
    }
}

/// Filter bank for one sample rate; band order is ascending center frequency.
#[derive(Debug, Clone)]
pub struct OctaveBandFilterBank {
    sample_rate: u32,
    center_frequencies: Vec<f64>,
    filters: Vec<BandPassFilter>,
}

impl OctaveBandFilterBank {
    /// Build the bank, discarding center frequencies at or above Nyquist.
    pub fn new(sample_rate: u32) -> AnalysisResult<Self> {
        if sample_rate == 0 {
            return Err(AnalysisError::InvalidInput(
                "sample rate must be greater than 0".to_string(),
            ));
        }

        let fs = sample_rate as f64;
        let nyquist = fs / 2.0;
        let edge = 2f64.powf(1.0 / 6.0);

        let center_frequencies: Vec<f64> = CANDIDATE_CENTER_FREQUENCIES
            .iter()
            .copied()
            .filter(|&fc| fc < nyquist)
            .collect();

        let filters = center_frequencies
            .iter()
            .map(|&fc| {
                let high = (fc * edge).min(nyquist * MAX_EDGE_FRACTION_OF_NYQUIST);
                BandPassFilter::butterworth(BAND_FILTER_ORDER, fc / edge, high, fs)
            })
            .collect::<AnalysisResult<Vec<_>>>()?;

        Ok(Self {
            sample_rate,
            center_frequencies,
            filters,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn center_frequencies(&self) -> &[f64] {
        &self.center_frequencies
    }

    pub fn filters(&self) -> &[BandPassFilter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f64, sample_rate: f64, seconds: f64) -> Vec<f64> {
        let n = (sample_rate * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * frequency * i as f64 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_full_band_list_at_48k() {
        let bank = OctaveBandFilterBank::new(48_000).unwrap();
        assert_eq!(bank.center_frequencies(), &CANDIDATE_CENTER_FREQUENCIES[..]);
        assert_eq!(bank.len(), 18);
    }

    #[test]
    fn test_bands_at_or_above_nyquist_are_dropped() {
        let bank = OctaveBandFilterBank::new(8000).unwrap();
        let expected: Vec<f64> = CANDIDATE_CENTER_FREQUENCIES
            .iter()
            .copied()
            .filter(|&fc| fc < 4000.0)
            .collect();

        assert_eq!(bank.center_frequencies(), expected.as_slice());
        assert_eq!(bank.len(), 16);
        assert_eq!(*bank.center_frequencies().last().unwrap(), 3150.0);
    }

    #[test]
    fn test_edges_are_sixth_octave_around_center() {
        let bank = OctaveBandFilterBank::new(48_000).unwrap();
        let idx = bank.center_frequencies().iter().position(|&f| f == 1000.0).unwrap();
        let filter = &bank.filters()[idx];

        assert!((filter.low_hz() - 1000.0 / 2f64.powf(1.0 / 6.0)).abs() < 1e-9);
        assert!((filter.high_hz() - 1000.0 * 2f64.powf(1.0 / 6.0)).abs() < 1e-9);
    }

    #[test]
    fn test_unity_gain_at_center() {
        let bank = OctaveBandFilterBank::new(48_000).unwrap();
        for (fc, filter) in bank.center_frequencies().iter().zip(bank.filters()) {
            // Geometric center of the prewarped edges lies close to fc.
            let gain = filter.magnitude_at(*fc, 48_000.0);
            assert!((gain - 1.0).abs() < 0.02, "band {} gain {}", fc, gain);
        }
    }

    #[test]
    fn test_passband_and_stopband_on_sine() {
        let fs = 48_000.0;
        let bank = OctaveBandFilterBank::new(48_000).unwrap();
        let tone = sine(1000.0, fs, 1.0);
        let settled = |out: Vec<f64>| {
            out[out.len() / 2..]
                .iter()
                .fold(0.0f64, |m, v| m.max(v.abs()))
        };

        let band_1k = bank.center_frequencies().iter().position(|&f| f == 1000.0).unwrap();
        let band_250 = bank.center_frequencies().iter().position(|&f| f == 250.0).unwrap();

        let passed = settled(bank.filters()[band_1k].apply(&tone));
        let rejected = settled(bank.filters()[band_250].apply(&tone));

        assert!((passed - 1.0).abs() < 0.05, "passband amplitude {}", passed);
        assert!(rejected < 0.05, "stopband amplitude {}", rejected);
    }

    #[test]
    fn test_invalid_designs_are_rejected() {
        assert!(BandPassFilter::butterworth(3, 100.0, 200.0, 48_000.0).is_err());
        assert!(BandPassFilter::butterworth(4, 200.0, 100.0, 48_000.0).is_err());
        assert!(BandPassFilter::butterworth(4, 100.0, 30_000.0, 48_000.0).is_err());
        assert!(OctaveBandFilterBank::new(0).is_err());
    }
}
