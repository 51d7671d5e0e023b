//! Exponential sine sweep used as the reference excitation for every session.

use std::f64::consts::PI;

/// Parameters of a logarithmic (exponential) sine sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogSweep {
    pub start_hz: f64,
    pub end_hz: f64,
    pub duration_secs: f64,
    pub sample_rate: u32,
}

impl LogSweep {
    /// Number of samples the sweep spans.
    pub fn len(&self) -> usize {
        (self.duration_secs * self.sample_rate as f64).round() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Generate the sweep samples.
    ///
    /// x(t) = sin(2π·f1·T / ln(f2/f1) · (e^(t/T · ln(f2/f1)) − 1))
    ///
    /// The instantaneous frequency rises exponentially from `start_hz` to
    /// `end_hz`, so every octave receives the same amount of energy.
    pub fn generate(&self) -> Vec<f64> {
        let fs = self.sample_rate as f64;
        let rate = (self.end_hz / self.start_hz).ln();
        let k = 2.0 * PI * self.start_hz * self.duration_secs / rate;

        (0..self.len())
            .map(|n| {
                let t = n as f64 / fs;
                (k * ((t / self.duration_secs * rate).exp() - 1.0)).sin()
            })
            .collect()
    }
}

impl Default for LogSweep {
    fn default() -> Self {
        Self {
            start_hz: 20.0,
            end_hz: 20_000.0,
            duration_secs: 5.0,
            sample_rate: 48_000,
        }
    }
}
