pub mod analysis;
pub mod calibration;
pub mod config;
pub mod excitation;

pub use self::analysis::*;
pub use self::calibration::*;
pub use self::config::*;
pub use self::excitation::*;

#[cfg(test)]
pub(crate) mod tests_support {
    use crate::config::AppConfig;
    use crate::state::AppState;

    /// State with a short low-rate excitation so pipeline setup stays cheap.
    pub fn test_state() -> AppState {
        let mut config = AppConfig::default();
        config.excitation.sample_rate = 8000;
        config.excitation.duration_secs = 0.5;
        config.excitation.end_hz = 3900.0;
        AppState::new(config).unwrap()
    }
}
