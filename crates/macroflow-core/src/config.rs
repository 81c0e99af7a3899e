//! Playback configuration

use crate::error::{Error, Result};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Playback speed (1.0 = real-time, 2.0 = 2x speed). Scales every sleep,
    /// global and loop-local alike.
    pub speed: f64,
    /// Stop after this many consecutive driver/evaluator failures.
    /// `None` keeps going forever.
    pub failure_budget: Option<u32>,
    /// Longest single sleep; cancellation is observed between slices
    pub cancel_slice: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            failure_budget: None,
            cancel_slice: Duration::from_millis(200),
        }
    }
}

impl PlaybackConfig {
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn failure_budget(mut self, budget: u32) -> Self {
        self.failure_budget = Some(budget);
        self
    }

    pub fn cancel_slice(mut self, slice: Duration) -> Self {
        self.cancel_slice = slice;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(Error::invalid_config(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }
        if self.failure_budget == Some(0) {
            return Err(Error::invalid_config("failure budget must be at least 1")
                .with_suggestions(vec!["omit the budget to never stop on failures".to_string()]));
        }
        if self.cancel_slice.is_zero() {
            return Err(Error::invalid_config("cancel slice must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn default_config_is_valid() {
        assert!(PlaybackConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_speed_and_empty_budget() {
        for speed in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = PlaybackConfig::default().speed(speed).validate().unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidConfig);
        }
        assert!(PlaybackConfig::default().failure_budget(0).validate().is_err());
        assert!(PlaybackConfig::default().cancel_slice(Duration::ZERO).validate().is_err());
    }
}
