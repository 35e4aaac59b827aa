//! Scheduler configuration, loadable from RON.
//!
//! ```
//! use cadence_core::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_ron("(frame_rate: 30.0, time_factor: 0.5)").unwrap();
//! assert_eq!(config.frame_rate, 30.0);
//! assert_eq!(config.max_catch_up, 5);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::fixed::{self, Fixed64};

/// Root-level settings for a [`Scheduler`](crate::scheduler::Scheduler).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Frames per second the driving clock targets.
    pub frame_rate: f64,
    /// Ticks per frame for thinkers that inherit all the way to the root.
    pub time_factor: f64,
    /// Most frames a [`FrameClock`](crate::clock::FrameClock) reports in one
    /// call; the rest of a long stall is dropped.
    pub max_catch_up: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_rate: 60.0,
            time_factor: 1.0,
            max_catch_up: 5,
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a RON document. Missing fields take their defaults.
    pub fn from_ron(text: &str) -> Result<Self, SchedulerError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the scheduler relies on.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(SchedulerError::NonPositiveFrameRate(self.frame_rate));
        }
        let factor = self.root_time_factor();
        if factor < fixed::ZERO || self.time_factor.is_nan() {
            return Err(SchedulerError::NegativeTimeFactor(factor));
        }
        Ok(())
    }

    /// The root time factor in fixed-point.
    pub fn root_time_factor(&self) -> Fixed64 {
        fixed::from_f64(self.time_factor)
    }
}
