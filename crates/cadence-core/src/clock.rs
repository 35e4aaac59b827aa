//! Fixed-timestep frame pacing.
//!
//! The scheduler itself only knows frames. A [`FrameClock`] turns a
//! monotonically increasing elapsed time into a whole number of frames due,
//! carrying the remainder forward to the next call.

use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

/// Accumulates elapsed time and reports how many fixed frames to run.
#[derive(Debug, Clone)]
pub struct FrameClock {
    period: Duration,
    accumulator: Duration,
    last: Option<Duration>,
    max_catch_up: u32,
    dropped: u64,
}

impl FrameClock {
    /// A clock running at `frame_rate` frames per second.
    pub fn new(frame_rate: f64) -> Result<Self, SchedulerError> {
        Self::with_config(&SchedulerConfig {
            frame_rate,
            ..SchedulerConfig::default()
        })
    }

    pub fn with_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self {
            period: Duration::from_nanos((1e9 / config.frame_rate).round() as u64),
            accumulator: Duration::ZERO,
            last: None,
            max_catch_up: config.max_catch_up.max(1),
            dropped: 0,
        })
    }

    /// Length of one frame.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Frames discarded because more than `max_catch_up` were due at once.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Feed the current elapsed time and return how many frames are due.
    ///
    /// The first call only establishes the starting point. A time earlier
    /// than the previous one is treated as no time passing.
    pub fn frames_due(&mut self, now: Duration) -> u32 {
        let Some(last) = self.last.replace(now) else {
            return 0;
        };
        if now < last {
            log::warn!("frame clock went backwards by {:?}", last - now);
            return 0;
        }
        self.accumulator += now - last;

        let period = self.period.as_nanos().max(1);
        let due = self.accumulator.as_nanos() / period;
        self.accumulator -= Duration::from_nanos((due * period) as u64);

        let cap = u128::from(self.max_catch_up);
        if due > cap {
            let skipped = (due - cap) as u64;
            self.dropped += skipped;
            log::debug!("frame clock fell behind, dropping {skipped} frame(s)");
            return self.max_catch_up;
        }
        due as u32
    }
}
