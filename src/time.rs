//! Fixed-point representation of simulation time.
//!
//! Time is counted in integer tics; a simulation step spans a whole number of
//! tics. Millisecond values only enter through the conversions on [`TimeBase`],
//! so that all scheduling arithmetic is exact.
use serde::{Deserialize, Serialize};

use crate::error::NestError;

/// A number of simulation steps.
pub type Step = i64;

/// Relative tolerance for a resolution to be considered a whole number of tics.
const TIC_TOLERANCE: f64 = 1e-9;

/// A point in simulation time, counted in tics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time {
    tics: i64,
}

impl Time {
    pub fn from_tics(tics: i64) -> Self {
        Time { tics }
    }

    pub fn tics(&self) -> i64 {
        self.tics
    }
}

/// The conversion rules between tics, steps and milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    tics_per_ms: i64,
    tics_per_step: i64,
}

impl Default for TimeBase {
    fn default() -> Self {
        TimeBase {
            tics_per_ms: 1000,
            tics_per_step: 100,
        }
    }
}

impl TimeBase {
    /// Create a time base with the given resolution (the step length in ms).
    /// The resolution must be a positive whole number of tics.
    pub fn new(resolution_ms: f64, tics_per_ms: f64) -> Result<Self, NestError> {
        if !(tics_per_ms.is_finite() && tics_per_ms >= 1.0) || tics_per_ms.fract() != 0.0 {
            return Err(NestError::InvalidParameter(format!(
                "tics per ms must be a positive integer, got {}",
                tics_per_ms
            )));
        }
        if !(resolution_ms.is_finite() && resolution_ms > 0.0) {
            return Err(NestError::InvalidParameter(format!(
                "resolution must be positive, got {} ms",
                resolution_ms
            )));
        }

        let exact = resolution_ms * tics_per_ms;
        let tics_per_step = exact.round();
        if tics_per_step < 1.0 || (exact - tics_per_step).abs() > TIC_TOLERANCE * exact.max(1.0) {
            return Err(NestError::InvalidParameter(format!(
                "resolution {} ms is not a multiple of the tic length {} ms",
                resolution_ms,
                1.0 / tics_per_ms
            )));
        }

        Ok(TimeBase {
            tics_per_ms: tics_per_ms as i64,
            tics_per_step: tics_per_step as i64,
        })
    }

    pub fn tics_per_ms(&self) -> i64 {
        self.tics_per_ms
    }

    pub fn tics_per_step(&self) -> i64 {
        self.tics_per_step
    }

    /// The step length in ms.
    pub fn resolution_ms(&self) -> f64 {
        self.tics_per_step as f64 / self.tics_per_ms as f64
    }

    pub fn steps_per_ms(&self) -> f64 {
        self.tics_per_ms as f64 / self.tics_per_step as f64
    }

    /// The largest step count whose tic value is representable.
    pub fn max_steps(&self) -> Step {
        i64::MAX / self.tics_per_step
    }

    pub fn from_steps(&self, steps: Step) -> Time {
        Time::from_tics(steps * self.tics_per_step)
    }

    /// Convert a step count to ms, exactly up to the final division.
    pub fn steps_to_ms(&self, steps: Step) -> f64 {
        self.from_steps(steps).tics() as f64 / self.tics_per_ms as f64
    }

    /// Convert a duration in ms to the nearest number of steps.
    /// Returns an error for non-finite values or values beyond the clock range.
    pub fn ms_to_steps(&self, ms: f64) -> Result<Step, NestError> {
        if !ms.is_finite() {
            return Err(NestError::InvalidParameter(format!(
                "time must be finite, got {} ms",
                ms
            )));
        }
        let steps = (ms * self.steps_per_ms()).round();
        if steps.abs() >= self.max_steps() as f64 {
            return Err(NestError::ClockOverflow {
                requested_steps: if steps > 0.0 { i64::MAX } else { i64::MIN },
                limit: self.max_steps(),
            });
        }
        Ok(steps as Step)
    }

    /// Whether the given duration in ms is a whole number of steps.
    pub fn is_grid_time(&self, ms: f64) -> bool {
        let steps = ms * self.steps_per_ms();
        (steps - steps.round()).abs() <= TIC_TOLERANCE * steps.abs().max(1.0)
    }

    /// Convert a connection delay in ms to steps; delays must span at least one step.
    pub fn delay_ms_to_steps(&self, delay_ms: f64) -> Result<Step, NestError> {
        let steps = self
            .ms_to_steps(delay_ms)
            .map_err(|_| NestError::InvalidDelay(format!("delay {} ms is not representable", delay_ms)))?;
        if steps < 1 {
            return Err(NestError::InvalidDelay(format!(
                "delay {} ms is shorter than the resolution {} ms",
                delay_ms,
                self.resolution_ms()
            )));
        }
        Ok(steps)
    }
}
