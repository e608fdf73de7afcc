//! The slice clock, the delay extrema, and the ring-buffer modulo tables.
use serde::{Deserialize, Serialize};

use crate::error::NestError;
use crate::time::Step;

/// The simulation clock, advancing one slice (min_delay steps) at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimClock {
    current_step: Step,
    slice_index: u64,
}

impl SimClock {
    pub fn new() -> Self {
        SimClock::default()
    }

    /// The first step of the current slice.
    pub fn current_step(&self) -> Step {
        self.current_step
    }

    /// The number of completed slices.
    pub fn slice_index(&self) -> u64 {
        self.slice_index
    }

    /// Move the clock forward by one slice.
    /// Must only be called once every thread has finished the current slice.
    pub fn advance(&mut self, min_delay: Step) {
        debug_assert!(min_delay >= 1);
        self.current_step += min_delay;
        self.slice_index += 1;
    }
}

/// The smallest and largest connection delay, in steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayExtrema {
    min_delay: Step,
    max_delay: Step,
}

impl Default for DelayExtrema {
    fn default() -> Self {
        DelayExtrema {
            min_delay: 1,
            max_delay: 1,
        }
    }
}

impl DelayExtrema {
    /// Create delay extrema, checking `1 <= min_delay <= max_delay`.
    pub fn build(min_delay: Step, max_delay: Step) -> Result<Self, NestError> {
        if min_delay < 1 || max_delay < min_delay {
            return Err(NestError::InvalidDelay(format!(
                "delay extrema must satisfy 1 <= min_delay <= max_delay, got ({}, {})",
                min_delay, max_delay
            )));
        }
        Ok(DelayExtrema {
            min_delay,
            max_delay,
        })
    }

    pub fn min_delay(&self) -> Step {
        self.min_delay
    }

    pub fn max_delay(&self) -> Step {
        self.max_delay
    }

    /// The length of the input ring buffers, `min_delay + max_delay`.
    pub fn ring_length(&self) -> usize {
        (self.min_delay + self.max_delay) as usize
    }
}

/// Precomputed tables mapping step offsets within the ring window to buffer bins.
///
/// Entry `d` of the fine table is `(current_step + d) mod (min_delay + max_delay)`;
/// entry `d` of the slice table is the slice bin containing `current_step + d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingModulo {
    extrema: DelayExtrema,
    moduli: Vec<usize>,
    slice_moduli: Vec<usize>,
}

impl RingModulo {
    pub fn new(clock: &SimClock, extrema: DelayExtrema) -> Self {
        let mut modulo = RingModulo {
            extrema,
            moduli: Vec::new(),
            slice_moduli: Vec::new(),
        };
        modulo.recompute(clock, extrema);
        modulo
    }

    pub fn extrema(&self) -> DelayExtrema {
        self.extrema
    }

    /// The number of bins of the fine table, `min_delay + max_delay`.
    pub fn len(&self) -> usize {
        self.moduli.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moduli.is_empty()
    }

    /// The number of slice-wide bins, `ceil((min_delay + max_delay) / min_delay)`.
    pub fn num_slice_bins(&self) -> usize {
        let len = self.extrema.ring_length();
        let min_delay = self.extrema.min_delay() as usize;
        (len + min_delay - 1) / min_delay
    }

    /// Rebuild both tables for the given clock and extrema.
    pub fn recompute(&mut self, clock: &SimClock, extrema: DelayExtrema) {
        self.extrema = extrema;
        let len = extrema.ring_length() as Step;
        let base = clock.current_step();
        self.moduli = (0..len).map(|d| (base + d).rem_euclid(len) as usize).collect();
        self.recompute_slice_moduli(base);
    }

    /// Shift the window by one slice: rotate the fine table left by min_delay
    /// and rebuild the slice table for the new slice start.
    pub fn rotate(&mut self, clock: &SimClock) {
        let min_delay = self.extrema.min_delay() as usize;
        let len = self.moduli.len();
        self.moduli.rotate_left(min_delay % len);
        self.recompute_slice_moduli(clock.current_step());
    }

    fn recompute_slice_moduli(&mut self, base: Step) {
        let len = self.extrema.ring_length() as Step;
        let min_delay = self.extrema.min_delay();
        let nbins = self.num_slice_bins() as Step;
        self.slice_moduli = (0..len)
            .map(|d| ((base + d).div_euclid(min_delay)).rem_euclid(nbins) as usize)
            .collect();
    }

    /// The ring-buffer bin for a step offset relative to the current slice start.
    ///
    /// # Panics
    /// Panics if the offset is outside `[0, min_delay + max_delay)`.
    pub fn modulo(&self, offset: Step) -> usize {
        assert!(
            offset >= 0 && (offset as usize) < self.moduli.len(),
            "step offset {} outside the ring window [0, {})",
            offset,
            self.moduli.len()
        );
        self.moduli[offset as usize]
    }

    /// The slice-wide bin for a step offset relative to the current slice start.
    ///
    /// # Panics
    /// Panics if the offset is outside `[0, min_delay + max_delay)`.
    pub fn slice_modulo(&self, offset: Step) -> usize {
        assert!(
            offset >= 0 && (offset as usize) < self.slice_moduli.len(),
            "step offset {} outside the ring window [0, {})",
            offset,
            self.slice_moduli.len()
        );
        self.slice_moduli[offset as usize]
    }
}
