//! Input buffers of node models.
use crate::clock::{DelayExtrema, RingModulo};
use crate::time::Step;

/// Accumulates input for the next `min_delay + max_delay` steps.
///
/// Bins are addressed by step offsets relative to the current slice start and
/// mapped to storage through the [`RingModulo`] tables, so that the buffer
/// never needs shifting. A bin is cleared when it is read.
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer {
    bins: Vec<f64>,
}

impl RingBuffer {
    pub fn new(extrema: DelayExtrema) -> Self {
        RingBuffer {
            bins: vec![0.0; extrema.ring_length()],
        }
    }

    /// Resize to the given extrema, dropping all pending input.
    pub fn resize(&mut self, extrema: DelayExtrema) {
        self.bins.clear();
        self.bins.resize(extrema.ring_length(), 0.0);
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Add `value` to the bin `offset` steps after the current slice start.
    pub fn add_value(&mut self, moduli: &RingModulo, offset: Step, value: f64) {
        self.bins[moduli.modulo(offset)] += value;
    }

    /// Read and clear the bin of the given lag of the current slice.
    pub fn get_value(&mut self, moduli: &RingModulo, lag: Step) -> f64 {
        let bin = moduli.modulo(lag);
        std::mem::take(&mut self.bins[bin])
    }
}
