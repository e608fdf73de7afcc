//! A device emitting spikes at prescribed steps.
use std::any::Any;

use crate::error::NestError;
use crate::node::{Gid, Node, UpdateContext};
use crate::time::Step;

#[derive(Debug, Clone, PartialEq)]
pub struct SpikeGenerator {
    gid: Gid,
    /// Sorted `(step, offset)` pairs.
    spikes: Vec<(Step, f64)>,
    next: usize,
    off_grid: bool,
}

impl SpikeGenerator {
    /// Emit on-grid spikes at the given steps. Repeated steps emit several spikes.
    pub fn new(gid: Gid, mut steps: Vec<Step>) -> Self {
        steps.sort_unstable();
        SpikeGenerator {
            gid,
            spikes: steps.into_iter().map(|step| (step, 0.0)).collect(),
            next: 0,
            off_grid: false,
        }
    }

    /// Emit off-grid spikes, given as `(step, offset)` pairs with the offset in ms
    /// before the end of the step.
    pub fn with_offsets(gid: Gid, mut spikes: Vec<(Step, f64)>) -> Result<Self, NestError> {
        if let Some((step, offset)) = spikes.iter().find(|(_, offset)| !(offset.is_finite() && *offset >= 0.0)) {
            return Err(NestError::InvalidParameter(format!(
                "spike offset must be non-negative, got {} at step {}",
                offset, step
            )));
        }
        spikes.sort_by_key(|&(step, _)| step);
        Ok(SpikeGenerator {
            gid,
            spikes,
            next: 0,
            off_grid: true,
        })
    }

    /// The number of spikes not yet emitted.
    pub fn pending(&self) -> usize {
        self.spikes.len() - self.next
    }
}

impl Node for SpikeGenerator {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &'static str {
        "spike_generator"
    }

    fn is_off_grid(&self) -> bool {
        self.off_grid
    }

    fn update(&mut self, ctx: &mut UpdateContext, from: Step, to: Step) -> Result<(), NestError> {
        let start = ctx.step(from);
        let end = ctx.step(to);
        // spikes scheduled before the current window can no longer be emitted
        while self.next < self.spikes.len() && self.spikes[self.next].0 < start {
            log::warn!("Spike generator {} skips spike at past step {}", self.gid, self.spikes[self.next].0);
            self.next += 1;
        }
        while self.next < self.spikes.len() && self.spikes[self.next].0 < end {
            let (step, offset) = self.spikes[self.next];
            let lag = step - ctx.origin();
            if self.off_grid {
                ctx.emit_off_grid(self.gid, lag, offset);
            } else {
                ctx.emit(self.gid, lag);
            }
            self.next += 1;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
