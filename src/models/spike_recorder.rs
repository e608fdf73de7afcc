//! A device recording the spikes delivered to it.
use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::NestError;
use crate::node::{DeliveryContext, Gid, Node, SpikeEvent, UpdateContext};
use crate::time::Step;

/// A spike as seen by a [`SpikeRecorder`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedSpike {
    pub sender: Gid,
    /// The step at which the spike was emitted.
    pub stamp: Step,
    /// Offset in ms before the end of the step (0 for on-grid spikes).
    pub offset: f64,
}

/// Records every delivered spike, in delivery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpikeRecorder {
    gid: Gid,
    events: Vec<RecordedSpike>,
}

impl SpikeRecorder {
    pub fn new(gid: Gid) -> Self {
        SpikeRecorder {
            gid,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[RecordedSpike] {
        &self.events
    }

    /// Take the recorded spikes, leaving the recorder empty.
    pub fn take_events(&mut self) -> Vec<RecordedSpike> {
        std::mem::take(&mut self.events)
    }
}

impl Node for SpikeRecorder {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &'static str {
        "spike_recorder"
    }

    fn update(&mut self, _ctx: &mut UpdateContext, _from: Step, _to: Step) -> Result<(), NestError> {
        Ok(())
    }

    fn handle(&mut self, event: &SpikeEvent, _ctx: &DeliveryContext) {
        self.events.push(RecordedSpike {
            sender: event.sender,
            stamp: event.stamp,
            offset: event.offset,
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
