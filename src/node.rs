//! The interface between the kernel and node models.
//!
//! A node is updated once per sub-slice by the thread owning it, and receives
//! the spikes of its presynaptic sources through [`Node::handle`] once they
//! have been exchanged.
use std::any::Any;

use rand_chacha::ChaCha8Rng;

use crate::clock::{DelayExtrema, RingModulo};
use crate::error::NestError;
use crate::spike_register::ThreadRegister;
use crate::time::{Step, TimeBase};
use crate::wire::OVERFLOW_MARKER;

/// Global identifier of a node, unique across all ranks. Identifiers start at 1.
pub type Gid = u32;

/// The largest identifier that can be assigned; larger values are reserved on the wire.
pub const MAX_GID: Gid = OVERFLOW_MARKER - 1;

/// A spike as seen by its receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeEvent {
    /// The emitting node.
    pub sender: Gid,
    /// The step during which the spike was emitted.
    pub stamp: Step,
    /// Offset of the spike time from the end of its step, in ms (0 for on-grid spikes).
    pub offset: f64,
    /// Weight of the connection carrying the spike.
    pub weight: f64,
    /// Delay of the connection carrying the spike, in steps.
    pub delay: Step,
}

impl SpikeEvent {
    pub fn new(sender: Gid, stamp: Step, offset: f64) -> Self {
        SpikeEvent {
            sender,
            stamp,
            offset,
            weight: 0.0,
            delay: 0,
        }
    }

    /// The step at which the spike reaches its target.
    pub fn delivery_step(&self) -> Step {
        self.stamp + self.delay
    }
}

/// Where the kernel stands while events are delivered.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryContext<'a> {
    moduli: &'a RingModulo,
    origin: Step,
}

impl<'a> DeliveryContext<'a> {
    pub fn new(moduli: &'a RingModulo, origin: Step) -> Self {
        DeliveryContext { moduli, origin }
    }

    pub fn moduli(&self) -> &RingModulo {
        self.moduli
    }

    /// The first step of the slice whose spikes are being delivered.
    pub fn origin(&self) -> Step {
        self.origin
    }

    /// The offset of the event's delivery step from the slice start, always
    /// within the ring window since `min_delay <= delay <= max_delay`.
    pub fn ring_offset(&self, event: &SpikeEvent) -> Step {
        event.delivery_step() - self.origin
    }
}

/// What a node sees of the kernel while it is updated.
pub struct UpdateContext<'a> {
    origin: Step,
    thread: usize,
    vp: usize,
    moduli: &'a RingModulo,
    register: &'a mut ThreadRegister,
    rng: &'a mut ChaCha8Rng,
}

impl<'a> UpdateContext<'a> {
    pub fn new(
        origin: Step,
        thread: usize,
        vp: usize,
        moduli: &'a RingModulo,
        register: &'a mut ThreadRegister,
        rng: &'a mut ChaCha8Rng,
    ) -> Self {
        UpdateContext {
            origin,
            thread,
            vp,
            moduli,
            register,
            rng,
        }
    }

    /// The first step of the current slice.
    pub fn origin(&self) -> Step {
        self.origin
    }

    /// The absolute step for a lag within the current slice.
    pub fn step(&self, lag: Step) -> Step {
        self.origin + lag
    }

    pub fn thread(&self) -> usize {
        self.thread
    }

    pub fn vp(&self) -> usize {
        self.vp
    }

    pub fn moduli(&self) -> &RingModulo {
        self.moduli
    }

    /// The random generator of the virtual process running this update.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut *self.rng
    }

    /// Emit an on-grid spike from `gid` at the given lag.
    pub fn emit(&mut self, gid: Gid, lag: Step) {
        self.register.record(lag, gid);
    }

    /// Emit `multiplicity` spikes from `gid` at the given lag.
    pub fn emit_multiple(&mut self, gid: Gid, lag: Step, multiplicity: usize) {
        for _ in 0..multiplicity {
            self.register.record(lag, gid);
        }
    }

    /// Emit an off-grid spike from `gid` at the given lag and sub-step offset (ms).
    pub fn emit_off_grid(&mut self, gid: Gid, lag: Step, offset: f64) {
        self.register.record_off_grid(lag, gid, offset);
    }
}

/// A simulated node.
pub trait Node: Send {
    /// The global identifier of the node.
    fn gid(&self) -> Gid;

    fn model_name(&self) -> &'static str;

    /// Frozen nodes are not updated.
    fn is_frozen(&self) -> bool {
        false
    }

    /// Whether the node emits spikes with sub-step offsets.
    fn is_off_grid(&self) -> bool {
        false
    }

    /// The nodes contained in this node, for containers. Containers are never updated.
    fn children(&self) -> Option<&[Gid]> {
        None
    }

    /// Prepare internal state for a simulation with the given time base and delays.
    fn calibrate(&mut self, _time_base: &TimeBase, _extrema: DelayExtrema) -> Result<(), NestError> {
        Ok(())
    }

    /// Advance the node over the lags `[from, to)` of the current slice.
    fn update(&mut self, ctx: &mut UpdateContext, from: Step, to: Step) -> Result<(), NestError>;

    /// Receive a spike from a presynaptic source.
    fn handle(&mut self, _event: &SpikeEvent, _ctx: &DeliveryContext) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
