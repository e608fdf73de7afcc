//! Leaky integrate-and-fire neuron with delta-shaped synaptic currents.
//!
//! The membrane potential decays exponentially towards the resting potential
//! and jumps by the weight of every incoming spike. Subthreshold dynamics are
//! integrated exactly on the simulation grid.
use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::clock::DelayExtrema;
use crate::error::NestError;
use crate::node::{DeliveryContext, Gid, Node, SpikeEvent, UpdateContext};
use crate::ring_buffer::RingBuffer;
use crate::time::{Step, TimeBase};

/// Parameters of an [`IafPscDelta`] neuron. Potentials in mV, times in ms,
/// capacitance in pF and currents in pA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IafPscDeltaParams {
    pub tau_m: f64,
    pub c_m: f64,
    pub e_l: f64,
    pub v_th: f64,
    pub v_reset: f64,
    pub t_ref: f64,
    /// Constant external input current.
    pub i_e: f64,
}

impl Default for IafPscDeltaParams {
    fn default() -> Self {
        IafPscDeltaParams {
            tau_m: 10.0,
            c_m: 250.0,
            e_l: -70.0,
            v_th: -55.0,
            v_reset: -70.0,
            t_ref: 2.0,
            i_e: 0.0,
        }
    }
}

impl IafPscDeltaParams {
    pub fn validate(&self) -> Result<(), NestError> {
        if self.tau_m <= 0.0 || self.c_m <= 0.0 {
            return Err(NestError::InvalidParameter(
                "membrane time constant and capacitance must be positive".to_string(),
            ));
        }
        if self.t_ref < 0.0 {
            return Err(NestError::InvalidParameter("refractory period must be non-negative".to_string()));
        }
        if self.v_reset >= self.v_th {
            return Err(NestError::InvalidParameter(
                "reset potential must be below the threshold".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IafPscDelta {
    gid: Gid,
    params: IafPscDeltaParams,
    v_m: f64,
    refractory_left: Step,
    // propagators, set by calibrate
    p22: f64,
    p20: f64,
    refractory_steps: Step,
    spikes: RingBuffer,
    num_spikes: usize,
}

impl IafPscDelta {
    pub fn build(gid: Gid, params: IafPscDeltaParams) -> Result<Self, NestError> {
        params.validate()?;
        let v_m = params.e_l;
        Ok(IafPscDelta {
            gid,
            params,
            v_m,
            refractory_left: 0,
            p22: 1.0,
            p20: 0.0,
            refractory_steps: 0,
            spikes: RingBuffer::new(DelayExtrema::default()),
            num_spikes: 0,
        })
    }

    pub fn params(&self) -> &IafPscDeltaParams {
        &self.params
    }

    /// The membrane potential, in mV.
    pub fn v_m(&self) -> f64 {
        self.v_m
    }

    pub fn set_v_m(&mut self, v_m: f64) {
        self.v_m = v_m;
    }

    /// The number of spikes emitted so far.
    pub fn num_spikes(&self) -> usize {
        self.num_spikes
    }
}

impl Node for IafPscDelta {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &'static str {
        "iaf_psc_delta"
    }

    fn calibrate(&mut self, time_base: &TimeBase, extrema: DelayExtrema) -> Result<(), NestError> {
        let h = time_base.resolution_ms();
        self.p22 = (-h / self.params.tau_m).exp();
        self.p20 = self.params.tau_m / self.params.c_m * (1.0 - self.p22);
        self.refractory_steps = time_base.ms_to_steps(self.params.t_ref)?;
        if self.spikes.len() != extrema.ring_length() {
            self.spikes.resize(extrema);
        }
        Ok(())
    }

    fn update(&mut self, ctx: &mut UpdateContext, from: Step, to: Step) -> Result<(), NestError> {
        let e_l = self.params.e_l;
        for lag in from..to {
            let input = self.spikes.get_value(ctx.moduli(), lag);
            if self.refractory_left > 0 {
                // input arriving during the refractory period is lost
                self.refractory_left -= 1;
                continue;
            }

            self.v_m = e_l + self.p22 * (self.v_m - e_l) + self.p20 * self.params.i_e + input;
            if self.v_m >= self.params.v_th {
                self.v_m = self.params.v_reset;
                self.refractory_left = self.refractory_steps;
                self.num_spikes += 1;
                ctx.emit(self.gid, lag);
            }
        }
        Ok(())
    }

    fn handle(&mut self, event: &SpikeEvent, ctx: &DeliveryContext) {
        self.spikes.add_value(ctx.moduli(), ctx.ring_offset(event), event.weight);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
