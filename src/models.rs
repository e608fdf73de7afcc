//! Reference node models.
pub mod iaf_psc_delta;
pub mod poisson_generator;
pub mod spike_generator;
pub mod spike_recorder;
pub mod subnet;

pub use iaf_psc_delta::{IafPscDelta, IafPscDeltaParams};
pub use poisson_generator::PoissonGenerator;
pub use spike_generator::SpikeGenerator;
pub use spike_recorder::{RecordedSpike, SpikeRecorder};
pub use subnet::Subnet;

use serde::{Deserialize, Serialize};

use crate::error::NestError;
use crate::node::{Gid, Node};
use crate::time::Step;

/// A node model with its parameters, from which nodes are created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum Model {
    IafPscDelta(IafPscDeltaParams),
    /// Emits at the given steps.
    SpikeGenerator { steps: Vec<Step> },
    /// Emits at the given `(step, offset)` pairs.
    PreciseSpikeGenerator { spikes: Vec<(Step, f64)> },
    /// Emits Poisson spike trains at `rate` spikes per second.
    PoissonGenerator { rate: f64 },
    SpikeRecorder,
    Subnet { children: Vec<Gid> },
}

impl Model {
    pub fn name(&self) -> &'static str {
        match self {
            Model::IafPscDelta(_) => "iaf_psc_delta",
            Model::SpikeGenerator { .. } | Model::PreciseSpikeGenerator { .. } => "spike_generator",
            Model::PoissonGenerator { .. } => "poisson_generator",
            Model::SpikeRecorder => "spike_recorder",
            Model::Subnet { .. } => "subnet",
        }
    }

    /// Create a node of this model with the given identifier.
    pub fn instantiate(&self, gid: Gid) -> Result<Box<dyn Node>, NestError> {
        let node: Box<dyn Node> = match self {
            Model::IafPscDelta(params) => Box::new(IafPscDelta::build(gid, params.clone())?),
            Model::SpikeGenerator { steps } => Box::new(SpikeGenerator::new(gid, steps.clone())),
            Model::PreciseSpikeGenerator { spikes } => Box::new(SpikeGenerator::with_offsets(gid, spikes.clone())?),
            Model::PoissonGenerator { rate } => Box::new(PoissonGenerator::build(gid, *rate)?),
            Model::SpikeRecorder => Box::new(SpikeRecorder::new(gid)),
            Model::Subnet { children } => Box::new(Subnet::new(gid, children.clone())),
        };
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiate() {
        let node = Model::PoissonGenerator { rate: 10.0 }.instantiate(4).unwrap();
        assert_eq!(node.gid(), 4);
        assert_eq!(node.model_name(), "poisson_generator");
        assert!(node.as_any().downcast_ref::<PoissonGenerator>().is_some());

        assert!(Model::PoissonGenerator { rate: -1.0 }.instantiate(1).is_err());
        assert!(Model::Subnet { children: vec![1] }.instantiate(2).unwrap().children().is_some());
    }

    #[test]
    fn test_model_from_json() {
        let model: Model = serde_json::from_str(r#"{"model": "iaf_psc_delta", "i_e": 376.0}"#).unwrap();
        match &model {
            Model::IafPscDelta(params) => {
                assert_eq!(params.i_e, 376.0);
                assert_eq!(params.tau_m, 10.0);
            }
            other => panic!("unexpected model {:?}", other),
        }
        assert_eq!(model.name(), "iaf_psc_delta");

        let model: Model = serde_json::from_str(r#"{"model": "spike_generator", "steps": [1, 2]}"#).unwrap();
        assert_eq!(model, Model::SpikeGenerator { steps: vec![1, 2] });
    }
}
