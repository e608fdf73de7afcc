//! A device emitting Poisson spike trains.
use std::any::Any;

use rand_distr::{Distribution, Poisson};

use crate::clock::DelayExtrema;
use crate::error::NestError;
use crate::node::{Gid, Node, UpdateContext};
use crate::time::{Step, TimeBase};

/// Emits, in every step, a Poisson-distributed number of spikes with mean
/// `rate * resolution`. Draws come from the generator of the virtual process
/// owning the node, so the output does not depend on the thread count.
#[derive(Debug, Clone)]
pub struct PoissonGenerator {
    gid: Gid,
    /// Firing rate, in spikes per second.
    rate: f64,
    distribution: Option<Poisson<f64>>,
}

impl PoissonGenerator {
    pub fn build(gid: Gid, rate: f64) -> Result<Self, NestError> {
        if !(rate.is_finite() && rate >= 0.0) {
            return Err(NestError::InvalidParameter(format!(
                "rate must be non-negative, got {} spikes/s",
                rate
            )));
        }
        Ok(PoissonGenerator {
            gid,
            rate,
            distribution: None,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Node for PoissonGenerator {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &'static str {
        "poisson_generator"
    }

    fn calibrate(&mut self, time_base: &TimeBase, _extrema: DelayExtrema) -> Result<(), NestError> {
        let mean = self.rate * time_base.resolution_ms() / 1000.0;
        self.distribution = if mean > 0.0 {
            Some(Poisson::new(mean).map_err(|e| NestError::InvalidParameter(e.to_string()))?)
        } else {
            None
        };
        Ok(())
    }

    fn update(&mut self, ctx: &mut UpdateContext, from: Step, to: Step) -> Result<(), NestError> {
        let Some(distribution) = self.distribution else {
            return Ok(());
        };
        for lag in from..to {
            let n = distribution.sample(ctx.rng()) as usize;
            if n > 0 {
                ctx.emit_multiple(self.gid, lag, n);
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use crate::clock::{RingModulo, SimClock};
    use crate::spike_register::ThreadRegister;

    fn count_spikes(rate: f64, steps: usize, seed: u64) -> usize {
        let time_base = TimeBase::default();
        let extrema = DelayExtrema::default();
        let mut generator = PoissonGenerator::build(1, rate).unwrap();
        generator.calibrate(&time_base, extrema).unwrap();
        let moduli = RingModulo::new(&SimClock::new(), extrema);
        let mut register = ThreadRegister::new(0, 1);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut total = 0;
        for _ in 0..steps {
            let mut ctx = UpdateContext::new(0, 0, 0, &moduli, &mut register, &mut rng);
            generator.update(&mut ctx, 0, 1).unwrap();
            total += register.num_spikes();
            register.clear();
        }
        total
    }

    #[test]
    fn test_invalid_rate() {
        assert!(PoissonGenerator::build(1, -1.0).is_err());
        assert!(PoissonGenerator::build(1, f64::INFINITY).is_err());
    }

    #[test]
    fn test_silent_at_zero_rate() {
        assert_eq!(count_spikes(0.0, 1000, 3), 0);
    }

    #[test]
    fn test_mean_rate() {
        // 1000 spikes/s over 10 s at 0.1 ms: mean 10000
        let total = count_spikes(1000.0, 100_000, 3) as f64;
        assert!((total - 10_000.0).abs() < 500.0, "got {} spikes", total);
        assert_eq!(count_spikes(1000.0, 1000, 9), count_spikes(1000.0, 1000, 9));
    }
}
