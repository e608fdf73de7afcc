use std::any::Any;

use rusty_nest::error::NestError;
use rusty_nest::node::{DeliveryContext, Gid, Node, SpikeEvent, UpdateContext};
use rusty_nest::time::Step;

/// A node failing when updated at a given step.
pub struct Failing {
    gid: Gid,
    step: Step,
    frozen: bool,
}

impl Node for Failing {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &'static str {
        "failing"
    }

    fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn update(&mut self, ctx: &mut UpdateContext, from: Step, to: Step) -> Result<(), NestError> {
        if (ctx.step(from)..ctx.step(to)).contains(&self.step) {
            return Err(NestError::InvalidState(format!("failure at step {}", self.step)));
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

/// A factory of [`Failing`] nodes for `Kernel::create_with`.
pub fn failing(step: Step, frozen: bool) -> impl FnMut(Gid) -> Result<Box<dyn Node>, NestError> {
    move |gid| -> Result<Box<dyn Node>, NestError> { Ok(Box::new(Failing { gid, step, frozen })) }
}

/// A node panicking when updated at a given step, or when it receives a spike.
pub struct Panicking {
    gid: Gid,
    step: Option<Step>,
}

impl Node for Panicking {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &'static str {
        "panicking"
    }

    fn update(&mut self, ctx: &mut UpdateContext, from: Step, to: Step) -> Result<(), NestError> {
        if let Some(step) = self.step {
            if (ctx.step(from)..ctx.step(to)).contains(&step) {
                panic!("node {} gave up at step {}", self.gid, step);
            }
        }
        Ok(())
    }

    fn handle(&mut self, event: &SpikeEvent, _ctx: &DeliveryContext) {
        panic!("node {} cannot take a spike from {}", self.gid, event.sender);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A factory of [`Panicking`] nodes; `step` is the step at which the update panics, if any.
pub fn panicking(step: Option<Step>) -> impl FnMut(Gid) -> Result<Box<dyn Node>, NestError> {
    move |gid| -> Result<Box<dyn Node>, NestError> { Ok(Box::new(Panicking { gid, step })) }
}
