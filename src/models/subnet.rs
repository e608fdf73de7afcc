//! A container grouping other nodes.
use std::any::Any;

use crate::error::NestError;
use crate::node::{Gid, Node, UpdateContext};
use crate::time::Step;

/// Groups nodes for bookkeeping. A subnet is never updated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subnet {
    gid: Gid,
    children: Vec<Gid>,
}

impl Subnet {
    pub fn new(gid: Gid, children: Vec<Gid>) -> Self {
        Subnet { gid, children }
    }
}

impl Node for Subnet {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &'static str {
        "subnet"
    }

    fn children(&self) -> Option<&[Gid]> {
        Some(&self.children)
    }

    fn update(&mut self, _ctx: &mut UpdateContext, _from: Step, _to: Step) -> Result<(), NestError> {
        Err(NestError::InvalidState(format!("subnet {} cannot be updated", self.gid)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
