//! Module implementing the connections between nodes.
//!
//! Connections are stored on the rank and thread owning their target, keyed
//! by source, so that delivering a spike only touches nodes of the delivering
//! thread.
use std::collections::HashMap;

use derivative::Derivative;

use crate::error::NestError;
use crate::network::{lock_node, NodeHandle};
use crate::node::{DeliveryContext, Gid, SpikeEvent};
use crate::time::Step;

/// Represents a connection from a source node to a local target node.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Connection {
    source: Gid,
    target: Gid,
    /// Connection weight
    weight: f64,
    /// Connection delay, in steps (at least 1)
    delay: Step,
    #[derivative(Debug = "ignore")]
    handle: NodeHandle,
}

impl Connection {
    /// Create a new connection with the specified parameters.
    /// Returns an error if the delay is not positive.
    pub fn build(source: Gid, target: Gid, weight: f64, delay: Step, handle: NodeHandle) -> Result<Self, NestError> {
        if delay < 1 {
            return Err(NestError::InvalidDelay(format!(
                "connection {} -> {} has delay {} steps, must be at least 1",
                source, target, delay
            )));
        }
        Ok(Connection {
            source,
            target,
            weight,
            delay,
            handle,
        })
    }

    pub fn source(&self) -> Gid {
        self.source
    }

    pub fn target(&self) -> Gid {
        self.target
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn delay(&self) -> Step {
        self.delay
    }
}

/// The connections of this rank, one table per local thread.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    tables: Vec<HashMap<Gid, Vec<Connection>>>,
    extrema: Option<(Step, Step)>,
}

impl ConnectionManager {
    pub fn new(num_threads: usize) -> Self {
        ConnectionManager {
            tables: vec![HashMap::new(); num_threads],
            extrema: None,
        }
    }

    /// Store a connection on the thread owning its target.
    pub fn connect(&mut self, thread: usize, connection: Connection) {
        let delay = connection.delay;
        self.extrema = Some(match self.extrema {
            Some((min, max)) => (min.min(delay), max.max(delay)),
            None => (delay, delay),
        });
        self.tables[thread].entry(connection.source).or_default().push(connection);
    }

    /// Deliver a spike of `source` to all its targets on `thread`, in creation order.
    /// Returns the number of deliveries.
    pub fn send(
        &self,
        thread: usize,
        source: Gid,
        event: &SpikeEvent,
        ctx: &DeliveryContext,
    ) -> Result<usize, NestError> {
        let Some(connections) = self.tables[thread].get(&source) else {
            return Ok(0);
        };
        for connection in connections {
            let mut delivered = *event;
            delivered.weight = connection.weight;
            delivered.delay = connection.delay;
            lock_node(&connection.handle)?.handle(&delivered, ctx);
        }
        Ok(connections.len())
    }

    /// The smallest delay of the local connections, if any.
    pub fn min_delay(&self) -> Option<Step> {
        self.extrema.map(|(min, _)| min)
    }

    /// The largest delay of the local connections, if any.
    pub fn max_delay(&self) -> Option<Step> {
        self.extrema.map(|(_, max)| max)
    }

    pub fn num_connections(&self) -> usize {
        self.tables
            .iter()
            .flat_map(|table| table.values())
            .map(|connections| connections.len())
            .sum()
    }
}
