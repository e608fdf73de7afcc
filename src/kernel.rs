//! The simulation kernel: the context owning every component of a simulation.
//!
//! A kernel is built from a frozen configuration and the communicator of its
//! rank. Every rank of a distributed simulation builds its own kernel and
//! issues the same sequence of calls; node and connection creation is
//! replicated, while each rank only instantiates the nodes it owns.
//!
//! ```no_run
//! use rusty_nest::comm::LocalCommunicator;
//! use rusty_nest::config::KernelConfigBuilder;
//! use rusty_nest::kernel::Kernel;
//! use rusty_nest::models::{IafPscDeltaParams, Model};
//!
//! let config = KernelConfigBuilder::new().local_num_threads(2).build().unwrap();
//! let mut kernel = Kernel::new(config, LocalCommunicator::new()).unwrap();
//! let neurons = kernel.create(&Model::IafPscDelta(IafPscDeltaParams::default()), 10).unwrap();
//! for (source, target) in neurons.clone().zip(neurons.skip(1)) {
//!     kernel.connect(source, target, 20.0, 1.5).unwrap();
//! }
//! kernel.simulate(100.0).unwrap();
//! ```
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use derivative::Derivative;

use crate::clock::DelayExtrema;
use crate::comm::Communicator;
use crate::config::{KernelConfig, KernelConfigBuilder};
use crate::connection::{Connection, ConnectionManager};
use crate::error::NestError;
use crate::models::Model;
use crate::network::{lock_node, Network, VpLayout};
use crate::node::{Gid, Node};
use crate::registry::NodeRegistry;
use crate::rng::RngManager;
use crate::scheduler::{Collaborators, Scheduler, SchedulerState};
use crate::time::Step;

#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Kernel<C: Communicator> {
    config: Arc<KernelConfig>,
    #[derivative(Debug = "ignore")]
    comm: C,
    network: Network,
    registry: NodeRegistry,
    connections: ConnectionManager,
    rngs: RngManager,
    scheduler: Scheduler,
    terminate: Arc<AtomicBool>,
}

impl<C: Communicator> Kernel<C> {
    pub fn new(config: Arc<KernelConfig>, comm: C) -> Result<Self, NestError> {
        let terminate = Arc::new(AtomicBool::new(false));
        let layout = VpLayout::build(config.local_num_threads, comm.num_ranks(), comm.rank())?;
        let mut scheduler = Scheduler::build(Arc::clone(&config), Arc::clone(&terminate))?;
        scheduler.initialize();
        log::info!(
            "Rank {} of {}: kernel started with {} threads at {} ms resolution",
            comm.rank(),
            comm.num_ranks(),
            config.local_num_threads,
            config.resolution_ms
        );
        Ok(Kernel {
            network: Network::new(layout),
            registry: NodeRegistry::new(config.local_num_threads),
            connections: ConnectionManager::new(config.local_num_threads),
            rngs: RngManager::new(config.grng_seed, config.rng_seed, &layout),
            scheduler,
            terminate,
            comm,
            config,
        })
    }

    /// Tear down the network and all simulation state, keeping the configuration
    /// and the communicator. This is the only way out of a terminated state.
    pub fn reset(&mut self) -> Result<(), NestError> {
        let layout = self.network.layout();
        let mut scheduler = Scheduler::build(Arc::clone(&self.config), Arc::clone(&self.terminate))?;
        scheduler.initialize();
        self.scheduler = scheduler;
        self.network = Network::new(layout);
        self.registry = NodeRegistry::new(self.config.local_num_threads);
        self.connections = ConnectionManager::new(self.config.local_num_threads);
        self.rngs = RngManager::new(self.config.grng_seed, self.config.rng_seed, &layout);
        self.terminate.store(false, Ordering::SeqCst);
        log::info!("Rank {}: kernel reset", self.comm.rank());
        Ok(())
    }

    /// A flag that, once set, stops the simulation of every rank at the next slice boundary.
    pub fn termination_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    fn expect_initialized(&self, operation: &str) -> Result<(), NestError> {
        match self.scheduler.state() {
            SchedulerState::Initialized => Ok(()),
            state => Err(NestError::InvalidState(format!("cannot {} while {}", operation, state))),
        }
    }

    /// Create `n` nodes of the given model; returns their identifiers.
    pub fn create(&mut self, model: &Model, n: usize) -> Result<Range<Gid>, NestError> {
        self.expect_initialized("create nodes")?;
        let gids = self.network.add_nodes(n, |gid| model.instantiate(gid))?;
        log::debug!("Created {} {} nodes", n, model.name());
        Ok(gids)
    }

    /// Create `n` nodes with a custom factory, called for the local identifiers only.
    pub fn create_with<F>(&mut self, n: usize, factory: F) -> Result<Range<Gid>, NestError>
    where
        F: FnMut(Gid) -> Result<Box<dyn Node>, NestError>,
    {
        self.expect_initialized("create nodes")?;
        self.network.add_nodes(n, factory)
    }

    /// Connect two nodes. Only the rank owning the target stores the connection.
    pub fn connect(&mut self, source: Gid, target: Gid, weight: f64, delay_ms: f64) -> Result<(), NestError> {
        self.expect_initialized("connect")?;
        for gid in [source, target] {
            if !self.network.contains(gid) {
                return Err(NestError::UnknownNode(gid));
            }
        }
        let delay = self.scheduler.time_base().delay_ms_to_steps(delay_ms)?;
        let Some(node) = self.network.get(target) else {
            return Ok(());
        };
        if lock_node(&node.handle)?.children().is_some() {
            return Err(NestError::InvalidParameter(format!("node {} is a container and cannot receive spikes", target)));
        }
        let connection = Connection::build(source, target, weight, delay, Arc::clone(&node.handle))?;
        self.connections.connect(node.thread, connection);
        Ok(())
    }

    /// Impose delay extrema, in ms. They must enclose the delays of all connections.
    pub fn set_delay_extrema(&mut self, min_delay_ms: f64, max_delay_ms: f64) -> Result<(), NestError> {
        self.expect_initialized("set delay extrema")?;
        let config = KernelConfigBuilder::from((*self.config).clone())
            .delay_extrema_ms(min_delay_ms, max_delay_ms)
            .build()?;
        self.scheduler.set_config(Arc::clone(&config))?;
        self.config = config;
        Ok(())
    }

    fn collaborators(&mut self) -> (&mut Scheduler, Collaborators<C>) {
        let Kernel {
            comm,
            network,
            registry,
            connections,
            rngs,
            scheduler,
            ..
        } = self;
        (
            scheduler,
            Collaborators {
                comm,
                network,
                registry,
                connections,
                rngs,
            },
        )
    }

    /// Agree with all ranks on the simulation parameters and calibrate the nodes.
    pub fn prepare(&mut self) -> Result<(), NestError> {
        let (scheduler, ctx) = self.collaborators();
        scheduler.prepare_simulation(ctx)
    }

    /// Simulate for `ms` milliseconds; the kernel must be prepared.
    pub fn run(&mut self, ms: f64) -> Result<(), NestError> {
        let time_base = *self.scheduler.time_base();
        let steps = match time_base.ms_to_steps(ms) {
            Ok(steps) if time_base.is_grid_time(ms) => steps,
            Ok(_) => {
                return Err(NestError::InvalidParameter(format!(
                    "simulation time {} ms is not a multiple of the resolution {} ms",
                    ms,
                    time_base.resolution_ms()
                )))
            }
            Err(e) => return Err(self.scheduler.fail(&self.comm, e)),
        };
        let (scheduler, ctx) = self.collaborators();
        scheduler.run(steps, ctx)
    }

    /// Leave the prepared state, allowing further nodes and connections.
    pub fn cleanup(&mut self) -> Result<(), NestError> {
        self.scheduler.cleanup()
    }

    /// Prepare, run for `ms` milliseconds and clean up.
    pub fn simulate(&mut self, ms: f64) -> Result<(), NestError> {
        self.prepare()?;
        let result = self.run(ms);
        if self.scheduler.state() == SchedulerState::Prepared {
            self.cleanup()?;
        }
        result
    }

    /// Access a local node.
    pub fn with_node<T, F>(&self, gid: Gid, f: F) -> Result<T, NestError>
    where
        F: FnOnce(&dyn Node) -> T,
    {
        let node = self.network.get(gid).ok_or(NestError::UnknownNode(gid))?;
        let guard = lock_node(&node.handle)?;
        Ok(f(&**guard))
    }

    /// Access a local node of a known model.
    pub fn with_model<M, T, F>(&self, gid: Gid, f: F) -> Result<T, NestError>
    where
        M: Node + 'static,
        F: FnOnce(&M) -> T,
    {
        self.with_node(gid, |node| node.as_any().downcast_ref::<M>().map(f))?
            .ok_or_else(|| NestError::InvalidParameter(format!("node {} is not of the requested model", gid)))
    }

    /// Mutate a local node of a known model; only between simulations.
    pub fn with_model_mut<M, T, F>(&mut self, gid: Gid, f: F) -> Result<T, NestError>
    where
        M: Node + 'static,
        F: FnOnce(&mut M) -> T,
    {
        self.expect_initialized("modify nodes")?;
        let node = self.network.get(gid).ok_or(NestError::UnknownNode(gid))?;
        let mut guard = lock_node(&node.handle)?;
        guard
            .as_any_mut()
            .downcast_mut::<M>()
            .map(f)
            .ok_or_else(|| NestError::InvalidParameter(format!("node {} is not of the requested model", gid)))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn num_ranks(&self) -> usize {
        self.comm.num_ranks()
    }

    pub fn state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// The current simulation time, in steps.
    pub fn current_step(&self) -> Step {
        self.scheduler.clock().current_step() + self.scheduler.window().0
    }

    /// The current simulation time, in ms.
    pub fn time_ms(&self) -> f64 {
        self.scheduler.time_base().steps_to_ms(self.current_step())
    }

    /// The number of completed slices.
    pub fn slice_index(&self) -> u64 {
        self.scheduler.clock().slice_index()
    }

    pub fn delay_extrema(&self) -> DelayExtrema {
        self.scheduler.delay_extrema()
    }

    /// The current block size of the spike exchange.
    pub fn block_size(&self) -> usize {
        self.scheduler.block_size()
    }

    pub fn is_off_grid(&self) -> bool {
        self.scheduler.is_off_grid()
    }

    /// The number of nodes on all ranks.
    pub fn num_nodes(&self) -> usize {
        self.network.size()
    }

    pub fn num_local_nodes(&self) -> usize {
        self.network.num_local()
    }

    /// The number of connections stored on this rank.
    pub fn num_connections(&self) -> usize {
        self.connections.num_connections()
    }

    /// Spikes emitted on this rank during the last completed slice.
    pub fn local_spikes(&self) -> usize {
        self.scheduler.local_spikes()
    }

    /// Spikes emitted on this rank since the last reset.
    pub fn total_local_spikes(&self) -> u64 {
        self.scheduler.total_local_spikes()
    }

    pub fn network(&self) -> &Network {
        &self.network
    }
}
