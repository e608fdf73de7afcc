//! The simulation loop.
//!
//! Time advances in slices of `min_delay` steps. During a slice every thread
//! updates the nodes it owns, collecting their spikes in its row of the spike
//! register. Once a slice is complete the register is collated and exchanged
//! with all ranks, the received spikes are delivered to their local targets,
//! and the clock moves on. A run that ends inside a slice leaves the slice
//! open; the next run continues it.
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use derivative::Derivative;
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::clock::{DelayExtrema, RingModulo, SimClock};
use crate::comm::Communicator;
use crate::config::KernelConfig;
use crate::connection::ConnectionManager;
use crate::dispatch::SpikeRuns;
use crate::error::{CommError, NestError, Stage};
use crate::exchange::CollectiveExchange;
use crate::network::{lock_node, Network};
use crate::node::{DeliveryContext, UpdateContext};
use crate::registry::{NodeRegistry, RegistrySnapshot};
use crate::rng::RngManager;
use crate::spike_register::SpikeRegister;
use crate::time::{Step, TimeBase};
use crate::wire::{GridRecord, OffGridRecord, WireRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Uninitialized,
    /// Nodes and connections may be created.
    Initialized,
    /// Ready to run.
    Prepared,
    Simulating,
    /// A fatal error occurred; only a kernel reset leaves this state.
    Terminated,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchedulerState::Uninitialized => write!(f, "uninitialized"),
            SchedulerState::Initialized => write!(f, "initialized"),
            SchedulerState::Prepared => write!(f, "prepared"),
            SchedulerState::Simulating => write!(f, "simulating"),
            SchedulerState::Terminated => write!(f, "terminated"),
        }
    }
}

/// What the scheduler borrows from the kernel for one operation.
pub struct Collaborators<'a, C: Communicator> {
    pub comm: &'a C,
    pub network: &'a Network,
    pub registry: &'a NodeRegistry,
    pub connections: &'a ConnectionManager,
    pub rngs: &'a mut RngManager,
}

/// The exchange of the current mode; the record width is fixed for a whole simulation.
#[derive(Debug, Clone)]
enum SpikeExchange {
    Grid(CollectiveExchange<GridRecord>),
    OffGrid(CollectiveExchange<OffGridRecord>),
}

impl SpikeExchange {
    fn new(off_grid: bool, block_size: usize) -> Self {
        if off_grid {
            SpikeExchange::OffGrid(CollectiveExchange::new(block_size))
        } else {
            SpikeExchange::Grid(CollectiveExchange::new(block_size))
        }
    }

    fn is_off_grid(&self) -> bool {
        matches!(self, SpikeExchange::OffGrid(_))
    }

    fn block_size(&self) -> usize {
        match self {
            SpikeExchange::Grid(exchange) => exchange.block_size(),
            SpikeExchange::OffGrid(exchange) => exchange.block_size(),
        }
    }

    fn raise_block_size(&mut self, block_size: usize) {
        match self {
            SpikeExchange::Grid(exchange) => exchange.raise_block_size(block_size),
            SpikeExchange::OffGrid(exchange) => exchange.raise_block_size(block_size),
        }
    }

    /// Collate and exchange the register; returns the local spike count and the received spikes.
    fn run<C: Communicator>(
        &mut self,
        register: &SpikeRegister,
        comm: &C,
        min_delay: Step,
    ) -> Result<(usize, SpikeRuns), CommError> {
        match self {
            SpikeExchange::Grid(exchange) => exchange_spikes(exchange, register, comm, min_delay),
            SpikeExchange::OffGrid(exchange) => exchange_spikes(exchange, register, comm, min_delay),
        }
    }
}

/// The message of a caught panic.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => format!("panicked: {}", message),
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => format!("panicked: {}", message),
            Err(_) => "panicked".to_string(),
        },
    }
}

fn exchange_spikes<R: WireRecord, C: Communicator>(
    exchange: &mut CollectiveExchange<R>,
    register: &SpikeRegister,
    comm: &C,
    min_delay: Step,
) -> Result<(usize, SpikeRuns), CommError> {
    let block_size = exchange.block_size();
    let num_spikes = exchange.send_buffer_mut().collate(register, block_size);
    exchange.exchange(comm)?;
    Ok((num_spikes, SpikeRuns::parse(exchange.segments(), min_delay)))
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Scheduler {
    state: SchedulerState,
    config: Arc<KernelConfig>,
    time_base: TimeBase,
    clock: SimClock,
    extrema: DelayExtrema,
    moduli: RingModulo,
    register: SpikeRegister,
    exchange: SpikeExchange,
    /// First lag of the next sub-slice.
    from_step: Step,
    /// End lag of the next sub-slice.
    to_step: Step,
    /// Steps left in the current run.
    to_do: Step,
    /// Steps requested by the current run, for progress reports.
    run_length: Step,
    terminate: Arc<AtomicBool>,
    local_spikes: usize,
    total_local_spikes: u64,
    #[derivative(Debug = "ignore")]
    pool: ThreadPool,
}

impl Scheduler {
    pub fn build(config: Arc<KernelConfig>, terminate: Arc<AtomicBool>) -> Result<Self, NestError> {
        let time_base = config.time_base()?;
        let num_threads = config.local_num_threads;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("nest-worker-{}", i))
            .build()
            .map_err(|e| NestError::InvalidParameter(format!("cannot start {} threads: {}", num_threads, e)))?;

        let clock = SimClock::new();
        let extrema = DelayExtrema::default();
        let block_size = config.send_buffer_size;
        Ok(Scheduler {
            state: SchedulerState::Uninitialized,
            time_base,
            clock,
            extrema,
            moduli: RingModulo::new(&clock, extrema),
            register: SpikeRegister::new(num_threads, extrema.min_delay()),
            exchange: SpikeExchange::new(config.off_grid_spiking, block_size),
            from_step: 0,
            to_step: 0,
            to_do: 0,
            run_length: 0,
            terminate,
            local_spikes: 0,
            total_local_spikes: 0,
            pool,
            config,
        })
    }

    /// Mark the scheduler ready for network construction.
    pub fn initialize(&mut self) {
        if self.state == SchedulerState::Uninitialized {
            self.state = SchedulerState::Initialized;
        }
    }

    /// Replace the configuration; the time base and thread count must not change.
    pub fn set_config(&mut self, config: Arc<KernelConfig>) -> Result<(), NestError> {
        self.expect_state(SchedulerState::Initialized, "reconfigure")?;
        if config.time_base()? != self.time_base || config.local_num_threads != self.config.local_num_threads {
            return Err(NestError::InvalidParameter(
                "the resolution and thread count can only change on reset".to_string(),
            ));
        }
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn time_base(&self) -> &TimeBase {
        &self.time_base
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn delay_extrema(&self) -> DelayExtrema {
        self.extrema
    }

    pub fn moduli(&self) -> &RingModulo {
        &self.moduli
    }

    /// The current block size of the spike exchange.
    pub fn block_size(&self) -> usize {
        self.exchange.block_size()
    }

    pub fn is_off_grid(&self) -> bool {
        self.exchange.is_off_grid()
    }

    /// The number of spikes emitted on this rank during the last completed slice.
    pub fn local_spikes(&self) -> usize {
        self.local_spikes
    }

    /// The number of spikes emitted on this rank since the last reset.
    pub fn total_local_spikes(&self) -> u64 {
        self.total_local_spikes
    }

    /// The sub-slice `[from, to)` the next update covers.
    pub fn window(&self) -> (Step, Step) {
        (self.from_step, self.to_step)
    }

    pub fn to_do(&self) -> Step {
        self.to_do
    }

    fn expect_state(&self, expected: SchedulerState, operation: &str) -> Result<(), NestError> {
        if self.state != expected {
            return Err(NestError::InvalidState(format!(
                "cannot {} while {} (must be {})",
                operation, self.state, expected
            )));
        }
        Ok(())
    }

    /// Terminate on fatal errors, aborting the communicator if peers may be left waiting.
    pub(crate) fn fail<C: Communicator>(&mut self, comm: &C, e: NestError) -> NestError {
        if e.is_fatal() {
            match e.stage() {
                Some(stage) => log::error!("Fatal error during {}: {}", stage, e),
                None => log::error!("Fatal error: {}", e),
            }
            self.state = SchedulerState::Terminated;
            if e.requires_abort() {
                comm.abort();
            }
        }
        e
    }

    /// Get ready to simulate: check random generator synchrony, agree on the delay
    /// extrema and the exchange mode, size the buffers and calibrate the nodes.
    pub fn prepare_simulation<C: Communicator>(&mut self, ctx: Collaborators<C>) -> Result<(), NestError> {
        if self.state == SchedulerState::Terminated {
            return Err(NestError::InvalidState("the kernel was terminated and must be reset".to_string()));
        }
        self.expect_state(SchedulerState::Initialized, "prepare")?;
        let comm = ctx.comm;
        match self.prepare_inner(ctx) {
            Ok(()) => {
                self.state = SchedulerState::Prepared;
                log::info!(
                    "Rank {}: prepared (delays {}..{} steps, block size {}, {} mode)",
                    comm.rank(),
                    self.extrema.min_delay(),
                    self.extrema.max_delay(),
                    self.exchange.block_size(),
                    if self.exchange.is_off_grid() { "off-grid" } else { "on-grid" }
                );
                Ok(())
            }
            Err(e) => Err(self.fail(comm, e)),
        }
    }

    fn prepare_inner<C: Communicator>(&mut self, ctx: Collaborators<C>) -> Result<(), NestError> {
        let comm = ctx.comm;
        let rank = comm.rank();
        let collective = |source: CommError| NestError::Collective {
            rank,
            stage: Stage::Prepare,
            source,
        };

        ctx.rngs.check_synchrony(comm)?;

        let extrema = self.negotiate_extrema(comm, ctx.connections)?;
        let agreed = comm
            .all_gather_scalars(&[extrema.min_delay(), extrema.max_delay()])
            .map_err(collective)?;
        if !agreed.iter().all_equal() {
            return Err(NestError::InconsistentDelays {
                rank,
                min_delay: extrema.min_delay(),
                max_delay: extrema.max_delay(),
            });
        }
        if extrema != self.extrema {
            if self.clock.current_step() > 0 || self.from_step > 0 {
                return Err(NestError::InvalidDelay(format!(
                    "delay extrema cannot change from ({}, {}) to ({}, {}) once the simulation has started",
                    self.extrema.min_delay(),
                    self.extrema.max_delay(),
                    extrema.min_delay(),
                    extrema.max_delay()
                )));
            }
            self.extrema = extrema;
            self.moduli.recompute(&self.clock, extrema);
            self.register.resize(extrema.min_delay());
        }

        let local_off_grid = self.config.off_grid_spiking
            || ctx
                .network
                .iter_local()
                .map(|node| lock_node(&node.handle).map(|node| node.is_off_grid()))
                .collect::<Result<Vec<bool>, NestError>>()?
                .into_iter()
                .any(|off_grid| off_grid);
        let off_grid = comm.all_reduce_or(local_off_grid).map_err(collective)?;

        // an empty slice must fit the block: one marker per thread and lag on every rank
        let threads = self.register.num_threads();
        let local_block = self
            .exchange
            .block_size()
            .max(threads * extrema.min_delay() as usize);
        let (_, block_size) = comm.all_reduce_min_max(local_block as i64, local_block as i64).map_err(collective)?;
        let block_size = block_size as usize;
        if off_grid != self.exchange.is_off_grid() {
            log::info!(
                "Rank {}: switching the spike exchange to {} mode",
                rank,
                if off_grid { "off-grid" } else { "on-grid" }
            );
            self.exchange = SpikeExchange::new(off_grid, block_size);
        } else {
            self.exchange.raise_block_size(block_size);
        }

        for node in ctx.network.iter_local() {
            lock_node(&node.handle)?.calibrate(&self.time_base, extrema)?;
        }
        ctx.registry.snapshot(ctx.network)?;
        Ok(())
    }

    /// Reduce the local delay extrema over all ranks and apply the configured overrides.
    fn negotiate_extrema<C: Communicator>(
        &self,
        comm: &C,
        connections: &ConnectionManager,
    ) -> Result<DelayExtrema, NestError> {
        let rank = comm.rank();
        let local_min = connections.min_delay().unwrap_or(Step::MAX);
        let local_max = connections.max_delay().unwrap_or(Step::MIN);
        let (global_min, global_max) = comm
            .all_reduce_min_max(local_min, local_max)
            .map_err(|source| NestError::Collective {
                rank,
                stage: Stage::Prepare,
                source,
            })?;
        let connected = global_min <= global_max;

        let override_min = self
            .config
            .min_delay_ms
            .map(|ms| self.time_base.delay_ms_to_steps(ms))
            .transpose()?;
        let override_max = self
            .config
            .max_delay_ms
            .map(|ms| self.time_base.delay_ms_to_steps(ms))
            .transpose()?;

        let min_delay = match override_min {
            Some(min) if connected && min > global_min => {
                return Err(NestError::InvalidDelay(format!(
                    "minimum delay {} steps exceeds the shortest connection delay {}",
                    min, global_min
                )))
            }
            Some(min) => min,
            None if connected => global_min,
            None => 1,
        };
        let max_delay = match override_max {
            Some(max) if connected && max < global_max => {
                return Err(NestError::InvalidDelay(format!(
                    "maximum delay {} steps is below the longest connection delay {}",
                    max, global_max
                )))
            }
            Some(max) => max,
            None if connected => global_max,
            None => min_delay,
        };
        DelayExtrema::build(min_delay, max_delay)
    }

    /// Start a run of `steps` steps.
    pub fn begin_run(&mut self, steps: Step) -> Result<(), NestError> {
        self.expect_state(SchedulerState::Prepared, "run")?;
        if steps <= 0 {
            return Err(NestError::InvalidParameter(format!(
                "the simulation time must be positive, got {} steps",
                steps
            )));
        }
        let reached = self
            .clock
            .current_step()
            .checked_add(self.from_step)
            .and_then(|step| step.checked_add(steps));
        if reached.map_or(true, |step| step > self.time_base.max_steps()) {
            self.state = SchedulerState::Terminated;
            return Err(NestError::ClockOverflow {
                requested_steps: steps,
                limit: self.time_base.max_steps(),
            });
        }

        self.to_do = steps;
        self.run_length = steps;
        self.to_step = (self.from_step + self.to_do).min(self.extrema.min_delay());
        Ok(())
    }

    /// Run `steps` steps. The scheduler must be prepared.
    pub fn run<C: Communicator>(&mut self, steps: Step, ctx: Collaborators<C>) -> Result<(), NestError> {
        let comm = ctx.comm;
        if let Err(e) = self.begin_run(steps) {
            return Err(self.fail(comm, e));
        }
        self.state = SchedulerState::Simulating;
        log::info!(
            "Rank {}: simulating {} steps from step {}",
            comm.rank(),
            steps,
            self.clock.current_step() + self.from_step
        );

        match self.run_loop(ctx) {
            Ok(()) => {
                self.state = SchedulerState::Prepared;
                log::info!(
                    "Rank {}: simulation reached step {}",
                    comm.rank(),
                    self.clock.current_step() + self.from_step
                );
                Ok(())
            }
            Err(e) => Err(self.fail(comm, e)),
        }
    }

    fn run_loop<C: Communicator>(&mut self, ctx: Collaborators<C>) -> Result<(), NestError> {
        let snapshot = ctx.registry.snapshot(ctx.network)?;
        while self.to_do > 0 {
            self.update(ctx.comm, &snapshot, ctx.connections, ctx.rngs, ctx.network.layout().rank())?;
            let slice_complete = self.to_step == self.extrema.min_delay();
            self.advance_time();
            if slice_complete {
                self.report_progress();
                self.check_termination(ctx.comm)?;
            }
        }
        Ok(())
    }

    /// Update all nodes over the current sub-slice; at the end of a slice, exchange
    /// and deliver the spikes.
    fn update<C: Communicator>(
        &mut self,
        comm: &C,
        snapshot: &RegistrySnapshot,
        connections: &ConnectionManager,
        rngs: &mut RngManager,
        rank: usize,
    ) -> Result<(), NestError> {
        let origin = self.clock.current_step();
        let (from, to) = (self.from_step, self.to_step);
        let moduli = &self.moduli;
        let rows = self.register.rows_mut();
        let thread_rngs = rngs.thread_rngs_mut();
        let num_ranks = comm.num_ranks();

        let results: Vec<Result<(), NestError>> = self.pool.install(|| {
            rows.par_iter_mut()
                .zip(thread_rngs.par_iter_mut())
                .enumerate()
                .map(|(thread, (row, rng))| {
                    let vp = thread * num_ranks + rank;
                    let mut uctx = UpdateContext::new(origin, thread, vp, moduli, row, rng);
                    for entry in snapshot.thread_slice(thread) {
                        let failed = |message: String| NestError::NodeUpdate {
                            rank,
                            thread,
                            gid: entry.gid,
                            message,
                        };
                        let mut node = lock_node(&entry.handle).map_err(|e| failed(e.to_string()))?;
                        if node.is_frozen() {
                            continue;
                        }
                        match panic::catch_unwind(AssertUnwindSafe(|| node.update(&mut uctx, from, to))) {
                            Ok(result) => result.map_err(|e| failed(e.to_string()))?,
                            Err(payload) => return Err(failed(panic_message(payload))),
                        }
                    }
                    Ok(())
                })
                .collect()
        });
        results.into_iter().collect::<Result<Vec<()>, NestError>>()?;

        if to == self.extrema.min_delay() {
            self.exchange_and_deliver(comm, connections, rank)?;
        }
        Ok(())
    }

    fn exchange_and_deliver<C: Communicator>(
        &mut self,
        comm: &C,
        connections: &ConnectionManager,
        rank: usize,
    ) -> Result<(), NestError> {
        let min_delay = self.extrema.min_delay();
        let (num_spikes, runs) = self
            .exchange
            .run(&self.register, comm, min_delay)
            .map_err(|source| NestError::Collective {
                rank,
                stage: Stage::Exchange,
                source,
            })?;
        self.register.clear();
        self.local_spikes = num_spikes;
        self.total_local_spikes += num_spikes as u64;
        log::trace!(
            "Rank {}: slice {} exchanged {} local and {} global spikes",
            rank,
            self.clock.slice_index(),
            num_spikes,
            runs.num_spikes()
        );

        let dctx = DeliveryContext::new(&self.moduli, self.clock.current_step());
        let threads = self.register.num_threads();
        let delivered: Vec<Result<usize, NestError>> = self.pool.install(|| {
            (0..threads)
                .into_par_iter()
                .map(|thread| {
                    let failed = |message: String| NestError::Delivery { rank, thread, message };
                    match panic::catch_unwind(AssertUnwindSafe(|| runs.deliver(connections, thread, &dctx))) {
                        Ok(result) => result.map_err(|e| failed(e.to_string())),
                        Err(payload) => Err(failed(panic_message(payload))),
                    }
                })
                .collect()
        });
        let delivered: usize = delivered.into_iter().sum::<Result<usize, NestError>>()?;
        log::trace!("Rank {}: {} deliveries", rank, delivered);
        Ok(())
    }

    /// Account for the completed sub-slice and move to the next one.
    pub fn advance_time(&mut self) {
        let min_delay = self.extrema.min_delay();
        self.to_do -= self.to_step - self.from_step;
        if self.to_step == min_delay {
            self.clock.advance(min_delay);
            self.moduli.rotate(&self.clock);
            self.from_step = 0;
        } else {
            self.from_step = self.to_step;
        }
        self.to_step = (self.from_step + self.to_do).min(min_delay);
    }

    fn report_progress(&self) {
        if !self.config.print_time || self.run_length == 0 {
            return;
        }
        let done = self.run_length - self.to_do;
        log::info!(
            "{:.1} ms simulated, {:.0}% of the run ({} local spikes in the last slice)",
            self.time_base.steps_to_ms(self.clock.current_step()),
            100.0 * done as f64 / self.run_length as f64,
            self.local_spikes
        );
    }

    /// Stop at a slice boundary if any rank was asked to terminate.
    fn check_termination<C: Communicator>(&mut self, comm: &C) -> Result<(), NestError> {
        let local = self.terminate.load(Ordering::SeqCst);
        let stop = if comm.num_ranks() > 1 {
            comm.all_reduce_or(local).map_err(|source| NestError::Collective {
                rank: comm.rank(),
                stage: Stage::Exchange,
                source,
            })?
        } else {
            local
        };
        if stop {
            return Err(NestError::Interrupted {
                rank: comm.rank(),
                step: self.clock.current_step(),
            });
        }
        Ok(())
    }

    /// Leave the prepared state; nodes and connections may be created again.
    pub fn cleanup(&mut self) -> Result<(), NestError> {
        self.expect_state(SchedulerState::Prepared, "clean up")?;
        self.state = SchedulerState::Initialized;
        log::debug!("Cleaned up after simulation at step {}", self.clock.current_step());
        Ok(())
    }
}
