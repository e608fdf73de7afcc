//! Per-thread, per-lag collection of the spikes emitted during a slice.
use crate::node::Gid;
use crate::time::Step;

/// The spikes emitted by the nodes of one thread, indexed by lag.
/// Only the owning thread writes to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadRegister {
    thread: usize,
    grid: Vec<Vec<Gid>>,
    off_grid: Vec<Vec<(Gid, f64)>>,
}

impl ThreadRegister {
    pub fn new(thread: usize, min_delay: Step) -> Self {
        ThreadRegister {
            thread,
            grid: vec![Vec::new(); min_delay as usize],
            off_grid: vec![Vec::new(); min_delay as usize],
        }
    }

    pub fn thread(&self) -> usize {
        self.thread
    }

    /// The number of lags per slice.
    pub fn num_lags(&self) -> usize {
        self.grid.len()
    }

    /// Append an on-grid spike.
    ///
    /// # Panics
    /// Panics if the lag is outside the slice.
    pub fn record(&mut self, lag: Step, gid: Gid) {
        assert!(
            lag >= 0 && (lag as usize) < self.grid.len(),
            "lag {} outside the slice [0, {})",
            lag,
            self.grid.len()
        );
        self.grid[lag as usize].push(gid);
    }

    /// Append an off-grid spike.
    ///
    /// # Panics
    /// Panics if the lag is outside the slice.
    pub fn record_off_grid(&mut self, lag: Step, gid: Gid, offset: f64) {
        assert!(
            lag >= 0 && (lag as usize) < self.off_grid.len(),
            "lag {} outside the slice [0, {})",
            lag,
            self.off_grid.len()
        );
        self.off_grid[lag as usize].push((gid, offset));
    }

    pub fn grid(&self, lag: usize) -> &[Gid] {
        &self.grid[lag]
    }

    pub fn off_grid(&self, lag: usize) -> &[(Gid, f64)] {
        &self.off_grid[lag]
    }

    pub fn num_spikes(&self) -> usize {
        self.grid.iter().map(|lag| lag.len()).sum::<usize>()
            + self.off_grid.iter().map(|lag| lag.len()).sum::<usize>()
    }

    /// Forget all spikes; the allocations are kept for the next slice.
    pub fn clear(&mut self) {
        self.grid.iter_mut().for_each(|lag| lag.clear());
        self.off_grid.iter_mut().for_each(|lag| lag.clear());
    }

    fn resize(&mut self, min_delay: Step) {
        self.grid.resize_with(min_delay as usize, Vec::new);
        self.off_grid.resize_with(min_delay as usize, Vec::new);
    }
}

/// The registers of all local threads, `[thread][lag]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeRegister {
    rows: Vec<ThreadRegister>,
}

impl SpikeRegister {
    pub fn new(num_threads: usize, min_delay: Step) -> Self {
        SpikeRegister {
            rows: (0..num_threads).map(|t| ThreadRegister::new(t, min_delay)).collect(),
        }
    }

    pub fn num_threads(&self) -> usize {
        self.rows.len()
    }

    pub fn num_lags(&self) -> usize {
        self.rows.first().map_or(0, |row| row.num_lags())
    }

    pub fn row(&self, thread: usize) -> &ThreadRegister {
        &self.rows[thread]
    }

    pub fn rows(&self) -> &[ThreadRegister] {
        &self.rows
    }

    /// One exclusively borrowed row per thread.
    pub fn rows_mut(&mut self) -> &mut [ThreadRegister] {
        &mut self.rows
    }

    pub fn record(&mut self, thread: usize, lag: Step, gid: Gid) {
        self.rows[thread].record(lag, gid);
    }

    pub fn record_off_grid(&mut self, thread: usize, lag: Step, gid: Gid, offset: f64) {
        self.rows[thread].record_off_grid(lag, gid, offset);
    }

    pub fn num_spikes(&self) -> usize {
        self.rows.iter().map(|row| row.num_spikes()).sum()
    }

    pub fn clear(&mut self) {
        self.rows.iter_mut().for_each(|row| row.clear());
    }

    /// Adapt the number of lags to a new minimum delay. Pending spikes of
    /// dropped lags are discarded, so this only happens between simulations.
    pub fn resize(&mut self, min_delay: Step) {
        self.rows.iter_mut().for_each(|row| row.resize(min_delay));
    }
}
