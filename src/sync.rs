//! A reusable barrier that can be aborted.
//!
//! Unlike [`std::sync::Barrier`], a waiting participant is released with an
//! error as soon as any participant aborts, so that a failure on one rank
//! never leaves its peers blocked forever.
use std::sync::{Condvar, Mutex};

use crate::error::CommError;

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: bool,
}

#[derive(Debug)]
pub struct PhasedBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl PhasedBarrier {
    pub fn new(parties: usize) -> Self {
        PhasedBarrier {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                aborted: false,
            }),
            cvar: Condvar::new(),
        }
    }

    /// Block until all parties have arrived at the current phase.
    /// Returns `true` for exactly one party per phase (the last to arrive).
    pub fn wait(&self) -> Result<bool, CommError> {
        let mut state = self.state.lock().map_err(|_| CommError::Aborted)?;
        if state.aborted {
            return Err(CommError::Aborted);
        }

        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(true);
        }

        let generation = state.generation;
        while state.generation == generation && !state.aborted {
            state = self.cvar.wait(state).map_err(|_| CommError::Aborted)?;
        }
        if state.generation == generation {
            return Err(CommError::Aborted);
        }
        Ok(false)
    }

    /// Release every current and future waiter with an error.
    pub fn abort(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.aborted = true;
        }
        self.cvar.notify_all();
    }
}
