//! Random number generators of the kernel.
//!
//! The global generator is shared by all ranks and drawn from only on the join
//! thread, in the same order everywhere. Each virtual process has its own
//! generator, a stream of the same ChaCha key selected by the VP index, so that
//! results do not depend on how VPs are mapped to OS threads.
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::comm::Communicator;
use crate::error::{NestError, Stage};
use crate::network::VpLayout;

#[derive(Debug, Clone)]
pub struct RngManager {
    global: ChaCha8Rng,
    thread_rngs: Vec<ChaCha8Rng>,
}

impl RngManager {
    pub fn new(grng_seed: u64, rng_seed: u64, layout: &VpLayout) -> Self {
        let thread_rngs = (0..layout.num_threads())
            .map(|thread| {
                let mut rng = ChaCha8Rng::seed_from_u64(rng_seed);
                rng.set_stream(layout.vp_of_thread(thread) as u64);
                rng
            })
            .collect();
        RngManager {
            global: ChaCha8Rng::seed_from_u64(grng_seed),
            thread_rngs,
        }
    }

    /// The global generator. Must only be used where all ranks use it identically.
    pub fn global(&mut self) -> &mut ChaCha8Rng {
        &mut self.global
    }

    /// One generator per local thread, indexed by thread.
    pub fn thread_rngs_mut(&mut self) -> &mut [ChaCha8Rng] {
        &mut self.thread_rngs
    }

    /// Draw a value from the global generator and check that every rank drew the same.
    pub fn check_synchrony<C: Communicator>(&mut self, comm: &C) -> Result<(), NestError> {
        let local = self.global.gen::<u64>();
        let drawn = comm.all_gather_u64(local).map_err(|source| NestError::Collective {
            rank: comm.rank(),
            stage: Stage::Prepare,
            source,
        })?;
        match drawn.iter().enumerate().find(|(_, &remote)| remote != local) {
            Some((remote_rank, &remote)) => Err(NestError::RngDesync {
                rank: comm.rank(),
                local,
                remote,
                remote_rank,
            }),
            None => Ok(()),
        }
    }
}
