//! Ranks on OS threads of a single process.
//!
//! Each collective is two barrier phases: every rank deposits its contribution
//! in a shared slot table, waits, copies what it needs, and waits again before
//! the slots can be reused by the next collective.
use std::any::Any;
use std::sync::{Arc, Mutex};

use derivative::Derivative;

use crate::comm::{check_len, Communicator};
use crate::error::CommError;
use crate::sync::PhasedBarrier;
use crate::wire::WireRecord;

type Slot = Option<Box<dyn Any + Send>>;

#[derive(Derivative)]
#[derivative(Debug)]
struct Group {
    barrier: PhasedBarrier,
    #[derivative(Debug = "ignore")]
    slots: Mutex<Vec<Slot>>,
}

/// One rank of an in-process communicator group.
#[derive(Debug)]
pub struct ThreadedCommunicator {
    rank: usize,
    num_ranks: usize,
    group: Arc<Group>,
}

impl ThreadedCommunicator {
    /// Create the communicators of a group of `num_ranks` ranks, one per rank.
    pub fn group(num_ranks: usize) -> Result<Vec<ThreadedCommunicator>, CommError> {
        if num_ranks == 0 {
            return Err(CommError::EmptyGroup);
        }
        let group = Arc::new(Group {
            barrier: PhasedBarrier::new(num_ranks),
            slots: Mutex::new((0..num_ranks).map(|_| None).collect()),
        });
        Ok((0..num_ranks)
            .map(|rank| ThreadedCommunicator {
                rank,
                num_ranks,
                group: Arc::clone(&group),
            })
            .collect())
    }

    /// Deposit a contribution and run `read` over all contributions once every rank has arrived.
    fn exchange<T, F, O>(&self, contribution: Vec<T>, read: F) -> Result<O, CommError>
    where
        T: Send + 'static,
        F: FnOnce(&[&Vec<T>]) -> Result<O, CommError>,
    {
        {
            let mut slots = self.group.slots.lock().map_err(|_| CommError::Aborted)?;
            slots[self.rank] = Some(Box::new(contribution));
        }
        self.group.barrier.wait()?;

        let output = {
            let slots = self.group.slots.lock().map_err(|_| CommError::Aborted)?;
            let contributions = slots
                .iter()
                .map(|slot| {
                    slot.as_ref()
                        .and_then(|value| value.downcast_ref::<Vec<T>>())
                        .ok_or(CommError::TypeMismatch)
                })
                .collect::<Result<Vec<&Vec<T>>, CommError>>();
            contributions.and_then(|contributions| read(&contributions))
        };

        // Always take the second phase, so that a local failure does not strand peers.
        let released = self.group.barrier.wait();
        let output = output?;
        released?;
        Ok(output)
    }
}

impl Communicator for ThreadedCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    fn all_gather<R: WireRecord>(&self, send: &[R], recv: &mut [R]) -> Result<(), CommError> {
        let block = send.len();
        check_len(block * self.num_ranks, recv.len())?;
        self.exchange(send.to_vec(), |contributions| {
            for (rank, contribution) in contributions.iter().enumerate() {
                check_len(block, contribution.len())?;
                recv[rank * block..(rank + 1) * block].copy_from_slice(contribution);
            }
            Ok(())
        })
    }

    fn all_gather_v<R: WireRecord>(
        &self,
        send: &[R],
        recv: &mut [R],
        counts: &[usize],
        displacements: &[usize],
    ) -> Result<(), CommError> {
        check_len(self.num_ranks, counts.len())?;
        check_len(self.num_ranks, displacements.len())?;
        check_len(counts[self.rank], send.len())?;
        let end = counts
            .iter()
            .zip(displacements.iter())
            .map(|(count, displacement)| count + displacement)
            .max()
            .unwrap_or(0);
        if recv.len() < end {
            return Err(CommError::SizeMismatch {
                expected: end,
                actual: recv.len(),
            });
        }

        self.exchange(send.to_vec(), |contributions| {
            for (rank, contribution) in contributions.iter().enumerate() {
                check_len(counts[rank], contribution.len())?;
                let start = displacements[rank];
                recv[start..start + counts[rank]].copy_from_slice(contribution);
            }
            Ok(())
        })
    }

    fn all_gather_scalars(&self, values: &[i64]) -> Result<Vec<Vec<i64>>, CommError> {
        self.exchange(values.to_vec(), |contributions| {
            Ok(contributions.iter().map(|values| (*values).clone()).collect())
        })
    }

    fn abort(&self) {
        log::error!("Rank {} aborts the communicator group", self.rank);
        self.group.barrier.abort();
    }
}

impl Drop for ThreadedCommunicator {
    fn drop(&mut self) {
        // A rank unwinding from a panic would otherwise leave its peers blocked.
        if std::thread::panicking() {
            self.group.barrier.abort();
        }
    }
}
