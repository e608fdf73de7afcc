//! Collective communication between ranks.
//!
//! The kernel only needs a handful of blocking collectives: a fixed-size and a
//! variable-size all-gather of wire records, and small scalar reductions used
//! to agree on delay extrema, off-grid mode, termination, and random-generator
//! synchrony. Every rank must call the same collectives in the same order.
//!
//! - [`local::LocalCommunicator`]: a single rank; collectives are copies.
//! - [`threaded::ThreadedCommunicator`]: several ranks living on OS threads of
//!   one process, synchronized with a [`crate::sync::PhasedBarrier`].
pub mod local;
pub mod threaded;

pub use local::LocalCommunicator;
pub use threaded::ThreadedCommunicator;

use crate::error::CommError;
use crate::wire::WireRecord;

/// A group of ranks exchanging data through blocking collectives.
pub trait Communicator: Send + Sync {
    /// The rank of the caller, in `0..num_ranks()`.
    fn rank(&self) -> usize;

    /// The number of ranks in the group.
    fn num_ranks(&self) -> usize;

    /// Gather equally sized blocks from every rank: `recv[r * n..(r + 1) * n]`
    /// receives the `send` block of rank `r`, with `n = send.len()`.
    fn all_gather<R: WireRecord>(&self, send: &[R], recv: &mut [R]) -> Result<(), CommError>;

    /// Gather blocks of known, possibly different sizes: the block of rank `r`
    /// has `counts[r]` records and lands at `recv[displacements[r]..]`.
    fn all_gather_v<R: WireRecord>(
        &self,
        send: &[R],
        recv: &mut [R],
        counts: &[usize],
        displacements: &[usize],
    ) -> Result<(), CommError>;

    /// Gather one block of scalars from every rank, in rank order.
    fn all_gather_scalars(&self, values: &[i64]) -> Result<Vec<Vec<i64>>, CommError>;

    /// Make every pending and future collective of the group fail.
    fn abort(&self);

    /// Reduce `(min, max)` pairs to the global minimum and maximum.
    fn all_reduce_min_max(&self, min: i64, max: i64) -> Result<(i64, i64), CommError> {
        let gathered = self.all_gather_scalars(&[min, max])?;
        let global_min = gathered.iter().map(|pair| pair[0]).min().unwrap_or(min);
        let global_max = gathered.iter().map(|pair| pair[1]).max().unwrap_or(max);
        Ok((global_min, global_max))
    }

    /// Logical OR of a flag over all ranks.
    fn all_reduce_or(&self, flag: bool) -> Result<bool, CommError> {
        let gathered = self.all_gather_scalars(&[flag as i64])?;
        Ok(gathered.iter().any(|value| value[0] != 0))
    }

    /// Gather one `u64` from every rank, in rank order.
    fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>, CommError> {
        let gathered = self.all_gather_scalars(&[value as i64])?;
        Ok(gathered.iter().map(|value| value[0] as u64).collect())
    }
}

/// Check that `recv` can hold `expected` records.
pub(crate) fn check_len(expected: usize, actual: usize) -> Result<(), CommError> {
    if expected != actual {
        return Err(CommError::SizeMismatch { expected, actual });
    }
    Ok(())
}
