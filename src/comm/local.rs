//! The trivial single-rank communicator.
use crate::comm::{check_len, Communicator};
use crate::error::CommError;
use crate::wire::WireRecord;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCommunicator;

impl LocalCommunicator {
    pub fn new() -> Self {
        LocalCommunicator
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_gather<R: WireRecord>(&self, send: &[R], recv: &mut [R]) -> Result<(), CommError> {
        check_len(send.len(), recv.len())?;
        recv.copy_from_slice(send);
        Ok(())
    }

    fn all_gather_v<R: WireRecord>(
        &self,
        send: &[R],
        recv: &mut [R],
        counts: &[usize],
        displacements: &[usize],
    ) -> Result<(), CommError> {
        check_len(1, counts.len())?;
        check_len(1, displacements.len())?;
        check_len(counts[0], send.len())?;
        let end = displacements[0] + counts[0];
        if recv.len() < end {
            return Err(CommError::SizeMismatch {
                expected: end,
                actual: recv.len(),
            });
        }
        recv[displacements[0]..end].copy_from_slice(send);
        Ok(())
    }

    fn all_gather_scalars(&self, values: &[i64]) -> Result<Vec<Vec<i64>>, CommError> {
        Ok(vec![values.to_vec()])
    }

    fn abort(&self) {}
}
