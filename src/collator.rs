//! Serialization of the spike register into a flat send buffer.
use crate::spike_register::SpikeRegister;
use crate::wire::WireRecord;

/// The records a rank contributes to one exchange.
///
/// After [`SendBuffer::collate`] the buffer holds one marker-terminated run per
/// `(thread, lag)`, in thread-major, lag-minor order, padded with markers up to
/// the block size. A payload longer than the block size is left unpadded.
#[derive(Debug, Clone, PartialEq)]
pub struct SendBuffer<R> {
    records: Vec<R>,
    payload_len: usize,
}

impl<R: WireRecord> Default for SendBuffer<R> {
    fn default() -> Self {
        SendBuffer::new()
    }
}

impl<R: WireRecord> SendBuffer<R> {
    pub fn new() -> Self {
        SendBuffer {
            records: Vec::new(),
            payload_len: 0,
        }
    }

    /// Serialize the register and return the number of local spikes.
    /// The register is left untouched; clearing it is up to the caller.
    pub fn collate(&mut self, register: &SpikeRegister, block_size: usize) -> usize {
        let num_spikes = register.num_spikes();
        let needed = num_spikes + register.num_threads() * register.num_lags();
        if needed > self.records.capacity() {
            let capacity = needed.max(2 * self.records.capacity());
            log::debug!("Send buffer grows from {} to {} records", self.records.capacity(), capacity);
            self.records.reserve_exact(capacity - self.records.len());
        }

        self.records.clear();
        for row in register.rows() {
            for lag in 0..row.num_lags() {
                self.records.extend(row.grid(lag).iter().map(|&gid| R::spike(gid, 0.0)));
                self.records
                    .extend(row.off_grid(lag).iter().map(|&(gid, offset)| R::spike(gid, offset)));
                self.records.push(R::marker());
            }
        }
        self.payload_len = self.records.len();
        if self.payload_len < block_size {
            self.records.resize(block_size, R::marker());
        }
        num_spikes
    }

    /// The collated records, including the padding.
    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut Vec<R> {
        &mut self.records
    }

    /// The number of records before padding.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{GridRecord, OffGridRecord};

    #[test]
    fn test_empty_register() {
        let register = SpikeRegister::new(3, 2);
        let mut buffer = SendBuffer::<GridRecord>::new();
        assert_eq!(buffer.collate(&register, 8), 0);
        assert_eq!(buffer.payload_len(), 6);
        assert_eq!(buffer.len(), 8);
        assert!(buffer.records().iter().all(|record| record.is_marker()));
    }

    #[test]
    fn test_runs_are_lag_ordered() {
        // two threads, min_delay 2, thread 0 emits at lags 0 and 1
        let mut register = SpikeRegister::new(2, 2);
        register.record(0, 1, 8);
        register.record(0, 0, 4);
        let mut buffer = SendBuffer::<GridRecord>::new();
        assert_eq!(buffer.collate(&register, 8), 2);

        let words: Vec<u32> = buffer.records().iter().map(|record| record.word()).collect();
        assert_eq!(words, vec![4, 0, 8, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_payload_exceeds_block() {
        let mut register = SpikeRegister::new(1, 1);
        (1..=5).for_each(|gid| register.record(0, 0, gid));
        let mut buffer = SendBuffer::<GridRecord>::new();
        assert_eq!(buffer.collate(&register, 2), 5);
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.payload_len(), 6);
    }

    #[test]
    fn test_off_grid_collation() {
        let mut register = SpikeRegister::new(1, 2);
        register.record(0, 0, 3);
        register.record_off_grid(0, 0, 5, 0.04);
        let mut buffer = SendBuffer::<OffGridRecord>::new();
        buffer.collate(&register, 4);
        assert_eq!(
            buffer.records(),
            &[
                OffGridRecord { gid: 3, offset: 0.0 },
                OffGridRecord { gid: 5, offset: 0.04 },
                OffGridRecord::marker(),
                OffGridRecord::marker(),
            ]
        );
    }

    #[test]
    fn test_capacity_grows_geometrically() {
        let mut register = SpikeRegister::new(1, 1);
        let mut buffer = SendBuffer::<GridRecord>::new();
        buffer.collate(&register, 2);
        let small = buffer.records.capacity();
        (1..=3 * small as u32).for_each(|gid| register.record(0, 0, gid));
        buffer.collate(&register, 2);
        assert!(buffer.records.capacity() >= 3 * small + 1);

        // later slices with fewer spikes keep the allocation
        register.clear();
        let grown = buffer.records.capacity();
        buffer.collate(&register, 2);
        assert_eq!(buffer.records.capacity(), grown);
    }
}
