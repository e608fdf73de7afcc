//! Overflow-safe all-gather of the collated spikes.
//!
//! Every rank contributes one block of `S` records. A rank whose payload does
//! not fit sends an overflow sentinel announcing its true length instead; if
//! any rank overflowed, the payloads are gathered a second time with their real
//! sizes and `S` is raised for all later exchanges. All ranks take the same
//! decisions from the same gathered sentinels, so they stay in lockstep.
use crate::collator::SendBuffer;
use crate::comm::Communicator;
use crate::error::CommError;
use crate::wire::{read_overflow_sentinel, write_overflow_sentinel, WireRecord};

#[derive(Debug, Clone)]
pub struct CollectiveExchange<R> {
    block_size: usize,
    send: SendBuffer<R>,
    recv: Vec<R>,
    counts: Vec<usize>,
    displacements: Vec<usize>,
    num_overflows: usize,
}

impl<R: WireRecord> CollectiveExchange<R> {
    /// # Panics
    /// Panics if the block size cannot hold an overflow sentinel.
    pub fn new(block_size: usize) -> Self {
        assert!(block_size >= 2, "block size {} cannot hold an overflow sentinel", block_size);
        CollectiveExchange {
            block_size,
            send: SendBuffer::new(),
            recv: Vec::new(),
            counts: Vec::new(),
            displacements: Vec::new(),
            num_overflows: 0,
        }
    }

    /// The number of records every rank contributes to a regular exchange.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Raise the block size, never lowering it.
    pub fn raise_block_size(&mut self, block_size: usize) {
        self.block_size = self.block_size.max(block_size);
    }

    /// How many exchanges needed the second, variable-size gather.
    pub fn num_overflows(&self) -> usize {
        self.num_overflows
    }

    pub fn send_buffer(&self) -> &SendBuffer<R> {
        &self.send
    }

    pub fn send_buffer_mut(&mut self) -> &mut SendBuffer<R> {
        &mut self.send
    }

    /// Exchange the collated send buffer with all ranks.
    pub fn exchange<C: Communicator>(&mut self, comm: &C) -> Result<(), CommError> {
        let num_ranks = comm.num_ranks();
        assert!(num_ranks > 0, "a communicator group has at least one rank");

        if num_ranks == 1 {
            let len = self.send.len();
            std::mem::swap(&mut self.recv, self.send.records_mut());
            self.counts = vec![len];
            self.displacements = vec![0];
            if self.send.payload_len() > self.block_size {
                log::debug!("Block size raised from {} to {}", self.block_size, self.send.payload_len());
                self.block_size = self.send.payload_len();
            }
            return Ok(());
        }

        let block_size = self.block_size;
        let payload = self.send.records();
        let overflowed = payload.len() > block_size;
        let sentinel;
        let block = if overflowed {
            let mut records = vec![R::marker(); block_size];
            write_overflow_sentinel(&mut records, payload.len());
            sentinel = records;
            &sentinel[..]
        } else {
            &payload[..block_size]
        };

        self.recv.clear();
        self.recv.resize(block_size * num_ranks, R::marker());
        comm.all_gather(block, &mut self.recv)?;

        self.counts = self
            .recv
            .chunks_exact(block_size)
            .map(|block| read_overflow_sentinel(block).unwrap_or(block_size))
            .collect();
        self.displacements = self
            .counts
            .iter()
            .scan(0, |offset, &count| {
                let displacement = *offset;
                *offset += count;
                Some(displacement)
            })
            .collect();

        if self.counts.iter().any(|&count| count > block_size) {
            let total: usize = self.counts.iter().sum();
            let new_block_size = self.counts.iter().copied().max().unwrap_or(block_size);
            log::warn!(
                "Rank {}: spike exchange overflow, gathering {} records and raising the block size from {} to {}",
                comm.rank(),
                total,
                block_size,
                new_block_size
            );
            self.recv.clear();
            self.recv.resize(total, R::marker());
            comm.all_gather_v(self.send.records(), &mut self.recv, &self.counts, &self.displacements)?;
            self.block_size = new_block_size;
            self.num_overflows += 1;
        }
        Ok(())
    }

    pub fn num_segments(&self) -> usize {
        self.counts.len()
    }

    /// The records received from `rank` in the last exchange.
    pub fn segment(&self, rank: usize) -> &[R] {
        let start = self.displacements[rank];
        &self.recv[start..start + self.counts[rank]]
    }

    /// The received segments, in rank order.
    pub fn segments(&self) -> impl Iterator<Item = &[R]> + '_ {
        (0..self.num_segments()).map(move |rank| self.segment(rank))
    }

    /// The whole receive buffer of the last exchange.
    pub fn recv_buffer(&self) -> &[R] {
        &self.recv
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn displacements(&self) -> &[usize] {
        &self.displacements
    }
}
