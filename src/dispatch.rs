//! Delivery of exchanged spikes to their local targets.
use crate::connection::ConnectionManager;
use crate::error::NestError;
use crate::node::{DeliveryContext, Gid, SpikeEvent};
use crate::time::Step;
use crate::wire::WireRecord;

/// The spikes of one exchange, grouped by the lag at which they were emitted.
///
/// Within a lag, spikes keep the order of the receive buffer: by rank, then by
/// thread of the emitting rank, then by emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpikeRuns {
    by_lag: Vec<Vec<(Gid, f64)>>,
}

impl SpikeRuns {
    /// Parse the segments of a receive buffer.
    ///
    /// Run `k` of a segment holds the spikes of lag `k mod min_delay`; padding
    /// only adds empty runs.
    pub fn parse<'a, R, I>(segments: I, min_delay: Step) -> Self
    where
        R: WireRecord,
        I: IntoIterator<Item = &'a [R]>,
    {
        let min_delay = min_delay as usize;
        let mut by_lag = vec![Vec::new(); min_delay];
        for segment in segments {
            for (run, records) in segment.split(|record| record.is_marker()).enumerate() {
                by_lag[run % min_delay].extend(records.iter().map(|record| (record.word(), record.offset())));
            }
        }
        SpikeRuns { by_lag }
    }

    pub fn num_lags(&self) -> usize {
        self.by_lag.len()
    }

    pub fn lag(&self, lag: usize) -> &[(Gid, f64)] {
        &self.by_lag[lag]
    }

    pub fn num_spikes(&self) -> usize {
        self.by_lag.iter().map(|spikes| spikes.len()).sum()
    }

    /// Deliver every spike to the targets owned by `thread`, lag by lag.
    /// Returns the number of deliveries.
    pub fn deliver(
        &self,
        connections: &ConnectionManager,
        thread: usize,
        ctx: &DeliveryContext,
    ) -> Result<usize, NestError> {
        let mut delivered = 0;
        for (lag, spikes) in self.by_lag.iter().enumerate() {
            let stamp = ctx.origin() + lag as Step;
            for &(sender, offset) in spikes {
                let event = SpikeEvent::new(sender, stamp, offset);
                delivered += connections.send(thread, sender, &event, ctx)?;
            }
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{GridRecord, OffGridRecord};

    fn grid(words: &[u32]) -> Vec<GridRecord> {
        words.iter().map(|&word| GridRecord(word)).collect()
    }

    #[test]
    fn test_parse_groups_by_lag() {
        // two ranks, min_delay 2; rank 0 has two threads, rank 1 one thread plus padding
        let rank0 = grid(&[3, 0, 5, 7, 0, 0, 9, 0]);
        let rank1 = grid(&[2, 0, 4, 0, 0, 0, 0, 0]);
        let runs = SpikeRuns::parse([&rank0[..], &rank1[..]], 2);
        assert_eq!(runs.num_lags(), 2);
        let gids = |lag: usize| runs.lag(lag).iter().map(|&(gid, _)| gid).collect::<Vec<_>>();
        assert_eq!(gids(0), vec![3, 2]);
        assert_eq!(gids(1), vec![5, 7, 9, 4]);
        assert_eq!(runs.num_spikes(), 6);
    }

    #[test]
    fn test_parse_empty() {
        let segment = grid(&[0, 0, 0, 0]);
        let runs = SpikeRuns::parse([&segment[..]], 1);
        assert_eq!(runs.num_spikes(), 0);
    }

    #[test]
    fn test_parse_keeps_offsets() {
        let segment = vec![
            OffGridRecord { gid: 4, offset: 0.02 },
            OffGridRecord::marker(),
            OffGridRecord { gid: 6, offset: 0.0 },
            OffGridRecord::marker(),
        ];
        let runs = SpikeRuns::parse([&segment[..]], 2);
        assert_eq!(runs.lag(0), &[(4, 0.02)]);
        assert_eq!(runs.lag(1), &[(6, 0.0)]);
    }
}
