//! Fixed-width records exchanged between ranks.
//!
//! A send buffer is a sequence of records. Each `(thread, lag)` run of spike
//! identifiers ends with a [`COMM_MARKER`]; a rank whose payload does not fit
//! the agreed block size sends an overflow sentinel instead:
//! `{OVERFLOW_MARKER, true_length, COMM_MARKER, ...}`.
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// Terminates a run of spike identifiers. No node has identifier 0.
pub const COMM_MARKER: u32 = 0;
/// Heads an overflow sentinel block. No node has this identifier either.
pub const OVERFLOW_MARKER: u32 = u32::MAX;

/// A fixed-width record whose leading field is a node identifier or a marker.
pub trait WireRecord: Copy + Send + Sync + PartialEq + Debug + 'static {
    /// A record carrying the given identifier field (and a zero offset, if any).
    fn from_word(word: u32) -> Self;

    /// A spike record. On-grid records drop the offset.
    fn spike(gid: u32, offset: f64) -> Self;

    /// The identifier field.
    fn word(&self) -> u32;

    /// The sub-step offset, zero for on-grid records.
    fn offset(&self) -> f64;

    fn marker() -> Self {
        Self::from_word(COMM_MARKER)
    }

    fn is_marker(&self) -> bool {
        self.word() == COMM_MARKER
    }
}

/// An on-grid spike: the identifier of the emitting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRecord(pub u32);

impl WireRecord for GridRecord {
    fn from_word(word: u32) -> Self {
        GridRecord(word)
    }

    fn spike(gid: u32, _offset: f64) -> Self {
        GridRecord(gid)
    }

    fn word(&self) -> u32 {
        self.0
    }

    fn offset(&self) -> f64 {
        0.0
    }
}

/// An off-grid spike: the identifier of the emitting node and the offset of
/// the spike time from the end of its step, in ms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffGridRecord {
    pub gid: u32,
    pub offset: f64,
}

impl WireRecord for OffGridRecord {
    fn from_word(word: u32) -> Self {
        OffGridRecord {
            gid: word,
            offset: 0.0,
        }
    }

    fn spike(gid: u32, offset: f64) -> Self {
        OffGridRecord { gid, offset }
    }

    fn word(&self) -> u32 {
        self.gid
    }

    fn offset(&self) -> f64 {
        self.offset
    }
}

/// Fill `block` with the overflow sentinel announcing a payload of `true_length` records.
pub fn write_overflow_sentinel<R: WireRecord>(block: &mut [R], true_length: usize) {
    debug_assert!(block.len() >= 2);
    debug_assert!(true_length < OVERFLOW_MARKER as usize);
    block.fill(R::marker());
    block[0] = R::from_word(OVERFLOW_MARKER);
    block[1] = R::from_word(true_length as u32);
}

/// The payload length announced by a block, if it is an overflow sentinel.
pub fn read_overflow_sentinel<R: WireRecord>(block: &[R]) -> Option<usize> {
    match block {
        [head, length, ..] if head.word() == OVERFLOW_MARKER => Some(length.word() as usize),
        _ => None,
    }
}
