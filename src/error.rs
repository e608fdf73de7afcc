//! Error module for the simulation kernel.
use std::error::Error;
use std::fmt;

/// The phase of the simulation cycle during which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Update,
    Exchange,
    Dispatch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stage::Prepare => write!(f, "prepare"),
            Stage::Update => write!(f, "update"),
            Stage::Exchange => write!(f, "exchange"),
            Stage::Dispatch => write!(f, "dispatch"),
        }
    }
}

/// Failures of a collective call.
#[derive(Debug, Clone, PartialEq)]
pub enum CommError {
    /// A peer aborted the job, or the group was torn down while waiting.
    Aborted,
    /// The buffers handed to a collective do not have the expected shape.
    SizeMismatch { expected: usize, actual: usize },
    /// Peers contributed values of different record types to the same collective.
    TypeMismatch,
    /// The communicator group has no ranks.
    EmptyGroup,
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CommError::Aborted => write!(f, "the communicator group was aborted"),
            CommError::SizeMismatch { expected, actual } => {
                write!(f, "buffer size mismatch: expected {}, got {}", expected, actual)
            }
            CommError::TypeMismatch => write!(f, "peers contributed different record types"),
            CommError::EmptyGroup => write!(f, "the communicator group has no ranks"),
        }
    }
}

impl Error for CommError {}

/// Error types for the kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum NestError {
    /// Error for invalid parameters, e.g., a non-positive resolution or thread count.
    InvalidParameter(String),
    /// Error for an operation that is not allowed in the current scheduler state.
    InvalidState(String),
    /// Error for an unknown or non-local node.
    UnknownNode(u32),
    /// Error for a delay outside the admissible range.
    InvalidDelay(String),
    /// The requested duration cannot be represented on the simulation clock.
    ClockOverflow { requested_steps: i64, limit: i64 },
    /// The global random number generators diverged across ranks.
    RngDesync { rank: usize, local: u64, remote: u64, remote_rank: usize },
    /// The delay extrema disagree across ranks after the reduction.
    InconsistentDelays { rank: usize, min_delay: i64, max_delay: i64 },
    /// A collective call failed; the distributed job cannot continue.
    Collective { rank: usize, stage: Stage, source: CommError },
    /// A node failed during its update.
    NodeUpdate { rank: usize, thread: usize, gid: u32, message: String },
    /// Delivering exchanged spikes to the targets of a thread failed.
    Delivery { rank: usize, thread: usize, message: String },
    /// The simulation was interrupted by an external signal.
    Interrupted { rank: usize, step: i64 },
    /// Error for I/O operations, e.g., reading a configuration file.
    IOError(String),
}

impl NestError {
    /// Whether the error leaves the scheduler terminated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NestError::ClockOverflow { .. }
                | NestError::RngDesync { .. }
                | NestError::InconsistentDelays { .. }
                | NestError::Collective { .. }
                | NestError::NodeUpdate { .. }
                | NestError::Delivery { .. }
                | NestError::Interrupted { .. }
        )
    }

    /// Whether peers may still be waiting in a collective, so that the group has to be aborted.
    /// Errors that every rank detects at the same point do not need it.
    pub fn requires_abort(&self) -> bool {
        self.is_fatal()
            && !matches!(
                self,
                NestError::Interrupted { .. } | NestError::RngDesync { .. } | NestError::InconsistentDelays { .. }
            )
    }

    /// The stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            NestError::ClockOverflow { .. }
            | NestError::RngDesync { .. }
            | NestError::InconsistentDelays { .. } => Some(Stage::Prepare),
            NestError::Collective { stage, .. } => Some(*stage),
            NestError::NodeUpdate { .. } | NestError::Interrupted { .. } => Some(Stage::Update),
            NestError::Delivery { .. } => Some(Stage::Dispatch),
            _ => None,
        }
    }
}

impl fmt::Display for NestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NestError::InvalidParameter(e) => write!(f, "Invalid parameter: {}", e),
            NestError::InvalidState(e) => write!(f, "Invalid state: {}", e),
            NestError::UnknownNode(gid) => write!(f, "Unknown or non-local node: {}", gid),
            NestError::InvalidDelay(e) => write!(f, "Invalid delay: {}", e),
            NestError::ClockOverflow { requested_steps, limit } => write!(
                f,
                "Clock overflow during prepare: {} steps requested, at most {} representable",
                requested_steps, limit
            ),
            NestError::RngDesync { rank, local, remote, remote_rank } => write!(
                f,
                "Rank {} (prepare): global random generator out of sync ({} here, {} on rank {})",
                rank, local, remote, remote_rank
            ),
            NestError::InconsistentDelays { rank, min_delay, max_delay } => write!(
                f,
                "Rank {} (prepare): inconsistent delay extrema after reduction (min {}, max {})",
                rank, min_delay, max_delay
            ),
            NestError::Collective { rank, stage, source } => {
                write!(f, "Rank {} ({}): collective call failed: {}", rank, stage, source)
            }
            NestError::NodeUpdate { rank, thread, gid, message } => write!(
                f,
                "Rank {}, thread {} (update): node {} failed: {}",
                rank, thread, gid, message
            ),
            NestError::Delivery { rank, thread, message } => write!(
                f,
                "Rank {}, thread {} (dispatch): spike delivery failed: {}",
                rank, thread, message
            ),
            NestError::Interrupted { rank, step } => {
                write!(f, "Rank {} (update): simulation interrupted at step {}", rank, step)
            }
            NestError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for NestError {}

impl From<std::io::Error> for NestError {
    fn from(e: std::io::Error) -> Self {
        NestError::IOError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(NestError::Interrupted { rank: 0, step: 3 }.is_fatal());
        assert!(NestError::Collective {
            rank: 1,
            stage: Stage::Exchange,
            source: CommError::Aborted
        }
        .is_fatal());
        assert!(!NestError::InvalidParameter("x".to_string()).is_fatal());
        assert!(!NestError::UnknownNode(4).is_fatal());

        assert!(!NestError::Interrupted { rank: 0, step: 3 }.requires_abort());
        assert!(NestError::NodeUpdate { rank: 0, thread: 0, gid: 1, message: String::new() }.requires_abort());
        assert!(!NestError::InvalidState("x".to_string()).requires_abort());
    }

    #[test]
    fn test_display_reports_rank_and_stage() {
        let e = NestError::Collective { rank: 3, stage: Stage::Exchange, source: CommError::Aborted };
        assert_eq!(
            e.to_string(),
            "Rank 3 (exchange): collective call failed: the communicator group was aborted"
        );
        assert_eq!(e.stage(), Some(Stage::Exchange));

        let e = NestError::NodeUpdate { rank: 0, thread: 2, gid: 17, message: "boom".to_string() };
        assert_eq!(e.to_string(), "Rank 0, thread 2 (update): node 17 failed: boom");
        assert_eq!(e.stage(), Some(Stage::Update));

        let e = NestError::Delivery { rank: 1, thread: 0, message: "boom".to_string() };
        assert_eq!(e.to_string(), "Rank 1, thread 0 (dispatch): spike delivery failed: boom");
        assert_eq!(e.stage(), Some(Stage::Dispatch));
        assert!(e.is_fatal());
        assert!(e.requires_abort());
    }
}
