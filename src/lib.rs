//! This crate provides a discrete-time simulation kernel for networks of spiking point neurons.
//!
//! Nodes are distributed over ranks and, within a rank, over threads. Time advances in
//! slices of `min_delay` steps: every thread updates the nodes it owns over a slice, then
//! the spikes emitted during the slice are exchanged between all ranks and delivered to
//! their targets. Since no connection is shorter than `min_delay`, no spike can affect a
//! node within the slice it was emitted in, and results do not depend on the number of
//! threads or ranks.
//!
//! # Simulating a Network
//!
//! ```rust
//! use rusty_nest::comm::LocalCommunicator;
//! use rusty_nest::config::KernelConfigBuilder;
//! use rusty_nest::kernel::Kernel;
//! use rusty_nest::models::{Model, SpikeRecorder};
//!
//! let config = KernelConfigBuilder::new().local_num_threads(2).build().unwrap();
//! let mut kernel = Kernel::new(config, LocalCommunicator::new()).unwrap();
//!
//! // A generator emitting at steps 5 and 12, observed by a recorder
//! let generator = kernel.create(&Model::SpikeGenerator { steps: vec![5, 12] }, 1).unwrap();
//! let recorder = kernel.create(&Model::SpikeRecorder, 1).unwrap();
//! kernel.connect(generator.start, recorder.start, 1.0, 1.0).unwrap();
//!
//! kernel.simulate(5.0).unwrap();
//!
//! let stamps: Vec<i64> = kernel
//!     .with_model(recorder.start, |recorder: &SpikeRecorder| {
//!         recorder.events().iter().map(|event| event.stamp).collect()
//!     })
//!     .unwrap();
//! assert_eq!(stamps, vec![5, 12]);
//! ```
//!
//! # Distributed Simulations
//!
//! Every rank builds a [`kernel::Kernel`] over its own [`comm::Communicator`] and issues
//! the same calls. [`comm::ThreadedCommunicator`] runs the ranks of a group on threads
//! of one process.

pub mod clock;
pub mod collator;
pub mod comm;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod kernel;
pub mod models;
pub mod network;
pub mod node;
pub mod registry;
pub mod ring_buffer;
pub mod rng;
pub mod scheduler;
pub mod spike_register;
pub mod sync;
pub mod time;
pub mod wire;
