mod common;

use std::sync::atomic::Ordering;
use std::thread;

use rusty_nest::comm::{Communicator, LocalCommunicator, ThreadedCommunicator};
use rusty_nest::config::KernelConfigBuilder;
use rusty_nest::error::{CommError, NestError, Stage};
use rusty_nest::kernel::Kernel;
use rusty_nest::models::{IafPscDeltaParams, Model, RecordedSpike, SpikeRecorder};
use rusty_nest::node::Gid;
use rusty_nest::scheduler::SchedulerState;

use common::{failing, panicking};

/// Run `f` once per rank of a group of `num_ranks` ranks, each on its own thread.
fn on_ranks<T, F>(num_ranks: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadedCommunicator) -> T + Sync,
{
    let comms = ThreadedCommunicator::group(num_ranks).unwrap();
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = comms.into_iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    })
}

/// Poisson input driving a chain of neurons; returns the recorder.
fn build_network<C: Communicator>(kernel: &mut Kernel<C>) -> Gid {
    let generators = kernel.create(&Model::PoissonGenerator { rate: 2000.0 }, 8).unwrap();
    let neurons = kernel.create(&Model::IafPscDelta(IafPscDeltaParams::default()), 20).unwrap();
    let recorder = kernel.create(&Model::SpikeRecorder, 1).unwrap().start;
    for generator in generators {
        for neuron in neurons.clone() {
            kernel.connect(generator, neuron, 1.0, 1.0).unwrap();
        }
    }
    for (source, target) in neurons.clone().zip(neurons.clone().skip(1)) {
        kernel.connect(source, target, 2.0, 1.5).unwrap();
    }
    for neuron in neurons {
        kernel.connect(neuron, recorder, 1.0, 0.5).unwrap();
    }
    recorder
}

/// The recorded spikes if the recorder lives on this rank, sorted by stamp and sender.
fn recorded<C: Communicator>(kernel: &Kernel<C>, recorder: Gid) -> Option<Vec<RecordedSpike>> {
    let mut events = kernel
        .with_model(recorder, |recorder: &SpikeRecorder| recorder.events().to_vec())
        .ok()?;
    events.sort_by_key(|event| (event.stamp, event.sender));
    Some(events)
}

#[test]
fn test_results_do_not_depend_on_rank_layout() {
    let reference = {
        let config = KernelConfigBuilder::new().local_num_threads(4).build().unwrap();
        let mut kernel = Kernel::new(config, LocalCommunicator::new()).unwrap();
        let recorder = build_network(&mut kernel);
        kernel.simulate(20.0).unwrap();
        recorded(&kernel, recorder).unwrap()
    };
    assert!(!reference.is_empty());

    for (ranks, threads) in [(2, 2), (4, 1)] {
        let results = on_ranks(ranks, |comm| {
            let config = KernelConfigBuilder::new().local_num_threads(threads).build().unwrap();
            let mut kernel = Kernel::new(config, comm).unwrap();
            let recorder = build_network(&mut kernel);
            kernel.simulate(20.0).unwrap();
            recorded(&kernel, recorder)
        });
        let owned: Vec<Vec<RecordedSpike>> = results.into_iter().flatten().collect();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0], reference, "{} ranks with {} threads", ranks, threads);
    }
}

#[test]
fn test_overflow_raises_block_size_on_all_ranks() {
    let results = on_ranks(2, |comm| {
        let config = KernelConfigBuilder::new().send_buffer_size(4).build().unwrap();
        let mut kernel = Kernel::new(config, comm).unwrap();
        // the generator lives on rank 1, one recorder on each rank
        let generator = kernel.create(&Model::SpikeGenerator { steps: vec![3; 40] }, 1).unwrap().start;
        let recorders = kernel.create(&Model::SpikeRecorder, 2).unwrap();
        for recorder in recorders.clone() {
            kernel.connect(generator, recorder, 1.0, 0.1).unwrap();
        }
        kernel.simulate(1.0).unwrap();

        let received: Vec<usize> = recorders
            .filter_map(|recorder| recorded(&kernel, recorder))
            .map(|events| events.len())
            .collect();
        (received, kernel.block_size(), kernel.total_local_spikes())
    });

    assert_eq!(results[0].0, vec![40]);
    assert_eq!(results[1].0, vec![40]);
    assert_eq!(results[0].1, results[1].1);
    assert!(results[0].1 >= 41);
    assert_eq!((results[0].2, results[1].2), (0, 40));
}

#[test]
fn test_diverging_global_rng_is_detected() {
    let results = on_ranks(2, |comm| {
        let config = KernelConfigBuilder::new().grng_seed(comm.rank() as u64).build().unwrap();
        let mut kernel = Kernel::new(config, comm).unwrap();
        let result = kernel.prepare();
        (result, kernel.state())
    });
    for (result, state) in results {
        assert!(matches!(result, Err(NestError::RngDesync { .. })));
        assert_eq!(state, SchedulerState::Terminated);
    }
}

#[test]
fn test_inconsistent_delay_overrides_are_detected() {
    let results = on_ranks(2, |comm| {
        let mut builder = KernelConfigBuilder::new();
        if comm.rank() == 0 {
            builder = builder.delay_extrema_ms(0.2, 0.5);
        }
        let mut kernel = Kernel::new(builder.build().unwrap(), comm).unwrap();
        kernel.prepare()
    });
    assert!(matches!(
        results[0],
        Err(NestError::InconsistentDelays { rank: 0, min_delay: 2, max_delay: 5 })
    ));
    assert!(matches!(
        results[1],
        Err(NestError::InconsistentDelays { rank: 1, min_delay: 1, max_delay: 1 })
    ));
}

#[test]
fn test_interruption_on_one_rank_stops_all() {
    let results = on_ranks(2, |comm| {
        let rank = comm.rank();
        let config = KernelConfigBuilder::new().build().unwrap();
        let mut kernel = Kernel::new(config, comm).unwrap();
        kernel.create(&Model::IafPscDelta(IafPscDeltaParams::default()), 4).unwrap();
        if rank == 0 {
            kernel.termination_handle().store(true, Ordering::SeqCst);
        }
        kernel.prepare().unwrap();
        kernel.run(1.0)
    });
    assert_eq!(results[0], Err(NestError::Interrupted { rank: 0, step: 1 }));
    assert_eq!(results[1], Err(NestError::Interrupted { rank: 1, step: 1 }));
}

#[test]
fn test_node_failure_aborts_peers() {
    let results = on_ranks(2, |comm| {
        let config = KernelConfigBuilder::new().build().unwrap();
        let mut kernel = Kernel::new(config, comm).unwrap();
        // gid 1 lives on rank 1, the failing gid 2 on rank 0
        kernel.create(&Model::SpikeRecorder, 1).unwrap();
        kernel.create_with(1, failing(3, false)).unwrap();
        kernel.prepare().unwrap();
        let result = kernel.run(1.0);
        (result, kernel.state())
    });

    assert!(matches!(
        results[0].0,
        Err(NestError::NodeUpdate { rank: 0, thread: 0, gid: 2, .. })
    ));
    assert_eq!(
        results[1].0,
        Err(NestError::Collective {
            rank: 1,
            stage: Stage::Exchange,
            source: CommError::Aborted,
        })
    );
    assert!(results.iter().all(|(_, state)| *state == SchedulerState::Terminated));
}

#[test]
fn test_delivery_panic_aborts_peers() {
    let results = on_ranks(2, |comm| {
        let config = KernelConfigBuilder::new().build().unwrap();
        let mut kernel = Kernel::new(config, comm).unwrap();
        // the generator (gid 1) lives on rank 1, the panicking target (gid 2) on rank 0
        let generator = kernel.create(&Model::SpikeGenerator { steps: vec![2] }, 1).unwrap().start;
        let target = kernel.create_with(1, panicking(None)).unwrap().start;
        kernel.connect(generator, target, 1.0, 0.1).unwrap();
        kernel.prepare().unwrap();
        let result = kernel.run(1.0);
        (result, kernel.state())
    });

    assert!(matches!(
        results[0].0,
        Err(NestError::Delivery { rank: 0, thread: 0, .. })
    ));
    assert!(matches!(
        results[1].0,
        Err(NestError::Collective { rank: 1, source: CommError::Aborted, .. })
    ));
    assert!(results.iter().all(|(_, state)| *state == SchedulerState::Terminated));
}
