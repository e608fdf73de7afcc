mod common;

use std::sync::atomic::Ordering;

use itertools::Itertools;

use rusty_nest::comm::LocalCommunicator;
use rusty_nest::config::KernelConfigBuilder;
use rusty_nest::error::{NestError, Stage};
use rusty_nest::kernel::Kernel;
use rusty_nest::models::{IafPscDelta, IafPscDeltaParams, Model, RecordedSpike, SpikeRecorder};
use rusty_nest::node::Gid;
use rusty_nest::scheduler::SchedulerState;

use common::{failing, panicking};

fn kernel(builder: KernelConfigBuilder) -> Kernel<LocalCommunicator> {
    Kernel::new(builder.build().unwrap(), LocalCommunicator::new()).unwrap()
}

fn events(kernel: &Kernel<LocalCommunicator>, recorder: Gid) -> Vec<RecordedSpike> {
    kernel
        .with_model(recorder, |recorder: &SpikeRecorder| recorder.events().to_vec())
        .unwrap()
}

#[test]
fn test_single_spike_reaches_each_target_once() {
    // one rank, one thread, min_delay = max_delay = 1 step
    let mut kernel = kernel(KernelConfigBuilder::new());
    let generator = kernel.create(&Model::SpikeGenerator { steps: vec![5] }, 1).unwrap().start;
    let recorders = kernel.create(&Model::SpikeRecorder, 2).unwrap();
    for recorder in recorders.clone() {
        kernel.connect(generator, recorder, 1.0, 0.1).unwrap();
    }

    kernel.prepare().unwrap();
    kernel.run(0.5).unwrap();
    assert_eq!(kernel.current_step(), 5);
    assert!(recorders.clone().all(|recorder| events(&kernel, recorder).is_empty()));

    // the slice containing step 5 is exchanged and delivered before the clock advances
    kernel.run(0.1).unwrap();
    for recorder in recorders.clone() {
        let received = events(&kernel, recorder);
        assert_eq!(received.len(), 1);
        assert_eq!((received[0].sender, received[0].stamp), (generator, 5));
    }

    kernel.run(1.0).unwrap();
    kernel.cleanup().unwrap();
    assert!(recorders.clone().all(|recorder| events(&kernel, recorder).len() == 1));
    assert_eq!(kernel.total_local_spikes(), 1);
}

#[test]
fn test_delivery_order_follows_lags() {
    let mut kernel = kernel(KernelConfigBuilder::new().local_num_threads(4));
    // spikes of different generators fall on different threads and lags of the same slices
    let generators: Vec<Gid> = (0..12)
        .map(|i| {
            let steps = vec![(7 * i) % 23, (5 * i + 3) % 29, 31 + i];
            kernel.create(&Model::SpikeGenerator { steps }, 1).unwrap().start
        })
        .collect();
    let recorder = kernel.create(&Model::SpikeRecorder, 1).unwrap().start;
    for &generator in &generators {
        kernel.connect(generator, recorder, 1.0, 0.5).unwrap();
    }

    kernel.simulate(5.0).unwrap();
    assert_eq!(kernel.delay_extrema().min_delay(), 5);

    let received = events(&kernel, recorder);
    assert_eq!(received.len(), 36);
    assert!(received.iter().tuple_windows().all(|(a, b)| a.stamp <= b.stamp));
}

#[test]
fn test_results_do_not_depend_on_thread_count() {
    let run = |threads: usize| {
        let mut kernel = kernel(KernelConfigBuilder::new().local_num_threads(threads));
        let generators = kernel
            .create(&Model::SpikeGenerator { steps: (0..200).step_by(3).collect() }, 4)
            .unwrap();
        let params = IafPscDeltaParams {
            i_e: 200.0,
            ..Default::default()
        };
        let neurons = kernel.create(&Model::IafPscDelta(params), 10).unwrap();
        let recorder = kernel.create(&Model::SpikeRecorder, 1).unwrap().start;
        for (i, (generator, neuron)) in generators.cartesian_product(neurons.clone()).enumerate() {
            kernel.connect(generator, neuron, 0.5 + 0.125 * (i % 7) as f64, 1.0).unwrap();
        }
        for (source, target) in neurons.clone().zip(neurons.clone().skip(1)) {
            kernel.connect(source, target, 4.0, 0.7).unwrap();
        }
        for neuron in neurons {
            kernel.connect(neuron, recorder, 1.0, 0.7).unwrap();
        }
        kernel.simulate(20.0).unwrap();

        let mut received = events(&kernel, recorder);
        received.sort_by_key(|event| (event.stamp, event.sender));
        received
    };

    let reference = run(1);
    assert!(!reference.is_empty());
    assert_eq!(run(3), reference);
}

#[test]
fn test_off_grid_mode_is_enabled_by_models() {
    let mut kernel = kernel(KernelConfigBuilder::new().local_num_threads(2));
    let generator = kernel
        .create(&Model::PreciseSpikeGenerator { spikes: vec![(3, 0.025), (4, 0.0)] }, 1)
        .unwrap()
        .start;
    let recorder = kernel.create(&Model::SpikeRecorder, 1).unwrap().start;
    kernel.connect(generator, recorder, 1.0, 0.2).unwrap();

    kernel.prepare().unwrap();
    assert!(kernel.is_off_grid());
    kernel.run(1.0).unwrap();
    kernel.cleanup().unwrap();

    let received = events(&kernel, recorder);
    assert_eq!(received.len(), 2);
    assert_eq!((received[0].stamp, received[0].offset), (3, 0.025));
    assert_eq!((received[1].stamp, received[1].offset), (4, 0.0));
}

#[test]
fn test_overflow_on_a_single_rank() {
    let mut kernel = kernel(KernelConfigBuilder::new().send_buffer_size(2));
    let generators = kernel.create(&Model::SpikeGenerator { steps: vec![2, 2, 2] }, 10).unwrap();
    let recorder = kernel.create(&Model::SpikeRecorder, 1).unwrap().start;
    for generator in generators {
        kernel.connect(generator, recorder, 1.0, 0.1).unwrap();
    }

    kernel.simulate(1.0).unwrap();
    assert_eq!(events(&kernel, recorder).len(), 30);
    assert!(kernel.block_size() >= 31);
}

#[test]
fn test_node_failure_terminates_without_advancing() {
    let mut kernel = kernel(KernelConfigBuilder::new().local_num_threads(2));
    kernel.create(&Model::SpikeRecorder, 2).unwrap();
    let failing_gid = kernel.create_with(1, failing(7, false)).unwrap().start;

    kernel.prepare().unwrap();
    let result = kernel.run(2.0);
    assert_eq!(
        result,
        Err(NestError::NodeUpdate {
            rank: 0,
            thread: 1,
            gid: failing_gid,
            message: "Invalid state: failure at step 7".to_string(),
        })
    );
    assert_eq!(kernel.state(), SchedulerState::Terminated);
    assert_eq!(kernel.current_step(), 7);
    assert!(matches!(kernel.prepare(), Err(NestError::InvalidState(_))));

    kernel.reset().unwrap();
    assert_eq!(kernel.state(), SchedulerState::Initialized);
    assert_eq!(kernel.num_nodes(), 0);
    kernel.simulate(1.0).unwrap();
}

#[test]
fn test_node_panic_terminates_with_thread_and_node() {
    let mut kernel = kernel(KernelConfigBuilder::new().local_num_threads(2));
    kernel.create(&Model::SpikeRecorder, 2).unwrap();
    let gid = kernel.create_with(1, panicking(Some(3))).unwrap().start;

    kernel.prepare().unwrap();
    let e = kernel.run(1.0).unwrap_err();
    match &e {
        NestError::NodeUpdate { rank: 0, thread: 1, gid: failed, message } => {
            assert_eq!(*failed, gid);
            assert!(message.contains("gave up at step 3"), "{}", message);
        }
        other => panic!("expected a node update error, got {:?}", other),
    }
    assert_eq!(e.stage(), Some(Stage::Update));
    assert_eq!(kernel.state(), SchedulerState::Terminated);
    assert_eq!(kernel.current_step(), 3);
    assert!(matches!(kernel.run(1.0), Err(NestError::InvalidState(_))));
    assert!(matches!(kernel.prepare(), Err(NestError::InvalidState(_))));

    kernel.reset().unwrap();
    kernel.create(&Model::SpikeRecorder, 1).unwrap();
    kernel.simulate(1.0).unwrap();
}

#[test]
fn test_delivery_panic_terminates_in_dispatch() {
    let mut kernel = kernel(KernelConfigBuilder::new().local_num_threads(2));
    let generator = kernel.create(&Model::SpikeGenerator { steps: vec![2] }, 1).unwrap().start;
    let target = kernel.create_with(1, panicking(None)).unwrap().start;
    kernel.connect(generator, target, 1.0, 0.1).unwrap();

    kernel.prepare().unwrap();
    let e = kernel.run(1.0).unwrap_err();
    match &e {
        NestError::Delivery { rank: 0, thread: 0, message } => {
            assert!(message.contains("cannot take a spike from 1"), "{}", message);
        }
        other => panic!("expected a delivery error, got {:?}", other),
    }
    assert_eq!(e.stage(), Some(Stage::Dispatch));
    assert_eq!(kernel.state(), SchedulerState::Terminated);
    // the slice of the spike is not committed
    assert_eq!(kernel.current_step(), 2);
}

#[test]
fn test_frozen_nodes_are_skipped() {
    let mut kernel = kernel(KernelConfigBuilder::new());
    kernel.create_with(1, failing(0, true)).unwrap();
    kernel.simulate(1.0).unwrap();
    assert_eq!(kernel.current_step(), 10);
}

#[test]
fn test_termination_handle_stops_at_slice_boundary() {
    let mut kernel = kernel(KernelConfigBuilder::new().delay_extrema_ms(0.4, 1.0));
    kernel.create(&Model::IafPscDelta(IafPscDeltaParams::default()), 3).unwrap();
    let handle = kernel.termination_handle();

    kernel.prepare().unwrap();
    kernel.run(0.2).unwrap();
    handle.store(true, Ordering::SeqCst);
    assert_eq!(kernel.run(10.0), Err(NestError::Interrupted { rank: 0, step: 4 }));
    assert_eq!(kernel.state(), SchedulerState::Terminated);

    kernel.reset().unwrap();
    assert!(!handle.load(Ordering::SeqCst));
}

#[test]
fn test_neuron_state_survives_runs() {
    let params = IafPscDeltaParams {
        i_e: 300.0,
        ..Default::default()
    };
    let mut split = kernel(KernelConfigBuilder::new());
    let neuron = split.create(&Model::IafPscDelta(params.clone()), 1).unwrap().start;
    split.prepare().unwrap();
    for _ in 0..10 {
        split.run(0.3).unwrap();
    }
    split.cleanup().unwrap();

    let mut whole = kernel(KernelConfigBuilder::new());
    whole.create(&Model::IafPscDelta(params), 1).unwrap();
    whole.simulate(3.0).unwrap();

    let v_m = |kernel: &Kernel<LocalCommunicator>| {
        kernel.with_model(neuron, |neuron: &IafPscDelta| neuron.v_m()).unwrap()
    };
    assert_eq!(split.current_step(), whole.current_step());
    assert_eq!(v_m(&split), v_m(&whole));
}
