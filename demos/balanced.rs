use std::thread;

use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use rusty_nest::comm::{Communicator, LocalCommunicator, ThreadedCommunicator};
use rusty_nest::config::KernelConfigBuilder;
use rusty_nest::error::NestError;
use rusty_nest::kernel::Kernel;
use rusty_nest::models::{IafPscDeltaParams, Model, SpikeRecorder};

/// A sparsely connected network of excitatory and inhibitory neurons driven by Poisson input.
#[derive(Parser, Debug, Clone)]
struct Args {
    /// The number of excitatory neurons
    #[arg(long, default_value = "800")]
    num_excitatory: usize,
    /// The number of inhibitory neurons
    #[arg(long, default_value = "200")]
    num_inhibitory: usize,
    /// The fraction of neurons projecting to each neuron
    #[arg(long, default_value = "0.1")]
    connectivity: f64,
    /// The excitatory weight, in mV
    #[arg(short = 'J', long, default_value = "0.5")]
    weight: f64,
    /// The relative strength of inhibition
    #[arg(short = 'g', long, default_value = "5.0")]
    inhibition: f64,
    /// The external rate relative to the threshold rate
    #[arg(long, default_value = "2.0")]
    eta: f64,
    /// The synaptic delay, in ms
    #[arg(long, default_value = "1.5")]
    delay: f64,
    /// The simulated time, in ms
    #[arg(short = 'T', long, default_value = "200.0")]
    time: f64,
    /// The number of recorded neurons
    #[arg(long, default_value = "50")]
    num_recorded: usize,
    /// The number of ranks, each running on its own OS thread
    #[arg(long, default_value = "1")]
    ranks: usize,
    /// The number of threads per rank
    #[arg(long, default_value = "2")]
    threads: usize,
    /// The seed used for connectivity and random generators
    #[arg(long, default_value = "0")]
    seed: u64,
    /// The log file
    #[arg(long, default_value = "log/balanced.log")]
    log_path: String,
}

fn init_logging(path: &str) -> Result<(), NestError> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
        .build();
    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} [{T}] - {m}\n")))
        .build(path)
        .map_err(|e| NestError::IOError(e.to_string()))?;

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(
            Root::builder()
                .appender("console")
                .appender("logfile")
                .build(LevelFilter::Info),
        )
        .map_err(|e| NestError::IOError(e.to_string()))?;

    log4rs::init_config(config).map_err(|e| NestError::IOError(e.to_string()))?;
    Ok(())
}

/// Build and simulate the network on one rank; returns the spikes recorded on this rank.
fn simulate<C: Communicator>(args: &Args, comm: C) -> Result<Option<usize>, NestError> {
    let config = KernelConfigBuilder::new()
        .local_num_threads(args.threads)
        .grng_seed(args.seed)
        .rng_seed(args.seed)
        .print_time(comm.rank() == 0)
        .build()?;
    let mut kernel = Kernel::new(config, comm)?;

    let params = IafPscDeltaParams {
        tau_m: 20.0,
        v_reset: -60.0,
        ..Default::default()
    };
    let threshold = params.v_th - params.e_l;
    let num_neurons = args.num_excitatory + args.num_inhibitory;
    let in_excitatory = (args.connectivity * args.num_excitatory as f64).round() as usize;
    let in_inhibitory = (args.connectivity * args.num_inhibitory as f64).round() as usize;

    // rate at which external input alone brings the mean potential to threshold
    let rate_threshold = threshold / (args.weight * in_excitatory as f64 * params.tau_m);
    let external_rate = args.eta * rate_threshold * in_excitatory as f64 * 1000.0;
    log::info!("External input: {:.1} spikes/s per neuron", external_rate);

    let neurons = kernel.create(&Model::IafPscDelta(params), num_neurons)?;
    let drive = kernel.create(&Model::PoissonGenerator { rate: external_rate }, num_neurons)?;
    let recorder = kernel.create(&Model::SpikeRecorder, 1)?.start;
    let first = neurons.start;

    // every rank draws the same connectivity
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    for target in neurons.clone() {
        for _ in 0..in_excitatory {
            let source = first + rng.gen_range(0..args.num_excitatory) as u32;
            kernel.connect(source, target, args.weight, args.delay)?;
        }
        for _ in 0..in_inhibitory {
            let source = first + (args.num_excitatory + rng.gen_range(0..args.num_inhibitory)) as u32;
            kernel.connect(source, target, -args.inhibition * args.weight, args.delay)?;
        }
    }
    for (generator, target) in drive.zip(neurons.clone()) {
        kernel.connect(generator, target, args.weight, args.delay)?;
    }
    for source in neurons.take(args.num_recorded) {
        kernel.connect(source, recorder, 1.0, args.delay)?;
    }
    log::info!(
        "Rank {}: network built with {} local nodes and {} local connections",
        kernel.rank(),
        kernel.num_local_nodes(),
        kernel.num_connections()
    );

    kernel.simulate(args.time)?;
    log::info!(
        "Rank {}: {} spikes emitted, final block size {}",
        kernel.rank(),
        kernel.total_local_spikes(),
        kernel.block_size()
    );

    match kernel.with_model(recorder, |recorder: &SpikeRecorder| recorder.events().len()) {
        Ok(n) => Ok(Some(n)),
        Err(NestError::UnknownNode(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn main() -> Result<(), NestError> {
    let args = Args::parse();
    init_logging(&args.log_path)?;
    log::info!("{:?}", args);

    let recorded: Vec<Option<usize>> = if args.ranks > 1 {
        let comms = ThreadedCommunicator::group(args.ranks)
            .map_err(|e| NestError::InvalidParameter(e.to_string()))?;
        let args = &args;
        thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| s.spawn(move || simulate(args, comm)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(NestError::InvalidState("a rank panicked".to_string())))
                })
                .collect::<Result<Vec<_>, NestError>>()
        })?
    } else {
        vec![simulate(&args, LocalCommunicator::new())?]
    };

    let num_spikes: usize = recorded.into_iter().flatten().sum();
    let rate = num_spikes as f64 / (args.num_recorded as f64 * args.time / 1000.0);
    log::info!(
        "Recorded {} spikes from {} neurons: mean rate {:.2} spikes/s",
        num_spikes,
        args.num_recorded,
        rate
    );
    Ok(())
}
