//! Entropy CTR demo
//!
//! Builds a floor-guarded counter engine seeded from the operating system,
//! registers it for background reseeding, and prints generated words.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use entropy_ctr::{
    config::FileConfig,
    engine::{CounterEngine, EntropyRng},
    floor::EntropyFloor,
    looper::{Iterate, Looper, LooperError},
    metrics::{MetricsRegistry, MetricsSnapshot},
    scheduler::ReseedScheduler,
    seed::{CooldownSource, OsSeedSource, SeedSource},
};
use tracing::{info, warn};

type Guarded = EntropyFloor<CounterEngine>;
type Publish = Box<dyn Fn(&MetricsSnapshot) + Send>;

#[derive(Debug, Parser)]
#[command(name = "entropy-ctr", version, about = "Counter-mode PRNG with background reseeding")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Words printed per round (overrides the config file).
    #[arg(short, long)]
    words: Option<usize>,

    /// Keep generating until interrupted with Ctrl-C.
    #[arg(long)]
    continuous: bool,

    /// Print a TOML snapshot of the engine state before exiting.
    #[arg(long)]
    snapshot: bool,
}

/// One round of output per iteration.
struct Producer {
    floor: Arc<Guarded>,
    scheduler: Arc<ReseedScheduler>,
    publish: Publish,
    words: usize,
    continuous: bool,
    round: u64,
}

impl Iterate for Producer {
    fn iterate(&mut self) -> Result<bool, LooperError> {
        self.round += 1;
        let mut line = Vec::with_capacity(self.words);
        for _ in 0..self.words {
            let word = self
                .floor
                .next_u32()
                .map_err(|e| LooperError::Iteration(e.to_string()))?;
            line.push(format!("{:08x}", word));
        }
        println!("{}", line.join(" "));

        let snapshot =
            MetricsSnapshot::from_components(self.floor.as_ref(), self.scheduler.as_ref());
        (self.publish)(&snapshot);
        info!(
            round = self.round,
            entropy_bits = snapshot.entropy_bits,
            reseeds = snapshot.reseed_count,
            "Round complete"
        );

        if self.continuous {
            std::thread::sleep(Duration::from_millis(500));
        }
        Ok(self.continuous)
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Err(e) = run(Args::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("Entropy CTR v{}", entropy_ctr::VERSION);

    let mut config = match &args.config {
        Some(path) => FileConfig::from_file(path)?,
        None => FileConfig::default(),
    };
    if let Some(words) = args.words {
        config.output.words = words;
    }
    config.output.continuous |= args.continuous;

    let source: Arc<dyn SeedSource> = Arc::new(CooldownSource::new(OsSeedSource::new()));
    let seed = source.generate_seed(config.engine.seed_length)?;
    let engine: CounterEngine =
        CounterEngine::new(&seed)?.with_reseed_threshold(config.engine.reseed_threshold_bits)?;

    let floor_bits = config.floor.minimum_entropy_bits;
    let floor = Arc::new(if config.floor.fallback {
        EntropyFloor::with_fallback(engine, floor_bits, Arc::clone(&source))?
    } else {
        EntropyFloor::new(engine, floor_bits)?
    });

    let scheduler = Arc::new(ReseedScheduler::new(config.scheduler.clone()));
    scheduler.register(&source, &floor)?;
    info!(
        seed_len = seed.len(),
        floor = floor_bits,
        entropy_bits = floor.entropy_bits(),
        "Engine ready"
    );

    let producer = Producer {
        floor: Arc::clone(&floor),
        scheduler: Arc::clone(&scheduler),
        publish: metrics_sink(config.output.metrics_port)?,
        words: config.output.words,
        continuous: config.output.continuous,
        round: 0,
    };

    let looper = Arc::new(Looper::new("producer", producer));
    if config.output.continuous {
        let handle = Arc::clone(&looper);
        ctrlc::set_handler(move || {
            info!("Interrupt received; stopping after this round");
            handle.request_stop();
        })?;
    }
    looper.start()?;
    looper.join();

    if args.snapshot {
        println!("{}", floor.inner().snapshot().to_toml()?);
    }

    scheduler.deregister(&source, &floor);
    scheduler.stop_if_empty(&source);
    info!(reseeds = floor.inner().reseed_count(), "Done");
    Ok(())
}

#[cfg(feature = "metrics")]
fn metrics_sink(port: u16) -> Result<Publish, Box<dyn std::error::Error>> {
    use entropy_ctr::metrics::{MetricsServer, MetricsServerConfig};

    let registry = MetricsRegistry::new()?;
    if port == 0 {
        return Ok(Box::new(move |snapshot: &MetricsSnapshot| registry.update(snapshot)));
    }

    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();
    let runtime = tokio::runtime::Runtime::new()?;
    std::thread::Builder::new()
        .name("metrics".to_string())
        .spawn(move || {
            if let Err(e) = runtime.block_on(server.run()) {
                warn!("Metrics server stopped: {}", e);
            }
        })?;
    Ok(Box::new(move |snapshot: &MetricsSnapshot| {
        state.blocking_write().update(snapshot)
    }))
}

#[cfg(not(feature = "metrics"))]
fn metrics_sink(port: u16) -> Result<Publish, Box<dyn std::error::Error>> {
    if port != 0 {
        warn!(port, "Built without the `metrics` feature; not serving metrics");
    }
    let registry = MetricsRegistry::new()?;
    Ok(Box::new(move |snapshot: &MetricsSnapshot| registry.update(snapshot)))
}
