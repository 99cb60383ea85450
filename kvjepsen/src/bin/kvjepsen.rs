//! kvjepsen - race concurrent writers against a key-value store and count
//! what it lost.
//!
//! # Usage
//!
//! Check the simulated store with compare-and-swap merges:
//! ```bash
//! kvjepsen check --mode cas --actors 5 --setsize 2000
//! ```
//!
//! Watch naive read-modify-write lose updates:
//! ```bash
//! kvjepsen check --mode naive --latency-ms 1 --quiet
//! ```
//!
//! Inject faults into the simulated store:
//! ```bash
//! kvjepsen check --write-fault 0.05 --ambiguous-fault 0.05 --phantom-write 0.01 --seed 7
//! ```
//!
//! Against a real memcached:
//! ```bash
//! kvjepsen check --url memcached://127.0.0.1:11211 --mode incr
//! kvjepsen load --url memcached://127.0.0.1:11211 --actors 8 --forever --duration-secs 30
//! ```
//!
//! Report rows go to stdout, logs to stderr (`RUST_LOG` controls the level).

use std::io::{self, BufWriter, Stdout};
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kvjepsen::{
    connect_store, run_check, run_load, CheckOptions, CsvSink, Durability, HarnessError,
    LoadOptions, NullSink, ReportSink, RowFormat, StoreFaults, UpdateMode,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "kvjepsen")]
#[command(about = "Lost-update and durability checker for key-value stores", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Race actors adding elements to one value, then reconcile
    Check(CheckArgs),
    /// Generate fixed-ratio read/write traffic and report throughput
    Load(LoadArgs),
}

/// Where to connect and how the simulated store misbehaves.
#[derive(Args, Debug)]
struct StoreArgs {
    /// Store URL: memory:// or memcached://host:port
    #[arg(long, default_value = "memory://")]
    url: String,

    /// Bucket (key namespace)
    #[arg(long, default_value = "default")]
    bucket: String,

    /// Connections to open
    #[arg(long = "poolsize", default_value = "4")]
    pool_size: usize,

    /// Wait for writes to be persisted
    #[arg(long)]
    durable: bool,

    /// Simulated store: latency added to every operation, in milliseconds
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Simulated store: probability a write is rejected and not applied
    #[arg(long, default_value = "0")]
    write_fault: f64,

    /// Simulated store: probability a write is applied but reported failed
    #[arg(long, default_value = "0")]
    ambiguous_fault: f64,

    /// Simulated store: probability a write is acknowledged but dropped
    #[arg(long, default_value = "0")]
    phantom_write: f64,

    /// Simulated store: fault RNG seed
    #[arg(long, default_value = "0")]
    seed: u64,
}

impl StoreArgs {
    fn durability(&self) -> Durability {
        if self.durable {
            Durability::Persisted
        } else {
            Durability::None
        }
    }

    fn faults(&self) -> StoreFaults {
        StoreFaults {
            write_fault_probability: self.write_fault,
            ambiguous_fault_probability: self.ambiguous_fault,
            phantom_write_probability: self.phantom_write,
            seed: self.seed,
            ..StoreFaults::with_latency(Duration::from_millis(self.latency_ms))
        }
    }
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Key holding the shared value
    #[arg(long, default_value = "jepsen")]
    key: String,

    /// Concurrent actors
    #[arg(long, default_value = "5")]
    actors: usize,

    /// Elements to add (or increments to issue)
    #[arg(long, default_value = "2000")]
    setsize: u64,

    /// Update mode: cas, naive or incr
    #[arg(long, default_value = "cas")]
    mode: String,

    /// Do not echo report rows
    #[arg(long)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct LoadArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Bytes per written object
    #[arg(long, default_value = "1000")]
    object_size: usize,

    /// Keys per pass
    #[arg(long, default_value = "100000")]
    iterations: u64,

    /// Concurrent actors
    #[arg(long, default_value = "1")]
    actors: usize,

    /// Repeat passes until stopped
    #[arg(long)]
    forever: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Read on every Nth iteration (0 disables reads)
    #[arg(long, default_value = "1")]
    read_every: u64,

    /// Write on every Nth iteration (0 disables writes)
    #[arg(long, default_value = "1")]
    write_every: u64,

    /// Do not echo report rows
    #[arg(long)]
    quiet: bool,
}

/// Echo sink chosen by `--quiet`.
enum Echo {
    Csv(CsvSink<BufWriter<Stdout>>),
    Off(NullSink),
}

impl Echo {
    fn new(quiet: bool, format: RowFormat) -> Self {
        if quiet {
            return Echo::Off(NullSink);
        }
        let mut sink = CsvSink::new(BufWriter::new(io::stdout()), format);
        if let Err(error) = sink.header() {
            tracing::warn!(%error, "failed to write report header");
        }
        Echo::Csv(sink)
    }
}

impl ReportSink for Echo {
    fn record(&mut self, report: &kvjepsen::Report) {
        match self {
            Echo::Csv(sink) => sink.record(report),
            Echo::Off(sink) => sink.record(report),
        }
    }

    fn finish(&mut self) {
        match self {
            Echo::Csv(sink) => sink.finish(),
            Echo::Off(sink) => sink.finish(),
        }
    }
}

async fn check(args: CheckArgs) -> Result<(), HarnessError> {
    let mode = UpdateMode::from_str(&args.mode)?;
    let options = CheckOptions {
        url: args.store.url.clone(),
        bucket: args.store.bucket.clone(),
        key: args.key,
        actors: args.actors,
        setsize: args.setsize,
        mode,
        durability: args.store.durability(),
        pool_size: args.store.pool_size,
        ..CheckOptions::default()
    };
    let locator = options.validate()?;
    let store = connect_store(&locator, &options.connect_settings(args.store.faults())).await?;

    let outcome = run_check(&options, store, Echo::new(args.quiet, RowFormat::Check)).await?;
    if outcome.missing_actors > 0 {
        tracing::warn!(missing = outcome.missing_actors, "some actors never finished");
    }
    tracing::info!(
        reports = outcome.reports_received,
        elapsed = ?outcome.elapsed,
        "check complete"
    );
    println!("{}", outcome.analysis);
    Ok(())
}

async fn load(args: LoadArgs) -> Result<(), HarnessError> {
    let options = LoadOptions {
        url: args.store.url.clone(),
        bucket: args.store.bucket.clone(),
        object_size: args.object_size,
        iterations: args.iterations,
        actors: args.actors,
        pool_size: args.store.pool_size,
        forever: args.forever,
        duration: args.duration_secs.map(Duration::from_secs),
        read_every: args.read_every,
        write_every: args.write_every,
        durability: args.store.durability(),
        ..LoadOptions::default()
    };
    let locator = options.validate()?;
    let store = connect_store(&locator, &options.connect_settings(args.store.faults())).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping load actors");
            on_interrupt.cancel();
        }
    });

    let summary = run_load(&options, store, Echo::new(args.quiet, RowFormat::Load), cancel).await?;
    print!("{summary}");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let result = match cli.command {
        Command::Check(args) => check(args).await,
        Command::Load(args) => load(args).await,
    };

    if let Err(error) = result {
        tracing::error!(%error, "run failed");
        std::process::exit(1);
    }
}
