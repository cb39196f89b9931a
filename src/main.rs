//! parallel-pool - CLI
//!
//! Small driver around the library: submits sample workloads to a pool and
//! prints what comes back.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parallel_pool::util::logger::{self, LogLevel};
use parallel_pool::{
    args, Args, EventLoop, Pool, PoolConfig, PoolError, RuntimeKind, Scheduler, NAME, VERSION,
};
use tracing::info;

/// Run work in a concurrent task pool without blocking the caller's loop
#[derive(Parser, Debug)]
#[command(name = "parallel-pool")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Runtime backing the pool (overrides config and environment)
    #[arg(long, value_parser = parse_runtime, global = true)]
    runtime: Option<RuntimeKind>,

    /// Worker count for the worker-pool runtime
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Enable verbose output (same as --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sum integers in a worker
    Sum {
        /// Integers to add
        #[arg(value_name = "INT", allow_negative_numbers = true)]
        values: Vec<i64>,

        /// Submit the same sum this many times
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,
    },

    /// Sleep in a worker, then report how long the caller waited
    Sleep {
        /// Milliseconds to sleep
        #[arg(value_name = "MS", default_value_t = 1000)]
        millis: u64,
    },

    /// Kill the pool on the next tick while a sleeping task is in flight
    KillRace {
        /// Milliseconds the task would sleep before returning 123
        #[arg(value_name = "MS", default_value_t = 1000)]
        millis: u64,
    },

    /// Print version information
    Version,
}

fn parse_runtime(s: &str) -> Result<RuntimeKind, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn sum(args: Args) -> anyhow::Result<i64> {
    Ok(args.decode_all::<i64>()?.into_iter().sum())
}

fn load_config(cli: &Cli) -> Result<PoolConfig> {
    let mut config = match &cli.config {
        Some(path) => PoolConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => PoolConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid pool settings in environment")?;

    if let Some(runtime) = cli.runtime {
        config.runtime = runtime;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init_with_level(if cli.verbose {
        LogLevel::Debug
    } else {
        cli.log_level
    });

    if let Commands::Version = cli.command {
        println!("{} {}", NAME, VERSION);
        return Ok(());
    }

    let config = load_config(&cli)?;
    info!(runtime = %config.runtime, workers = config.workers, "starting pool");

    let event_loop = EventLoop::new().context("Failed to start event loop")?;
    let pool = Arc::new(Pool::from_config(&config).context("Failed to create pool")?);

    match cli.command {
        Commands::Sum { values, repeat } => {
            let handles = (0..repeat.max(1))
                .map(|_| pool.run(sum, Args::encode_all(&values)?))
                .collect::<Result<Vec<_>, PoolError>>()?;
            for handle in handles {
                let total = event_loop.block_on(handle)?;
                println!("{}", total);
            }
        }
        Commands::Sleep { millis } => {
            let started = Instant::now();
            let handle = pool.run(
                move |_: Args| {
                    thread::sleep(Duration::from_millis(millis));
                    Ok(true)
                },
                args![]?,
            )?;
            let slept = event_loop.block_on(handle)?;
            println!("{} after {:?}", slept, started.elapsed());
        }
        Commands::KillRace { millis } => {
            let killer = pool.clone();
            event_loop.defer(move || killer.kill());

            let result = event_loop.block_on(async {
                pool.run(
                    move |_: Args| {
                        thread::sleep(Duration::from_millis(millis));
                        Ok(123)
                    },
                    args![]?,
                )?
                .await
            });
            match result {
                Err(PoolError::KilledRuntime { task }) => println!("{} killed", task),
                Ok(value) => println!("unexpected result: {}", value),
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Version => {}
    }

    pool.close();
    Ok(())
}
