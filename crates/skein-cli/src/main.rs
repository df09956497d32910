//! skein command-line interface.
//!
//! ```sh
//! skein run --tasks 100 --workers 4 --policy load_balanced --seed 42
//! skein run --config dispatch.json --fail-index 3
//! skein streams --seed 1 --tasks 5
//! ```
//!
//! The report goes to stdout as JSON; logs go to stderr (`RUST_LOG`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use skein_core::{
    DispatchConfig, DispatcherBuilder, RunError, SchedulingPolicy, StreamState, TaskError,
    derive_streams, task_fn,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skein")]
#[command(about = "Reproducible task dispatch over a worker pool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo workload: each task averages `draws` standard normals.
    Run {
        /// Number of tasks.
        #[arg(short = 'n', long, default_value_t = 16)]
        tasks: usize,
        /// Normals drawn per task.
        #[arg(short, long, default_value_t = 1000)]
        draws: usize,
        /// Dispatcher config file (JSON). Flags below override it.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Worker count; 0 runs sequentially.
        #[arg(short, long)]
        workers: Option<usize>,
        /// `static` or `load_balanced`.
        #[arg(short, long)]
        policy: Option<SchedulingPolicy>,
        #[arg(short, long)]
        seed: Option<u64>,
        /// Per-task deadline in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Extra milliseconds of sleep for task `i`, as `i:ms`. Repeatable.
        #[arg(long, value_parser = parse_cost)]
        slow: Vec<(usize, u64)>,
        /// Make this task index fail. Repeatable.
        #[arg(long)]
        fail_index: Vec<usize>,
    },
    /// Print the first output of each per-index stream.
    Streams {
        #[arg(short, long, default_value_t = 1)]
        seed: u64,
        #[arg(short = 'n', long, default_value_t = 8)]
        tasks: usize,
    },
}

fn parse_cost(s: &str) -> Result<(usize, u64), String> {
    let (index, ms) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <index>:<ms>, got {s:?}"))?;
    let index = index.parse().map_err(|e| format!("bad index {index:?}: {e}"))?;
    let ms = ms.parse().map_err(|e| format!("bad duration {ms:?}: {e}"))?;
    Ok((index, ms))
}

#[derive(Serialize)]
struct StreamLine {
    index: usize,
    fingerprint: String,
}

const DEFAULT_LOG: &str = "info";

/// `RUST_LOG` when it parses, `info` otherwise.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG))
}

/// Drive `fut` on a fresh runtime, then drop the runtime without waiting
/// for blocking threads. Tasks that hit their deadline may still be
/// computing there; the report no longer needs them.
fn block_on_detached<F: Future>(fut: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(fut);
    runtime.shutdown_background();
    Ok(output)
}

fn main() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    block_on_detached(execute(cli))?
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            tasks,
            draws,
            config,
            workers,
            policy,
            seed,
            timeout_ms,
            slow,
            fail_index,
        } => {
            let mut cfg = match &config {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    DispatchConfig::from_json(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => DispatchConfig::default(),
            };
            if let Some(workers) = workers {
                cfg.workers = workers;
            }
            if let Some(policy) = policy {
                cfg.policy = policy;
            }
            if let Some(seed) = seed {
                cfg.seed = seed;
            }
            if timeout_ms.is_some() {
                cfg.task_timeout_ms = timeout_ms;
            }

            let dispatcher = DispatcherBuilder::new().config(cfg).build()?;

            let mut costs = vec![0u64; tasks];
            for (index, ms) in slow {
                match costs.get_mut(index) {
                    Some(cost) => *cost = ms,
                    None => warn!(index, tasks, "--slow index out of range, ignored"),
                }
            }
            let func = task_fn(move |i: &usize, s: &mut StreamState| -> Result<f64, TaskError> {
                if fail_index.contains(i) {
                    return Err(TaskError::new(format!("task {i} failed on request")));
                }
                if costs[*i] > 0 {
                    std::thread::sleep(Duration::from_millis(costs[*i]));
                }
                let sum: f64 = (0..draws).map(|_| s.next_standard_normal()).sum();
                Ok(if draws == 0 { 0.0 } else { sum / draws as f64 })
            });

            match dispatcher.run(func, (0..tasks).collect()).await {
                Ok(report) => {
                    info!(makespan_ms = report.makespan.as_millis() as u64, "done");
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(())
                }
                Err(RunError::PoolExhausted {
                    aborted,
                    total,
                    results,
                }) => {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                    anyhow::bail!("worker pool exhausted: {aborted} of {total} tasks aborted")
                }
                Err(err) => Err(err.into()),
            }
        }
        Commands::Streams { seed, tasks } => {
            let streams = derive_streams(seed, tasks)?;
            for stream in &streams {
                let line = StreamLine {
                    index: stream.index(),
                    fingerprint: format!("{:016x}", stream.fingerprint()),
                };
                println!("{}", serde_json::to_string(&line)?);
            }
            Ok(())
        }
    }
}
