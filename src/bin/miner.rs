//! Runs one whole operation against a simulated rig, countdowns and all:
//!
//! 1. Deliver `Start` (or `Stop` with `--stop`)
//! 2. Every countdown the controller arms fires after `--timer-delay-ms`
//! 3. Its token is handed straight back to the controller
//!
//! until there's nothing left to wait on.  Useful for watching the log of a full excavation
//! without a rig.

use std::path::PathBuf;

use clap::Parser;
use tokio::time::Duration;

use atmo_miner::miner_config::MinerConfig;
use atmo_miner::miner_runner::{MinerRunner, RunnerOptions};
use atmo_miner::resume_token::ResumeToken;

#[derive(Parser, Debug)]
#[clap(name = "miner")]
struct Opts {
  /// JSON file with block names and motion constants.
  #[clap(long)]
  config: Option<PathBuf>,

  #[clap(long, default_value = "1000")]
  timer_delay_ms: u64,

  /// Chance of delivering a handled signal twice.
  #[clap(long, default_value = "0")]
  duplicate_rate: f64,

  #[clap(long, default_value = "0")]
  seed: u64,

  #[clap(long, default_value = "10000")]
  max_signals: usize,

  /// Deliver `Stop` after this many signals.
  #[clap(long)]
  stop_after: Option<usize>,

  /// Begin with `Stop` instead of `Start`.
  #[clap(long)]
  stop: bool,

  /// Print the final status as JSON.
  #[clap(long)]
  json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let opts: Opts = Opts::parse();

  let config = match &opts.config {
    Some(path) => MinerConfig::load(path)?,
    None => MinerConfig::default(),
  };
  let runner = MinerRunner::new(&config, RunnerOptions {
    timer_delay: Duration::from_millis(opts.timer_delay_ms),
    duplicate_rate: opts.duplicate_rate,
    seed: opts.seed,
    max_signals: opts.max_signals,
    stop_after: opts.stop_after,
  })?;

  let command = if opts.stop { ResumeToken::Stop } else { ResumeToken::Start };
  let summary = runner.run(command).await?;

  if opts.json {
    println!("{}", serde_json::to_string_pretty(&summary)?);
  } else {
    println!(
        "Done after {} signals ({} rejected), depth {}",
        summary.received,
        summary.rejected,
        summary.status.aggregate_depth);
  }
  Ok(())
}
