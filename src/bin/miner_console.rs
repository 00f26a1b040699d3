//! Line-oriented console over a simulated rig.  Every line is handed to the controller exactly as
//! the programmable block would receive it, e.g. `Start`, `Stop` or `ContinueDepthFromXY@1`.
//!
//! Countdowns don't fire by themselves here.  A few console-only commands stand in for the
//! passage of time:
//!
//! * `:fire` lets the rig finish moving and delivers whichever countdown is running
//! * `:status` prints the controller status as JSON
//! * `:dump` logs the full controller state at debug level

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::{debug, info, warn};

use atmo_miner::miner_config::MinerConfig;
use atmo_miner::miner_controller::{MinerController, MinerError};
use atmo_miner::miner_hal_mock::MockRig;

#[derive(Parser, Debug)]
#[clap(name = "miner_console")]
struct Opts {
  #[clap(long)]
  config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let opts: Opts = Opts::parse();

  let config = match &opts.config {
    Some(path) => MinerConfig::load(path)?,
    None => MinerConfig::default(),
  };
  let rig = MockRig::with_blocks(&config.blocks, config.motion.piston_span);
  let mut controller = MinerController::bind(&rig, &config)?;

  for line in io::stdin().lock().lines() {
    let line = line.context("Failed to read stdin")?;
    match line.trim() {
      "" => continue,
      ":fire" => fire(&rig, &mut controller)?,
      ":status" => {
        let status = controller.status()?;
        println!("{}", serde_json::to_string_pretty(&status)?);
      },
      ":dump" => controller.dump(),
      argument => deliver(&mut controller, argument)?,
    }
    if let Some(waiting_on) = controller.machine().expected_token() {
      info!("Waiting on {waiting_on} ({:?} running)", rig.running_timers());
    }
  }
  Ok(())
}

fn fire(rig: &MockRig, controller: &mut MinerController) -> anyhow::Result<()> {
  let running = rig.running_timers();
  let Some(name) = running.first() else {
    warn!("No countdown is running");
    return Ok(());
  };
  rig.settle();
  match rig.expire(name) {
    Some(signal) => {
      info!("{name} fired");
      deliver(controller, &signal.to_string())
    },
    None => Ok(()),
  }
}

/// Rejected signals are only logged and the console carries on.  Hardware failures end it.
fn deliver(controller: &mut MinerController, argument: &str) -> anyhow::Result<()> {
  match controller.main(argument) {
    Ok(()) => Ok(()),
    Err(MinerError::Resume(e)) => {
      debug!("{argument} not handled: {e:?}");
      Ok(())
    },
    Err(e) => Err(e).with_context(|| format!("Failed to handle {argument}")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rejections_continue_but_hardware_failures_stop() {
    let config = MinerConfig::default();
    let rig = MockRig::with_blocks(&config.blocks, config.motion.piston_span);
    let mut controller = MinerController::bind(&rig, &config).unwrap();

    assert!(deliver(&mut controller, "Excavate").is_ok());
    assert!(deliver(&mut controller, "ContinueDepthFromZ").is_ok());
    deliver(&mut controller, "Start").unwrap();
    fire(&rig, &mut controller).unwrap();
    assert_eq!(rig.running_timers(), vec![config.blocks.timers.depth_adj_rotation.clone()]);

    rig.remove_block(&config.blocks.rotor);
    let err = fire(&rig, &mut controller).unwrap_err();
    assert!(format!("{err:#}").contains("no longer exists"), "{err:#}");
  }
}
