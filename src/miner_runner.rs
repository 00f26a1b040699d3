//! Drives a [`MinerController`] against a [`MockRig`] the way the real rig would: every countdown
//! it arms fires after a delay and comes back in as the next argument.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Duration};

use crate::miner_config::MinerConfig;
use crate::miner_controller::{MinerController, MinerError};
use crate::miner_hal_mock::{MockRig, TimerDispatch};
use crate::miner_machine::MinerStatus;
use crate::resume_token::{ResumeSignal, ResumeToken};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
  /// How long every countdown takes to fire.
  pub timer_delay: Duration,
  /// Chance that a handled signal gets delivered a second time.
  pub duplicate_rate: f64,
  pub seed: u64,
  /// Give up after receiving this many signals.
  pub max_signals: usize,
  /// Send `Stop` once this many signals have been received.
  pub stop_after: Option<usize>,
}

impl Default for RunnerOptions {
  fn default() -> Self {
    Self {
      timer_delay: Duration::from_secs(1),
      duplicate_rate: 0.0,
      seed: 0,
      max_signals: 10_000,
      stop_after: None,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
  pub status: MinerStatus,
  /// Signals received from countdowns, duplicates included.
  pub received: usize,
  pub rejected: usize,
  pub duplicates: usize,
}

pub struct MinerRunner {
  rig: MockRig,
  controller: MinerController,
  tx: UnboundedSender<ResumeSignal>,
  rx: UnboundedReceiver<ResumeSignal>,
  rng: StdRng,
  options: RunnerOptions,
}

impl MinerRunner {
  pub fn new(config: &MinerConfig, options: RunnerOptions) -> Result<Self> {
    if !(0.0..=1.0).contains(&options.duplicate_rate) {
      bail!("Duplicate rate must be within [0, 1], got {}", options.duplicate_rate);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let rig = MockRig::with_blocks(&config.blocks, config.motion.piston_span);
    rig.set_dispatch(TimerDispatch { tx: tx.clone(), delay: options.timer_delay });
    let controller = MinerController::bind(&rig, config)
        .context("Failed to bind the simulated rig")?;

    Ok(Self {
      rig,
      controller,
      tx,
      rx,
      rng: StdRng::seed_from_u64(options.seed),
      options,
    })
  }

  pub fn rig(&self) -> &MockRig {
    &self.rig
  }

  /// Delivers `command` and keeps feeding fired countdowns back in until the controller has
  /// nothing left to wait on.
  pub async fn run(mut self, command: ResumeToken) -> Result<RunSummary> {
    info!("Running simulated operation from {command}");
    let mut rejected = 0;
    let mut duplicates = 0;
    let mut received = 0;
    let stall_timeout = self.options.timer_delay * 4 + Duration::from_secs(1);

    if !self.deliver(ResumeSignal::bare(command))? {
      bail!("{command} was not accepted");
    }

    while !self.controller.is_idle() {
      if received >= self.options.max_signals {
        self.controller.dump();
        bail!("Still busy after {received} signals");
      }

      let signal = match time::timeout(stall_timeout, self.rx.recv()).await {
        Ok(Some(signal)) => signal,
        Ok(None) => bail!("Countdown channel closed while the controller was still busy"),
        Err(_) => {
          self.controller.dump();
          bail!("Nothing fired within {stall_timeout:?}, controller is stuck");
        },
      };
      received += 1;

      self.rig.settle();
      if self.deliver(signal)? {
        if !self.controller.is_idle() && self.rng.gen_bool(self.options.duplicate_rate) {
          duplicates += 1;
          self.tx.send(signal).context("Failed to redeliver signal")?;
        }
      } else {
        rejected += 1;
      }

      if self.options.stop_after == Some(received) {
        warn!("Stopping after {received} signals");
        self.deliver(ResumeSignal::bare(ResumeToken::Stop))?;
      }
    }

    self.rig.settle();
    let status = self.controller.status().context("Failed to read final rig state")?;
    info!("Operation finished after {received} signals ({rejected} rejected)");
    Ok(RunSummary { status, received, rejected, duplicates })
  }

  /// `Ok(false)` for a signal the controller turned away.  Hardware trouble ends the run.
  fn deliver(&mut self, signal: ResumeSignal) -> Result<bool> {
    match self.controller.main(&signal.to_string()) {
      Ok(()) => Ok(true),
      Err(MinerError::Resume(_)) => Ok(false),
      Err(e) => Err(e).with_context(|| format!("Failed to handle {signal}")),
    }
  }
}
