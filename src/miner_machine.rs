use log::{debug, info};
use serde::Serialize;

use crate::depth_machine::{DepthMachine, DepthState, Handoff, OperationCommand};
use crate::miner_config::MotionConfig;
use crate::quad_machine::{QuadMachine, QuadSector, QuadState};
use crate::resume_token::{ResumeError, ResumeSignal, ResumeToken};
use crate::rig_command::{RigReadings, Step};

/// Both machines plus the bookkeeping that keeps them honest.  Pure: given a signal and a reading
/// of the rig it decides what to command and which countdown to arm, but never talks to hardware.
///
/// Only one of the two machines is ever waiting on something, and what it's waiting on is the only
/// continuation that will be accepted.  Every depth adjustment bumps the generation, so a
/// countdown armed by a superseded operation is rejected even if it happens to carry the right
/// token.
#[derive(Debug, Default)]
pub struct MinerMachine {
  motion: MotionConfig,
  depth: DepthMachine,
  quad: QuadMachine,
  generation: u64,
}

impl MinerMachine {
  pub fn new(motion: MotionConfig) -> Self {
    Self { motion, ..Default::default() }
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn depth_state(&self) -> DepthState {
    self.depth.state()
  }

  pub fn quad_state(&self) -> QuadState {
    self.quad.state()
  }

  /// The continuation currently being waited on, if any.
  pub fn expected_token(&self) -> Option<ResumeToken> {
    match self.depth.state() {
      DepthState::WaitXy => Some(ResumeToken::ContinueDepthFromXy),
      DepthState::WaitRotation => Some(ResumeToken::ContinueDepthFromRotation),
      DepthState::WaitZ => Some(ResumeToken::ContinueDepthFromZ),
      DepthState::Idle => match self.quad.state() {
        QuadState::Idle => None,
        QuadState::WaitSectorRotation => Some(ResumeToken::ContinueQuadMineFromRotation),
        QuadState::WaitRow => Some(ResumeToken::ContinueQuadMineFromRow),
        QuadState::WaitColumn => Some(ResumeToken::ContinueQuadMineFromCol),
        QuadState::WaitRetract => Some(ResumeToken::ContinueQuadMineFromRetractXy),
      },
    }
  }

  pub fn is_idle(&self) -> bool {
    self.expected_token().is_none()
  }

  pub fn resume(&mut self, signal: ResumeSignal, readings: &RigReadings) -> Result<Step, ResumeError> {
    if !signal.token.is_request() {
      self.check_continuation(signal)?;
    }

    let mut step = Step::new(self.generation);
    let handoff = match signal.token {
      ResumeToken::Start => {
        info!("Start command was received");
        Handoff::AdjustDepth(OperationCommand::new(0.0, true, true))
      },
      ResumeToken::Stop => {
        info!("Stop command was received");
        Handoff::AdjustDepth(OperationCommand::new(0.0, false, false))
      },
      ResumeToken::ContinueDepthFromXy => {
        info!("Continue depth adjustment from XY reset command was received");
        self.depth.continue_from_xy(&mut step, &self.motion);
        Handoff::Done
      },
      ResumeToken::ContinueDepthFromRotation => {
        info!("Continue depth adjustment from rotation command was received");
        self.depth.continue_from_rotation(&mut step, readings, &self.motion);
        Handoff::Done
      },
      ResumeToken::ContinueDepthFromZ => {
        info!("Continue depth adjustment from Z command was received");
        self.depth.continue_from_z(&mut step)
      },
      ResumeToken::ContinueQuadMineFromRotation => {
        info!("Continue mining quad from rotation command was received");
        self.quad.continue_from_rotation(&mut step, readings);
        Handoff::Done
      },
      ResumeToken::ContinueQuadMineFromRow => {
        debug!("Continue mining quad from row command was received");
        self.quad.continue_from_row(&mut step, readings, &self.motion);
        Handoff::Done
      },
      ResumeToken::ContinueQuadMineFromCol => {
        debug!("Continue mining quad from column command was received");
        self.quad.continue_from_column(&mut step, readings);
        Handoff::Done
      },
      ResumeToken::ContinueQuadMineFromRetractXy => {
        info!("Continue mining quad from XY retraction command was received");
        self.quad.continue_from_retract(&mut step, readings, &self.motion)
      },
    };
    self.follow(handoff, &mut step, readings);
    Ok(step)
  }

  fn check_continuation(&self, signal: ResumeSignal) -> Result<(), ResumeError> {
    if let Some(received) = signal.generation {
      if received != self.generation {
        return Err(ResumeError::StaleGeneration {
          token: signal.token,
          received,
          current: self.generation,
        });
      }
    }
    let expected = self.expected_token();
    if expected != Some(signal.token) {
      return Err(ResumeError::UnexpectedToken { token: signal.token, expected });
    }
    Ok(())
  }

  fn follow(&mut self, mut handoff: Handoff, step: &mut Step, readings: &RigReadings) {
    loop {
      handoff = match handoff {
        Handoff::Done => return,
        Handoff::NextQuad => self.quad.do_next_quad(step, readings, &self.motion),
        Handoff::AdjustDepth(command) => {
          self.adjust_depth(command, step);
          Handoff::Done
        },
      };
    }
  }

  /// The only way a new operation starts.  Stops every countdown from whatever was running before
  /// so nothing from it can fire into the new one.
  fn adjust_depth(&mut self, command: OperationCommand, step: &mut Step) {
    step.cancel_all();
    self.generation += 1;
    step.set_generation(self.generation);
    self.quad.reset();
    self.depth.begin(command, step, &self.motion);
  }

  pub fn status(&self, readings: &RigReadings) -> MinerStatus {
    MinerStatus {
      depth_state: self.depth.state(),
      quad_state: self.quad.state(),
      sector: self.quad.sector(),
      column: self.quad.column(),
      generation: self.generation,
      command: self.depth.command(),
      waiting_on: self.expected_token(),
      aggregate_depth: readings.aggregate_depth(),
    }
  }
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct MinerStatus {
  pub depth_state: DepthState,
  pub quad_state: QuadState,
  pub sector: QuadSector,
  pub column: f32,
  pub generation: u64,
  pub command: Option<OperationCommand>,
  pub waiting_on: Option<ResumeToken>,
  pub aggregate_depth: f32,
}
