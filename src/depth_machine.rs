//! Depth adjustment: pull the horizontal pistons in, rotate back to zero, then set the vertical
//! stack to the requested depth.  Each phase issues its commands, arms one countdown and returns.

use derive_new::new;
use log::info;
use serde::{Deserialize, Serialize};

use crate::miner_config::MotionConfig;
use crate::miner_hal::PistonId;
use crate::resume_token::TriggerId;
use crate::rig_command::{set_depth, PistonCommand, RigReadings, RotorCommand, Step};

/// The request a depth adjustment is carrying out.  Replaced wholesale by the next request.
#[derive(new, Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct OperationCommand {
  pub depth: f32,
  /// Mine out every quadrant once the depth is reached.
  pub start_quad: bool,
  pub drill_on: bool,
}

#[derive(Debug, Default, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum DepthState {
  #[default]
  Idle,
  WaitXy,
  WaitRotation,
  WaitZ,
}

/// Where control goes once a machine finishes its part.
#[derive(Debug, PartialEq, Copy, Clone)]
pub enum Handoff {
  Done,
  NextQuad,
  AdjustDepth(OperationCommand),
}

#[derive(Debug, Default)]
pub struct DepthMachine {
  state: DepthState,
  command: Option<OperationCommand>,
}

impl DepthMachine {
  pub fn state(&self) -> DepthState {
    self.state
  }

  pub fn command(&self) -> Option<OperationCommand> {
    self.command
  }

  /// First phase.  The caller is responsible for cancelling outstanding countdowns and
  /// resetting quadrant progress before handing over.
  pub fn begin(&mut self, command: OperationCommand, step: &mut Step, motion: &MotionConfig) {
    for piston in PistonId::DEPTH {
      step.piston(piston, PistonCommand::SetVelocity(0.0));
    }
    self.command = Some(command);

    info!("Retracting X and Y pistons for depth adjustment");
    step.piston(PistonId::Side, PistonCommand::SetVelocity(-motion.xy_retract_speed));
    step.piston(PistonId::Forward, PistonCommand::SetVelocity(-motion.xy_retract_speed));

    self.state = DepthState::WaitXy;
    step.arm(TriggerId::DepthAdjXy);
  }

  pub fn continue_from_xy(&mut self, step: &mut Step, motion: &MotionConfig) {
    info!("Rotating miner assembly to zero degrees for depth adjustment");
    step.rotor(RotorCommand::SetUpperLimitDeg(0.0));
    step.rotor(RotorCommand::SetLowerLimitDeg(0.0));
    step.rotor(RotorCommand::SetTargetVelocityRad(motion.rotor_velocity_rad));

    self.state = DepthState::WaitRotation;
    step.arm(TriggerId::DepthAdjRotation);
  }

  pub fn continue_from_rotation(
      &mut self,
      step: &mut Step,
      readings: &RigReadings,
      motion: &MotionConfig) {
    if let Some(command) = self.command {
      info!("Adjusting the miner assembly depth to target Z of {}", command.depth);
      set_depth(step, readings, command.depth, motion);
    }

    self.state = DepthState::WaitZ;
    step.arm(TriggerId::DepthAdjZ);
  }

  /// Last phase.  This is the one place an operation is considered finished, so the command is
  /// cleared no matter what happens next.
  pub fn continue_from_z(&mut self, step: &mut Step) -> Handoff {
    self.state = DepthState::Idle;
    match self.command.take() {
      Some(command) => {
        step.drill(command.drill_on);
        if command.start_quad {
          info!("Starting to mine quad");
          Handoff::NextQuad
        } else {
          info!("Depth adjustment complete");
          Handoff::Done
        }
      },
      None => Handoff::Done,
    }
  }
}
