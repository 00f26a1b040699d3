//! Quadrant mining: for each 90 degree sector rotate into place, sweep rows with the side piston
//! while stepping the forward piston one column at a time, then pull both in and move on.  After
//! the fourth sector control goes back to the depth machine for the next layer (or to finish).

use log::info;
use serde::{Deserialize, Serialize};

use crate::depth_machine::{Handoff, OperationCommand};
use crate::miner_config::MotionConfig;
use crate::miner_hal::PistonId;
use crate::resume_token::TriggerId;
use crate::rig_command::{set_piston_position, PistonCommand, RigReadings, RotorCommand, Step};

#[derive(Debug, Default, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum QuadSector {
  /// No sector active; rotation not yet at the reference angle.
  #[default]
  None,
  Sector1,
  Sector2,
  Sector3,
  Sector4,
}

impl QuadSector {
  pub fn next(self) -> Self {
    match self {
      QuadSector::None => QuadSector::Sector1,
      QuadSector::Sector1 => QuadSector::Sector2,
      QuadSector::Sector2 => QuadSector::Sector3,
      QuadSector::Sector3 => QuadSector::Sector4,
      QuadSector::Sector4 => QuadSector::None,
    }
  }

  /// Rotor upper limit to command on entering this sector.  `None` is only ever entered by
  /// wrapping around after the fourth sector, hence a full turn.
  pub fn rotor_limit_deg(self) -> f32 {
    match self {
      QuadSector::None => 360.0,
      QuadSector::Sector1 => 0.0,
      QuadSector::Sector2 => 90.0,
      QuadSector::Sector3 => 180.0,
      QuadSector::Sector4 => 270.0,
    }
  }
}

#[derive(Debug, Default, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum QuadState {
  #[default]
  Idle,
  WaitSectorRotation,
  WaitRow,
  WaitColumn,
  WaitRetract,
}

#[derive(Debug, Default)]
pub struct QuadMachine {
  state: QuadState,
  sector: QuadSector,
  column: f32,
}

impl QuadMachine {
  pub fn state(&self) -> QuadState {
    self.state
  }

  pub fn sector(&self) -> QuadSector {
    self.sector
  }

  pub fn column(&self) -> f32 {
    self.column
  }

  /// Forget all progress.  Used when a new depth adjustment takes over.
  pub fn reset(&mut self) {
    self.state = QuadState::Idle;
    self.sector = QuadSector::None;
    self.column = 0.0;
  }

  pub fn do_next_quad(
      &mut self,
      step: &mut Step,
      readings: &RigReadings,
      motion: &MotionConfig) -> Handoff {
    info!(
        "Current angle is {}. Last quad mined was {:?}",
        readings.rotor_angle_deg,
        self.sector);

    self.sector = self.sector.next();
    step.rotor(RotorCommand::SetUpperLimitDeg(self.sector.rotor_limit_deg()));

    if self.sector == QuadSector::None {
      self.state = QuadState::Idle;
      let depth = readings.aggregate_depth();
      return if depth >= motion.max_depth() - motion.tolerance {
        info!("Quad 4 done at depth {depth}, excavation complete. Resetting");
        Handoff::AdjustDepth(OperationCommand::new(0.0, false, false))
      } else {
        let next_depth = depth + motion.layer_step;
        info!("Quad 4 done at depth {depth}, moving down to {next_depth}");
        Handoff::AdjustDepth(OperationCommand::new(next_depth, true, true))
      };
    }

    info!("Rotating to {:?}", self.sector);
    step.rotor(RotorCommand::SetTargetVelocityRad(motion.rotor_velocity_rad));
    self.state = QuadState::WaitSectorRotation;
    step.arm(TriggerId::QuadMineRotation);
    Handoff::Done
  }

  pub fn continue_from_rotation(&mut self, step: &mut Step, readings: &RigReadings) {
    if self.sector == QuadSector::None {
      return;
    }
    self.column = 0.0;
    self.mine_row(step, readings);
  }

  fn mine_row(&mut self, step: &mut Step, readings: &RigReadings) {
    if readings.side_piston > 0.0 {
      info!("Mining a row by retracting the side piston (column {})", self.column);
      step.piston(PistonId::Side, PistonCommand::Retract);
    } else {
      info!("Mining a row by extending the side piston (column {})", self.column);
      step.piston(PistonId::Side, PistonCommand::Extend);
    }

    self.state = QuadState::WaitRow;
    step.arm(TriggerId::QuadMineRow);
  }

  pub fn continue_from_row(
      &mut self,
      step: &mut Step,
      readings: &RigReadings,
      motion: &MotionConfig) {
    if self.column > motion.sector_width - motion.tolerance {
      info!("{:?} swept, retracting X and Y pistons", self.sector);
      step.piston(PistonId::Side, PistonCommand::Retract);
      step.piston(PistonId::Forward, PistonCommand::Retract);
      self.state = QuadState::WaitRetract;
      step.arm(TriggerId::QuadMineRetractXy);
      return;
    }

    self.column += motion.column_step;
    set_piston_position(
        step,
        PistonId::Forward,
        readings.forward_piston,
        self.column,
        motion.piston_speed);
    self.state = QuadState::WaitColumn;
    step.arm(TriggerId::QuadMineCol);
  }

  pub fn continue_from_column(&mut self, step: &mut Step, readings: &RigReadings) {
    self.mine_row(step, readings);
  }

  pub fn continue_from_retract(
      &mut self,
      step: &mut Step,
      readings: &RigReadings,
      motion: &MotionConfig) -> Handoff {
    self.do_next_quad(step, readings, motion)
  }
}
