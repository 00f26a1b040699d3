use log::{debug, error, warn};
use thiserror::Error;

use crate::miner_config::MinerConfig;
use crate::miner_hal::{BlockResolver, HalError, HalResult, PistonId};
use crate::miner_hal_factory::{MinerHalFactory, MinerHandles};
use crate::miner_machine::{MinerMachine, MinerStatus};
use crate::resume_token::{ResumeError, ResumeSignal, TriggerId};
use crate::rig_command::{PistonCommand, RigCommand, RigReadings, RotorCommand, Step};

#[derive(Error, Debug, PartialEq, Clone)]
pub enum MinerError {
  #[error(transparent)]
  Resume(#[from] ResumeError),
  #[error("hardware: {0}")]
  Hal(#[from] HalError),
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
}

/// The single owner of the rig.  Each call to [`MinerController::main`] runs exactly one
/// continuation to completion and returns; waiting is done by the countdown it leaves armed.
pub struct MinerController {
  handles: MinerHandles,
  machine: MinerMachine,
}

impl MinerController {
  pub fn new(handles: MinerHandles, machine: MinerMachine) -> Self {
    Self { handles, machine }
  }

  pub fn bind(resolver: &dyn BlockResolver, config: &MinerConfig) -> Result<Self, MinerError> {
    config.motion.validate().map_err(|e| MinerError::InvalidConfig(format!("{e:#}")))?;
    let handles = MinerHalFactory::new(&config.blocks).bind(resolver)?;
    Ok(Self::new(handles, MinerMachine::new(config.motion.clone())))
  }

  /// Entry point: `argument` is whatever the operator or a firing countdown passed in.
  pub fn main(&mut self, argument: &str) -> Result<(), MinerError> {
    let result = argument.parse::<ResumeSignal>()
        .map_err(MinerError::from)
        .and_then(|signal| self.resume(signal));
    match &result {
      Err(MinerError::Resume(e @ ResumeError::UnknownCommand(_))) => error!("Error: {e}"),
      Err(MinerError::Resume(e)) => warn!("Ignoring signal: {e}"),
      Err(e) => error!("Failed handling '{argument}': {e}"),
      Ok(()) => (),
    }
    result
  }

  pub fn resume(&mut self, signal: ResumeSignal) -> Result<(), MinerError> {
    let readings = self.read_rig()?;
    let step = self.machine.resume(signal, &readings)?;
    self.apply(&step)?;
    Ok(())
  }

  pub fn is_idle(&self) -> bool {
    self.machine.is_idle()
  }

  pub fn machine(&self) -> &MinerMachine {
    &self.machine
  }

  pub fn status(&self) -> HalResult<MinerStatus> {
    Ok(self.machine.status(&self.read_rig()?))
  }

  pub fn dump(&self) {
    debug!("Dumping all state:");
    debug!("machine: {:?}", self.machine);
    match self.read_rig() {
      Ok(readings) => debug!("readings: {readings:?}"),
      Err(e) => debug!("readings: <error: {e:?}>"),
    }
  }

  fn read_rig(&self) -> HalResult<RigReadings> {
    let mut depth_pistons = [0.0; 4];
    for (position, piston) in depth_pistons.iter_mut().zip(PistonId::DEPTH) {
      *position = self.handles.piston(piston).current_position()?;
    }
    Ok(RigReadings {
      side_piston: self.handles.side_piston.current_position()?,
      forward_piston: self.handles.forward_piston.current_position()?,
      depth_pistons,
      rotor_angle_deg: self.handles.rotor.angle_deg()?,
    })
  }

  fn apply(&mut self, step: &Step) -> HalResult<()> {
    if step.cancel_all {
      for trigger in TriggerId::ALL {
        self.handles.timer_mut(trigger).stop_countdown()?;
      }
    }
    for command in &step.commands {
      self.apply_command(command)?;
    }
    if let Some(armed) = step.armed {
      debug!("Calling {:?} wait timer block (generation {})", armed.trigger, armed.generation);
      self.handles.timer_mut(armed.trigger).start_countdown(armed.generation)?;
    }
    Ok(())
  }

  fn apply_command(&mut self, command: &RigCommand) -> HalResult<()> {
    match *command {
      RigCommand::Piston(id, command) => {
        let piston = self.handles.piston_mut(id);
        match command {
          PistonCommand::SetVelocity(velocity) => piston.set_velocity(velocity),
          PistonCommand::SetMaxLimit(limit) => piston.set_max_limit(limit),
          PistonCommand::SetMinLimit(limit) => piston.set_min_limit(limit),
          PistonCommand::Extend => piston.extend(),
          PistonCommand::Retract => piston.retract(),
        }
      },
      RigCommand::Rotor(command) => {
        let rotor = self.handles.rotor.as_mut();
        match command {
          RotorCommand::SetUpperLimitDeg(limit) => rotor.set_upper_limit_deg(limit),
          RotorCommand::SetLowerLimitDeg(limit) => rotor.set_lower_limit_deg(limit),
          RotorCommand::SetTargetVelocityRad(velocity) => rotor.set_target_velocity_rad(velocity),
        }
      },
      RigCommand::Drill { enabled } => self.handles.drill.set_enabled(enabled),
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::depth_machine::OperationCommand;
  use crate::miner_config::BlockNames;
  use crate::miner_hal_mock::MockRig;
  use crate::quad_machine::QuadSector;
  use crate::resume_token::ResumeToken;

  use super::*;

  fn new_rig() -> (MockRig, MinerController, BlockNames) {
    let config = MinerConfig::default();
    let rig = MockRig::with_blocks(&config.blocks, config.motion.piston_span);
    let controller = MinerController::bind(&rig, &config).unwrap();
    (rig, controller, config.blocks)
  }

  /// Plays the part of the outside world: lets the rig finish moving, then fires whichever
  /// countdown is running.
  fn fire(rig: &MockRig, controller: &mut MinerController) -> ResumeSignal {
    let running = rig.running_timers();
    assert_eq!(running.len(), 1, "expected exactly one countdown, got {running:?}");
    rig.settle();
    let signal = rig.expire(&running[0]).unwrap();
    controller.main(&signal.to_string()).unwrap();
    signal
  }

  #[test]
  fn test_start_retracts_and_arms_xy_wait() {
    let (rig, mut controller, names) = new_rig();
    rig.set_piston_position(&names.side_piston, 7.0);

    controller.main("Start").unwrap();

    for trigger in TriggerId::ALL {
      assert_eq!(rig.timer(names.timer(trigger)).unwrap().stops, 1);
    }
    assert_eq!(rig.piston(&names.side_piston).unwrap().velocity, -0.5);
    assert_eq!(rig.piston(&names.forward_piston).unwrap().velocity, -0.5);
    assert_eq!(rig.running_timers(), vec![names.timers.depth_adj_xy.clone()]);
    assert_eq!(rig.timer(&names.timers.depth_adj_xy).unwrap().last_generation, Some(1));

    rig.settle();
    assert_eq!(rig.piston(&names.side_piston).unwrap().position, 0.0);
  }

  #[test]
  fn test_unrecognized_command_changes_nothing() {
    let (rig, mut controller, names) = new_rig();

    let result = controller.main("Excavate");
    assert_eq!(result, Err(MinerError::Resume(ResumeError::UnknownCommand("Excavate".to_owned()))));
    assert!(controller.is_idle());
    assert!(rig.running_timers().is_empty());
    assert_eq!(rig.timer(&names.timers.depth_adj_xy).unwrap().stops, 0);
    assert_eq!(rig.piston(&names.side_piston).unwrap().velocity, 0.0);
  }

  #[test]
  fn test_first_layer_then_next_depth() {
    let (rig, mut controller, names) = new_rig();
    controller.main("Start").unwrap();

    assert_eq!(fire(&rig, &mut controller).token, ResumeToken::ContinueDepthFromXy);
    assert_eq!(rig.rotor(&names.rotor).unwrap().upper_limit_deg, 0.0);
    fire(&rig, &mut controller);
    fire(&rig, &mut controller);
    assert_eq!(rig.drill_enabled(&names.drill), Some(true));
    assert_eq!(controller.machine().status(&RigReadings::default()).sector, QuadSector::Sector1);

    let mut upper_limits = vec![];
    let mut side_extended_after_rows = vec![];
    while controller.machine().generation() == 1 {
      let signal = fire(&rig, &mut controller);
      match signal.token {
        ResumeToken::ContinueQuadMineFromRetractXy => {
          upper_limits.push(rig.rotor(&names.rotor).unwrap().upper_limit_deg);
        },
        ResumeToken::ContinueQuadMineFromRow
            if controller.machine().expected_token() == Some(ResumeToken::ContinueQuadMineFromCol) => {
          side_extended_after_rows.push(rig.piston(&names.side_piston).unwrap().position > 0.0);
        },
        _ => (),
      }
    }
    assert_eq!(upper_limits, vec![90.0, 180.0, 270.0, 360.0]);
    // Serpentine: the side piston alternates ends every row.
    assert_eq!(side_extended_after_rows[..4], [true, false, true, false]);

    let status = controller.status().unwrap();
    assert_eq!(status.command, Some(OperationCommand::new(1.0, true, true)));
    assert_eq!(status.sector, QuadSector::None);

    fire(&rig, &mut controller);
    fire(&rig, &mut controller);
    fire(&rig, &mut controller);
    rig.settle();
    assert_eq!(rig.piston(&names.depth_pistons[0]).unwrap().position, 1.0);
    assert_eq!(controller.status().unwrap().aggregate_depth, 1.0);
  }

  #[test]
  fn test_stop_mid_sweep_cancels_everything() {
    let (rig, mut controller, names) = new_rig();
    controller.main("Start").unwrap();
    for _ in 0..6 {
      fire(&rig, &mut controller);
    }
    assert_eq!(rig.running_timers(), vec![names.timers.quad_mine_row.clone()]);
    let stale = rig.timer(&names.timers.quad_mine_row).unwrap();

    controller.main("Stop").unwrap();
    assert_eq!(rig.running_timers(), vec![names.timers.depth_adj_xy.clone()]);
    assert_eq!(controller.status().unwrap().command, Some(OperationCommand::new(0.0, false, false)));

    // A row countdown that slipped through before the stop took effect.
    let late = ResumeSignal::stamped(stale.token, stale.last_generation.unwrap());
    assert!(matches!(
        controller.main(&late.to_string()),
        Err(MinerError::Resume(ResumeError::StaleGeneration { .. }))));

    while !controller.is_idle() {
      fire(&rig, &mut controller);
    }
    assert_eq!(rig.drill_enabled(&names.drill), Some(false));
    assert!(rig.running_timers().is_empty());
  }

  #[test]
  fn test_bind_rejects_unusable_motion() {
    let mut config = MinerConfig::default();
    config.motion.column_step = 0.0;
    let rig = MockRig::with_blocks(&config.blocks, config.motion.piston_span);

    let err = match MinerController::bind(&rig, &config) {
      Err(err) => err,
      Ok(_) => panic!("bound with a zero column step"),
    };
    assert!(matches!(&err, MinerError::InvalidConfig(message) if message.contains("column_step")));
  }

  #[test]
  fn test_stop_forgets_sweep_progress() {
    let (rig, mut controller, _) = new_rig();
    controller.main("Start").unwrap();
    for _ in 0..8 {
      fire(&rig, &mut controller);
    }
    assert!(controller.status().unwrap().column > 0.0);

    controller.main("Stop").unwrap();
    let status = controller.status().unwrap();
    assert_eq!(status.sector, QuadSector::None);
    assert_eq!(status.column, 0.0);
  }

  #[test]
  fn test_block_lost_after_binding_surfaces_as_error() {
    let (rig, mut controller, names) = new_rig();
    rig.remove_block(&names.forward_piston);
    assert!(matches!(
        controller.main("Start"),
        Err(MinerError::Hal(HalError::DeviceNotConnected(_)))));
  }
}
