//! What a single continuation asks of the rig, and the helpers that turn target positions into
//! those asks.
//!
//! Nothing in here touches hardware.  Continuations read a [`RigReadings`] snapshot taken at the
//! start of the invocation and push [`RigCommand`]s onto a [`Step`]; the controller applies them
//! afterwards.  Reaching a commanded position is never verified, only assumed once the armed
//! countdown fires.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::miner_config::MotionConfig;
use crate::miner_hal::PistonId;
use crate::resume_token::TriggerId;

#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum PistonCommand {
  SetVelocity(f32),
  SetMaxLimit(f32),
  SetMinLimit(f32),
  Extend,
  Retract,
}

#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum RotorCommand {
  SetUpperLimitDeg(f32),
  SetLowerLimitDeg(f32),
  SetTargetVelocityRad(f32),
}

#[derive(Debug, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum RigCommand {
  Piston(PistonId, PistonCommand),
  Rotor(RotorCommand),
  Drill { enabled: bool },
}

/// Countdown to start, along with the generation it must come back with.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub struct ArmedTrigger {
  pub trigger: TriggerId,
  pub generation: u64,
}

/// Everything one invocation of the entry point decided to do, in order: stop every countdown
/// (only ever requested by a new depth adjustment), issue commands, start at most one countdown.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct Step {
  pub cancel_all: bool,
  pub commands: Vec<RigCommand>,
  pub armed: Option<ArmedTrigger>,
  generation: u64,
}

impl Step {
  pub fn new(generation: u64) -> Self {
    Self { generation, ..Default::default() }
  }

  pub fn set_generation(&mut self, generation: u64) {
    self.generation = generation;
  }

  pub fn cancel_all(&mut self) {
    self.cancel_all = true;
    self.armed = None;
  }

  pub fn piston(&mut self, piston: PistonId, command: PistonCommand) {
    self.commands.push(RigCommand::Piston(piston, command));
  }

  pub fn rotor(&mut self, command: RotorCommand) {
    self.commands.push(RigCommand::Rotor(command));
  }

  pub fn drill(&mut self, enabled: bool) {
    self.commands.push(RigCommand::Drill { enabled });
  }

  pub fn arm(&mut self, trigger: TriggerId) {
    let armed = ArmedTrigger { trigger, generation: self.generation };
    if let Some(previous) = self.armed.replace(armed) {
      // Only one countdown may be outstanding at a time, so the earlier one would never have
      // been waited on anyway.
      debug!("Replacing {previous:?} with {armed:?}");
    }
  }
}

/// Snapshot of everything a continuation is allowed to look at.
#[derive(Debug, Default, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct RigReadings {
  pub side_piston: f32,
  pub forward_piston: f32,
  pub depth_pistons: [f32; 4],
  pub rotor_angle_deg: f32,
}

impl RigReadings {
  pub fn piston(&self, id: PistonId) -> f32 {
    match id {
      PistonId::Side => self.side_piston,
      PistonId::Forward => self.forward_piston,
      PistonId::Depth1 => self.depth_pistons[0],
      PistonId::Depth2 => self.depth_pistons[1],
      PistonId::Depth3 => self.depth_pistons[2],
      PistonId::Depth4 => self.depth_pistons[3],
    }
  }

  /// Total drilled depth, i.e. the sum of every vertical piston's extension.
  pub fn aggregate_depth(&self) -> f32 {
    self.depth_pistons.iter().sum()
  }
}

/// Commands `piston` towards `target` by bounding its travel at the target and moving it in the
/// right direction.  A piston already at the target is simply stopped.
pub fn set_piston_position(
    step: &mut Step,
    piston: PistonId,
    current: f32,
    target: f32,
    speed: f32) {
  if current < target {
    step.piston(piston, PistonCommand::SetMaxLimit(target));
    step.piston(piston, PistonCommand::SetVelocity(speed));
  } else if current > target {
    step.piston(piston, PistonCommand::SetMinLimit(target));
    step.piston(piston, PistonCommand::SetVelocity(-speed));
  } else {
    step.piston(piston, PistonCommand::SetVelocity(0.0));
  }
}

/// Splits a scalar depth across the telescoping vertical stack: each piston absorbs up to a full
/// span before the next one takes any of the remainder.
pub fn depth_targets(depth: f32, span: f32) -> [f32; 4] {
  let mut targets = [0.0; 4];
  for (k, target) in targets.iter_mut().enumerate() {
    *target = (depth - k as f32 * span).clamp(0.0, span);
  }
  targets
}

pub fn set_depth(step: &mut Step, readings: &RigReadings, depth: f32, motion: &MotionConfig) {
  let depth = depth.clamp(0.0, motion.max_depth());
  let targets = depth_targets(depth, motion.piston_span);
  for (piston, target) in PistonId::DEPTH.into_iter().zip(targets) {
    set_piston_position(step, piston, readings.piston(piston), target, motion.piston_speed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn is_partial(position: f32) -> bool {
    position != 0.0 && position != 10.0
  }

  #[test]
  fn test_depth_targets_boundaries() {
    assert_eq!(depth_targets(0.0, 10.0), [0.0, 0.0, 0.0, 0.0]);
    assert_eq!(depth_targets(40.0, 10.0), [10.0, 10.0, 10.0, 10.0]);
    assert_eq!(depth_targets(10.0, 10.0), [10.0, 0.0, 0.0, 0.0]);
    assert_eq!(depth_targets(30.0, 10.0), [10.0, 10.0, 10.0, 0.0]);
  }

  #[test]
  fn test_depth_targets_single_active_piston() {
    for tenths in 0..=400 {
      let depth = tenths as f32 / 10.0;
      let targets = depth_targets(depth, 10.0);

      let partial: Vec<usize> = (0..4).filter(|&k| is_partial(targets[k])).collect();
      assert!(partial.len() <= 1, "depth {depth}: {targets:?}");
      if let Some(&active) = partial.first() {
        assert!(targets[..active].iter().all(|&t| t == 10.0), "depth {depth}: {targets:?}");
        assert!(targets[active + 1..].iter().all(|&t| t == 0.0), "depth {depth}: {targets:?}");
      }
      assert!((targets.iter().sum::<f32>() - depth).abs() < 1e-3, "depth {depth}: {targets:?}");
    }
  }

  #[test]
  fn test_depth_targets_clamps_out_of_range() {
    assert_eq!(depth_targets(-3.0, 10.0), [0.0; 4]);
    assert_eq!(depth_targets(55.0, 10.0), [10.0; 4]);
    assert_eq!(depth_targets(25.5, 10.0), [10.0, 10.0, 5.5, 0.0]);
  }

  #[test]
  fn test_set_piston_position_directions() {
    let mut step = Step::new(0);
    set_piston_position(&mut step, PistonId::Forward, 2.0, 3.0, 0.5);
    set_piston_position(&mut step, PistonId::Side, 5.0, 1.0, 0.5);
    set_piston_position(&mut step, PistonId::Depth1, 4.0, 4.0, 0.5);

    assert_eq!(step.commands, vec![
      RigCommand::Piston(PistonId::Forward, PistonCommand::SetMaxLimit(3.0)),
      RigCommand::Piston(PistonId::Forward, PistonCommand::SetVelocity(0.5)),
      RigCommand::Piston(PistonId::Side, PistonCommand::SetMinLimit(1.0)),
      RigCommand::Piston(PistonId::Side, PistonCommand::SetVelocity(-0.5)),
      RigCommand::Piston(PistonId::Depth1, PistonCommand::SetVelocity(0.0)),
    ]);
    assert_eq!(step.armed, None);
  }

  #[test]
  fn test_set_depth_commands_every_vertical_piston() {
    let readings = RigReadings {
      depth_pistons: [10.0, 3.0, 0.0, 0.0],
      ..Default::default()
    };
    let mut step = Step::new(0);
    set_depth(&mut step, &readings, 14.0, &MotionConfig::default());

    assert_eq!(step.commands, vec![
      RigCommand::Piston(PistonId::Depth1, PistonCommand::SetVelocity(0.0)),
      RigCommand::Piston(PistonId::Depth2, PistonCommand::SetMaxLimit(4.0)),
      RigCommand::Piston(PistonId::Depth2, PistonCommand::SetVelocity(0.5)),
      RigCommand::Piston(PistonId::Depth3, PistonCommand::SetVelocity(0.0)),
      RigCommand::Piston(PistonId::Depth4, PistonCommand::SetVelocity(0.0)),
    ]);
    assert_eq!(readings.aggregate_depth(), 13.0);
  }

  #[test]
  fn test_cancel_all_drops_earlier_arm() {
    let mut step = Step::new(4);
    step.arm(TriggerId::QuadMineRow);
    step.cancel_all();
    assert_eq!(step.armed, None);

    step.set_generation(5);
    step.arm(TriggerId::DepthAdjXy);
    assert!(step.cancel_all);
    assert_eq!(step.armed, Some(ArmedTrigger { trigger: TriggerId::DepthAdjXy, generation: 5 }));
  }
}
