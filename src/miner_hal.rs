use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, PartialEq, Clone, Debug)]
pub enum HalError {
  #[error("{0}")]
  DeviceNotConnected(String),
  #[error("{0}")]
  InternalError(String),
  #[error("failed to find block(s) by name: {}", .0.join(", "))]
  BlocksNotFound(Vec<String>),
}

pub type HalResult<T> = Result<T, HalError>;

/// Linear actuator with bounded travel.  Motion is always fire-and-forget; nothing here waits for
/// the piston to actually get where it was told to go.
pub trait Piston: Send {
  fn current_position(&self) -> HalResult<f32>;
  fn set_velocity(&mut self, velocity: f32) -> HalResult<()>;
  fn set_max_limit(&mut self, limit: f32) -> HalResult<()>;
  fn set_min_limit(&mut self, limit: f32) -> HalResult<()>;
  fn extend(&mut self) -> HalResult<()>;
  fn retract(&mut self) -> HalResult<()>;
}

pub trait Rotor: Send {
  fn angle_deg(&self) -> HalResult<f32>;
  fn set_upper_limit_deg(&mut self, limit: f32) -> HalResult<()>;
  fn set_lower_limit_deg(&mut self, limit: f32) -> HalResult<()>;
  fn set_target_velocity_rad(&mut self, velocity: f32) -> HalResult<()>;
}

pub trait Drill: Send {
  fn set_enabled(&mut self, enabled: bool) -> HalResult<()>;
}

/// External countdown that redelivers its configured resume token once the (externally
/// configured) delay elapses.  The generation is stamped onto the redelivered token so stale
/// firings can be told apart from the one we're actually waiting on.
pub trait CountdownTimer: Send {
  fn start_countdown(&mut self, generation: u64) -> HalResult<()>;
  fn stop_countdown(&mut self) -> HalResult<()>;
}

/// Looks up physical blocks by name, once, at start-up.
pub trait BlockResolver {
  fn find_piston(&self, name: &str) -> Option<Box<dyn Piston>>;
  fn find_rotor(&self, name: &str) -> Option<Box<dyn Rotor>>;
  fn find_drill(&self, name: &str) -> Option<Box<dyn Drill>>;
  fn find_timer(&self, name: &str) -> Option<Box<dyn CountdownTimer>>;
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum PistonId {
  Side,
  Forward,
  Depth1,
  Depth2,
  Depth3,
  Depth4,
}

impl PistonId {
  /// Vertical stack in extension order: `Depth1` absorbs travel first.
  pub const DEPTH: [PistonId; 4] = [
    PistonId::Depth1,
    PistonId::Depth2,
    PistonId::Depth3,
    PistonId::Depth4,
  ];

  pub const ALL: [PistonId; 6] = [
    PistonId::Side,
    PistonId::Forward,
    PistonId::Depth1,
    PistonId::Depth2,
    PistonId::Depth3,
    PistonId::Depth4,
  ];
}

impl Display for PistonId {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{self:?}")
  }
}
