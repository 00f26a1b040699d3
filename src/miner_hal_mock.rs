use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::miner_config::BlockNames;
use crate::miner_hal::{BlockResolver, CountdownTimer, Drill, HalError, HalResult, Piston, PistonId, Rotor};
use crate::resume_token::{ResumeSignal, ResumeToken, TriggerId};

/// Speed a piston picks up on `extend()`/`retract()` if nobody ever gave it one.
const MOCK_DEFAULT_PISTON_SPEED: f32 = 0.5;

#[derive(Debug, PartialEq, Copy, Clone, Serialize)]
pub struct MockPistonState {
  pub position: f32,
  pub velocity: f32,
  pub min_limit: f32,
  pub max_limit: f32,
}

#[derive(Debug, Default, PartialEq, Copy, Clone, Serialize)]
pub struct MockRotorState {
  pub angle_deg: f32,
  pub velocity_rad: f32,
  pub lower_limit_deg: f32,
  pub upper_limit_deg: f32,
}

#[derive(Debug, PartialEq, Copy, Clone, Serialize)]
pub struct MockTimerState {
  /// What the block redelivers when it fires.
  pub token: ResumeToken,
  pub running: bool,
  pub starts: u32,
  pub stops: u32,
  pub last_generation: Option<u64>,
}

/// Where a running countdown sends its token, and how long it takes to get there.
#[derive(Debug, Clone)]
pub struct TimerDispatch {
  pub tx: UnboundedSender<ResumeSignal>,
  pub delay: Duration,
}

#[derive(Debug, Default)]
struct MockRigState {
  pistons: HashMap<String, MockPistonState>,
  rotors: HashMap<String, MockRotorState>,
  drills: HashMap<String, bool>,
  timers: HashMap<String, MockTimerState>,
  dispatch: Option<TimerDispatch>,
}

/// In-memory stand-in for the whole rig.  Cheap to clone; every clone and every handle it hands
/// out shares the same state, so tests can keep one around and look at what the controller did.
///
/// Motion does not happen on its own: [`MockRig::settle`] jumps every moving device to the limit
/// it is heading for, which is what the real rig is assumed to have done by the time a
/// countdown fires.
#[derive(Debug, Clone, Default)]
pub struct MockRig {
  state: Arc<Mutex<MockRigState>>,
}

impl MockRig {
  pub fn new() -> Self {
    Default::default()
  }

  /// A rig with every block the controller expects, all pistons retracted with a full
  /// `piston_span` of travel.
  pub fn with_blocks(names: &BlockNames, piston_span: f32) -> Self {
    let rig = Self::new();
    for piston in PistonId::ALL {
      rig.add_piston(names.piston(piston), piston_span);
    }
    rig.add_rotor(&names.rotor);
    rig.add_drill(&names.drill);
    for trigger in TriggerId::ALL {
      rig.add_timer(names.timer(trigger), trigger.resume_token());
    }
    rig
  }

  fn lock(&self) -> MutexGuard<'_, MockRigState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn add_piston(&self, name: &str, max_limit: f32) {
    self.lock().pistons.insert(name.to_owned(), MockPistonState {
      position: 0.0,
      velocity: 0.0,
      min_limit: 0.0,
      max_limit,
    });
  }

  pub fn add_rotor(&self, name: &str) {
    self.lock().rotors.insert(name.to_owned(), MockRotorState::default());
  }

  pub fn add_drill(&self, name: &str) {
    self.lock().drills.insert(name.to_owned(), false);
  }

  pub fn add_timer(&self, name: &str, token: ResumeToken) {
    self.lock().timers.insert(name.to_owned(), MockTimerState {
      token,
      running: false,
      starts: 0,
      stops: 0,
      last_generation: None,
    });
  }

  /// Simulates a block being destroyed or renamed.
  pub fn remove_block(&self, name: &str) {
    let mut state = self.lock();
    state.pistons.remove(name);
    state.rotors.remove(name);
    state.drills.remove(name);
    state.timers.remove(name);
  }

  /// Running countdowns from now on deliver their token through `dispatch`.  Requires a tokio
  /// runtime from then on.
  pub fn set_dispatch(&self, dispatch: TimerDispatch) {
    self.lock().dispatch = Some(dispatch);
  }

  pub fn settle(&self) {
    let mut state = self.lock();
    for piston in state.pistons.values_mut() {
      if piston.velocity > 0.0 {
        piston.position = piston.max_limit;
      } else if piston.velocity < 0.0 {
        piston.position = piston.min_limit;
      }
    }
    for rotor in state.rotors.values_mut() {
      if rotor.velocity_rad > 0.0 {
        rotor.angle_deg = rotor.upper_limit_deg;
      } else if rotor.velocity_rad < 0.0 {
        rotor.angle_deg = rotor.lower_limit_deg;
      }
    }
    trace!("Settled: {:?}", state.pistons);
  }

  pub fn piston(&self, name: &str) -> Option<MockPistonState> {
    self.lock().pistons.get(name).copied()
  }

  pub fn set_piston_position(&self, name: &str, position: f32) {
    if let Some(piston) = self.lock().pistons.get_mut(name) {
      piston.position = position;
    }
  }

  pub fn rotor(&self, name: &str) -> Option<MockRotorState> {
    self.lock().rotors.get(name).copied()
  }

  pub fn drill_enabled(&self, name: &str) -> Option<bool> {
    self.lock().drills.get(name).copied()
  }

  pub fn timer(&self, name: &str) -> Option<MockTimerState> {
    self.lock().timers.get(name).copied()
  }

  pub fn running_timers(&self) -> Vec<String> {
    let mut running: Vec<String> = self.lock().timers.iter()
        .filter(|(_, timer)| timer.running)
        .map(|(name, _)| name.clone())
        .collect();
    running.sort();
    running
  }

  /// Runs a countdown out immediately instead of waiting for it, returning what it would have
  /// delivered.  `None` if it wasn't running.
  pub fn expire(&self, name: &str) -> Option<ResumeSignal> {
    let mut state = self.lock();
    let timer = state.timers.get_mut(name).filter(|t| t.running)?;
    timer.running = false;
    Some(ResumeSignal::stamped(timer.token, timer.last_generation?))
  }

  fn with_piston<T>(&self, name: &str, f: impl FnOnce(&mut MockPistonState) -> T) -> HalResult<T> {
    self.lock().pistons.get_mut(name)
        .map(f)
        .ok_or_else(|| not_connected("piston", name))
  }

  fn with_rotor<T>(&self, name: &str, f: impl FnOnce(&mut MockRotorState) -> T) -> HalResult<T> {
    self.lock().rotors.get_mut(name)
        .map(f)
        .ok_or_else(|| not_connected("rotor", name))
  }

  fn with_timer<T>(&self, name: &str, f: impl FnOnce(&mut MockTimerState) -> T) -> HalResult<T> {
    self.lock().timers.get_mut(name)
        .map(f)
        .ok_or_else(|| not_connected("timer", name))
  }
}

fn not_connected(kind: &str, name: &str) -> HalError {
  HalError::DeviceNotConnected(format!("{kind} '{name}' no longer exists"))
}

impl BlockResolver for MockRig {
  fn find_piston(&self, name: &str) -> Option<Box<dyn Piston>> {
    self.piston(name)?;
    Some(Box::new(MockPiston { rig: self.clone(), name: name.to_owned() }))
  }

  fn find_rotor(&self, name: &str) -> Option<Box<dyn Rotor>> {
    self.rotor(name)?;
    Some(Box::new(MockRotor { rig: self.clone(), name: name.to_owned() }))
  }

  fn find_drill(&self, name: &str) -> Option<Box<dyn Drill>> {
    self.drill_enabled(name)?;
    Some(Box::new(MockDrill { rig: self.clone(), name: name.to_owned() }))
  }

  fn find_timer(&self, name: &str) -> Option<Box<dyn CountdownTimer>> {
    self.timer(name)?;
    Some(Box::new(MockTimer { rig: self.clone(), name: name.to_owned(), pending: None }))
  }
}

struct MockPiston {
  rig: MockRig,
  name: String,
}

impl Piston for MockPiston {
  fn current_position(&self) -> HalResult<f32> {
    self.rig.with_piston(&self.name, |p| p.position)
  }

  fn set_velocity(&mut self, velocity: f32) -> HalResult<()> {
    self.rig.with_piston(&self.name, |p| p.velocity = velocity)
  }

  fn set_max_limit(&mut self, limit: f32) -> HalResult<()> {
    self.rig.with_piston(&self.name, |p| p.max_limit = limit)
  }

  fn set_min_limit(&mut self, limit: f32) -> HalResult<()> {
    self.rig.with_piston(&self.name, |p| p.min_limit = limit)
  }

  fn extend(&mut self) -> HalResult<()> {
    self.rig.with_piston(&self.name, |p| {
      let speed = speed_of(p);
      p.velocity = speed;
    })
  }

  fn retract(&mut self) -> HalResult<()> {
    self.rig.with_piston(&self.name, |p| {
      let speed = speed_of(p);
      p.velocity = -speed;
    })
  }
}

fn speed_of(piston: &MockPistonState) -> f32 {
  if piston.velocity == 0.0 {
    MOCK_DEFAULT_PISTON_SPEED
  } else {
    piston.velocity.abs()
  }
}

struct MockRotor {
  rig: MockRig,
  name: String,
}

impl Rotor for MockRotor {
  fn angle_deg(&self) -> HalResult<f32> {
    self.rig.with_rotor(&self.name, |r| r.angle_deg)
  }

  fn set_upper_limit_deg(&mut self, limit: f32) -> HalResult<()> {
    self.rig.with_rotor(&self.name, |r| r.upper_limit_deg = limit)
  }

  fn set_lower_limit_deg(&mut self, limit: f32) -> HalResult<()> {
    self.rig.with_rotor(&self.name, |r| r.lower_limit_deg = limit)
  }

  fn set_target_velocity_rad(&mut self, velocity: f32) -> HalResult<()> {
    self.rig.with_rotor(&self.name, |r| r.velocity_rad = velocity)
  }
}

struct MockDrill {
  rig: MockRig,
  name: String,
}

impl Drill for MockDrill {
  fn set_enabled(&mut self, enabled: bool) -> HalResult<()> {
    self.rig.lock().drills.get_mut(&self.name)
        .map(|drill| *drill = enabled)
        .ok_or_else(|| not_connected("drill", &self.name))
  }
}

struct MockTimer {
  rig: MockRig,
  name: String,
  pending: Option<JoinHandle<()>>,
}

impl MockTimer {
  fn abort_pending(&mut self) {
    if let Some(pending) = self.pending.take() {
      pending.abort();
    }
  }
}

impl CountdownTimer for MockTimer {
  fn start_countdown(&mut self, generation: u64) -> HalResult<()> {
    self.abort_pending();
    let token = self.rig.with_timer(&self.name, |t| {
      t.running = true;
      t.starts += 1;
      t.last_generation = Some(generation);
      t.token
    })?;

    let dispatch = self.rig.lock().dispatch.clone();
    if let Some(dispatch) = dispatch {
      let rig = self.rig.clone();
      let name = self.name.clone();
      self.pending = Some(tokio::spawn(async move {
        tokio::time::sleep(dispatch.delay).await;
        // Ignore a missing block here; whoever removed it will find out on the next command.
        let _ = rig.with_timer(&name, |t| t.running = false);
        let signal = ResumeSignal::stamped(token, generation);
        if dispatch.tx.send(signal).is_err() {
          debug!("{name}: nobody listening for {signal}");
        }
      }));
    }
    Ok(())
  }

  fn stop_countdown(&mut self) -> HalResult<()> {
    self.abort_pending();
    self.rig.with_timer(&self.name, |t| {
      t.running = false;
      t.stops += 1;
    })
  }
}

impl Drop for MockTimer {
  fn drop(&mut self) {
    self.abort_pending();
  }
}

#[cfg(test)]
mod tests {
  use tokio::sync::mpsc;

  use super::*;

  #[test]
  fn test_settle_moves_to_limits() {
    let rig = MockRig::new();
    rig.add_piston("p", 10.0);
    rig.add_rotor("r");
    let mut piston = rig.find_piston("p").unwrap();
    let mut rotor = rig.find_rotor("r").unwrap();

    piston.set_max_limit(4.0).unwrap();
    piston.set_velocity(0.5).unwrap();
    rotor.set_upper_limit_deg(90.0).unwrap();
    rotor.set_target_velocity_rad(1.0).unwrap();
    assert_eq!(piston.current_position().unwrap(), 0.0);

    rig.settle();
    assert_eq!(piston.current_position().unwrap(), 4.0);
    assert_eq!(rotor.angle_deg().unwrap(), 90.0);

    piston.retract().unwrap();
    rig.settle();
    assert_eq!(piston.current_position().unwrap(), 0.0);
    assert_eq!(rig.piston("p").unwrap().velocity, -0.5);
  }

  #[test]
  fn test_removed_block_reports_not_connected() {
    let rig = MockRig::new();
    rig.add_drill("d");
    let mut drill = rig.find_drill("d").unwrap();
    drill.set_enabled(true).unwrap();
    assert_eq!(rig.drill_enabled("d"), Some(true));

    rig.remove_block("d");
    assert!(matches!(drill.set_enabled(false), Err(HalError::DeviceNotConnected(_))));
    assert!(rig.find_drill("d").is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_timer_delivers_stamped_token() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let rig = MockRig::new();
    rig.add_timer("t", ResumeToken::ContinueQuadMineFromRow);
    rig.set_dispatch(TimerDispatch { tx, delay: Duration::from_secs(5) });

    let mut timer = rig.find_timer("t").unwrap();
    timer.start_countdown(7).unwrap();
    assert_eq!(rig.running_timers(), vec!["t".to_owned()]);

    let signal = rx.recv().await.unwrap();
    assert_eq!(signal, ResumeSignal::stamped(ResumeToken::ContinueQuadMineFromRow, 7));
    assert!(rig.running_timers().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_stopped_timer_never_fires() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let rig = MockRig::new();
    rig.add_timer("t", ResumeToken::ContinueDepthFromZ);
    rig.set_dispatch(TimerDispatch { tx, delay: Duration::from_secs(5) });

    let mut timer = rig.find_timer("t").unwrap();
    timer.start_countdown(1).unwrap();
    timer.stop_countdown().unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(rx.try_recv().is_err());
    let state = rig.timer("t").unwrap();
    assert_eq!((state.starts, state.stops, state.running), (1, 1, false));
  }
}
