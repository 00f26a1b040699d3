use log::{error, info};

use crate::miner_config::BlockNames;
use crate::miner_hal::{BlockResolver, CountdownTimer, Drill, HalError, HalResult, Piston, PistonId, Rotor};
use crate::resume_token::TriggerId;

/// Every block the controller drives, resolved once at start-up.
pub struct MinerHandles {
  pub rotor: Box<dyn Rotor>,
  pub side_piston: Box<dyn Piston>,
  pub forward_piston: Box<dyn Piston>,
  pub depth_pistons: [Box<dyn Piston>; 4],
  pub drill: Box<dyn Drill>,
  /// Indexed by [`TriggerId::index`].
  pub timers: Vec<Box<dyn CountdownTimer>>,
}

impl MinerHandles {
  pub fn piston(&self, id: PistonId) -> &dyn Piston {
    match id {
      PistonId::Side => self.side_piston.as_ref(),
      PistonId::Forward => self.forward_piston.as_ref(),
      PistonId::Depth1 => self.depth_pistons[0].as_ref(),
      PistonId::Depth2 => self.depth_pistons[1].as_ref(),
      PistonId::Depth3 => self.depth_pistons[2].as_ref(),
      PistonId::Depth4 => self.depth_pistons[3].as_ref(),
    }
  }

  pub fn piston_mut(&mut self, id: PistonId) -> &mut dyn Piston {
    match id {
      PistonId::Side => self.side_piston.as_mut(),
      PistonId::Forward => self.forward_piston.as_mut(),
      PistonId::Depth1 => self.depth_pistons[0].as_mut(),
      PistonId::Depth2 => self.depth_pistons[1].as_mut(),
      PistonId::Depth3 => self.depth_pistons[2].as_mut(),
      PistonId::Depth4 => self.depth_pistons[3].as_mut(),
    }
  }

  pub fn timer_mut(&mut self, id: TriggerId) -> &mut dyn CountdownTimer {
    self.timers[id.index()].as_mut()
  }
}

pub struct MinerHalFactory<'a> {
  names: &'a BlockNames,
}

impl<'a> MinerHalFactory<'a> {
  pub fn new(names: &'a BlockNames) -> Self {
    Self { names }
  }

  /// Resolves every block by name.  Refuses to hand back a partially bound rig: if anything is
  /// missing the error names all of it, not just the first.
  pub fn bind(&self, resolver: &dyn BlockResolver) -> HalResult<MinerHandles> {
    info!("Initializing miner controller...");
    let mut missing = Vec::new();
    let mut note = |name: &str, found: bool| {
      if !found {
        missing.push(name.to_owned());
      }
    };

    let names = self.names;
    let timers: Vec<_> = TriggerId::ALL.iter()
        .map(|&trigger| resolver.find_timer(names.timer(trigger)))
        .collect();
    for (trigger, timer) in TriggerId::ALL.iter().zip(&timers) {
      note(names.timer(*trigger), timer.is_some());
    }
    let rotor = resolver.find_rotor(&names.rotor);
    note(&names.rotor, rotor.is_some());
    let side_piston = resolver.find_piston(&names.side_piston);
    note(&names.side_piston, side_piston.is_some());
    let forward_piston = resolver.find_piston(&names.forward_piston);
    note(&names.forward_piston, forward_piston.is_some());
    let depth_pistons = PistonId::DEPTH.map(|id| resolver.find_piston(names.piston(id)));
    for (id, piston) in PistonId::DEPTH.into_iter().zip(&depth_pistons) {
      note(names.piston(id), piston.is_some());
    }
    let drill = resolver.find_drill(&names.drill);
    note(&names.drill, drill.is_some());

    let timers: Option<Vec<_>> = timers.into_iter().collect();
    let (
      Some(timers),
      Some(rotor),
      Some(side_piston),
      Some(forward_piston),
      [Some(depth1), Some(depth2), Some(depth3), Some(depth4)],
      Some(drill),
    ) = (timers, rotor, side_piston, forward_piston, depth_pistons, drill) else {
      error!("Failed to get one or more blocks by name: {missing:?}");
      return Err(HalError::BlocksNotFound(missing));
    };

    Ok(MinerHandles {
      rotor,
      side_piston,
      forward_piston,
      depth_pistons: [depth1, depth2, depth3, depth4],
      drill,
      timers,
    })
  }
}
