use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::miner_hal::PistonId;
use crate::resume_token::TriggerId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
  pub blocks: BlockNames,
  pub motion: MotionConfig,
}

impl MinerConfig {
  pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("opening config {}", path.display()))?;
    let reader = BufReader::new(file);
    let config: Self = serde_json::from_reader(reader)
        .with_context(|| format!("parsing config {}", path.display()))?;
    config.motion.validate()
        .with_context(|| format!("invalid motion settings in {}", path.display()))?;
    Ok(config)
  }
}

/// Names the blocks are registered under in the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockNames {
  pub rotor: String,
  pub side_piston: String,
  pub forward_piston: String,
  pub depth_pistons: [String; 4],
  pub drill: String,
  pub timers: TimerNames,
}

impl BlockNames {
  pub fn piston(&self, id: PistonId) -> &str {
    match id {
      PistonId::Side => &self.side_piston,
      PistonId::Forward => &self.forward_piston,
      PistonId::Depth1 => &self.depth_pistons[0],
      PistonId::Depth2 => &self.depth_pistons[1],
      PistonId::Depth3 => &self.depth_pistons[2],
      PistonId::Depth4 => &self.depth_pistons[3],
    }
  }

  pub fn timer(&self, id: TriggerId) -> &str {
    let timers = &self.timers;
    match id {
      TriggerId::DepthAdjXy => &timers.depth_adj_xy,
      TriggerId::DepthAdjRotation => &timers.depth_adj_rotation,
      TriggerId::DepthAdjZ => &timers.depth_adj_z,
      TriggerId::QuadMineRotation => &timers.quad_mine_rotation,
      TriggerId::QuadMineRow => &timers.quad_mine_row,
      TriggerId::QuadMineCol => &timers.quad_mine_col,
      TriggerId::QuadMineRetractXy => &timers.quad_mine_retract_xy,
    }
  }
}

impl Default for BlockNames {
  fn default() -> Self {
    Self {
      rotor: "AtmoMM -Advanced Rotor".to_owned(),
      side_piston: "AtmoMM -Piston Side".to_owned(),
      forward_piston: "AtmoMM -Piston Forward".to_owned(),
      depth_pistons: [
        "AtmoMM -Piston Depth 1".to_owned(),
        "AtmoMM -Piston Depth 2".to_owned(),
        "AtmoMM -Piston Depth 3".to_owned(),
        "AtmoMM -Piston Depth 4".to_owned(),
      ],
      drill: "AtmoMM -Drill".to_owned(),
      timers: TimerNames::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerNames {
  pub depth_adj_xy: String,
  pub depth_adj_rotation: String,
  pub depth_adj_z: String,
  pub quad_mine_rotation: String,
  pub quad_mine_row: String,
  pub quad_mine_col: String,
  pub quad_mine_retract_xy: String,
}

impl Default for TimerNames {
  fn default() -> Self {
    Self {
      depth_adj_xy: "AtmoMM -Timer Block (Wait DepthAdj XY)".to_owned(),
      depth_adj_rotation: "AtmoMM -Timer Block (Wait DepthAdj Rotation)".to_owned(),
      depth_adj_z: "AtmoMM -Timer Block (Wait DepthAdj Z)".to_owned(),
      quad_mine_rotation: "AtmoMM -Timer Block (Wait QuadMine Rotation)".to_owned(),
      quad_mine_row: "AtmoMM -Timer Block (Wait QuadMine Row)".to_owned(),
      quad_mine_col: "AtmoMM -Timer Block (Wait QuadMine Col)".to_owned(),
      quad_mine_retract_xy: "AtmoMM -Timer Block (Wait QuadMine Retract XY)".to_owned(),
    }
  }
}

/// Rates and geometry.  Distances are in piston units, angles in degrees unless the name says
/// otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
  /// Speed used when pulling the horizontal pistons in before a depth change.
  pub xy_retract_speed: f32,
  /// Speed used by the positioning helper.
  pub piston_speed: f32,
  pub rotor_velocity_rad: f32,
  /// Full travel of a single piston.
  pub piston_span: f32,
  pub sector_width: f32,
  pub column_step: f32,
  pub layer_step: f32,
  /// Slack allowed when deciding a sweep or the whole dig is finished.
  pub tolerance: f32,
}

impl MotionConfig {
  pub fn max_depth(&self) -> f32 {
    self.piston_span * PistonId::DEPTH.len() as f32
  }

  /// Spans, steps and speeds must be positive and finite, the tolerance non-negative.
  pub fn validate(&self) -> anyhow::Result<()> {
    let positive = [
      ("xy_retract_speed", self.xy_retract_speed),
      ("piston_speed", self.piston_speed),
      ("rotor_velocity_rad", self.rotor_velocity_rad),
      ("piston_span", self.piston_span),
      ("sector_width", self.sector_width),
      ("column_step", self.column_step),
      ("layer_step", self.layer_step),
    ];
    for (name, value) in positive {
      if !value.is_finite() || value <= 0.0 {
        bail!("{name} must be a positive number, got {value}");
      }
    }
    if !self.tolerance.is_finite() || self.tolerance < 0.0 {
      bail!("tolerance must be a non-negative number, got {}", self.tolerance);
    }
    Ok(())
  }
}

impl Default for MotionConfig {
  fn default() -> Self {
    Self {
      xy_retract_speed: 0.5,
      piston_speed: 0.5,
      rotor_velocity_rad: 1.0,
      piston_span: 10.0,
      sector_width: 10.0,
      column_step: 1.0,
      layer_step: 1.0,
      tolerance: 0.1,
    }
  }
}
