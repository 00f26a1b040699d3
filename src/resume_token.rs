use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separates a resume token from the generation it was armed under, e.g.
/// `ContinueDepthFromXY@3`.
const GENERATION_SEPARATOR: char = '@';

/// Every argument the entry point understands.  The wire names are fixed by how the timer blocks
/// in the deployment are configured, hence the slightly awkward capitalisation.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum ResumeToken {
  Start,
  Stop,
  ContinueDepthFromXy,
  ContinueDepthFromRotation,
  ContinueDepthFromZ,
  ContinueQuadMineFromRotation,
  ContinueQuadMineFromRow,
  ContinueQuadMineFromCol,
  ContinueQuadMineFromRetractXy,
}

impl ResumeToken {
  pub const ALL: [ResumeToken; 9] = [
    ResumeToken::Start,
    ResumeToken::Stop,
    ResumeToken::ContinueDepthFromXy,
    ResumeToken::ContinueDepthFromRotation,
    ResumeToken::ContinueDepthFromZ,
    ResumeToken::ContinueQuadMineFromRotation,
    ResumeToken::ContinueQuadMineFromRow,
    ResumeToken::ContinueQuadMineFromCol,
    ResumeToken::ContinueQuadMineFromRetractXy,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ResumeToken::Start => "Start",
      ResumeToken::Stop => "Stop",
      ResumeToken::ContinueDepthFromXy => "ContinueDepthFromXY",
      ResumeToken::ContinueDepthFromRotation => "ContinueDepthFromRotation",
      ResumeToken::ContinueDepthFromZ => "ContinueDepthFromZ",
      ResumeToken::ContinueQuadMineFromRotation => "ContinueQuadMineFromRotation",
      ResumeToken::ContinueQuadMineFromRow => "ContinueQuadMineFromRow",
      ResumeToken::ContinueQuadMineFromCol => "ContinueQuadMineFromCol",
      ResumeToken::ContinueQuadMineFromRetractXy => "ContinueQuadMineFromRetractXY",
    }
  }

  /// Operator requests, as opposed to continuations fired by a countdown.
  pub fn is_request(&self) -> bool {
    matches!(self, ResumeToken::Start | ResumeToken::Stop)
  }
}

impl Display for ResumeToken {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResumeToken {
  type Err = ResumeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ResumeToken::ALL
        .into_iter()
        .find(|token| token.as_str() == s)
        .ok_or_else(|| ResumeError::UnknownCommand(s.to_owned()))
  }
}

/// One countdown per continuation.  Each fires exactly one [`ResumeToken`].
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Serialize, Deserialize)]
pub enum TriggerId {
  DepthAdjXy,
  DepthAdjRotation,
  DepthAdjZ,
  QuadMineRotation,
  QuadMineRow,
  QuadMineCol,
  QuadMineRetractXy,
}

impl TriggerId {
  pub const ALL: [TriggerId; 7] = [
    TriggerId::DepthAdjXy,
    TriggerId::DepthAdjRotation,
    TriggerId::DepthAdjZ,
    TriggerId::QuadMineRotation,
    TriggerId::QuadMineRow,
    TriggerId::QuadMineCol,
    TriggerId::QuadMineRetractXy,
  ];

  pub fn resume_token(&self) -> ResumeToken {
    match self {
      TriggerId::DepthAdjXy => ResumeToken::ContinueDepthFromXy,
      TriggerId::DepthAdjRotation => ResumeToken::ContinueDepthFromRotation,
      TriggerId::DepthAdjZ => ResumeToken::ContinueDepthFromZ,
      TriggerId::QuadMineRotation => ResumeToken::ContinueQuadMineFromRotation,
      TriggerId::QuadMineRow => ResumeToken::ContinueQuadMineFromRow,
      TriggerId::QuadMineCol => ResumeToken::ContinueQuadMineFromCol,
      TriggerId::QuadMineRetractXy => ResumeToken::ContinueQuadMineFromRetractXy,
    }
  }

  /// Position within [`TriggerId::ALL`].
  pub fn index(&self) -> usize {
    *self as usize
  }
}

/// What actually arrives at the entry point: a token, optionally stamped with the generation of
/// the operation that armed it.  Operator input and legacy timers deliver bare tokens.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub struct ResumeSignal {
  pub token: ResumeToken,
  pub generation: Option<u64>,
}

impl ResumeSignal {
  pub fn bare(token: ResumeToken) -> Self {
    Self { token, generation: None }
  }

  pub fn stamped(token: ResumeToken, generation: u64) -> Self {
    Self { token, generation: Some(generation) }
  }
}

impl Display for ResumeSignal {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self.generation {
      Some(generation) => write!(f, "{}{GENERATION_SEPARATOR}{generation}", self.token),
      None => write!(f, "{}", self.token),
    }
  }
}

impl FromStr for ResumeSignal {
  type Err = ResumeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    match trimmed.split_once(GENERATION_SEPARATOR) {
      Some((token, generation)) => {
        let generation = generation.parse::<u64>()
            .map_err(|_| ResumeError::UnknownCommand(trimmed.to_owned()))?;
        let token = token.parse::<ResumeToken>()
            .map_err(|_| ResumeError::UnknownCommand(trimmed.to_owned()))?;
        Ok(Self::stamped(token, generation))
      },
      None => Ok(Self::bare(trimmed.parse()?)),
    }
  }
}

#[derive(Error, PartialEq, Eq, Clone, Debug)]
pub enum ResumeError {
  #[error("unrecognized command was received: {0}")]
  UnknownCommand(String),

  #[error("{token} was not expected (waiting on {})", .expected.map_or("nothing", |t| t.as_str()))]
  UnexpectedToken {
    token: ResumeToken,
    expected: Option<ResumeToken>,
  },

  #[error("{token} armed by generation {received} is stale (current generation is {current})")]
  StaleGeneration {
    token: ResumeToken,
    received: u64,
    current: u64,
  },
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::*;

  #[test]
  fn test_wire_names_parse_back() {
    for token in ResumeToken::ALL {
      assert_eq!(token.as_str().parse::<ResumeToken>(), Ok(token));
    }
    assert_eq!("ContinueDepthFromXY".parse::<ResumeToken>(), Ok(ResumeToken::ContinueDepthFromXy));
    assert_eq!("ContinueQuadMineFromRetractXY".parse::<ResumeToken>(), Ok(ResumeToken::ContinueQuadMineFromRetractXy));
  }

  #[test]
  fn test_unknown_command() {
    assert_eq!(
        "Dig".parse::<ResumeSignal>(),
        Err(ResumeError::UnknownCommand("Dig".to_owned())));
    assert_eq!(
        "start".parse::<ResumeSignal>(),
        Err(ResumeError::UnknownCommand("start".to_owned())));
    assert_eq!(
        "".parse::<ResumeSignal>(),
        Err(ResumeError::UnknownCommand("".to_owned())));
  }

  #[test]
  fn test_generation_stamp() {
    let signal: ResumeSignal = "ContinueQuadMineFromRow@12".parse().unwrap();
    assert_eq!(signal, ResumeSignal::stamped(ResumeToken::ContinueQuadMineFromRow, 12));
    assert_eq!(signal.to_string(), "ContinueQuadMineFromRow@12");

    let bare: ResumeSignal = " Stop\n".parse().unwrap();
    assert_eq!(bare, ResumeSignal::bare(ResumeToken::Stop));
    assert_eq!(bare.to_string(), "Stop");

    assert_eq!(
        "ContinueQuadMineFromRow@soon".parse::<ResumeSignal>(),
        Err(ResumeError::UnknownCommand("ContinueQuadMineFromRow@soon".to_owned())));
  }

  #[test]
  fn test_every_trigger_resumes_a_distinct_continuation() {
    for (index, trigger) in TriggerId::ALL.iter().enumerate() {
      assert_eq!(trigger.index(), index);
      assert!(!trigger.resume_token().is_request());
    }
    let tokens: HashSet<_> = TriggerId::ALL.iter().map(|t| t.resume_token()).collect();
    assert_eq!(tokens.len(), TriggerId::ALL.len());
  }
}
