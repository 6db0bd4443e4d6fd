//! Game simulation modules

pub mod combat;
pub mod direction;
pub mod grid;
pub mod rng;
pub mod round;
pub mod snapshot;
pub mod tank;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use combat::{CombatSystem, Impact, Projectile, ProjectileImpact};
pub use direction::Direction;
pub use grid::{Grid, GridCell};
pub use rng::LcgRng;
pub use round::{RoundError, RoundOutcome, RoundPhase, RoundState};
pub use snapshot::{RoundSnapshot, StateDigest};
pub use tank::Tank;

/// Rows and columns of the arena
pub const GRID_SIZE: usize = 8;
/// Fewest tanks in a round
pub const MIN_PLAYERS: usize = 2;
/// Most tanks in a round
pub const MAX_PLAYERS: usize = 4;

/// Stable player slot within a session (0..player_count)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerIndex(pub u8);

impl PlayerIndex {
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Indices come from tank slots, which never exceed `MAX_PLAYERS`
    pub(crate) fn from_usize(index: usize) -> Self {
        Self(u8::try_from(index).unwrap_or(u8::MAX))
    }
}

impl fmt::Display for PlayerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Local input from the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalInput {
    Move(Direction),
    Fire,
}
