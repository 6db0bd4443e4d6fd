//! Read-only round views and state digests

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::direction::Direction;
use super::grid::Grid;
use super::round::RoundState;
use super::tank::Tank;
use super::PlayerIndex;

/// Tank as seen by the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankSnapshot {
    pub player: PlayerIndex,
    pub row: i32,
    pub col: i32,
    pub direction: Direction,
    pub alive: bool,
    pub is_local: bool,
}

/// Projectile position for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub row: i32,
    pub col: i32,
    pub direction: Direction,
}

/// Everything a renderer needs for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round: u32,
    pub grid: Grid,
    pub local_player: PlayerIndex,
    pub tanks: Vec<TankSnapshot>,
    pub projectiles: Vec<ProjectileSnapshot>,
    pub wins: Vec<u32>,
    pub round_over: bool,
    pub winner: Option<PlayerIndex>,
}

impl RoundSnapshot {
    pub fn build(state: &RoundState) -> Self {
        let local = state.local_player();
        let tanks = state
            .tanks()
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let player = PlayerIndex::from_usize(i);
                TankSnapshot {
                    player,
                    row: t.row,
                    col: t.col,
                    direction: t.direction,
                    alive: t.alive,
                    is_local: player == local,
                }
            })
            .collect();

        let projectiles = state
            .projectiles()
            .iter()
            .map(|p| ProjectileSnapshot {
                row: p.row,
                col: p.col,
                direction: p.direction,
            })
            .collect();

        Self {
            round: state.round(),
            grid: state.grid().clone(),
            local_player: local,
            tanks,
            projectiles,
            wins: state.wins().to_vec(),
            round_over: state.is_round_over(),
            winner: state.winner(),
        }
    }
}

/// Compact fingerprint of a round's tank state, exchanged at round end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDigest(pub u64);

impl StateDigest {
    /// SHA-256 over round, seed and every tank, truncated to 64 bits
    pub fn of(round: u32, seed: u32, tanks: &[Tank]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(round.to_be_bytes());
        hasher.update(seed.to_be_bytes());
        for tank in tanks {
            hasher.update(tank.row.to_be_bytes());
            hasher.update(tank.col.to_be_bytes());
            hasher.update([tank.direction.code(), u8::from(tank.alive)]);
        }
        let hash = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash[..8]);
        Self(u64::from_be_bytes(prefix))
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
