//! Projectiles and collision resolution

use serde::{Deserialize, Serialize};

use super::direction::Direction;
use super::grid::{in_bounds, Grid};
use super::tank::Tank;
use super::PlayerIndex;

/// A shell travelling one cell per projectile tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projectile {
    pub row: i32,
    pub col: i32,
    pub direction: Direction,
    /// Shooter, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerIndex>,
    /// Set once the spawn cell has been checked. Local bookkeeping only:
    /// a projectile received from a peer always starts unlaunched.
    #[serde(skip)]
    pub launched: bool,
}

impl Projectile {
    pub fn new(row: i32, col: i32, direction: Direction) -> Self {
        Self {
            row,
            col,
            direction,
            owner: None,
            launched: false,
        }
    }

    pub fn with_owner(mut self, owner: PlayerIndex) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Move one cell along `direction`, unconditionally
    pub fn advance(&mut self) {
        let (dr, dc) = self.direction.offset();
        self.row += dr;
        self.col += dc;
    }

    pub fn is_out_of_bounds(&self) -> bool {
        !in_bounds(self.row, self.col)
    }
}

/// What stopped a projectile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impact {
    OutOfBounds,
    Wall,
    Tank(PlayerIndex),
}

/// A projectile removed during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectileImpact {
    pub owner: Option<PlayerIndex>,
    pub row: i32,
    pub col: i32,
    pub impact: Impact,
}

/// Collision system for projectiles against the board and tanks
pub struct CombatSystem;

impl CombatSystem {
    /// Check the projectile's current cell. Out-of-bounds wins over wall,
    /// wall wins over tank, and tanks are scanned in player-index order.
    pub fn check(projectile: &Projectile, grid: &Grid, tanks: &[Tank]) -> Option<Impact> {
        if projectile.is_out_of_bounds() {
            return Some(Impact::OutOfBounds);
        }
        if grid.is_wall(projectile.row, projectile.col) {
            return Some(Impact::Wall);
        }
        tanks
            .iter()
            .position(|tank| tank.alive && tank.occupies(projectile.row, projectile.col))
            .map(|index| Impact::Tank(PlayerIndex::from_usize(index)))
    }

    /// Run one projectile tick. Unlaunched projectiles are checked where
    /// they spawned before their first step. Returns the impact, if any;
    /// a tank impact has already killed the tank.
    pub fn step(projectile: &mut Projectile, grid: &Grid, tanks: &mut [Tank]) -> Option<Impact> {
        if !projectile.launched {
            projectile.launched = true;
            if let Some(impact) = Self::check(projectile, grid, tanks) {
                Self::apply(impact, tanks);
                return Some(impact);
            }
        }

        projectile.advance();
        let impact = Self::check(projectile, grid, tanks)?;
        Self::apply(impact, tanks);
        Some(impact)
    }

    fn apply(impact: Impact, tanks: &mut [Tank]) {
        if let Impact::Tank(player) = impact {
            if let Some(tank) = tanks.get_mut(player.index()) {
                tank.alive = false;
            }
        }
    }
}
