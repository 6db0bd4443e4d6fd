//! Tank movement and spawn layout

use serde::{Deserialize, Serialize};

use super::combat::Projectile;
use super::direction::Direction;
use super::grid::Grid;
use super::{PlayerIndex, MAX_PLAYERS, MIN_PLAYERS};

/// A player's tank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tank {
    pub row: i32,
    pub col: i32,
    pub direction: Direction,
    pub alive: bool,
}

impl Tank {
    pub fn new(row: i32, col: i32, direction: Direction) -> Self {
        Self {
            row,
            col,
            direction,
            alive: true,
        }
    }

    /// Spawned tank for `player` in a round of `player_count` tanks.
    /// Returns `None` when either value falls outside the spawn table.
    pub fn spawn(player: PlayerIndex, player_count: usize) -> Option<Self> {
        let (row, col, direction) = *spawn_table(player_count)?.get(player.index())?;
        Some(Self::new(row, col, direction))
    }

    /// Step one cell in `direction`. Blocked moves leave the tank untouched.
    pub fn move_in(&mut self, direction: Direction, grid: &Grid) -> bool {
        let (dr, dc) = direction.offset();
        let (row, col) = (self.row + dr, self.col + dc);

        if !grid.is_open(row, col) {
            return false;
        }

        self.row = row;
        self.col = col;
        self.direction = direction;
        true
    }

    /// Projectile one cell ahead of the barrel. Does not check what is there.
    pub fn shoot(&self) -> Projectile {
        let (dr, dc) = self.direction.offset();
        Projectile::new(self.row + dr, self.col + dc, self.direction)
    }

    pub fn occupies(&self, row: i32, col: i32) -> bool {
        self.row == row && self.col == col
    }
}

/// Corner spawns by player count: top-left, top-right, bottom-right, bottom-left.
/// Two players take the diagonal pair, three players skip bottom-left.
pub fn spawn_table(player_count: usize) -> Option<&'static [(i32, i32, Direction)]> {
    static TWO: [(i32, i32, Direction); 2] = [(0, 0, Direction::Down), (7, 7, Direction::Up)];
    static THREE: [(i32, i32, Direction); 3] = [
        (0, 0, Direction::Down),
        (0, 7, Direction::Down),
        (7, 7, Direction::Up),
    ];
    static FOUR: [(i32, i32, Direction); 4] = [
        (0, 0, Direction::Down),
        (0, 7, Direction::Down),
        (7, 7, Direction::Up),
        (7, 0, Direction::Up),
    ];

    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&player_count) {
        return None;
    }
    match player_count {
        2 => Some(&TWO[..]),
        3 => Some(&THREE[..]),
        _ => Some(&FOUR[..]),
    }
}
