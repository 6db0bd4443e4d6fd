//! Cardinal directions for tanks and projectiles

use serde::{Deserialize, Serialize};

/// Facing / travel direction on the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    /// Unit (row, col) step; row 0 is the top of the grid
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (-1, 0),
            Direction::Right => (0, 1),
            Direction::Down => (1, 0),
            Direction::Left => (0, -1),
        }
    }

    /// Display rotation in radians, clockwise from up
    pub fn angle(self) -> f64 {
        match self {
            Direction::Up => 0.0,
            Direction::Right => std::f64::consts::FRAC_PI_2,
            Direction::Down => std::f64::consts::PI,
            Direction::Left => -std::f64::consts::FRAC_PI_2,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Right => Direction::Left,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
        }
    }

    /// Stable byte used when hashing round state
    pub(crate) fn code(self) -> u8 {
        match self {
            Direction::Up => 0,
            Direction::Right => 1,
            Direction::Down => 2,
            Direction::Left => 3,
        }
    }
}
