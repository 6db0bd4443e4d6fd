//! Seeded 8x8 arena generation

use serde::{Deserialize, Serialize};

use super::rng::LcgRng;
use super::GRID_SIZE;

/// Lowest interior wall density a grid can roll
pub const MIN_WALL_DENSITY: f64 = 0.15;
/// Upper bound (exclusive) of the interior wall density
pub const MAX_WALL_DENSITY: f64 = 0.30;

/// Contents of one grid cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridCell {
    #[default]
    Empty,
    Wall,
}

/// Row-major 8x8 map, row 0 at the top
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grid {
    cells: [[GridCell; GRID_SIZE]; GRID_SIZE],
}

impl Grid {
    /// Grid with no walls at all
    pub fn empty() -> Self {
        Self {
            cells: [[GridCell::Empty; GRID_SIZE]; GRID_SIZE],
        }
    }

    /// Generate the round grid for `seed`.
    ///
    /// The first draw picks the wall density, then every unprotected cell
    /// draws once in row-major order. Protected cells never consume a draw,
    /// so the sequence is identical on every peer.
    pub fn generate(seed: u32) -> Self {
        let mut rng = LcgRng::new(seed);
        let wall_density =
            MIN_WALL_DENSITY + rng.next_unit_float() * (MAX_WALL_DENSITY - MIN_WALL_DENSITY);

        let mut grid = Self::empty();
        for row in 0..GRID_SIZE {
            for col in 0..GRID_SIZE {
                if is_protected(row, col) {
                    continue;
                }
                if rng.next_unit_float() < wall_density {
                    grid.cells[row][col] = GridCell::Wall;
                }
            }
        }
        grid
    }

    /// Cell at a signed coordinate, `None` outside the board
    pub fn get(&self, row: i32, col: i32) -> Option<GridCell> {
        if !in_bounds(row, col) {
            return None;
        }
        Some(self.cells[row as usize][col as usize])
    }

    pub fn is_wall(&self, row: i32, col: i32) -> bool {
        self.get(row, col) == Some(GridCell::Wall)
    }

    /// In bounds and not a wall
    pub fn is_open(&self, row: i32, col: i32) -> bool {
        self.get(row, col) == Some(GridCell::Empty)
    }

    /// Overwrite a cell; out-of-board coordinates are ignored
    pub fn set(&mut self, row: usize, col: usize, cell: GridCell) {
        if row < GRID_SIZE && col < GRID_SIZE {
            self.cells[row][col] = cell;
        }
    }

    pub fn rows(&self) -> &[[GridCell; GRID_SIZE]; GRID_SIZE] {
        &self.cells
    }

    pub fn wall_count(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|cell| **cell == GridCell::Wall)
            .count()
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::empty()
    }
}

/// True when (row, col) lies on the 8x8 board
pub fn in_bounds(row: i32, col: i32) -> bool {
    let size = GRID_SIZE as i32;
    (0..size).contains(&row) && (0..size).contains(&col)
}

/// Border ring plus the 2x2 zone at each corner; these never hold walls
pub fn is_protected(row: usize, col: usize) -> bool {
    let last = GRID_SIZE - 1;
    let border = row == 0 || row == last || col == 0 || col == last;
    let near_top_or_bottom = row <= 1 || row >= last - 1;
    let near_left_or_right = col <= 1 || col >= last - 1;
    border || (near_top_or_bottom && near_left_or_right)
}

/// Number of cells that can roll a wall
pub fn unprotected_cell_count() -> usize {
    (0..GRID_SIZE)
        .flat_map(|row| (0..GRID_SIZE).map(move |col| (row, col)))
        .filter(|(row, col)| !is_protected(*row, *col))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic() {
        for seed in [0u32, 1, 42, 1000, 123_456, u32::MAX] {
            assert_eq!(Grid::generate(seed), Grid::generate(seed));
        }
    }

    #[test]
    fn different_seeds_produce_different_grids() {
        let grids: Vec<Grid> = (0..20u32).map(|s| Grid::generate(s * 7919 + 3)).collect();
        let distinct = grids
            .iter()
            .enumerate()
            .filter(|(i, g)| grids[..*i].iter().all(|other| other != *g))
            .count();
        assert!(distinct >= 19, "only {} distinct grids", distinct);
    }

    #[test]
    fn protected_cells_are_always_empty() {
        for seed in 0..500u32 {
            let grid = Grid::generate(seed.wrapping_mul(2_654_435_761));
            for row in 0..GRID_SIZE {
                for col in 0..GRID_SIZE {
                    if is_protected(row, col) {
                        assert_eq!(
                            grid.rows()[row][col],
                            GridCell::Empty,
                            "seed {} cell ({}, {})",
                            seed,
                            row,
                            col
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn corner_zones_are_protected() {
        for (row, col) in [(1, 1), (1, 6), (6, 1), (6, 6)] {
            assert!(is_protected(row, col));
        }
        assert!(!is_protected(2, 2));
        assert!(!is_protected(1, 3));
        assert_eq!(unprotected_cell_count(), 32);
    }

    #[test]
    fn mean_wall_density_is_within_bounds() {
        let samples = 2000u32;
        let interior = unprotected_cell_count() as f64;
        let total: f64 = (0..samples)
            .map(|s| Grid::generate(s.wrapping_mul(747_796_405)).wall_count() as f64 / interior)
            .sum();
        let mean = total / samples as f64;
        assert!(
            (MIN_WALL_DENSITY..=MAX_WALL_DENSITY).contains(&mean),
            "mean density {}",
            mean
        );
    }

    #[test]
    fn lookups_outside_board_are_none() {
        let grid = Grid::empty();
        assert_eq!(grid.get(-1, 0), None);
        assert_eq!(grid.get(0, 8), None);
        assert!(!grid.is_open(8, 8));
        assert!(grid.is_open(3, 3));
    }

    #[test]
    fn set_ignores_out_of_board() {
        let mut grid = Grid::empty();
        grid.set(9, 0, GridCell::Wall);
        grid.set(2, 4, GridCell::Wall);
        assert_eq!(grid.wall_count(), 1);
        assert!(grid.is_wall(2, 4));
    }
}
