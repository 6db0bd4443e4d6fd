//! Round state and projectile tick
//!
//! A `RoundState` owns the grid, tanks and in-flight projectiles of one
//! round. It is driven by three sources: local input, remote messages and
//! the fixed projectile tick. It has no knowledge of the network; the
//! session decides which operations to call and what to broadcast.

use tracing::debug;

use super::combat::{CombatSystem, Impact, Projectile, ProjectileImpact};
use super::direction::Direction;
use super::grid::{in_bounds, Grid};
use super::snapshot::{RoundSnapshot, StateDigest};
use super::tank::Tank;
use super::{PlayerIndex, MAX_PLAYERS, MIN_PLAYERS};

/// Round phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Two or more tanks alive
    Active,
    /// At most one tank alive
    Over,
}

/// How a finished round was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Winner(PlayerIndex),
    Draw,
}

impl RoundOutcome {
    pub fn winner(self) -> Option<PlayerIndex> {
        match self {
            RoundOutcome::Winner(player) => Some(player),
            RoundOutcome::Draw => None,
        }
    }
}

/// Rejected round operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("player count {0} is not supported")]
    InvalidPlayerCount(usize),

    #[error("unknown player {player} in a {player_count}-player round")]
    UnknownPlayer {
        player: PlayerIndex,
        player_count: usize,
    },

    #[error("player {0} has left the session")]
    PlayerRetired(PlayerIndex),

    #[error("position ({row}, {col}) is outside the board")]
    OutOfBoard { row: i32, col: i32 },

    #[error("tank of player {0} is destroyed")]
    TankDestroyed(PlayerIndex),

    #[error("round is over")]
    RoundOver,
}

/// State of one round, owned by a single session
#[derive(Debug, Clone)]
pub struct RoundState {
    round: u32,
    seed: u32,
    grid: Grid,
    tanks: Vec<Tank>,
    projectiles: Vec<Projectile>,
    local_player: PlayerIndex,
    wins: Vec<u32>,
    retired: Vec<bool>,
    scored: bool,
}

impl RoundState {
    pub fn new(
        round: u32,
        seed: u32,
        player_count: usize,
        local_player: PlayerIndex,
    ) -> Result<Self, RoundError> {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&player_count) {
            return Err(RoundError::InvalidPlayerCount(player_count));
        }
        if local_player.index() >= player_count {
            return Err(RoundError::UnknownPlayer {
                player: local_player,
                player_count,
            });
        }

        let mut state = Self {
            round,
            seed,
            grid: Grid::generate(seed),
            tanks: Vec::with_capacity(player_count),
            projectiles: Vec::new(),
            local_player,
            wins: vec![0; player_count],
            retired: vec![false; player_count],
            scored: false,
        };
        state.spawn_tanks();
        Ok(state)
    }

    /// Start a fresh round with a new grid. Wins and retirements carry over.
    pub fn reset(&mut self, round: u32, seed: u32) {
        self.round = round;
        self.seed = seed;
        self.grid = Grid::generate(seed);
        self.projectiles.clear();
        self.scored = false;
        self.spawn_tanks();
    }

    fn spawn_tanks(&mut self) {
        let player_count = self.wins.len();
        self.tanks = (0..player_count)
            .filter_map(|i| Tank::spawn(PlayerIndex::from_usize(i), player_count))
            .collect();
        for (tank, retired) in self.tanks.iter_mut().zip(&self.retired) {
            if *retired {
                tank.alive = false;
            }
        }
    }

    /// Advance every projectile one step and resolve collisions
    pub fn update_projectiles(&mut self) -> Vec<ProjectileImpact> {
        let mut impacts = Vec::new();
        let mut remaining = Vec::with_capacity(self.projectiles.len());

        for mut projectile in self.projectiles.drain(..) {
            match CombatSystem::step(&mut projectile, &self.grid, &mut self.tanks) {
                Some(impact) => {
                    if let Impact::Tank(victim) = impact {
                        debug!(round = self.round, victim = %victim, "Tank destroyed");
                    }
                    impacts.push(ProjectileImpact {
                        owner: projectile.owner,
                        row: projectile.row,
                        col: projectile.col,
                        impact,
                    });
                }
                None => remaining.push(projectile),
            }
        }

        self.projectiles = remaining;
        impacts
    }

    pub fn alive_count(&self) -> usize {
        self.tanks.iter().filter(|t| t.alive).count()
    }

    pub fn is_round_over(&self) -> bool {
        self.alive_count() <= 1
    }

    pub fn phase(&self) -> RoundPhase {
        if self.is_round_over() {
            RoundPhase::Over
        } else {
            RoundPhase::Active
        }
    }

    /// The only surviving player, if exactly one tank is alive
    pub fn winner(&self) -> Option<PlayerIndex> {
        let mut alive = self
            .tanks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.alive)
            .map(|(i, _)| PlayerIndex::from_usize(i));
        match (alive.next(), alive.next()) {
            (Some(winner), None) => Some(winner),
            _ => None,
        }
    }

    /// Record the result once per round. Returns `None` while the round is
    /// still active or when the result was already recorded.
    pub fn settle(&mut self) -> Option<RoundOutcome> {
        if self.scored || !self.is_round_over() {
            return None;
        }
        self.scored = true;

        match self.winner() {
            Some(winner) => {
                if let Some(count) = self.wins.get_mut(winner.index()) {
                    *count += 1;
                }
                Some(RoundOutcome::Winner(winner))
            }
            None => Some(RoundOutcome::Draw),
        }
    }

    /// Move a tank from local input. `Ok(false)` is a blocked move.
    pub fn try_move(&mut self, player: PlayerIndex, direction: Direction) -> Result<bool, RoundError> {
        if self.is_round_over() {
            return Err(RoundError::RoundOver);
        }
        let grid = &self.grid;
        let tank = Self::live_tank(&mut self.tanks, player)?;
        Ok(tank.move_in(direction, grid))
    }

    /// Fire from a tank. The projectile is added locally and a copy is
    /// returned for broadcasting.
    pub fn fire(&mut self, player: PlayerIndex) -> Result<Projectile, RoundError> {
        if self.is_round_over() {
            return Err(RoundError::RoundOver);
        }
        let projectile = Self::live_tank(&mut self.tanks, player)?
            .shoot()
            .with_owner(player);
        self.projectiles.push(projectile.clone());
        Ok(projectile)
    }

    fn live_tank(tanks: &mut [Tank], player: PlayerIndex) -> Result<&mut Tank, RoundError> {
        let player_count = tanks.len();
        let tank = tanks
            .get_mut(player.index())
            .ok_or(RoundError::UnknownPlayer {
                player,
                player_count,
            })?;
        if !tank.alive {
            return Err(RoundError::TankDestroyed(player));
        }
        Ok(tank)
    }

    fn check_remote(&self, player: PlayerIndex) -> Result<usize, RoundError> {
        let index = player.index();
        if index >= self.tanks.len() {
            return Err(RoundError::UnknownPlayer {
                player,
                player_count: self.tanks.len(),
            });
        }
        if self.retired[index] {
            return Err(RoundError::PlayerRetired(player));
        }
        Ok(index)
    }

    /// Overwrite a remote tank's position. The sender validated the move
    /// against its identical grid, so it is not re-checked here. A tank
    /// already destroyed locally stays where it died.
    pub fn apply_remote_move(
        &mut self,
        player: PlayerIndex,
        row: i32,
        col: i32,
        direction: Direction,
    ) -> Result<(), RoundError> {
        let index = self.check_remote(player)?;
        if !in_bounds(row, col) {
            return Err(RoundError::OutOfBoard { row, col });
        }

        let tank = &mut self.tanks[index];
        if !tank.alive {
            return Err(RoundError::TankDestroyed(player));
        }
        tank.row = row;
        tank.col = col;
        tank.direction = direction;
        Ok(())
    }

    /// Append a projectile fired by a remote player
    pub fn apply_remote_shoot(
        &mut self,
        player: PlayerIndex,
        mut projectile: Projectile,
    ) -> Result<(), RoundError> {
        self.check_remote(player)?;
        projectile.owner.get_or_insert(player);
        projectile.launched = false;
        self.projectiles.push(projectile);
        Ok(())
    }

    /// Permanently remove a player from play. The slot stays so indices
    /// remain stable for the rest of the session.
    pub fn retire(&mut self, player: PlayerIndex) -> Result<(), RoundError> {
        let index = player.index();
        let player_count = self.tanks.len();
        let tank = self
            .tanks
            .get_mut(index)
            .ok_or(RoundError::UnknownPlayer {
                player,
                player_count,
            })?;
        tank.alive = false;
        self.retired[index] = true;
        Ok(())
    }

    pub fn is_retired(&self, player: PlayerIndex) -> bool {
        self.retired.get(player.index()).copied().unwrap_or(false)
    }

    pub fn digest(&self) -> StateDigest {
        StateDigest::of(self.round, self.seed, &self.tanks)
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot::build(self)
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn tanks(&self) -> &[Tank] {
        &self.tanks
    }

    pub fn tank(&self, player: PlayerIndex) -> Option<&Tank> {
        self.tanks.get(player.index())
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    pub fn wins(&self) -> &[u32] {
        &self.wins
    }

    pub fn local_player(&self) -> PlayerIndex {
        self.local_player
    }

    pub fn player_count(&self) -> usize {
        self.wins.len()
    }

    /// Replace the grid. Used for scripted scenarios and tests.
    pub fn set_grid(&mut self, grid: Grid) {
        self.grid = grid;
    }

    /// Place a tank directly. Used for scripted scenarios and tests.
    pub fn place_tank(&mut self, player: PlayerIndex, tank: Tank) -> Result<(), RoundError> {
        let player_count = self.tanks.len();
        let slot = self
            .tanks
            .get_mut(player.index())
            .ok_or(RoundError::UnknownPlayer {
                player,
                player_count,
            })?;
        *slot = tank;
        Ok(())
    }
}
