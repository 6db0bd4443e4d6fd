//! Peer session: round lifecycle, message handling and host duties

pub mod driver;
pub mod orchestrator;
pub mod transport;

pub use driver::{SessionDriver, SessionHandle};
pub use orchestrator::{RosterEntry, Session};
pub use transport::{ChannelTransport, Outbound, Transport, TransportError};

use crate::game::{Direction, Impact, PlayerIndex, RoundError, RoundOutcome};
use crate::protocol::{PeerId, ProtocolError};

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No round has started yet
    Lobby,
    /// Round in progress
    Active,
    /// Round decided, collecting ready votes
    Over,
    /// Fewer than two players left
    Finished,
}

/// Result of one local input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Moved,
    /// Wall or board edge in the way; nothing was sent
    Blocked,
    Fired,
    /// No active round, or the local tank is destroyed
    Ignored,
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RoundStarted {
        round: u32,
        seed: u32,
        local_player: PlayerIndex,
    },
    TankMoved {
        player: PlayerIndex,
        row: i32,
        col: i32,
        direction: Direction,
    },
    ProjectileFired {
        player: PlayerIndex,
    },
    /// Projectile left play without hitting a tank
    ProjectileSpent {
        owner: Option<PlayerIndex>,
        impact: Impact,
    },
    TankDestroyed {
        player: PlayerIndex,
        by: Option<PlayerIndex>,
    },
    RoundOver {
        round: u32,
        outcome: RoundOutcome,
        wins: Vec<u32>,
    },
    ReadyVote {
        player: PlayerIndex,
    },
    PlayerRetired {
        player: PlayerIndex,
    },
    HostChanged {
        host: PeerId,
    },
    /// Another peer finished the round with different tank state
    DesyncSuspected {
        round: u32,
        player: PlayerIndex,
    },
    SessionEnded,
}

/// Rejected session operations and inbound messages
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,

    #[error("session has finished")]
    Finished,

    #[error("a session needs 2 to 4 players, got {0}")]
    PlayerCount(usize),

    #[error("envelope from {from} claims sender {claimed}")]
    SenderMismatch { from: PeerId, claimed: PeerId },

    #[error("duplicate envelope {seq} from {sender}")]
    Duplicate { sender: PeerId, seq: u64 },

    #[error("peer {0} is not in the roster")]
    UnknownPeer(PeerId),

    #[error("local peer is missing from the roster")]
    NotInRoster,

    #[error("round start from {0}, who is not the host")]
    NotHost(PeerId),

    #[error("message for round {got} while in round {current}")]
    StaleRound { got: u32, current: u32 },

    #[error("roster size changed from {expected} to {got}")]
    RosterChanged { expected: usize, got: usize },

    #[error("round start moves peer {peer} to {player}")]
    SeatChanged { peer: PeerId, player: PlayerIndex },

    #[error("peer {peer} spoke for {player}")]
    WrongPlayer { peer: PeerId, player: PlayerIndex },

    #[error("no round in progress")]
    NoRound,

    #[error("session driver stopped")]
    DriverClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Round(#[from] RoundError),
}
