//! Peer-to-peer message definitions
//! These are the wire types exchanged between session orchestrators

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Direction, PlayerIndex, Projectile, StateDigest, MAX_PLAYERS, MIN_PLAYERS};

use super::ProtocolError;

/// Identity of one peer (device) in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Explicit peer → player index binding, chosen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAssignment {
    pub peer: PeerId,
    pub player: PlayerIndex,
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Start (or restart) a round; only the host sends this
    RoundStart {
        /// Seed every peer feeds to the grid generator
        seed: u32,
        player_count: u8,
        /// Player index of every peer in the session
        assignments: Vec<PlayerAssignment>,
        /// Players removed from play; their tanks stay dead
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        retired: Vec<PlayerIndex>,
    },

    /// Absolute position of the sender's own tank after a successful move
    PlayerMove {
        player: PlayerIndex,
        row: i32,
        col: i32,
        direction: Direction,
    },

    /// New projectile fired by the sender's tank
    PlayerShoot {
        player: PlayerIndex,
        projectile: Projectile,
    },

    /// Advisory: the sender's own tank was destroyed
    PlayerHit { player: PlayerIndex },

    /// Readiness vote for the next round
    ReadyForNextRound {
        player: PlayerIndex,
        /// Sender's view of the finished round
        digest: StateDigest,
    },
}

impl PeerMessage {
    /// Player the message speaks for, if any
    pub fn player(&self) -> Option<PlayerIndex> {
        match self {
            PeerMessage::RoundStart { .. } => None,
            PeerMessage::PlayerMove { player, .. }
            | PeerMessage::PlayerShoot { player, .. }
            | PeerMessage::PlayerHit { player }
            | PeerMessage::ReadyForNextRound { player, .. } => Some(*player),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::RoundStart { .. } => "round_start",
            PeerMessage::PlayerMove { .. } => "player_move",
            PeerMessage::PlayerShoot { .. } => "player_shoot",
            PeerMessage::PlayerHit { .. } => "player_hit",
            PeerMessage::ReadyForNextRound { .. } => "ready_for_next_round",
        }
    }
}

/// A message plus the metadata used for ordering and de-duplication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: PeerId,
    /// Per-sender counter, starting at 1
    pub seq: u64,
    /// Round the message belongs to; for `RoundStart` the round it opens
    pub round: u32,
    pub message: PeerMessage,
}

/// Check a `RoundStart` roster: supported size, indices 0..n each used
/// once, and no peer listed twice.
pub fn validate_roster(player_count: u8, assignments: &[PlayerAssignment]) -> Result<(), ProtocolError> {
    let count = usize::from(player_count);
    if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&count) {
        return Err(ProtocolError::PlayerCount(player_count));
    }
    if assignments.len() != count {
        return Err(ProtocolError::AssignmentCount {
            expected: count,
            got: assignments.len(),
        });
    }

    let mut players = HashSet::new();
    let mut peers = HashSet::new();
    for assignment in assignments {
        if assignment.player.index() >= count {
            return Err(ProtocolError::PlayerOutOfRange(assignment.player));
        }
        if !players.insert(assignment.player) {
            return Err(ProtocolError::DuplicatePlayer(assignment.player));
        }
        if !peers.insert(assignment.peer) {
            return Err(ProtocolError::DuplicatePeer(assignment.peer));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(n: u8) -> Vec<PlayerAssignment> {
        (0..n)
            .map(|i| PlayerAssignment {
                peer: PeerId::random(),
                player: PlayerIndex(i),
            })
            .collect()
    }

    #[test]
    fn messages_are_tagged_by_type() {
        let msg = PeerMessage::PlayerMove {
            player: PlayerIndex(1),
            row: 3,
            col: 4,
            direction: Direction::Up,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "player_move");
        assert_eq!(value["player"], 1);
        assert_eq!(value["direction"], "up");
    }

    #[test]
    fn shoot_message_carries_projectile() {
        let msg = PeerMessage::PlayerShoot {
            player: PlayerIndex(0),
            projectile: Projectile::new(2, 3, Direction::Right).with_owner(PlayerIndex(0)),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: PeerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.kind(), "player_shoot");
    }

    #[test]
    fn player_accessor() {
        let hit = PeerMessage::PlayerHit { player: PlayerIndex(2) };
        assert_eq!(hit.player(), Some(PlayerIndex(2)));
        let start = PeerMessage::RoundStart {
            seed: 1,
            player_count: 2,
            assignments: roster(2),
            retired: Vec::new(),
        };
        assert_eq!(start.player(), None);
        let json = serde_json::to_value(&start).unwrap();
        assert!(json.get("retired").is_none());
    }

    #[test]
    fn roster_validation() {
        assert!(validate_roster(2, &roster(2)).is_ok());
        assert!(validate_roster(4, &roster(4)).is_ok());
        assert!(matches!(validate_roster(1, &roster(1)), Err(ProtocolError::PlayerCount(1))));
        assert!(matches!(
            validate_roster(3, &roster(2)),
            Err(ProtocolError::AssignmentCount { expected: 3, got: 2 })
        ));

        let mut duplicate = roster(2);
        duplicate[1].player = PlayerIndex(0);
        assert!(matches!(
            validate_roster(2, &duplicate),
            Err(ProtocolError::DuplicatePlayer(_))
        ));

        let mut out_of_range = roster(2);
        out_of_range[1].player = PlayerIndex(2);
        assert!(matches!(
            validate_roster(2, &out_of_range),
            Err(ProtocolError::PlayerOutOfRange(_))
        ));

        let mut same_peer = roster(2);
        same_peer[1].peer = same_peer[0].peer;
        assert!(matches!(
            validate_roster(2, &same_peer),
            Err(ProtocolError::DuplicatePeer(_))
        ));
    }
}
