//! Peer synchronization protocol

pub mod codec;
pub mod message;
pub mod sequence;

pub use codec::{encode_frame, FrameDecoder, MAX_FRAME_LEN};
pub use message::{validate_roster, Envelope, PeerId, PeerMessage, PlayerAssignment};
pub use sequence::{OutboundSequence, ReplayWindow, SequenceTracker};

use crate::game::PlayerIndex;

/// Malformed frames and rosters
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("player count {0} is not supported")]
    PlayerCount(u8),

    #[error("roster lists {got} players, expected {expected}")]
    AssignmentCount { expected: usize, got: usize },

    #[error("player {0} assigned more than once")]
    DuplicatePlayer(PlayerIndex),

    #[error("peer {0} assigned more than once")]
    DuplicatePeer(PeerId),

    #[error("player {0} is outside the roster")]
    PlayerOutOfRange(PlayerIndex),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("invalid message encoding: {0}")]
    Json(#[from] serde_json::Error),
}
