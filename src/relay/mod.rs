//! Lobby relay - passphrase lobbies that forward peer envelopes

pub mod lobby;

pub use lobby::{normalize_passphrase, passphrase_tag, JoinedLobby, LobbyRegistry, PeerSender, Route};

use crate::protocol::PeerId;

/// Relay request failures, reported to the client as `Error`
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Passphrase required")]
    PassphraseRequired,

    #[error("Invalid passphrase format. Use: verb-noun")]
    InvalidPassphrase,

    #[error("Lobby is full ({0} players)")]
    LobbyFull(usize),

    #[error("Already in this lobby")]
    AlreadyJoined,

    #[error("Not in a lobby")]
    NotInLobby,

    #[error("Peer {0} is not in this lobby")]
    UnknownPeer(PeerId),

    #[error("Too many messages, slow down and resend")]
    RateLimited,
}

impl RelayError {
    /// Stable code sent alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::PassphraseRequired => "passphrase_required",
            RelayError::InvalidPassphrase => "invalid_passphrase",
            RelayError::LobbyFull(_) => "lobby_full",
            RelayError::AlreadyJoined => "already_joined",
            RelayError::NotInLobby => "not_in_lobby",
            RelayError::UnknownPeer(_) => "unknown_peer",
            RelayError::RateLimited => "rate_limited",
        }
    }
}
