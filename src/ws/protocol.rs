//! Relay protocol message definitions
//! These are the wire types between a peer and the lobby relay

use serde::{Deserialize, Serialize};

use crate::protocol::{Envelope, PeerId};

/// Messages sent from a peer to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join (or create) the lobby named by a `verb-noun` passphrase
    Join { passphrase: String },

    /// Forward to every other lobby member
    Broadcast { envelope: Envelope },

    /// Forward to one lobby member
    Direct { to: PeerId, envelope: Envelope },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },

    /// Leave the lobby and close the connection
    Leave,
}

/// Messages sent from the relay to a peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent on connect, before any lobby is joined
    Welcome { peer_id: PeerId, server_time: u64 },

    /// Join confirmation
    Joined {
        peer_id: PeerId,
        /// Longest-standing lobby member; starts the session
        host: PeerId,
        /// Other members already in the lobby
        peers: Vec<PeerId>,
    },

    /// Another peer entered the lobby
    PeerJoined { peer_id: PeerId },

    /// Envelope relayed from another member
    Message { from: PeerId, envelope: Envelope },

    /// A member disconnected
    PeerLeft { peer_id: PeerId },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PlayerIndex;
    use crate::protocol::PeerMessage;

    #[test]
    fn client_join_parses_from_json() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"join","passphrase":"Roll-Tank"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Join { passphrase } if passphrase == "Roll-Tank"));
    }

    #[test]
    fn relayed_message_nests_envelope() {
        let from = PeerId::random();
        let msg = ServerMsg::Message {
            from,
            envelope: Envelope {
                sender: from,
                seq: 4,
                round: 2,
                message: PeerMessage::PlayerHit {
                    player: PlayerIndex(1),
                },
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["envelope"]["message"]["type"], "player_hit");
        assert_eq!(value["envelope"]["seq"], 4);
    }
}
