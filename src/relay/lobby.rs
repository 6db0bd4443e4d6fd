//! Passphrase lobbies and message routing

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::protocol::{Envelope, PeerId};
use crate::ws::protocol::ServerMsg;

use super::RelayError;

/// Outbox of one relay connection
pub type PeerSender = mpsc::UnboundedSender<ServerMsg>;

/// Trim and lowercase a passphrase and check the `verb-noun` shape
pub fn normalize_passphrase(raw: &str) -> Result<String, RelayError> {
    let passphrase = raw.trim().to_lowercase();
    if passphrase.is_empty() {
        return Err(RelayError::PassphraseRequired);
    }

    let mut parts = passphrase.split('-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(verb), Some(noun), None) if !verb.is_empty() && !noun.is_empty() => Ok(passphrase),
        _ => Err(RelayError::InvalidPassphrase),
    }
}

/// Short tag identifying a lobby in logs without revealing the passphrase
pub fn passphrase_tag(passphrase: &str) -> String {
    let hash = Sha256::digest(passphrase.as_bytes());
    hex::encode(&hash[..4])
}

struct Member {
    peer: PeerId,
    tx: PeerSender,
}

/// Members in join order
#[derive(Default)]
struct Lobby {
    members: Vec<Member>,
}

impl Lobby {
    fn contains(&self, peer: PeerId) -> bool {
        self.members.iter().any(|m| m.peer == peer)
    }

    fn notify_others(&self, except: PeerId, msg: &ServerMsg) -> usize {
        self.members
            .iter()
            .filter(|m| m.peer != except)
            .filter(|m| m.tx.send(msg.clone()).is_ok())
            .count()
    }
}

/// Where a relayed envelope goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    AllOthers,
    To(PeerId),
}

/// Result of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedLobby {
    /// Normalized passphrase, the lobby key
    pub key: String,
    pub host: PeerId,
    pub peers: Vec<PeerId>,
}

/// All open lobbies, keyed by normalized passphrase
pub struct LobbyRegistry {
    lobbies: DashMap<String, Lobby>,
    capacity: usize,
}

impl LobbyRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            lobbies: DashMap::new(),
            capacity,
        }
    }

    /// Add `peer` to the lobby for `passphrase`, creating it if needed.
    /// Existing members receive `PeerJoined`.
    pub fn join(&self, passphrase: &str, peer: PeerId, tx: PeerSender) -> Result<JoinedLobby, RelayError> {
        let key = normalize_passphrase(passphrase)?;
        // Shard stays locked until the member is pushed
        let mut lobby = self.lobbies.entry(key.clone()).or_default();

        if lobby.contains(peer) {
            return Err(RelayError::AlreadyJoined);
        }
        if lobby.members.len() >= self.capacity {
            return Err(RelayError::LobbyFull(self.capacity));
        }

        lobby.notify_others(peer, &ServerMsg::PeerJoined { peer_id: peer });
        let peers: Vec<PeerId> = lobby.members.iter().map(|m| m.peer).collect();
        lobby.members.push(Member { peer, tx });
        let host = lobby.members[0].peer;
        let size = lobby.members.len();
        drop(lobby);

        info!(lobby = %passphrase_tag(&key), peer_id = %peer, size, "Peer joined lobby");
        Ok(JoinedLobby { key, host, peers })
    }

    /// Remove `peer`; the others receive `PeerLeft` and an empty lobby is
    /// dropped. Returns how many members remain.
    pub fn leave(&self, key: &str, peer: PeerId) -> usize {
        let remaining = match self.lobbies.get_mut(key) {
            Some(mut lobby) => {
                let before = lobby.members.len();
                lobby.members.retain(|m| m.peer != peer);
                if lobby.members.len() != before {
                    lobby.notify_others(peer, &ServerMsg::PeerLeft { peer_id: peer });
                }
                lobby.members.len()
            }
            None => return 0,
        };

        info!(lobby = %passphrase_tag(key), peer_id = %peer, remaining, "Peer left lobby");
        if remaining == 0 && self.lobbies.remove_if(key, |_, l| l.members.is_empty()).is_some() {
            info!(lobby = %passphrase_tag(key), "Removed empty lobby");
        }
        remaining
    }

    /// Forward an envelope from `from` as `Message`. Returns how many
    /// members it reached.
    pub fn route(&self, key: &str, from: PeerId, route: Route, envelope: Envelope) -> Result<usize, RelayError> {
        let lobby = self.lobbies.get(key).ok_or(RelayError::NotInLobby)?;
        if !lobby.contains(from) {
            return Err(RelayError::NotInLobby);
        }

        let msg = ServerMsg::Message { from, envelope };
        let delivered = match route {
            Route::AllOthers => lobby.notify_others(from, &msg),
            Route::To(to) => {
                let member = lobby
                    .members
                    .iter()
                    .find(|m| m.peer == to && to != from)
                    .ok_or(RelayError::UnknownPeer(to))?;
                usize::from(member.tx.send(msg).is_ok())
            }
        };
        debug!(lobby = %passphrase_tag(key), peer_id = %from, delivered, "Relayed envelope");
        Ok(delivered)
    }

    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    pub fn peer_count(&self) -> usize {
        self.lobbies.iter().map(|l| l.members.len()).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
