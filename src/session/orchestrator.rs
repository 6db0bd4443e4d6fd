//! Session orchestrator
//!
//! Owns one peer's `RoundState` and decides what is broadcast, what is
//! applied from the network and when the next round starts. Every entry
//! point is synchronous and returns the events it produced; the driver
//! serializes calls so nothing here runs concurrently with a tick.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::game::{
    Impact, LocalInput, PlayerIndex, RoundSnapshot, RoundState, StateDigest, MAX_PLAYERS,
    MIN_PLAYERS,
};
use crate::protocol::{
    validate_roster, Envelope, OutboundSequence, PeerId, PeerMessage, PlayerAssignment,
    ProtocolError, SequenceTracker,
};

use super::transport::{Outbound, Transport};
use super::{InputOutcome, SessionError, SessionEvent, SessionPhase};

/// Envelopes held while waiting for the `RoundStart` they belong to
const MAX_EARLY_ENVELOPES: usize = 256;

/// One peer's seat in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterEntry {
    pub peer: PeerId,
    pub player: PlayerIndex,
    pub connected: bool,
}

pub struct Session<T: Transport> {
    local: PeerId,
    host: Option<PeerId>,
    roster: Vec<RosterEntry>,
    state: Option<RoundState>,
    phase: SessionPhase,
    votes: BTreeMap<PlayerIndex, StateDigest>,
    local_digest: Option<StateDigest>,
    flagged: Vec<PlayerIndex>,
    sequences: SequenceTracker,
    outbound: OutboundSequence,
    round_over_at: Option<Instant>,
    voted_at: Option<Instant>,
    early: Vec<(PeerId, Envelope)>,
    /// Host only: last `RoundStart` sent, for peers that fell behind
    last_round_start: Option<(u32, PeerMessage)>,
    seeds: ChaCha8Rng,
    config: SessionConfig,
    transport: T,
}

impl<T: Transport> Session<T> {
    pub fn new(local: PeerId, config: SessionConfig, transport: T) -> Self {
        Self::with_rng(local, config, transport, ChaCha8Rng::from_entropy())
    }

    /// Session whose round seeds come from `seeds`
    pub fn with_rng(local: PeerId, config: SessionConfig, transport: T, seeds: ChaCha8Rng) -> Self {
        Self {
            local,
            host: None,
            roster: Vec::new(),
            state: None,
            phase: SessionPhase::Lobby,
            votes: BTreeMap::new(),
            local_digest: None,
            flagged: Vec::new(),
            sequences: SequenceTracker::new(),
            outbound: OutboundSequence::new(),
            round_over_at: None,
            voted_at: None,
            early: Vec::new(),
            last_round_start: None,
            seeds,
            config,
            transport,
        }
    }

    /// Become host and open round 1 with `peers` as players 1..n
    pub fn start_session(&mut self, peers: &[PeerId]) -> Result<Vec<SessionEvent>, SessionError> {
        let seed = self.seeds.next_u32();
        self.start_session_with_seed(peers, seed)
    }

    pub fn start_session_with_seed(
        &mut self,
        peers: &[PeerId],
        seed: u32,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        match self.phase {
            SessionPhase::Lobby => {}
            SessionPhase::Finished => return Err(SessionError::Finished),
            SessionPhase::Active | SessionPhase::Over => return Err(SessionError::AlreadyStarted),
        }

        let player_count = peers.len() + 1;
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&player_count) {
            return Err(SessionError::PlayerCount(player_count));
        }

        let assignments: Vec<PlayerAssignment> = std::iter::once(self.local)
            .chain(peers.iter().copied())
            .enumerate()
            .map(|(i, peer)| PlayerAssignment {
                peer,
                player: PlayerIndex::from_usize(i),
            })
            .collect();
        validate_roster(player_count as u8, &assignments)?;

        self.host = Some(self.local);
        self.roster = assignments
            .iter()
            .map(|a| RosterEntry {
                peer: a.peer,
                player: a.player,
                connected: true,
            })
            .collect();

        info!(peer_id = %self.local, players = player_count, "Starting session as host");
        self.announce_round(1, seed, Vec::new())
    }

    /// Apply local input and broadcast the result
    pub fn handle_input(&mut self, input: LocalInput) -> (InputOutcome, Vec<SessionEvent>) {
        if self.phase != SessionPhase::Active {
            return (InputOutcome::Ignored, Vec::new());
        }
        let Some(state) = self.state.as_mut() else {
            return (InputOutcome::Ignored, Vec::new());
        };
        let player = state.local_player();
        let round = state.round();

        match input {
            LocalInput::Move(direction) => match state.try_move(player, direction) {
                Ok(true) => {
                    let Some((row, col, direction)) =
                        state.tank(player).map(|t| (t.row, t.col, t.direction))
                    else {
                        return (InputOutcome::Ignored, Vec::new());
                    };
                    self.broadcast(
                        round,
                        PeerMessage::PlayerMove {
                            player,
                            row,
                            col,
                            direction,
                        },
                    );
                    (
                        InputOutcome::Moved,
                        vec![SessionEvent::TankMoved {
                            player,
                            row,
                            col,
                            direction,
                        }],
                    )
                }
                Ok(false) => (InputOutcome::Blocked, Vec::new()),
                Err(err) => {
                    debug!(round, error = %err, "Move ignored");
                    (InputOutcome::Ignored, Vec::new())
                }
            },
            LocalInput::Fire => match state.fire(player) {
                Ok(projectile) => {
                    self.broadcast(round, PeerMessage::PlayerShoot { player, projectile });
                    (
                        InputOutcome::Fired,
                        vec![SessionEvent::ProjectileFired { player }],
                    )
                }
                Err(err) => {
                    debug!(round, error = %err, "Fire ignored");
                    (InputOutcome::Ignored, Vec::new())
                }
            },
        }
    }

    /// Fixed-rate step: projectiles, round end, ready vote and host duties
    pub fn tick(&mut self, now: Instant) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !matches!(self.phase, SessionPhase::Active | SessionPhase::Over) {
            return events;
        }
        let Some(state) = self.state.as_mut() else {
            return events;
        };
        let round = state.round();
        let local_player = state.local_player();

        // The board freezes once the round is over
        let impacts = if self.phase == SessionPhase::Active {
            state.update_projectiles()
        } else {
            Vec::new()
        };

        let mut local_hit = false;
        for impact in impacts {
            match impact.impact {
                Impact::Tank(victim) => {
                    local_hit |= victim == local_player;
                    events.push(SessionEvent::TankDestroyed {
                        player: victim,
                        by: impact.owner,
                    });
                }
                other => events.push(SessionEvent::ProjectileSpent {
                    owner: impact.owner,
                    impact: other,
                }),
            }
        }

        if self.phase == SessionPhase::Active {
            if let Some(outcome) = state.settle() {
                info!(round, ?outcome, "Round over");
                events.push(SessionEvent::RoundOver {
                    round,
                    outcome,
                    wins: state.wins().to_vec(),
                });
                self.phase = SessionPhase::Over;
                self.round_over_at = Some(now);
            }
        }

        if local_hit {
            self.broadcast(
                round,
                PeerMessage::PlayerHit {
                    player: local_player,
                },
            );
        }

        if self.phase == SessionPhase::Over {
            events.extend(self.cast_vote(now));
            events.extend(self.advance_if_ready(Some(now)));
        }
        events
    }

    /// Apply an envelope received from `from`. Rejected messages are logged
    /// and leave the state untouched.
    pub fn handle_envelope(&mut self, from: PeerId, envelope: Envelope) -> Vec<SessionEvent> {
        let kind = envelope.message.kind();
        let seq = envelope.seq;
        match self.receive(from, envelope) {
            Ok(events) => events,
            Err(SessionError::Duplicate { .. }) => {
                debug!(peer_id = %from, kind, seq, "Duplicate envelope dropped");
                Vec::new()
            }
            Err(err) => {
                warn!(peer_id = %from, kind, seq, error = %err, "Dropped peer message");
                Vec::new()
            }
        }
    }

    /// The link to `peer` is gone: retire its player and re-elect the host
    /// if needed.
    pub fn peer_lost(&mut self, peer: PeerId) -> Vec<SessionEvent> {
        let Some(entry) = self
            .roster
            .iter_mut()
            .find(|e| e.peer == peer && e.connected)
        else {
            return Vec::new();
        };
        entry.connected = false;
        let player = entry.player;
        self.sequences.forget(&peer);
        self.early.retain(|(from, _)| *from != peer);
        info!(peer_id = %peer, player = %player, "Peer lost");

        let mut events = Vec::new();
        if let Some(state) = self.state.as_mut() {
            if !state.is_retired(player) && state.retire(player).is_ok() {
                events.push(SessionEvent::PlayerRetired { player });
            }
        }
        self.votes.remove(&player);

        if self.host == Some(peer) {
            events.extend(self.elect_host());
        }

        if self.phase != SessionPhase::Lobby && self.active_players() < MIN_PLAYERS {
            events.extend(self.finish());
            return events;
        }
        if self.phase == SessionPhase::Over {
            events.extend(self.advance_if_ready(None));
        }
        events
    }

    pub fn snapshot(&self) -> Option<RoundSnapshot> {
        self.state.as_ref().map(RoundState::snapshot)
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn local_player(&self) -> Option<PlayerIndex> {
        self.roster
            .iter()
            .find(|e| e.peer == self.local)
            .map(|e| e.player)
    }

    pub fn host(&self) -> Option<PeerId> {
        self.host
    }

    pub fn is_host(&self) -> bool {
        self.host == Some(self.local)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    pub fn round_state(&self) -> Option<&RoundState> {
        self.state.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn receive(&mut self, from: PeerId, envelope: Envelope) -> Result<Vec<SessionEvent>, SessionError> {
        if envelope.sender != from {
            return Err(SessionError::SenderMismatch {
                from,
                claimed: envelope.sender,
            });
        }
        if from == self.local {
            return Ok(Vec::new());
        }
        if self.phase == SessionPhase::Finished {
            return Err(SessionError::Finished);
        }
        if !self.sequences.accept(from, envelope.seq) {
            return Err(SessionError::Duplicate {
                sender: from,
                seq: envelope.seq,
            });
        }

        if matches!(envelope.message, PeerMessage::RoundStart { .. }) {
            self.on_round_start(from, &envelope)
        } else {
            self.on_round_message(from, envelope)
        }
    }

    fn on_round_start(&mut self, from: PeerId, envelope: &Envelope) -> Result<Vec<SessionEvent>, SessionError> {
        let PeerMessage::RoundStart {
            seed,
            player_count,
            assignments,
            retired,
        } = &envelope.message
        else {
            return Ok(Vec::new());
        };
        let round = envelope.round;

        validate_roster(*player_count, assignments)?;
        if let Some(host) = self.host {
            if host != from {
                return Err(SessionError::NotHost(from));
            }
        }
        if let Some(state) = &self.state {
            let current = state.round();
            if round < current || (round == current && *seed == state.seed()) {
                return Err(SessionError::StaleRound { got: round, current });
            }
            if usize::from(*player_count) != state.player_count() {
                return Err(SessionError::RosterChanged {
                    expected: state.player_count(),
                    got: usize::from(*player_count),
                });
            }
            // Player indices are fixed for the whole session
            if let Some(moved) = assignments.iter().find(|a| {
                !self
                    .roster
                    .iter()
                    .any(|e| e.peer == a.peer && e.player == a.player)
            }) {
                return Err(SessionError::SeatChanged {
                    peer: moved.peer,
                    player: moved.player,
                });
            }
        }
        if !assignments.iter().any(|a| a.peer == self.local) {
            return Err(SessionError::NotInRoster);
        }
        if !assignments.iter().any(|a| a.peer == from) {
            return Err(SessionError::UnknownPeer(from));
        }
        if let Some(&player) = retired
            .iter()
            .find(|p| p.index() >= usize::from(*player_count))
        {
            return Err(ProtocolError::PlayerOutOfRange(player).into());
        }

        if self.host.is_none() {
            info!(host = %from, "Joined session");
            self.host = Some(from);
        }

        let mut roster: Vec<RosterEntry> = assignments
            .iter()
            .map(|a| RosterEntry {
                peer: a.peer,
                player: a.player,
                connected: self
                    .roster
                    .iter()
                    .find(|e| e.peer == a.peer)
                    .map_or(true, |e| e.connected),
            })
            .collect();
        roster.sort_by_key(|e| e.player);
        self.roster = roster;

        self.apply_round_start(round, *seed, retired)
    }

    fn on_round_message(&mut self, from: PeerId, envelope: Envelope) -> Result<Vec<SessionEvent>, SessionError> {
        let Some(current) = self.state.as_ref().map(RoundState::round) else {
            self.hold_early(from, envelope);
            return Ok(Vec::new());
        };

        if envelope.round > current {
            self.hold_early(from, envelope);
            return Ok(Vec::new());
        }
        if envelope.round < current {
            if self.is_host() && matches!(envelope.message, PeerMessage::ReadyForNextRound { .. }) {
                self.resend_round_start(from);
            }
            return Err(SessionError::StaleRound {
                got: envelope.round,
                current,
            });
        }
        self.apply_in_round(from, envelope)
    }

    fn apply_in_round(&mut self, from: PeerId, envelope: Envelope) -> Result<Vec<SessionEvent>, SessionError> {
        let entry = self
            .roster
            .iter()
            .find(|e| e.peer == from)
            .copied()
            .ok_or(SessionError::UnknownPeer(from))?;
        if let Some(player) = envelope.message.player() {
            if player != entry.player {
                return Err(SessionError::WrongPlayer { peer: from, player });
            }
        }

        let round = envelope.round;
        let state = self.state.as_mut().ok_or(SessionError::NoRound)?;
        match envelope.message {
            PeerMessage::PlayerMove {
                player,
                row,
                col,
                direction,
            } => {
                state.apply_remote_move(player, row, col, direction)?;
                Ok(vec![SessionEvent::TankMoved {
                    player,
                    row,
                    col,
                    direction,
                }])
            }
            PeerMessage::PlayerShoot { player, projectile } => {
                state.apply_remote_shoot(player, projectile)?;
                Ok(vec![SessionEvent::ProjectileFired { player }])
            }
            PeerMessage::PlayerHit { player } => {
                if state.tank(player).map_or(false, |t| t.alive) {
                    debug!(round, player = %player, "Hit reported ahead of local simulation");
                }
                Ok(Vec::new())
            }
            PeerMessage::ReadyForNextRound { player, digest } => {
                Ok(self.record_vote(round, player, digest))
            }
            PeerMessage::RoundStart { .. } => Ok(Vec::new()),
        }
    }

    fn hold_early(&mut self, from: PeerId, envelope: Envelope) {
        if self.early.len() >= MAX_EARLY_ENVELOPES {
            warn!(peer_id = %from, round = envelope.round, "Too many early envelopes, dropping");
            return;
        }
        self.early.push((from, envelope));
    }

    fn record_vote(&mut self, round: u32, player: PlayerIndex, digest: StateDigest) -> Vec<SessionEvent> {
        if self.is_player_retired(player) {
            debug!(round, player = %player, "Vote from retired player ignored");
            return Vec::new();
        }
        self.votes.insert(player, digest);

        let mut events = vec![SessionEvent::ReadyVote { player }];
        if self.local_digest.map_or(false, |local| local != digest) {
            events.extend(self.flag_desync(round, player));
        }
        if self.phase == SessionPhase::Over {
            events.extend(self.advance_if_ready(None));
        }
        events
    }

    /// Vote once `round_end_delay` has passed since the round ended
    fn cast_vote(&mut self, now: Instant) -> Vec<SessionEvent> {
        if self.voted_at.is_some() {
            return Vec::new();
        }
        let Some(over_at) = self.round_over_at else {
            return Vec::new();
        };
        if now.saturating_duration_since(over_at) < self.config.round_end_delay {
            return Vec::new();
        }
        let Some(state) = self.state.as_ref() else {
            return Vec::new();
        };
        let player = state.local_player();
        let round = state.round();
        let retired = state.is_retired(player);
        let digest = state.digest();

        self.voted_at = Some(now);
        if retired {
            return Vec::new();
        }

        self.local_digest = Some(digest);
        self.votes.insert(player, digest);
        self.broadcast(round, PeerMessage::ReadyForNextRound { player, digest });
        debug!(round, player = %player, digest = %digest, "Ready for next round");

        let mismatched: Vec<PlayerIndex> = self
            .votes
            .iter()
            .filter(|(p, d)| **p != player && **d != digest)
            .map(|(p, _)| *p)
            .collect();

        let mut events = vec![SessionEvent::ReadyVote { player }];
        for other in mismatched {
            events.extend(self.flag_desync(round, other));
        }
        events
    }

    fn flag_desync(&mut self, round: u32, player: PlayerIndex) -> Option<SessionEvent> {
        if self.flagged.contains(&player) {
            return None;
        }
        self.flagged.push(player);
        warn!(round, player = %player, "Round-end state differs from peer");
        Some(SessionEvent::DesyncSuspected { round, player })
    }

    /// Host: start the next round once every active player voted, or retire
    /// the silent ones after `ready_timeout`.
    fn advance_if_ready(&mut self, now: Option<Instant>) -> Vec<SessionEvent> {
        if !self.is_host() || self.phase != SessionPhase::Over {
            return Vec::new();
        }
        let Some(voted_at) = self.voted_at else {
            return Vec::new();
        };

        let pending = self.pending_voters();
        if pending.is_empty() {
            return self.start_next_round();
        }

        let Some(now) = now else {
            return Vec::new();
        };
        if now.saturating_duration_since(voted_at) < self.config.ready_timeout {
            return Vec::new();
        }

        warn!(missing = pending.len(), "Ready timeout, retiring players that did not vote");
        let mut events = Vec::new();
        if let Some(state) = self.state.as_mut() {
            for player in pending {
                if state.retire(player).is_ok() {
                    events.push(SessionEvent::PlayerRetired { player });
                }
            }
        }
        events.extend(self.start_next_round());
        events
    }

    fn pending_voters(&self) -> Vec<PlayerIndex> {
        self.roster
            .iter()
            .filter(|e| e.connected && !self.is_player_retired(e.player))
            .map(|e| e.player)
            .filter(|p| !self.votes.contains_key(p))
            .collect()
    }

    fn start_next_round(&mut self) -> Vec<SessionEvent> {
        if self.active_players() < MIN_PLAYERS {
            return self.finish();
        }
        let Some(state) = self.state.as_ref() else {
            return Vec::new();
        };
        let round = state.round() + 1;
        let retired: Vec<PlayerIndex> = self
            .roster
            .iter()
            .map(|e| e.player)
            .filter(|p| state.is_retired(*p))
            .collect();
        let seed = self.seeds.next_u32();

        match self.announce_round(round, seed, retired) {
            Ok(events) => events,
            Err(err) => {
                warn!(round, error = %err, "Failed to start next round");
                Vec::new()
            }
        }
    }

    /// Host: broadcast a `RoundStart` and apply it locally
    fn announce_round(
        &mut self,
        round: u32,
        seed: u32,
        retired: Vec<PlayerIndex>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let message = PeerMessage::RoundStart {
            seed,
            player_count: self.roster.len() as u8,
            assignments: self.assignments(),
            retired: retired.clone(),
        };
        self.last_round_start = Some((round, message.clone()));
        self.broadcast(round, message);
        self.apply_round_start(round, seed, &retired)
    }

    fn apply_round_start(
        &mut self,
        round: u32,
        seed: u32,
        retired: &[PlayerIndex],
    ) -> Result<Vec<SessionEvent>, SessionError> {
        let local_player = self.local_player().ok_or(SessionError::NotInRoster)?;
        let player_count = self.roster.len();

        let state = match self.state.take() {
            Some(mut state) => {
                state.reset(round, seed);
                state
            }
            None => RoundState::new(round, seed, player_count, local_player)?,
        };
        let state = self.state.insert(state);

        let mut events = vec![SessionEvent::RoundStarted {
            round,
            seed,
            local_player,
        }];

        let disconnected = self
            .roster
            .iter()
            .filter(|e| !e.connected)
            .map(|e| e.player);
        for player in retired.iter().copied().chain(disconnected) {
            if !state.is_retired(player) {
                state.retire(player)?;
                events.push(SessionEvent::PlayerRetired { player });
            }
        }

        self.phase = SessionPhase::Active;
        self.votes.clear();
        self.local_digest = None;
        self.flagged.clear();
        self.round_over_at = None;
        self.voted_at = None;
        info!(round, seed, local_player = %local_player, "Round started");

        for (from, envelope) in std::mem::take(&mut self.early) {
            if envelope.round > round {
                self.early.push((from, envelope));
            } else if envelope.round == round {
                match self.apply_in_round(from, envelope) {
                    Ok(applied) => events.extend(applied),
                    Err(err) => warn!(peer_id = %from, error = %err, "Dropped early message"),
                }
            }
        }
        Ok(events)
    }

    fn elect_host(&mut self) -> Vec<SessionEvent> {
        let next = self
            .roster
            .iter()
            .filter(|e| e.connected && !self.is_player_retired(e.player))
            .min_by_key(|e| e.player)
            .map(|e| e.peer);
        self.host = next;
        self.last_round_start = None;

        match next {
            Some(host) => {
                info!(host = %host, "Host changed");
                vec![SessionEvent::HostChanged { host }]
            }
            None => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<SessionEvent> {
        if self.phase == SessionPhase::Finished {
            return Vec::new();
        }
        self.phase = SessionPhase::Finished;
        info!(peer_id = %self.local, "Session ended");
        vec![SessionEvent::SessionEnded]
    }

    fn resend_round_start(&mut self, to: PeerId) {
        let Some((round, message)) = self.last_round_start.clone() else {
            return;
        };
        debug!(peer_id = %to, round, "Resending round start");
        let envelope = self.envelope(round, message);
        self.send(Outbound::Direct(to, envelope));
    }

    fn active_players(&self) -> usize {
        self.roster
            .iter()
            .filter(|e| e.connected && !self.is_player_retired(e.player))
            .count()
    }

    fn is_player_retired(&self, player: PlayerIndex) -> bool {
        self.state
            .as_ref()
            .map_or(false, |s| s.is_retired(player))
    }

    fn assignments(&self) -> Vec<PlayerAssignment> {
        self.roster
            .iter()
            .map(|e| PlayerAssignment {
                peer: e.peer,
                player: e.player,
            })
            .collect()
    }

    fn envelope(&mut self, round: u32, message: PeerMessage) -> Envelope {
        Envelope {
            sender: self.local,
            seq: self.outbound.next(),
            round,
            message,
        }
    }

    fn broadcast(&mut self, round: u32, message: PeerMessage) {
        let envelope = self.envelope(round, message);
        self.send(Outbound::Broadcast(envelope));
    }

    fn send(&mut self, outbound: Outbound) {
        if let Err(err) = self.transport.send(outbound) {
            warn!(error = %err, "Failed to send peer message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Direction, RoundOutcome, Tank};
    use std::time::Duration;

    type TestSession = Session<Vec<Outbound>>;

    fn config() -> SessionConfig {
        SessionConfig {
            tick_rate_hz: 20,
            round_end_delay: Duration::from_millis(100),
            ready_timeout: Duration::from_millis(500),
        }
    }

    fn session(seed: u64) -> TestSession {
        Session::with_rng(
            PeerId::random(),
            config(),
            Vec::new(),
            ChaCha8Rng::seed_from_u64(seed),
        )
    }

    /// Deliver everything sent until the network is quiet
    fn pump(sessions: &mut [TestSession]) -> Vec<Vec<SessionEvent>> {
        let mut events = vec![Vec::new(); sessions.len()];
        loop {
            let mut sent = Vec::new();
            for s in sessions.iter_mut() {
                let from = s.local_peer();
                sent.extend(s.transport_mut().drain(..).map(|o| (from, o)));
            }
            if sent.is_empty() {
                return events;
            }
            for (from, outbound) in sent {
                for (i, s) in sessions.iter_mut().enumerate() {
                    let deliver = match &outbound {
                        Outbound::Broadcast(_) => s.local_peer() != from,
                        Outbound::Direct(to, _) => s.local_peer() == *to,
                    };
                    if deliver {
                        events[i].extend(s.handle_envelope(from, outbound.envelope().clone()));
                    }
                }
            }
        }
    }

    fn started(count: usize) -> Vec<TestSession> {
        let mut sessions: Vec<TestSession> = (0..count).map(|i| session(i as u64 + 1)).collect();
        let peers: Vec<PeerId> = sessions[1..].iter().map(|s| s.local_peer()).collect();
        sessions[0].start_session(&peers).unwrap();
        pump(&mut sessions);
        sessions
    }

    fn place(sessions: &mut [TestSession], player: u8, tank: Tank) {
        for s in sessions.iter_mut() {
            s.state
                .as_mut()
                .unwrap()
                .place_tank(PlayerIndex(player), tank.clone())
                .unwrap();
        }
    }

    fn tick_all(sessions: &mut [TestSession], now: Instant) -> Vec<Vec<SessionEvent>> {
        sessions.iter_mut().map(|s| s.tick(now)).collect()
    }

    /// Host shoots P1 point blank and every peer ticks once
    fn finish_round(sessions: &mut [TestSession], now: Instant) {
        place(sessions, 1, Tank::new(1, 0, Direction::Up));
        sessions[0].handle_input(LocalInput::Fire);
        pump(sessions);
        tick_all(sessions, now);
        pump(sessions);
    }

    #[test]
    fn start_requires_two_to_four_players() {
        let mut host = session(1);
        assert!(matches!(
            host.start_session(&[]),
            Err(SessionError::PlayerCount(1))
        ));
        let peers: Vec<PeerId> = (0..4).map(|_| PeerId::random()).collect();
        assert!(matches!(
            host.start_session(&peers),
            Err(SessionError::PlayerCount(5))
        ));
        assert_eq!(host.phase(), SessionPhase::Lobby);
    }

    #[test]
    fn host_broadcasts_round_start_with_explicit_roster() {
        let mut host = session(1);
        let guest = PeerId::random();
        let events = host.start_session(&[guest]).unwrap();

        assert!(host.is_host());
        assert_eq!(host.phase(), SessionPhase::Active);
        assert!(matches!(
            events[0],
            SessionEvent::RoundStarted {
                round: 1,
                local_player: PlayerIndex(0),
                ..
            }
        ));

        let sent = host.transport();
        assert_eq!(sent.len(), 1);
        let envelope = sent[0].envelope();
        assert_eq!((envelope.seq, envelope.round), (1, 1));
        match &envelope.message {
            PeerMessage::RoundStart {
                player_count,
                assignments,
                ..
            } => {
                assert_eq!(*player_count, 2);
                assert_eq!(assignments[1].peer, guest);
                assert_eq!(assignments[1].player, PlayerIndex(1));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn guest_adopts_sender_as_host_and_builds_same_grid() {
        let sessions = started(2);
        let (host, guest) = (&sessions[0], &sessions[1]);
        assert_eq!(guest.host(), Some(host.local_peer()));
        assert_eq!(guest.local_player(), Some(PlayerIndex(1)));
        assert_eq!(
            guest.round_state().unwrap().grid(),
            host.round_state().unwrap().grid()
        );
    }

    #[test]
    fn local_move_is_broadcast_only_when_it_succeeds() {
        let mut sessions = started(2);
        let host = &mut sessions[0];
        host.transport_mut().clear();

        let (outcome, events) = host.handle_input(LocalInput::Move(Direction::Up));
        assert_eq!(outcome, InputOutcome::Blocked);
        assert!(events.is_empty());
        assert!(host.transport().is_empty());

        let (outcome, _) = host.handle_input(LocalInput::Move(Direction::Right));
        assert_eq!(outcome, InputOutcome::Moved);
        assert!(matches!(
            host.transport()[0].envelope().message,
            PeerMessage::PlayerMove {
                row: 0,
                col: 1,
                direction: Direction::Right,
                ..
            }
        ));

        pump(&mut sessions);
        assert_eq!(
            sessions[1].round_state().unwrap().tank(PlayerIndex(0)),
            Some(&Tank::new(0, 1, Direction::Right))
        );
    }

    #[test]
    fn duplicate_shoot_is_applied_once() {
        let mut sessions = started(2);
        sessions[0].transport_mut().clear();
        sessions[0].handle_input(LocalInput::Fire);
        let envelope = sessions[0].transport()[0].envelope().clone();
        let from = sessions[0].local_peer();

        let guest = &mut sessions[1];
        assert_eq!(guest.handle_envelope(from, envelope.clone()).len(), 1);
        assert!(guest.handle_envelope(from, envelope).is_empty());
        assert_eq!(guest.round_state().unwrap().projectiles().len(), 1);
    }

    #[test]
    fn messages_for_other_players_or_senders_are_dropped() {
        let mut sessions = started(2);
        let host_id = sessions[0].local_peer();
        let guest = &mut sessions[1];
        let before = guest.round_state().unwrap().tanks().to_vec();

        let spoofed = Envelope {
            sender: host_id,
            seq: 2,
            round: 1,
            message: PeerMessage::PlayerMove {
                player: PlayerIndex(1),
                row: 3,
                col: 3,
                direction: Direction::Up,
            },
        };
        assert!(guest.handle_envelope(host_id, spoofed.clone()).is_empty());
        assert!(guest.handle_envelope(PeerId::random(), spoofed).is_empty());
        assert_eq!(guest.round_state().unwrap().tanks(), &before[..]);
    }

    #[test]
    fn early_messages_wait_for_their_round_start() {
        let mut sessions = started(2);
        let host_id = sessions[0].local_peer();
        let guest = &mut sessions[1];
        let assignments = guest.assignments();

        let early_move = Envelope {
            sender: host_id,
            seq: 10,
            round: 2,
            message: PeerMessage::PlayerMove {
                player: PlayerIndex(0),
                row: 0,
                col: 1,
                direction: Direction::Right,
            },
        };
        assert!(guest.handle_envelope(host_id, early_move).is_empty());
        assert_eq!(guest.round_state().unwrap().round(), 1);

        let start = Envelope {
            sender: host_id,
            seq: 11,
            round: 2,
            message: PeerMessage::RoundStart {
                seed: 77,
                player_count: 2,
                assignments,
                retired: Vec::new(),
            },
        };
        let events = guest.handle_envelope(host_id, start);
        assert!(events.contains(&SessionEvent::TankMoved {
            player: PlayerIndex(0),
            row: 0,
            col: 1,
            direction: Direction::Right,
        }));
        let state = guest.round_state().unwrap();
        assert_eq!((state.round(), state.seed()), (2, 77));
        assert_eq!(state.tank(PlayerIndex(0)).unwrap().col, 1);
    }

    #[test]
    fn stale_round_messages_are_dropped() {
        let mut sessions = started(2);
        let host_id = sessions[0].local_peer();
        let guest = &mut sessions[1];
        let stale = Envelope {
            sender: host_id,
            seq: 5,
            round: 0,
            message: PeerMessage::PlayerShoot {
                player: PlayerIndex(0),
                projectile: crate::game::Projectile::new(3, 3, Direction::Up),
            },
        };
        assert!(guest.handle_envelope(host_id, stale).is_empty());
        assert!(guest.round_state().unwrap().projectiles().is_empty());
    }

    #[test]
    fn round_end_votes_and_next_round() {
        let mut sessions = started(2);
        let t0 = Instant::now();
        finish_round(&mut sessions, t0);

        for s in &sessions {
            assert_eq!(s.phase(), SessionPhase::Over);
            assert_eq!(s.round_state().unwrap().wins(), &[1, 0]);
        }

        let t1 = t0 + config().round_end_delay;
        tick_all(&mut sessions, t1);
        let events = pump(&mut sessions);

        for s in &sessions {
            assert_eq!(s.phase(), SessionPhase::Active);
            assert_eq!(s.round_state().unwrap().round(), 2);
            assert_eq!(s.round_state().unwrap().wins(), &[1, 0]);
        }
        assert_eq!(
            sessions[0].round_state().unwrap().seed(),
            sessions[1].round_state().unwrap().seed()
        );
        assert!(events
            .iter()
            .flatten()
            .all(|e| !matches!(e, SessionEvent::DesyncSuspected { .. })));
    }

    #[test]
    fn tick_reports_destruction_and_outcome() {
        let mut sessions = started(2);
        place(&mut sessions, 1, Tank::new(1, 0, Direction::Up));
        sessions[0].handle_input(LocalInput::Fire);
        pump(&mut sessions);
        sessions[1].transport_mut().clear();

        let events = sessions[1].tick(Instant::now());
        assert!(events.contains(&SessionEvent::TankDestroyed {
            player: PlayerIndex(1),
            by: Some(PlayerIndex(0)),
        }));
        assert!(events.contains(&SessionEvent::RoundOver {
            round: 1,
            outcome: RoundOutcome::Winner(PlayerIndex(0)),
            wins: vec![1, 0],
        }));
        // The victim's own peer reports the hit
        assert!(matches!(
            sessions[1].transport()[0].envelope().message,
            PeerMessage::PlayerHit {
                player: PlayerIndex(1)
            }
        ));
    }

    #[test]
    fn diverged_round_end_is_flagged() {
        let mut sessions = started(2);
        let t0 = Instant::now();
        finish_round(&mut sessions, t0);

        sessions[1]
            .state
            .as_mut()
            .unwrap()
            .place_tank(PlayerIndex(0), Tank::new(4, 4, Direction::Left))
            .unwrap();

        tick_all(&mut sessions, t0 + config().round_end_delay);
        let events = pump(&mut sessions);
        assert!(events[0].contains(&SessionEvent::DesyncSuspected {
            round: 1,
            player: PlayerIndex(1),
        }));
    }

    #[test]
    fn ready_timeout_retires_silent_player() {
        let mut sessions = started(3);
        let mut dead = Tank::new(0, 7, Direction::Down);
        dead.alive = false;
        place(&mut sessions, 2, dead);

        let t0 = Instant::now();
        finish_round(&mut sessions, t0);

        // P2 never votes
        let t1 = t0 + config().round_end_delay;
        sessions[0].tick(t1);
        sessions[1].tick(t1);
        pump(&mut sessions);
        assert_eq!(sessions[0].phase(), SessionPhase::Over);

        let events = sessions[0].tick(t1 + config().ready_timeout);
        assert!(events.contains(&SessionEvent::PlayerRetired {
            player: PlayerIndex(2)
        }));
        pump(&mut sessions);

        for s in &sessions {
            let state = s.round_state().unwrap();
            assert_eq!(state.round(), 2);
            assert!(state.is_retired(PlayerIndex(2)));
            assert!(!state.tank(PlayerIndex(2)).unwrap().alive);
        }
        let (outcome, _) = sessions[2].handle_input(LocalInput::Fire);
        assert_eq!(outcome, InputOutcome::Ignored);
    }

    #[test]
    fn losing_the_host_elects_lowest_remaining_player() {
        let mut sessions = started(3);
        let host_id = sessions[0].local_peer();
        let next_host = sessions[1].local_peer();

        let events = sessions[1].peer_lost(host_id);
        assert!(events.contains(&SessionEvent::PlayerRetired {
            player: PlayerIndex(0)
        }));
        assert!(events.contains(&SessionEvent::HostChanged { host: next_host }));
        assert!(sessions[1].is_host());

        sessions[2].peer_lost(host_id);
        assert_eq!(sessions[2].host(), Some(next_host));
        assert_eq!(sessions[2].phase(), SessionPhase::Active);
    }

    #[test]
    fn session_ends_when_one_player_remains() {
        let mut sessions = started(2);
        let guest = sessions[1].local_peer();
        let events = sessions[0].peer_lost(guest);
        assert!(events.contains(&SessionEvent::SessionEnded));
        assert_eq!(sessions[0].phase(), SessionPhase::Finished);
        assert!(sessions[0].peer_lost(guest).is_empty());
    }

    #[test]
    fn finished_round_freezes_projectiles() {
        let mut sessions = started(2);
        place(&mut sessions, 1, Tank::new(4, 0, Direction::Up));
        let host = &mut sessions[0];
        let t0 = Instant::now();

        host.handle_input(LocalInput::Fire);
        host.tick(t0);
        // P1 returns fire up the same column one tick later
        host.state
            .as_mut()
            .unwrap()
            .apply_remote_shoot(PlayerIndex(1), crate::game::Projectile::new(3, 0, Direction::Up))
            .unwrap();
        host.tick(t0);
        let events = host.tick(t0);
        assert!(events.contains(&SessionEvent::RoundOver {
            round: 1,
            outcome: RoundOutcome::Winner(PlayerIndex(0)),
            wins: vec![1, 0],
        }));

        for _ in 0..4 {
            assert!(host.tick(t0).is_empty());
        }
        let state = host.round_state().unwrap();
        assert!(state.tank(PlayerIndex(0)).unwrap().alive);
        assert_eq!(state.winner(), Some(PlayerIndex(0)));
        assert_eq!(state.projectiles().len(), 1);
        assert_eq!(host.snapshot().unwrap().winner, Some(PlayerIndex(0)));
    }

    #[test]
    fn round_start_cannot_swap_seats() {
        let mut sessions = started(2);
        let host_id = sessions[0].local_peer();
        let guest = &mut sessions[1];
        let mut assignments = guest.assignments();
        assignments[0].player = PlayerIndex(1);
        assignments[1].player = PlayerIndex(0);

        let swapped = Envelope {
            sender: host_id,
            seq: 2,
            round: 2,
            message: PeerMessage::RoundStart {
                seed: 9,
                player_count: 2,
                assignments,
                retired: Vec::new(),
            },
        };
        assert!(guest.handle_envelope(host_id, swapped).is_empty());
        assert_eq!(guest.round_state().unwrap().round(), 1);
        assert_eq!(guest.local_player(), Some(PlayerIndex(1)));
        assert_eq!(guest.round_state().unwrap().local_player(), PlayerIndex(1));
    }

    #[test]
    fn stale_vote_gets_round_start_resent() {
        let mut sessions = started(2);
        let guest_id = sessions[1].local_peer();
        let t0 = Instant::now();
        finish_round(&mut sessions, t0);
        tick_all(&mut sessions, t0 + config().round_end_delay);

        // The host hears the guest's vote, but its round 2 start is lost
        let sent: Vec<Envelope> = sessions[1]
            .transport_mut()
            .drain(..)
            .map(|o| o.envelope().clone())
            .collect();
        for envelope in sent {
            sessions[0].handle_envelope(guest_id, envelope);
        }
        assert_eq!(sessions[0].round_state().unwrap().round(), 2);
        sessions[0].transport_mut().clear();
        assert_eq!(sessions[1].phase(), SessionPhase::Over);

        let digest = sessions[1].round_state().unwrap().digest();
        let repeated_vote = Envelope {
            sender: guest_id,
            seq: 100,
            round: 1,
            message: PeerMessage::ReadyForNextRound {
                player: PlayerIndex(1),
                digest,
            },
        };
        sessions[0].handle_envelope(guest_id, repeated_vote);
        match sessions[0].transport().as_slice() {
            [Outbound::Direct(to, envelope)] => {
                assert_eq!(*to, guest_id);
                assert_eq!(envelope.round, 2);
                assert!(matches!(envelope.message, PeerMessage::RoundStart { .. }));
            }
            other => panic!("unexpected outbound {other:?}"),
        }

        pump(&mut sessions);
        assert_eq!(sessions[1].phase(), SessionPhase::Active);
        assert_eq!(sessions[1].round_state().unwrap().round(), 2);
        assert_eq!(
            sessions[1].round_state().unwrap().seed(),
            sessions[0].round_state().unwrap().seed()
        );
        assert_eq!(
            sessions[1].round_state().unwrap().grid(),
            sessions[0].round_state().unwrap().grid()
        );
    }

    #[test]
    fn early_envelopes_are_capped_then_replayed() {
        let mut sessions = started(2);
        let host_id = sessions[0].local_peer();
        let guest = &mut sessions[1];
        let assignments = guest.assignments();

        let early_move = |seq: u64, row: i32, col: i32| Envelope {
            sender: host_id,
            seq,
            round: 2,
            message: PeerMessage::PlayerMove {
                player: PlayerIndex(0),
                row,
                col,
                direction: Direction::Right,
            },
        };
        for seq in 2..2 + MAX_EARLY_ENVELOPES as u64 {
            guest.handle_envelope(host_id, early_move(seq, 0, 1));
        }
        assert_eq!(guest.early.len(), MAX_EARLY_ENVELOPES);
        let overflow = 2 + MAX_EARLY_ENVELOPES as u64;
        guest.handle_envelope(host_id, early_move(overflow, 5, 5));
        assert_eq!(guest.early.len(), MAX_EARLY_ENVELOPES);

        let start = Envelope {
            sender: host_id,
            seq: overflow + 1,
            round: 2,
            message: PeerMessage::RoundStart {
                seed: 77,
                player_count: 2,
                assignments,
                retired: Vec::new(),
            },
        };
        let events = guest.handle_envelope(host_id, start);
        let moved = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::TankMoved { .. }))
            .count();
        assert_eq!(moved, MAX_EARLY_ENVELOPES);
        assert!(guest.early.is_empty());
        let tank = guest.round_state().unwrap().tank(PlayerIndex(0)).unwrap();
        assert_eq!((tank.row, tank.col), (0, 1));
    }

    #[test]
    fn round_start_from_non_host_is_ignored() {
        let mut sessions = started(3);
        let guest_id = sessions[1].local_peer();
        let assignments = sessions[2].assignments();
        let forged = Envelope {
            sender: guest_id,
            seq: 1,
            round: 5,
            message: PeerMessage::RoundStart {
                seed: 3,
                player_count: 3,
                assignments,
                retired: Vec::new(),
            },
        };
        assert!(sessions[2].handle_envelope(guest_id, forged).is_empty());
        assert_eq!(sessions[2].round_state().unwrap().round(), 1);
    }
}
