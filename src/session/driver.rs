//! Async session task
//!
//! A single task owns the `Session` and interleaves queued commands with the
//! fixed-rate projectile tick, so handlers never overlap a tick.

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::game::{LocalInput, RoundSnapshot};
use crate::protocol::{Envelope, PeerId};

use super::orchestrator::Session;
use super::transport::Transport;
use super::{InputOutcome, SessionError, SessionEvent};

const COMMAND_QUEUE: usize = 256;
const EVENT_BUFFER: usize = 128;

enum Command {
    Input {
        input: LocalInput,
        reply: oneshot::Sender<InputOutcome>,
    },
    Deliver {
        from: PeerId,
        envelope: Envelope,
    },
    PeerLost(PeerId),
    Start {
        peers: Vec<PeerId>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Snapshot(oneshot::Sender<Option<RoundSnapshot>>),
    Shutdown,
}

/// Cloneable handle to a running session task
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn input(&self, input: LocalInput) -> Result<InputOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Input { input, reply }).await?;
        rx.await.map_err(|_| SessionError::DriverClosed)
    }

    /// Hand an inbound envelope to the session
    pub async fn deliver(&self, from: PeerId, envelope: Envelope) -> Result<(), SessionError> {
        self.send(Command::Deliver { from, envelope }).await
    }

    pub async fn peer_lost(&self, peer: PeerId) -> Result<(), SessionError> {
        self.send(Command::PeerLost(peer)).await
    }

    /// Start the session as host with `peers` as the other players
    pub async fn start(&self, peers: Vec<PeerId>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { peers, reply }).await?;
        rx.await.map_err(|_| SessionError::DriverClosed)?
    }

    pub async fn snapshot(&self) -> Result<Option<RoundSnapshot>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| SessionError::DriverClosed)
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(Command::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::DriverClosed)
    }
}

/// Owns a session and runs its command loop
pub struct SessionDriver<T: Transport> {
    session: Session<T>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl<T: Transport + 'static> SessionDriver<T> {
    pub fn new(session: Session<T>) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        let handle = SessionHandle {
            commands: command_tx,
            events: events.clone(),
        };
        let driver = Self {
            session,
            commands,
            events,
        };
        (driver, handle)
    }

    /// Spawn the driver; the task returns the session when it stops
    pub fn spawn(session: Session<T>) -> (JoinHandle<Session<T>>, SessionHandle) {
        let (driver, handle) = Self::new(session);
        (tokio::spawn(driver.run()), handle)
    }

    pub async fn run(mut self) -> Session<T> {
        let peer_id = self.session.local_peer();
        info!(peer_id = %peer_id, "Session driver started");

        let mut ticker = interval(self.session.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = ticker.tick() => {
                    let events = self.session.tick(Instant::now().into_std());
                    self.publish(events);
                }
            }
        }

        info!(peer_id = %peer_id, "Session driver stopped");
        self.session
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Input { input, reply } => {
                let (outcome, events) = self.session.handle_input(input);
                self.publish(events);
                let _ = reply.send(outcome);
            }
            Command::Deliver { from, envelope } => {
                let events = self.session.handle_envelope(from, envelope);
                self.publish(events);
            }
            Command::PeerLost(peer) => {
                let events = self.session.peer_lost(peer);
                self.publish(events);
            }
            Command::Start { peers, reply } => {
                let result = self.session.start_session(&peers).map(|events| self.publish(events));
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn publish(&self, events: Vec<SessionEvent>) {
        for event in events {
            // No subscribers is fine
            if self.events.send(event).is_err() {
                debug!("No session event subscribers");
            }
        }
    }
}
