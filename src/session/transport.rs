//! Outbound side of a peer link

use tokio::sync::mpsc;

use crate::protocol::{Envelope, PeerId};

/// Envelope leaving the local session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// To every other peer in the session
    Broadcast(Envelope),
    /// To a single peer
    Direct(PeerId, Envelope),
}

impl Outbound {
    pub fn envelope(&self) -> &Envelope {
        match self {
            Outbound::Broadcast(envelope) | Outbound::Direct(_, envelope) => envelope,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
}

/// Sink for outbound envelopes. Implementations must not block; delivery
/// must be reliable and in order per link.
pub trait Transport: Send {
    fn send(&mut self, outbound: Outbound) -> Result<(), TransportError>;
}

/// Transport backed by an unbounded channel; a network task drains the
/// receiver and writes to the wire.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, outbound: Outbound) -> Result<(), TransportError> {
        self.tx.send(outbound).map_err(|_| TransportError::Closed)
    }
}

/// Collects everything sent; handy for scripted sessions
impl Transport for Vec<Outbound> {
    fn send(&mut self, outbound: Outbound) -> Result<(), TransportError> {
        self.push(outbound);
        Ok(())
    }
}
