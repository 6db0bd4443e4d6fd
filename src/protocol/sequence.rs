//! Per-sender sequence numbers and duplicate suppression

use std::collections::HashMap;

use super::message::PeerId;

/// Width of the replay window in messages
pub const REPLAY_WINDOW: u64 = 64;

/// Counter for outgoing envelopes
#[derive(Debug, Clone, Default)]
pub struct OutboundSequence {
    last: u64,
}

impl OutboundSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number, starting at 1
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/// Sliding window over the last `REPLAY_WINDOW` sequence numbers seen from
/// one sender. Bit 0 of `mask` is `highest`, bit n is `highest - n`.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    highest: u64,
    mask: u64,
}

impl ReplayWindow {
    /// Record `seq`. False for duplicates, zero, and anything older than
    /// the window.
    pub fn accept(&mut self, seq: u64) -> bool {
        if seq == 0 {
            return false;
        }

        if seq > self.highest {
            let shift = seq - self.highest;
            self.mask = if shift >= REPLAY_WINDOW { 0 } else { self.mask << shift };
            self.mask |= 1;
            self.highest = seq;
            return true;
        }

        let offset = self.highest - seq;
        if offset >= REPLAY_WINDOW {
            return false;
        }
        let bit = 1u64 << offset;
        if self.mask & bit != 0 {
            return false;
        }
        self.mask |= bit;
        true
    }

    pub fn highest(&self) -> u64 {
        self.highest
    }
}

/// Replay windows for every known sender
#[derive(Debug, Default)]
pub struct SequenceTracker {
    windows: HashMap<PeerId, ReplayWindow>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, sender: PeerId, seq: u64) -> bool {
        self.windows.entry(sender).or_default().accept(seq)
    }

    pub fn forget(&mut self, sender: &PeerId) {
        self.windows.remove(sender);
    }
}
