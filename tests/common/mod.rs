//! In-memory peer network for session tests

#![allow(dead_code)]

use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tank_arena::config::SessionConfig;
use tank_arena::protocol::{encode_frame, FrameDecoder, PeerId};
use tank_arena::session::{Outbound, Session, SessionEvent};

pub type Peer = Session<Vec<Outbound>>;

pub fn config() -> SessionConfig {
    SessionConfig {
        tick_rate_hz: 20,
        round_end_delay: Duration::from_millis(50),
        ready_timeout: Duration::from_millis(200),
    }
}

pub fn peers(count: usize) -> Vec<Peer> {
    (0..count)
        .map(|i| {
            Session::with_rng(
                PeerId::random(),
                config(),
                Vec::new(),
                ChaCha8Rng::seed_from_u64(100 + i as u64),
            )
        })
        .collect()
}

pub fn ids(peers: &[Peer]) -> Vec<PeerId> {
    peers.iter().map(|p| p.local_peer()).collect()
}

/// Deliver queued envelopes until nothing is left in flight. Every
/// envelope crosses the wire as a length-prefixed frame, fed to the
/// receiver's decoder in small chunks.
pub fn pump(peers: &mut [Peer]) -> Vec<Vec<SessionEvent>> {
    let mut events = vec![Vec::new(); peers.len()];
    loop {
        let mut sent = Vec::new();
        for peer in peers.iter_mut() {
            let from = peer.local_peer();
            sent.extend(peer.transport_mut().drain(..).map(|o| (from, o)));
        }
        if sent.is_empty() {
            return events;
        }

        for (from, outbound) in sent {
            let frame = encode_frame(outbound.envelope()).expect("envelope fits in a frame");
            for (i, peer) in peers.iter_mut().enumerate() {
                let deliver = match &outbound {
                    Outbound::Broadcast(_) => peer.local_peer() != from,
                    Outbound::Direct(to, _) => peer.local_peer() == *to,
                };
                if !deliver {
                    continue;
                }

                let mut decoder = FrameDecoder::new();
                for chunk in frame.chunks(7) {
                    decoder.extend(chunk);
                }
                while let Some(envelope) = decoder.next_frame().expect("valid frame") {
                    events[i].extend(peer.handle_envelope(from, envelope));
                }
            }
        }
    }
}
