//! Tank Arena - deterministic peer-synchronized tank battles
//!
//! Every peer runs the same simulation from a shared seed and exchanges
//! only player actions:
//! - `game`: grid generation, tanks, projectiles and round state
//! - `protocol`: peer messages, sequencing and framing
//! - `session`: round lifecycle, host duties and the async driver
//! - `relay`, `ws`, `http`: the lobby relay server

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod util;
pub mod ws;
