//! Application state shared across routes

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::relay::LobbyRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lobbies: Arc<LobbyRegistry>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Initialize lobby registry
        let lobbies = Arc::new(LobbyRegistry::new(config.lobby_capacity));

        Self {
            config,
            lobbies,
            started_at: Utc::now(),
        }
    }
}
