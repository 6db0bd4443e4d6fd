//! Timing parameters for a peer session

use std::env;
use std::time::Duration;

use super::ConfigError;

/// Session timing, passed explicitly to the orchestrator and driver
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Projectile ticks per second
    pub tick_rate_hz: u32,
    /// Pause between a round ending and the local ready vote
    pub round_end_delay: Duration,
    /// How long the host waits for missing votes after its own
    pub ready_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 20,
            round_end_delay: Duration::from_millis(3000),
            ready_timeout: Duration::from_millis(5000),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let tick_rate_hz = match lookup("TICK_RATE_HZ") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|hz| (1..=120).contains(hz))
                .ok_or(ConfigError::Invalid("TICK_RATE_HZ"))?,
            None => defaults.tick_rate_hz,
        };

        Ok(Self {
            tick_rate_hz,
            round_end_delay: millis(&lookup, "ROUND_END_DELAY_MS")?
                .unwrap_or(defaults.round_end_delay),
            ready_timeout: millis(&lookup, "READY_TIMEOUT_MS")?.unwrap_or(defaults.ready_timeout),
        })
    }

    /// Interval between projectile ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }
}

fn millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::Invalid(key))
        })
        .transpose()
}
