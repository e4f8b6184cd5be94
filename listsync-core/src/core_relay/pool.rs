//! Shared relay collaborators handed to every request

use std::sync::Arc;
use std::time::Duration;

use super::connector::RelayConnector;
use super::scoreboard::{RelayFeedback, RelayScoreboard};
use super::seen::SeenOnRelays;
use crate::config::Config;

/// Per-request timing and buffering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub connect_timeout: Duration,
    pub eose_timeout: Duration,
    pub channel_capacity: usize,
    pub seen_capacity: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions::from(&Config::default())
    }
}

impl From<&Config> for PoolOptions {
    fn from(config: &Config) -> Self {
        PoolOptions {
            connect_timeout: config.relays.connect_timeout,
            eose_timeout: config.relays.eose_timeout,
            channel_capacity: config.sync.channel_capacity,
            seen_capacity: config.sync.seen_capacity,
        }
    }
}

/// Connector plus the indexes every request reports into
#[derive(Clone)]
pub struct RelayPool {
    pub connector: Arc<dyn RelayConnector>,
    pub feedback: Arc<dyn RelayFeedback>,
    pub seen: Arc<SeenOnRelays>,
    pub options: PoolOptions,
}

impl RelayPool {
    pub fn new(
        connector: Arc<dyn RelayConnector>,
        feedback: Arc<dyn RelayFeedback>,
        options: PoolOptions,
    ) -> Self {
        RelayPool {
            connector,
            feedback,
            seen: Arc::new(SeenOnRelays::with_capacity(options.seen_capacity)),
            options,
        }
    }

    /// Pool reporting into `scoreboard`
    pub fn with_scoreboard(
        connector: Arc<dyn RelayConnector>,
        scoreboard: Arc<RelayScoreboard>,
        options: PoolOptions,
    ) -> Self {
        Self::new(connector, scoreboard, options)
    }
}
