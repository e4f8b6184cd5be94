/*
    connector.rs - Boundary to the relay transport

    The core never speaks websocket itself. A RelayConnector opens one
    subscription on one relay and hands back a channel of RelayMessages:

      Event(e)            - a stored or live event matching the filter
      EndOfStoredEvents   - the relay finished replaying stored events
      Closed(reason)      - the relay ended the subscription

    Dropping the receiver is the signal to tear the subscription down.
    Reconnects and retries, if any, live behind this trait.
*/

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core_event::{Event, Filter, RelayUrl};

/// Message streamed from one relay subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    Event(Event),
    EndOfStoredEvents,
    Closed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Failed to connect to {relay}: {reason}")]
    ConnectFailed { relay: RelayUrl, reason: String },

    #[error("Timed out connecting to {0}")]
    Timeout(RelayUrl),
}

impl RelayError {
    pub fn relay(&self) -> &RelayUrl {
        match self {
            RelayError::ConnectFailed { relay, .. } => relay,
            RelayError::Timeout(relay) => relay,
        }
    }
}

/// Opens subscriptions on individual relays
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn subscribe(
        &self,
        relay: &RelayUrl,
        filter: &Filter,
    ) -> Result<mpsc::Receiver<RelayMessage>, RelayError>;
}
