//! Relay collaborators: transport boundary, ranking oracle, delivery index

pub mod connector;
pub mod memory;
pub mod pool;
pub mod scoreboard;
pub mod seen;

pub use connector::{RelayConnector, RelayError, RelayMessage};
pub use memory::MemoryRelayPool;
pub use pool::{PoolOptions, RelayPool};
pub use scoreboard::{RelayFeedback, RelayRanking, RelayScore, RelayScoreboard};
pub use seen::SeenOnRelays;
