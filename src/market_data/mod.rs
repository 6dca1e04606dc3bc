pub mod error;
pub mod poller;
pub mod series;
pub mod trade_stream;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Series`).
pub use error::MarketDataError;
pub use poller::{PollingFetcher, RetryPolicy};
pub use series::{Observation, Series, TickerSummary};
pub use trade_stream::{ReconnectPolicy, StreamState, StreamSubscriber};
