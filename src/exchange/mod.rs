pub mod client;

// Re-export the transport seam for convenient access (e.g. `use crate::exchange::RestTransport`).
pub use client::{BinanceRest, RestTransport};
