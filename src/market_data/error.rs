// =============================================================================
// Market-data error taxonomy
// =============================================================================
//
// Per-record and per-message failures are absorbed where they occur (dropped
// and logged); only per-call failures cross a component boundary, and they do
// so as a distinguishable variant of this enum. An empty window is a valid
// success, never an error.
// =============================================================================

use thiserror::Error;

/// Errors produced by the market-data core.
#[derive(Debug, Error)]
pub enum MarketDataError {
    /// A single attempt failed for a recoverable reason: connection refused,
    /// request timeout, or a non-2xx status. Retried internally by the
    /// polling fetcher.
    #[error("transient network failure: {0}")]
    Transient(String),

    /// The retry budget is spent; terminal for this invocation. The caller
    /// decides whether to try again on its next refresh cycle.
    #[error("fetch failed after {attempts} attempts: {last_error}")]
    FetchExhausted { attempts: u32, last_error: String },

    /// The response body did not match the expected structure. Surfaced
    /// immediately, without retry.
    #[error("malformed exchange response: {0}")]
    MalformedResponse(String),

    /// A single stream message could not be decoded. Dropped and logged;
    /// non-fatal to the subscription.
    #[error("undecodable stream message: {0}")]
    Decode(String),

    /// The persistent stream connection dropped. Fatal to that connection
    /// attempt, never to the process.
    #[error("stream connection lost: {0}")]
    ConnectionLost(String),

    /// The caller supplied arguments that violate the request contract
    /// (empty symbol, zero or oversized window).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl MarketDataError {
    /// Whether this failure may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, MarketDataError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MarketDataError::Transient("timeout".into()).is_transient());
        assert!(!MarketDataError::MalformedResponse("bad body".into()).is_transient());
        assert!(!MarketDataError::FetchExhausted {
            attempts: 3,
            last_error: "timeout".into()
        }
        .is_transient());
    }

    #[test]
    fn display_includes_attempt_count() {
        let err = MarketDataError::FetchExhausted {
            attempts: 3,
            last_error: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains("connection refused"));
    }
}
