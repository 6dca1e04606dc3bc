// =============================================================================
// Exchange REST transport — public Binance market-data endpoints
// =============================================================================
//
// Public endpoints only: no API keys, no request signing. The transport is
// the single network capability handed to the polling fetcher, kept behind a
// trait so tests can substitute a scripted double.
// =============================================================================

use async_trait::async_trait;
use tracing::debug;

use crate::market_data::MarketDataError;

/// Request timeout applied to every attempt (seconds).
const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Network capability used by the polling fetcher: issue a GET and return
/// the body of a 2xx response.
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// Perform a GET against `url`.
    ///
    /// Network failures, timeouts and non-2xx statuses are all reported as
    /// [`MarketDataError::Transient`] — the caller owns the retry policy.
    async fn get_text(&self, url: &str) -> Result<String, MarketDataError>;
}

/// Production transport backed by `reqwest` with a bounded request timeout.
#[derive(Clone)]
pub struct BinanceRest {
    client: reqwest::Client,
}

impl BinanceRest {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        debug!(timeout_secs = REQUEST_TIMEOUT_SECS, "REST transport initialised");

        Self { client }
    }
}

impl Default for BinanceRest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RestTransport for BinanceRest {
    async fn get_text(&self, url: &str) -> Result<String, MarketDataError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MarketDataError::Transient(format!("GET {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MarketDataError::Transient(format!(
                "GET {url} returned {status}"
            )));
        }

        resp.text()
            .await
            .map_err(|e| MarketDataError::Transient(format!("failed to read response body: {e}")))
    }
}

impl std::fmt::Debug for BinanceRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceRest")
            .field("timeout_secs", &REQUEST_TIMEOUT_SECS)
            .finish()
    }
}
