// =============================================================================
// Polling fetcher — retrying REST window fetch for one symbol
// =============================================================================
//
// Stateless between calls: every invocation performs a real request (any
// caching belongs to a wrapping layer outside this module). A call is bounded
// by timeout x attempts plus the backoff sleeps between them.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::exchange::RestTransport;

use super::error::MarketDataError;
use super::series::{Observation, Series, TickerSummary};

/// Largest trade window a single fetch may request.
pub const MAX_POLL_LIMIT: usize = 300;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retry behaviour for a single fetch invocation.
///
/// The default budget is 3 attempts with a 1 s sleep before the first retry,
/// doubling after each failed attempt (1 s, 2 s). Tests shrink the backoff to
/// keep the suite fast.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub attempts: u32,
    /// Sleep before the first retry; doubles after each failed attempt.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// PollingFetcher
// ---------------------------------------------------------------------------

/// Produces a fresh bounded [`Series`] for a symbol on demand, tolerating
/// transient network failures.
pub struct PollingFetcher {
    transport: Arc<dyn RestTransport>,
    base_url: String,
    retry: RetryPolicy,
}

impl PollingFetcher {
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self {
            transport,
            base_url: "https://api.binance.com".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // -------------------------------------------------------------------------
    // Trade-history window
    // -------------------------------------------------------------------------

    /// GET /api/v3/trades — fetch the most recent `limit` trades for `symbol`
    /// as a time-ordered window.
    ///
    /// Records missing a required field are dropped silently; the remaining
    /// records are stable-sorted ascending by timestamp and truncated to the
    /// last `limit`. An empty window is a valid result when the exchange
    /// returned no usable records.
    pub async fn fetch(&self, symbol: &str, limit: usize) -> Result<Series, MarketDataError> {
        let symbol = validate_symbol(symbol)?;
        if limit == 0 || limit > MAX_POLL_LIMIT {
            return Err(MarketDataError::InvalidRequest(format!(
                "limit must be in 1..={MAX_POLL_LIMIT}, got {limit}"
            )));
        }

        let url = format!(
            "{}/api/v3/trades?symbol={}&limit={}",
            self.base_url, symbol, limit
        );
        let body = self.get_with_retry(&url).await?;
        let series = parse_trades(&body, limit)?;

        debug!(symbol = %symbol, rows = series.len(), "trade window fetched");
        Ok(series)
    }

    // -------------------------------------------------------------------------
    // 24h summary snapshot
    // -------------------------------------------------------------------------

    /// GET /api/v3/ticker/24hr — fetch a single-point 24-hour summary.
    ///
    /// Shares the retry/backoff contract of [`fetch`](Self::fetch) but
    /// returns one record; there is no sorting or truncation, and a missing
    /// required field is a malformed response (single-point mode has nothing
    /// to drop to).
    pub async fn fetch_ticker(&self, symbol: &str) -> Result<TickerSummary, MarketDataError> {
        let symbol = validate_symbol(symbol)?;

        let url = format!("{}/api/v3/ticker/24hr?symbol={}", self.base_url, symbol);
        let body = self.get_with_retry(&url).await?;
        let summary = parse_ticker(&body)?;

        debug!(symbol = %symbol, last_price = summary.last_price, "24h summary fetched");
        Ok(summary)
    }

    // -------------------------------------------------------------------------
    // Retry loop
    // -------------------------------------------------------------------------

    /// Issue the request up to `retry.attempts` times, sleeping a doubling
    /// backoff between transient failures. Non-transient errors abort
    /// immediately.
    async fn get_with_retry(&self, url: &str) -> Result<String, MarketDataError> {
        let mut backoff = self.retry.base_backoff;
        let mut last_error = String::new();

        for attempt in 1..=self.retry.attempts {
            match self.transport.get_text(url).await {
                Ok(body) => return Ok(body),
                Err(MarketDataError::Transient(msg)) => {
                    warn!(attempt, max = self.retry.attempts, error = %msg, "request attempt failed");
                    last_error = msg;
                    if attempt < self.retry.attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(MarketDataError::FetchExhausted {
            attempts: self.retry.attempts,
            last_error,
        })
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

fn validate_symbol(symbol: &str) -> Result<String, MarketDataError> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return Err(MarketDataError::InvalidRequest(
            "symbol must be non-empty".to_string(),
        ));
    }
    // The exchange API is case-insensitive on REST; we normalise to upper.
    Ok(trimmed.to_uppercase())
}

/// Parse a /api/v3/trades response body.
///
/// Expected shape:
/// ```json
/// [ { "price": "30000.5", "qty": "0.01", "time": 1685000000000 }, ... ]
/// ```
fn parse_trades(body: &str, limit: usize) -> Result<Series, MarketDataError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| MarketDataError::MalformedResponse(format!("trades body is not JSON: {e}")))?;

    let records = root.as_array().ok_or_else(|| {
        MarketDataError::MalformedResponse("trades body is not an array".to_string())
    })?;

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        match parse_trade_record(record) {
            Some(obs) => rows.push(obs),
            None => debug!("skipping trade record with missing fields"),
        }
    }

    Ok(Series::from_unsorted(rows, limit))
}

/// Extract one observation from a trade record, or `None` when a required
/// field is absent or unparseable.
fn parse_trade_record(record: &Value) -> Option<Observation> {
    let price = parse_str_f64(&record["price"])?;
    let volume = parse_str_f64(&record["qty"])?;
    let timestamp = record["time"].as_i64()?;
    Some(Observation::new(price, volume, timestamp))
}

/// Parse a /api/v3/ticker/24hr response body into a single summary record.
fn parse_ticker(body: &str) -> Result<TickerSummary, MarketDataError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| MarketDataError::MalformedResponse(format!("ticker body is not JSON: {e}")))?;

    let last_price = parse_str_f64(&root["lastPrice"]).ok_or_else(|| {
        MarketDataError::MalformedResponse("ticker missing lastPrice".to_string())
    })?;
    let price_change_percent = parse_str_f64(&root["priceChangePercent"]).ok_or_else(|| {
        MarketDataError::MalformedResponse("ticker missing priceChangePercent".to_string())
    })?;
    let volume = parse_str_f64(&root["volume"])
        .ok_or_else(|| MarketDataError::MalformedResponse("ticker missing volume".to_string()))?;
    let timestamp = root["closeTime"]
        .as_i64()
        .ok_or_else(|| MarketDataError::MalformedResponse("ticker missing closeTime".to_string()))?;

    Ok(TickerSummary {
        last_price,
        price_change_percent,
        volume,
        timestamp,
    })
}

/// Binance sends numeric values as JSON strings on most endpoints; tolerate
/// plain numbers as well.
fn parse_str_f64(val: &Value) -> Option<f64> {
    match val {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
