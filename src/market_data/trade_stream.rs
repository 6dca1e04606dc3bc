// =============================================================================
// Trade stream subscriber — live bounded buffer over the @trade WebSocket feed
// =============================================================================
//
// Exactly one producer (the connection loop) mutates the buffer; any number
// of readers take snapshots through the lock. The loop is terminated through
// a watch channel so `stop()` never waits on the transport's own close
// handshake.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::error::MarketDataError;
use super::series::{Observation, Series};

/// Default capacity of the live trade buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

// ---------------------------------------------------------------------------
// Subscription state
// ---------------------------------------------------------------------------

/// Lifecycle of a stream subscription.
///
/// `Idle -> Connecting -> Open -> { Closing -> Closed, Reconnecting -> Connecting }`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closing,
    Closed,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamState::Idle => "idle",
            StreamState::Connecting => "connecting",
            StreamState::Open => "open",
            StreamState::Reconnecting => "reconnecting",
            StreamState::Closing => "closing",
            StreamState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Reconnect pacing after a dropped connection: the delay doubles after each
/// failed cycle and resets on a successful handshake.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

fn next_delay(current: Duration, policy: &ReconnectPolicy) -> Duration {
    (current * 2).min(policy.max_delay)
}

// ---------------------------------------------------------------------------
// StreamSubscriber
// ---------------------------------------------------------------------------

/// Maintains a live, bounded, most-recent-N buffer of trade events for one
/// symbol, independent of any polling cadence.
pub struct StreamSubscriber {
    symbol: String,
    ws_base_url: String,
    buffer: Arc<RwLock<Series>>,
    state: Arc<RwLock<StreamState>>,
    reconnect: ReconnectPolicy,
    /// Shutdown signal for the current connection loop. Replaced on every
    /// `start()` so a loop from a previous subscription can never outlive
    /// its stop: dropping the old sender wakes and terminates the old loop.
    shutdown: RwLock<watch::Sender<bool>>,
}

impl StreamSubscriber {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::with_capacity(symbol, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a subscriber whose buffer retains at most `capacity` events.
    pub fn with_capacity(symbol: impl Into<String>, capacity: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            // The stream endpoint addresses symbols in lower case.
            symbol: symbol.into().to_lowercase(),
            ws_base_url: "wss://stream.binance.com:9443".to_string(),
            buffer: Arc::new(RwLock::new(Series::new(capacity))),
            state: Arc::new(RwLock::new(StreamState::Idle)),
            reconnect: ReconnectPolicy::default(),
            shutdown: RwLock::new(shutdown_tx),
        }
    }

    pub fn with_ws_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.ws_base_url = base_url.into();
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    /// Point-in-time copy of the buffered observations, oldest first. Safe to
    /// call concurrently with ingestion; never blocks on network activity.
    pub fn snapshot(&self) -> Series {
        self.buffer.read().clone()
    }

    /// Open the subscription and return immediately; ingestion runs on its
    /// own tokio task until [`stop`](Self::stop) is called.
    ///
    /// Calling `start` while a subscription is already running is a no-op.
    /// After `stop`, a new `start` opens a fresh connection over the same
    /// buffer.
    pub fn start(&self) {
        {
            let mut st = self.state.write();
            match *st {
                StreamState::Idle | StreamState::Closed => *st = StreamState::Connecting,
                _ => {
                    warn!(symbol = %self.symbol, state = %*st, "subscription already running");
                    return;
                }
            }
        }

        // Fresh channel per subscription; dropping the previous sender
        // terminates any loop left over from an earlier start/stop cycle.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.write() = shutdown_tx;

        let url = format!("{}/ws/{}@trade", self.ws_base_url, self.symbol);
        let symbol = self.symbol.clone();
        let buffer = self.buffer.clone();
        let state = self.state.clone();
        let reconnect = self.reconnect.clone();

        tokio::spawn(run_subscription(
            url,
            symbol,
            buffer,
            state,
            shutdown_rx,
            reconnect,
        ));
    }

    /// Signal the connection loop to terminate and mark the subscription
    /// closed. Idempotent: calling it on an already-closed subscription is a
    /// no-op. The buffer keeps its last-known contents.
    pub fn stop(&self) {
        {
            let mut st = self.state.write();
            if *st == StreamState::Closed {
                return;
            }
            *st = StreamState::Closing;
        }
        self.shutdown.read().send_replace(true);
        *self.state.write() = StreamState::Closed;
        info!(symbol = %self.symbol, "trade stream stopped");
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

/// Move the state machine forward unless a stop was requested. Returns
/// `false` when the subscription is closing and the loop must exit.
fn advance(state: &RwLock<StreamState>, next: StreamState) -> bool {
    let mut st = state.write();
    match *st {
        StreamState::Closing | StreamState::Closed => false,
        _ => {
            *st = next;
            true
        }
    }
}

async fn run_subscription(
    url: String,
    symbol: String,
    buffer: Arc<RwLock<Series>>,
    state: Arc<RwLock<StreamState>>,
    mut shutdown: watch::Receiver<bool>,
    reconnect: ReconnectPolicy,
) {
    let mut delay = reconnect.initial_delay;

    loop {
        if *shutdown.borrow() {
            break;
        }

        // The handshake races the shutdown signal so a hanging connect can
        // never delay `stop()`.
        let handshake = tokio::select! {
            result = connect_async(&url) => result,
            _ = shutdown.changed() => break,
        };

        match handshake {
            Ok((ws_stream, _response)) => {
                if !advance(&state, StreamState::Open) {
                    break;
                }
                info!(symbol = %symbol, url = %url, "trade stream connected");
                delay = reconnect.initial_delay;

                if ingest(ws_stream, &symbol, &buffer, &mut shutdown).await {
                    break;
                }
            }
            Err(e) => {
                let lost = MarketDataError::ConnectionLost(e.to_string());
                error!(symbol = %symbol, error = %lost, "trade stream handshake failed");
            }
        }

        if *shutdown.borrow() {
            break;
        }
        if !advance(&state, StreamState::Reconnecting) {
            break;
        }
        warn!(
            symbol = %symbol,
            delay_ms = delay.as_millis() as u64,
            "trade stream reconnecting after backoff"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
        delay = next_delay(delay, &reconnect);

        if !advance(&state, StreamState::Connecting) {
            break;
        }
    }

    debug!(symbol = %symbol, "trade stream task exited");
}

/// Read frames until the connection drops or shutdown is signalled.
/// Returns `true` when a stop was requested.
async fn ingest(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    symbol: &str,
    buffer: &Arc<RwLock<Series>>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match decode_trade_event(&text) {
                        Ok(obs) => buffer.write().push(obs),
                        Err(e) => {
                            warn!(symbol = %symbol, error = %e, "dropping undecodable trade message");
                        }
                    }
                }
                // Ping / Pong / Binary / Close frames carry no trade data;
                // tungstenite answers pings automatically.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let lost = MarketDataError::ConnectionLost(e.to_string());
                    error!(symbol = %symbol, error = %lost, "trade stream read error");
                    return false;
                }
                None => {
                    warn!(symbol = %symbol, "trade stream ended by server");
                    return false;
                }
            }
        }
    }
}

/// Decode a `@trade` event into an observation.
///
/// Expected shape:
/// ```json
/// { "e": "trade", "s": "BTCUSDT", "p": "30000.5", "q": "0.01", "T": 1685000000000 }
/// ```
fn decode_trade_event(text: &str) -> Result<Observation, MarketDataError> {
    let root: Value = serde_json::from_str(text)
        .map_err(|e| MarketDataError::Decode(format!("trade event is not JSON: {e}")))?;

    let price: f64 = root["p"]
        .as_str()
        .ok_or_else(|| MarketDataError::Decode("missing field p".to_string()))?
        .parse()
        .map_err(|e| MarketDataError::Decode(format!("failed to parse price: {e}")))?;

    let volume: f64 = root["q"]
        .as_str()
        .ok_or_else(|| MarketDataError::Decode("missing field q".to_string()))?
        .parse()
        .map_err(|e| MarketDataError::Decode(format!("failed to parse quantity: {e}")))?;

    let timestamp = root["T"]
        .as_i64()
        .ok_or_else(|| MarketDataError::Decode("missing field T".to_string()))?;

    Ok(Observation::new(price, volume, timestamp))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TRADE: &str = r#"{
        "e": "trade",
        "E": 1685000000010,
        "s": "BTCUSDT",
        "t": 12345,
        "p": "30000.5",
        "q": "0.01",
        "T": 1685000000000,
        "m": true
    }"#;

    #[test]
    fn decode_trade_event_ok() {
        let obs = decode_trade_event(SAMPLE_TRADE).expect("should decode");
        assert!((obs.price - 30000.5).abs() < f64::EPSILON);
        assert!((obs.volume - 0.01).abs() < f64::EPSILON);
        assert_eq!(obs.timestamp, 1685000000000);
    }

    #[test]
    fn decode_rejects_missing_fields() {
        let missing_price = r#"{"e": "trade", "q": "0.01", "T": 1685000000000}"#;
        let missing_time = r#"{"e": "trade", "p": "30000.5", "q": "0.01"}"#;
        let not_json = "not json at all";

        assert!(matches!(
            decode_trade_event(missing_price).unwrap_err(),
            MarketDataError::Decode(_)
        ));
        assert!(matches!(
            decode_trade_event(missing_time).unwrap_err(),
            MarketDataError::Decode(_)
        ));
        assert!(matches!(
            decode_trade_event(not_json).unwrap_err(),
            MarketDataError::Decode(_)
        ));
    }

    #[test]
    fn decode_rejects_unparseable_price() {
        let bad_price = r#"{"e": "trade", "p": "abc", "q": "0.01", "T": 1685000000000}"#;
        assert!(matches!(
            decode_trade_event(bad_price).unwrap_err(),
            MarketDataError::Decode(_)
        ));
    }

    #[test]
    fn new_subscriber_is_idle_with_empty_snapshot() {
        let sub = StreamSubscriber::new("BTCUSDT");
        assert_eq!(sub.state(), StreamState::Idle);
        // Symbol is normalised to lower case for the stream endpoint.
        assert_eq!(sub.symbol(), "btcusdt");
        // Snapshot before any message is an empty series, not an error.
        assert!(sub.snapshot().is_empty());
    }

    #[test]
    fn buffer_evicts_oldest_beyond_capacity() {
        let sub = StreamSubscriber::with_capacity("btcusdt", 5);
        for i in 0..6 {
            sub.buffer
                .write()
                .push(Observation::new(100.0 + i as f64, 1.0, i));
        }

        let snap = sub.snapshot();
        assert_eq!(snap.len(), 5);
        // The first-pushed event was evicted.
        assert_eq!(snap.iter().next().unwrap().timestamp, 1);
        assert_eq!(snap.last().unwrap().timestamp, 5);
    }

    #[test]
    fn snapshot_is_a_copy_not_a_live_handle() {
        let sub = StreamSubscriber::with_capacity("btcusdt", 10);
        sub.buffer.write().push(Observation::new(1.0, 1.0, 1));

        let snap = sub.snapshot();
        sub.buffer.write().push(Observation::new(2.0, 1.0, 2));

        assert_eq!(snap.len(), 1);
        assert_eq!(sub.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let sub = StreamSubscriber::new("btcusdt");
        sub.stop();
        assert_eq!(sub.state(), StreamState::Closed);
        // Second stop is a no-op, state stays Closed.
        sub.stop();
        assert_eq!(sub.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn snapshot_survives_stop() {
        let sub = StreamSubscriber::with_capacity("btcusdt", 10);
        sub.buffer.write().push(Observation::new(30000.5, 0.01, 1));
        sub.stop();

        let snap = sub.snapshot();
        assert_eq!(snap.len(), 1);
        assert!((snap.last().unwrap().price - 30000.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn start_against_unreachable_endpoint_then_stop() {
        let sub = StreamSubscriber::with_capacity("btcusdt", 10)
            .with_ws_base_url("ws://127.0.0.1:9")
            .with_reconnect_policy(ReconnectPolicy {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            });

        sub.start();
        // start() is non-blocking; the loop churns through failed handshakes.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            sub.state(),
            StreamState::Connecting | StreamState::Reconnecting
        ));

        sub.stop();
        assert_eq!(sub.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op() {
        let sub = StreamSubscriber::with_capacity("btcusdt", 10)
            .with_ws_base_url("ws://127.0.0.1:9")
            .with_reconnect_policy(ReconnectPolicy {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            });

        sub.start();
        sub.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_ne!(sub.state(), StreamState::Idle);
        sub.stop();
    }

    #[test]
    fn reconnect_delay_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        };
        let mut delay = policy.initial_delay;
        let mut observed = Vec::new();
        for _ in 0..7 {
            delay = next_delay(delay, &policy);
            observed.push(delay.as_secs());
        }
        assert_eq!(observed, vec![2, 4, 8, 16, 30, 30, 30]);
    }
}
