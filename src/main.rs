// =============================================================================
// CoinPulse Feed — Main Entry Point
// =============================================================================
//
// Wires the two ingestion channels for one symbol: the live trade stream
// (background task, bounded buffer) and the periodic REST poll cycle. The
// dashboard process consumes the snapshots; this binary runs the feed alone
// and logs a window summary per cycle.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analytics;
mod config;
mod exchange;
mod market_data;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::FeedConfig;
use crate::exchange::BinanceRest;
use crate::market_data::{PollingFetcher, StreamSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = FeedConfig::load("feed_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        FeedConfig::default()
    });

    // Override the symbol from env if available.
    if let Ok(sym) = std::env::var("COINPULSE_SYMBOL") {
        let sym = sym.trim().to_lowercase();
        if !sym.is_empty() {
            config.symbol = sym;
        }
    }

    info!(
        symbol = %config.symbol,
        poll_limit = config.poll_limit,
        buffer_capacity = config.buffer_capacity,
        refresh_secs = config.refresh_secs,
        "CoinPulse feed starting"
    );

    // ── 2. Live trade stream ─────────────────────────────────────────────
    let subscriber = Arc::new(
        StreamSubscriber::with_capacity(config.symbol.clone(), config.buffer_capacity)
            .with_ws_base_url(config.ws_base_url.clone()),
    );
    subscriber.start();

    // ── 3. REST fetcher ──────────────────────────────────────────────────
    let transport = Arc::new(BinanceRest::new());
    let fetcher = PollingFetcher::new(transport).with_base_url(config.rest_base_url.clone());

    // One-shot 24h summary so the session opens with market context.
    match fetcher.fetch_ticker(&config.symbol).await {
        Ok(ticker) => info!(
            symbol = %config.symbol,
            last_price = ticker.last_price,
            change_24h_pct = ticker.price_change_percent,
            volume_24h = ticker.volume,
            "24h summary"
        ),
        Err(e) => warn!(symbol = %config.symbol, error = %e, "failed to fetch 24h summary"),
    }

    // ── 4. Poll cycle ────────────────────────────────────────────────────
    let poll_symbol = config.symbol.clone();
    let poll_limit = config.poll_limit;
    let refresh_secs = config.refresh_secs;
    let stream = subscriber.clone();

    let poll_task = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(refresh_secs.max(1)));
        loop {
            interval.tick().await;

            match fetcher.fetch(&poll_symbol, poll_limit).await {
                Ok(series) => {
                    let live = stream.snapshot();
                    let last = series.last().copied();
                    info!(
                        symbol = %poll_symbol,
                        rows = series.len(),
                        last_price = last.map(|o| o.price).unwrap_or(0.0),
                        last_seen = %last
                            .and_then(|o| o.datetime())
                            .map(|dt| dt.to_rfc3339())
                            .unwrap_or_default(),
                        rolling_mean_60s = analytics::rolling_mean(&series, 60_000).unwrap_or(0.0),
                        trailing_volume = analytics::volume_sum(&series, 60),
                        live_buffered = live.len(),
                        stream_state = %stream.state(),
                        "poll cycle complete"
                    );
                }
                Err(e) => {
                    // Terminal for this cycle only; the next tick retries the
                    // whole operation.
                    error!(symbol = %poll_symbol, error = %e, "poll cycle failed");
                }
            }
        }
    });

    info!("feed running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    poll_task.abort();
    subscriber.stop();

    if let Err(e) = config.save("feed_config.json") {
        error!(error = %e, "failed to save feed config on shutdown");
    }

    info!("CoinPulse feed shut down complete.");
    Ok(())
}
