// =============================================================================
// Observation & Series — normalized market samples with bounded history
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single normalized trade sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Trade price (> 0).
    pub price: f64,
    /// Traded quantity (>= 0).
    pub volume: f64,
    /// Exchange event time, milliseconds since the UNIX epoch.
    pub timestamp: i64,
}

impl Observation {
    pub fn new(price: f64, volume: f64, timestamp: i64) -> Self {
        Self {
            price,
            volume,
            timestamp,
        }
    }

    /// Event time as a UTC datetime, for display and log output.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Single-point 24-hour market snapshot (last price, 24h % change, 24h
/// volume). Returned by the summary fetch mode instead of a [`Series`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickerSummary {
    pub last_price: f64,
    pub price_change_percent: f64,
    pub volume: f64,
    /// Window close time, milliseconds since the UNIX epoch.
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Series -- bounded, time-ordered observation window
// ---------------------------------------------------------------------------

/// Bounded, time-ordered sequence of observations.
///
/// Invariant: ascending by timestamp; duplicate timestamps are kept in
/// arrival order. Pushing beyond `capacity` evicts the oldest entry (strict
/// FIFO). A `Series` is only ever mutated by the component that owns it —
/// consumers receive point-in-time clones, never a live handle.
#[derive(Debug, Clone)]
pub struct Series {
    points: VecDeque<Observation>,
    capacity: usize,
}

impl Series {
    /// Create an empty series that retains at most `capacity` observations.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a series from unordered records: stable-sort ascending by
    /// timestamp, then keep the `limit` chronologically most recent.
    pub fn from_unsorted(mut records: Vec<Observation>, limit: usize) -> Self {
        // sort_by_key is stable: records sharing a timestamp keep arrival order.
        records.sort_by_key(|o| o.timestamp);

        let mut series = Self::new(limit);
        let skip = records.len().saturating_sub(series.capacity);
        for obs in records.into_iter().skip(skip) {
            series.points.push_back(obs);
        }
        series
    }

    /// Append an observation, evicting the oldest entry when full.
    pub fn push(&mut self, obs: Observation) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(obs);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest-first.
    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.points.iter()
    }

    /// The most recent observation, if any.
    pub fn last(&self) -> Option<&Observation> {
        self.points.back()
    }

    /// Copy the window into a plain `Vec`, oldest-first.
    pub fn to_vec(&self) -> Vec<Observation> {
        self.points.iter().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(ts: i64, price: f64) -> Observation {
        Observation::new(price, 1.0, ts)
    }

    #[test]
    fn push_evicts_oldest_when_full() {
        let mut series = Series::new(3);
        for i in 0..4 {
            series.push(obs(i * 1000, 100.0 + i as f64));
        }
        assert_eq!(series.len(), 3);
        // First-pushed entry is gone, the rest survive in order.
        let prices: Vec<f64> = series.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![101.0, 102.0, 103.0]);
    }

    #[test]
    fn capacity_plus_one_pushes_omit_first() {
        let cap = 500;
        let mut series = Series::new(cap);
        for i in 0..=(cap as i64) {
            series.push(obs(i, i as f64));
        }
        assert_eq!(series.len(), cap);
        assert_eq!(series.iter().next().unwrap().timestamp, 1);
        assert_eq!(series.last().unwrap().timestamp, cap as i64);
    }

    #[test]
    fn from_unsorted_sorts_ascending() {
        let records = vec![obs(3000, 3.0), obs(1000, 1.0), obs(2000, 2.0)];
        let series = Series::from_unsorted(records, 10);
        let ts: Vec<i64> = series.iter().map(|o| o.timestamp).collect();
        assert_eq!(ts, vec![1000, 2000, 3000]);
    }

    #[test]
    fn from_unsorted_keeps_duplicate_order() {
        // Equal timestamps must not be reordered (stable sort).
        let records = vec![obs(1000, 1.0), obs(2000, 2.0), obs(2000, 3.0)];
        let series = Series::from_unsorted(records, 10);
        let prices: Vec<f64> = series.iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn from_unsorted_truncates_to_most_recent() {
        let records: Vec<Observation> = (0..350).map(|i| obs(i * 1000, i as f64)).collect();
        let series = Series::from_unsorted(records, 300);
        assert_eq!(series.len(), 300);
        // The 50 oldest entries were dropped.
        assert_eq!(series.iter().next().unwrap().timestamp, 50_000);
        assert_eq!(series.last().unwrap().timestamp, 349_000);
    }

    #[test]
    fn empty_series_is_valid() {
        let series = Series::new(300);
        assert!(series.is_empty());
        assert_eq!(series.len(), 0);
        assert!(series.last().is_none());
    }

    #[test]
    fn observation_datetime_conversion() {
        let o = obs(1_685_000_000_000, 30_000.5);
        let dt = o.datetime().expect("valid millisecond timestamp");
        assert_eq!(dt.timestamp_millis(), 1_685_000_000_000);
    }
}
