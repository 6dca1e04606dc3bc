// =============================================================================
// Window analytics — derived statistics over an observation series
// =============================================================================
//
// Pure functions over a series; no I/O, no state. Consumers (the dashboard
// layer) call these on snapshots to drive metric cards.
// =============================================================================

use crate::market_data::Series;

/// Mean price over the trailing `window_ms` milliseconds ending at the last
/// observation (exclusive lower bound, inclusive upper bound).
///
/// Returns `None` for an empty series.
pub fn rolling_mean(series: &Series, window_ms: i64) -> Option<f64> {
    let last_ts = series.last()?.timestamp;
    let cutoff = last_ts - window_ms;

    let mut sum = 0.0;
    let mut count = 0usize;
    for obs in series.iter().filter(|o| o.timestamp > cutoff) {
        sum += obs.price;
        count += 1;
    }

    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;
    if !mean.is_finite() {
        return None;
    }
    Some(mean)
}

/// Per-step percentage change of price: element `i` is the change from
/// observation `i` to `i + 1`. The first observation has no predecessor, so
/// the result is one shorter than the input (empty for fewer than two
/// observations).
pub fn pct_change(series: &Series) -> Vec<f64> {
    let prices: Vec<f64> = series.iter().map(|o| o.price).collect();
    if prices.len() < 2 {
        return Vec::new();
    }

    prices
        .windows(2)
        .map(|w| {
            if w[0] == 0.0 {
                0.0
            } else {
                (w[1] - w[0]) / w[0] * 100.0
            }
        })
        .collect()
}

/// Sum of the volumes of the last `count` observations.
pub fn volume_sum(series: &Series, count: usize) -> f64 {
    let len = series.len();
    series
        .iter()
        .skip(len.saturating_sub(count))
        .map(|o| o.volume)
        .sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Observation;

    fn series_of(points: &[(i64, f64, f64)]) -> Series {
        let mut series = Series::new(1000);
        for &(ts, price, volume) in points {
            series.push(Observation::new(price, volume, ts));
        }
        series
    }

    #[test]
    fn rolling_mean_over_full_window() {
        // Three prices spaced 1 s apart, window covers all of them.
        let series = series_of(&[(0, 10.0, 1.0), (1000, 20.0, 1.0), (2000, 30.0, 1.0)]);
        let mean = rolling_mean(&series, 3000).unwrap();
        assert!((mean - 20.0).abs() < 1e-10);
    }

    #[test]
    fn rolling_mean_trims_to_window() {
        let series = series_of(&[(0, 10.0, 1.0), (1000, 20.0, 1.0), (2000, 30.0, 1.0)]);
        // A 1 s window ending at t=2000 covers only the last observation.
        let mean = rolling_mean(&series, 1000).unwrap();
        assert!((mean - 30.0).abs() < 1e-10);
    }

    #[test]
    fn rolling_mean_empty_series() {
        let series = Series::new(10);
        assert!(rolling_mean(&series, 60_000).is_none());
    }

    #[test]
    fn pct_change_known_values() {
        let series = series_of(&[(0, 100.0, 1.0), (1000, 110.0, 1.0), (2000, 121.0, 1.0)]);
        let changes = pct_change(&series);
        assert_eq!(changes.len(), 2);
        assert!((changes[0] - 10.0).abs() < 1e-10);
        assert!((changes[1] - 10.0).abs() < 1e-10);
    }

    #[test]
    fn pct_change_needs_two_points() {
        assert!(pct_change(&Series::new(10)).is_empty());
        assert!(pct_change(&series_of(&[(0, 100.0, 1.0)])).is_empty());
    }

    #[test]
    fn volume_sum_of_trailing_window() {
        // Volumes 1..=100; last 10 sum to 91 + 92 + ... + 100 = 955.
        let points: Vec<(i64, f64, f64)> =
            (1..=100).map(|i| (i as i64 * 1000, 1.0, i as f64)).collect();
        let series = series_of(&points);
        assert!((volume_sum(&series, 10) - 955.0).abs() < 1e-10);
    }

    #[test]
    fn volume_sum_window_larger_than_series() {
        let series = series_of(&[(0, 1.0, 2.0), (1000, 1.0, 3.0)]);
        assert!((volume_sum(&series, 60) - 5.0).abs() < 1e-10);
    }
}
