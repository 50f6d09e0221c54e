//! Small indicator toolbox used by the signal generators.
//!
//! Every function takes a price slice oldest-first and returns `None`
//! until enough history exists, so strategies stay quiet while warming
//! up instead of emitting half-baked readings.

/// Exponential moving average over the whole slice, seeded with the
/// first value.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period || period == 0 {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut ema = values[0];
    for value in &values[1..] {
        ema = alpha * value + (1.0 - alpha) * ema;
    }
    Some(ema)
}

/// Wilder RSI over the trailing `period` deltas, in [0, 100].
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if values.len() < period + 1 {
        return None;
    }
    let deltas: Vec<f64> = values[values.len() - period - 1..]
        .windows(2)
        .map(|w| w[1] - w[0])
        .collect();
    let gains: f64 = deltas.iter().filter(|d| **d > 0.0).sum();
    let losses: f64 = -deltas.iter().filter(|d| **d < 0.0).sum::<f64>();
    if losses == 0.0 {
        return Some(100.0);
    }
    let rs = (gains / period as f64) / (losses / period as f64);
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line (EMA12 − EMA26).
pub fn macd_line(values: &[f64]) -> Option<f64> {
    Some(ema(values, 12)? - ema(values, 26)?)
}

/// (low, high) over the trailing `window` values.
pub fn rolling_extrema(values: &[f64], window: usize) -> Option<(f64, f64)> {
    if values.len() < window || window == 0 {
        return None;
    }
    let slice = &values[values.len() - window..];
    let low = slice.iter().copied().fold(f64::MAX, f64::min);
    let high = slice.iter().copied().fold(f64::MIN, f64::max);
    Some((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_tracks_a_ramp() {
        let values: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let ema = ema(&values, 10).unwrap();
        // Lags behind the latest value but well above the mean.
        assert!(ema > 20.0 && ema < 29.0);
    }

    #[test]
    fn rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert!(rsi(&falling, 14).unwrap() < 1.0);

        assert!(rsi(&[1.0, 2.0], 14).is_none());
    }

    #[test]
    fn macd_sign_follows_direction() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.1).collect();
        assert!(macd_line(&rising).unwrap() > 0.0);

        let falling: Vec<f64> = (0..40).map(|i| 100.0 - i as f64 * 0.1).collect();
        assert!(macd_line(&falling).unwrap() < 0.0);
    }

    #[test]
    fn extrema_over_trailing_window() {
        let values = [5.0, 1.0, 9.0, 3.0, 4.0];
        assert_eq!(rolling_extrema(&values, 3), Some((3.0, 9.0)));
        assert!(rolling_extrema(&values, 6).is_none());
    }
}
