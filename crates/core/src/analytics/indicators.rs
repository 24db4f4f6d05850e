//! Indicator math over a series of daily closes, oldest first.
//!
//! Every function returns `None` when the series is too short or the result
//! would not be finite.

/// Trading days per year.
pub const TRADING_DAYS: usize = 252;

/// Annual risk-free rate used for the Sharpe ratio.
pub const RISK_FREE_RATE: f64 = 0.02;

/// The trailing `n` values (or all of them when shorter).
pub fn tail(closes: &[f64], n: usize) -> &[f64] {
    &closes[closes.len().saturating_sub(n)..]
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    finite(var.sqrt())
}

/// Compound annual growth, treating the series length as trading days.
pub fn cagr(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let first = *closes.first()?;
    let last = *closes.last()?;
    if first <= 0.0 {
        return None;
    }
    let years = closes.len() as f64 / TRADING_DAYS as f64;
    finite((last / first).powf(1.0 / years) - 1.0)
}

/// Annualised volatility of daily log returns.
pub fn volatility(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 || closes.iter().any(|c| *c <= 0.0) {
        return None;
    }
    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    finite(std_dev(&returns)? * (TRADING_DAYS as f64).sqrt())
}

/// Simple moving average of the trailing `window` closes.
pub fn moving_average(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 {
        return None;
    }
    mean(tail(closes, window))
}

/// Wilder's relative strength index.
///
/// Seeded with the plain average gain/loss of the first `window` changes and
/// smoothed over the rest. No losses at all reads as 100.
pub fn rsi(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() < window + 1 {
        return None;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let w = window as f64;

    let (seed, rest) = deltas.split_at(window);
    let mut up = seed.iter().filter(|d| **d > 0.0).sum::<f64>() / w;
    let mut down = -seed.iter().filter(|d| **d < 0.0).sum::<f64>() / w;

    for delta in rest {
        let (gain, loss) = if *delta > 0.0 { (*delta, 0.0) } else { (0.0, -*delta) };
        up = (up * (w - 1.0) + gain) / w;
        down = (down * (w - 1.0) + loss) / w;
    }

    if down == 0.0 {
        return Some(100.0);
    }
    finite(100.0 - 100.0 / (1.0 + up / down))
}

/// Annualised Sharpe ratio of daily simple returns over [`RISK_FREE_RATE`].
pub fn sharpe_ratio(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 || closes.iter().any(|c| *c <= 0.0) {
        return None;
    }
    let daily_rf = RISK_FREE_RATE / TRADING_DAYS as f64;
    let excess: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0] - daily_rf)
        .collect();
    let sd = std_dev(&excess)?;
    if sd == 0.0 {
        return None;
    }
    finite((TRADING_DAYS as f64).sqrt() * mean(&excess)? / sd)
}

/// Largest peak-to-trough decline as a fraction of the peak.
pub fn max_drawdown(closes: &[f64]) -> Option<f64> {
    let mut peak = *closes.first()?;
    if peak <= 0.0 {
        return None;
    }
    let mut worst = 0.0_f64;
    for &price in &closes[1..] {
        peak = peak.max(price);
        worst = worst.max((peak - price) / peak);
    }
    finite(worst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_cagr_over_one_trading_year() {
        // 252 closes doubling end to end is one year at 100%
        let mut closes = vec![100.0; 252];
        closes[251] = 200.0;
        assert!(close(cagr(&closes).unwrap(), 1.0));
        assert_eq!(cagr(&[100.0]), None);
    }

    #[test]
    fn test_volatility_of_flat_series_is_zero() {
        assert_eq!(volatility(&[10.0, 10.0, 10.0]), Some(0.0));
        assert_eq!(volatility(&[10.0, 0.0]), None);
    }

    #[test]
    fn test_moving_average_uses_available_history() {
        let closes = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(moving_average(&closes, 2), Some(3.5));
        assert_eq!(moving_average(&closes, 50), Some(2.5));
        assert_eq!(moving_average(&[], 50), None);
    }

    #[test]
    fn test_rsi_bounds() {
        let rising: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let falling: Vec<f64> = (1..=20).rev().map(f64::from).collect();
        assert!(close(rsi(&falling, 14).unwrap(), 0.0));

        assert_eq!(rsi(&rising[..14], 14), None);
    }

    #[test]
    fn test_rsi_balanced_moves() {
        // Alternating +1/-1 keeps average gain equal to average loss
        let closes: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 10.0 } else { 11.0 })
            .collect();
        let value = rsi(&closes, 14).unwrap();
        assert!((value - 50.0).abs() < 5.0, "got {value}");
    }

    #[test]
    fn test_sharpe_needs_variation() {
        assert_eq!(sharpe_ratio(&[10.0, 10.0, 10.0]), None);
        let closes = [100.0, 101.0, 100.5, 102.0, 103.0];
        assert!(sharpe_ratio(&closes).unwrap() > 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        let closes = [100.0, 120.0, 90.0, 110.0, 60.0, 130.0];
        assert!(close(max_drawdown(&closes).unwrap(), 0.5));
        assert_eq!(max_drawdown(&[5.0]), Some(0.0));
        assert_eq!(max_drawdown(&[]), None);
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail(&[1.0, 2.0, 3.0], 2), &[2.0, 3.0]);
        assert_eq!(tail(&[1.0], 5), &[1.0]);
    }
}
