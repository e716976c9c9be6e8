// ===============================
// src/risk.rs
// ===============================
use thiserror::Error;

use crate::domain::Side;

/// Widest distance a quote may sit from the mid before it is refused.
pub const MAX_QUOTE_DEVIATION_BPS: f64 = 500.0;

/// Largest base spread that stays inside the band. Full inventory skew
/// widens one side to twice the base spread.
pub const MAX_BASE_SPREAD_BPS: f64 = MAX_QUOTE_DEVIATION_BPS / 2.0;

#[derive(Debug, Error, PartialEq)]
pub enum RiskError {
    #[error("price {0} is not a positive finite number")]
    Price(f64),
    #[error("size {0} is not positive")]
    Size(f64),
    #[error("price {px} is {dev_bps:.1} bps from mid {mid}")]
    PriceBand { px: f64, mid: f64, dev_bps: f64 },
    #[error("{side:?} quote {px} would cross mid {mid}")]
    Crossed { side: Side, px: f64, mid: f64 },
}

/// Pre-placement checks on a computed quote. The gateway assumes price and
/// size are already valid, so nothing reaches it without passing here.
pub fn check_quote(side: Side, px: f64, sz: f64, mid: f64) -> Result<(), RiskError> {
    // 1) Harga & size
    if !px.is_finite() || px <= 0.0 {
        return Err(RiskError::Price(px));
    }
    if !sz.is_finite() || sz <= 0.0 {
        return Err(RiskError::Size(sz));
    }

    // 2) Price band
    let dev_bps = (px - mid).abs() / mid * 1e4;
    if dev_bps > MAX_QUOTE_DEVIATION_BPS {
        return Err(RiskError::PriceBand { px, mid, dev_bps });
    }

    // 3) Post-only: bid tidak boleh di atas mid, ask tidak boleh di bawah mid
    let crossed = match side {
        Side::Buy => px > mid,
        Side::Sell => px < mid,
    };
    if crossed {
        return Err(RiskError::Crossed { side, px, mid });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_passive_quotes() {
        assert!(check_quote(Side::Buy, 99.95, 1.0, 100.0).is_ok());
        assert!(check_quote(Side::Sell, 100.0, 1.0, 100.0).is_ok());
    }

    #[test]
    fn test_rejects_bad_price_and_size() {
        assert_eq!(check_quote(Side::Buy, 0.0, 1.0, 100.0), Err(RiskError::Price(0.0)));
        assert!(matches!(check_quote(Side::Buy, f64::NAN, 1.0, 100.0), Err(RiskError::Price(_))));
        assert_eq!(check_quote(Side::Sell, 100.1, 0.0, 100.0), Err(RiskError::Size(0.0)));
    }

    #[test]
    fn test_rejects_far_and_crossed_quotes() {
        assert!(matches!(check_quote(Side::Buy, 90.0, 1.0, 100.0), Err(RiskError::PriceBand { .. })));
        assert!(matches!(check_quote(Side::Buy, 100.2, 1.0, 100.0), Err(RiskError::Crossed { .. })));
        assert!(matches!(check_quote(Side::Sell, 99.8, 1.0, 100.0), Err(RiskError::Crossed { .. })));
    }
}
