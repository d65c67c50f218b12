//! OHLCV candlestick bar and its invariants.

use serde::{Deserialize, Serialize};

/// An immutable OHLCV bar.
///
/// Invariants (checked by [`Candle::validate`]):
/// `low <= min(open, close) <= max(open, close) <= high`, `high >= low`,
/// all prices strictly positive, `volume >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Unix seconds (UTC unless the provider documents otherwise).
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Describes why a candle failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleValidationError(pub String);

impl std::fmt::Display for CandleValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid candle: {}", self.0)
    }
}

impl std::error::Error for CandleValidationError {}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError("prices must be positive".into()));
        }
        if self.volume < 0.0 {
            return Err(CandleValidationError("volume must be non-negative".into()));
        }
        if self.high < self.low {
            return Err(CandleValidationError("high must be >= low".into()));
        }
        let body_high = self.open.max(self.close);
        let body_low = self.open.min(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(CandleValidationError(
                "low/high must bound open/close".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_candle_passes() {
        let c = Candle::new(0, 1.05, 1.06, 1.04, 1.055, 100.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn high_below_low_rejected() {
        let c = Candle::new(0, 1.05, 1.00, 1.04, 1.02, 100.0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn body_outside_range_rejected() {
        let c = Candle::new(0, 1.05, 1.06, 1.04, 1.10, 100.0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn negative_volume_rejected() {
        let c = Candle::new(0, 1.05, 1.06, 1.04, 1.05, -1.0);
        assert!(c.validate().is_err());
    }
}
