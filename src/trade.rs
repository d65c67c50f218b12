//! Closed-trade history.

use crate::ids::{PositionId, TradeId};
use crate::order::Side;
use crate::position::Position;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Closed,
}

/// An immutable record produced once, at the moment a position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub position_id: PositionId,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub status: TradeStatus,
    pub open_time: i64,
    pub close_time: i64,
}

impl Trade {
    pub fn duration(&self) -> i64 {
        self.close_time - self.open_time
    }

    /// Builds the closing trade record for `position` at `exit_price`/`close_time`.
    pub fn close(position: &Position, exit_price: f64, close_time: i64) -> Self {
        let pnl = (exit_price - position.entry_price) * position.size * position.side.sign();
        Self {
            id: TradeId::next(),
            position_id: position.id.clone(),
            symbol: position.symbol.clone(),
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            exit_price,
            pnl,
            status: TradeStatus::Closed,
            open_time: position.open_time,
            close_time,
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::OrderId;

    #[test]
    fn close_computes_signed_pnl_for_long() {
        let pos = Position::open(&OrderId::new(1), "EURUSD".into(), Side::Buy, 1000.0, 1.0501, 0);
        let trade = Trade::close(&pos, 1.0499, 10);
        assert!((trade.pnl - (-0.2)).abs() < 1e-9);
        assert!(!trade.is_win());
        assert_eq!(trade.duration(), 10);
    }

    #[test]
    fn close_computes_signed_pnl_for_short() {
        let pos = Position::open(&OrderId::new(2), "EURUSD".into(), Side::Sell, 1000.0, 1.0501, 0);
        let trade = Trade::close(&pos, 1.0499, 10);
        assert!((trade.pnl - 0.2).abs() < 1e-9);
        assert!(trade.is_win());
    }
}
