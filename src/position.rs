//! Open positions and their derived PnL.

use crate::ids::{OrderId, PositionId};
use crate::order::Side;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub open_time: i64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl Position {
    pub fn open(order_id: &OrderId, symbol: String, side: Side, size: f64, entry_price: f64, open_time: i64) -> Self {
        Self {
            id: PositionId::from_order(order_id),
            symbol,
            side,
            size,
            entry_price,
            current_price: entry_price,
            open_time,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn mark_to_market(&mut self, current_price: f64) {
        self.current_price = current_price;
    }

    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.entry_price) * self.size * self.side.sign()
    }

    pub fn market_value(&self) -> f64 {
        self.current_price * self.size
    }

    pub fn required_margin(&self, leverage: f64) -> f64 {
        (self.entry_price * self.size) / leverage
    }

    pub fn stop_loss_triggered(&self) -> bool {
        match (self.side, self.stop_loss) {
            (Side::Buy, Some(sl)) => self.current_price <= sl,
            (Side::Sell, Some(sl)) => self.current_price >= sl,
            (_, None) => false,
        }
    }

    pub fn take_profit_triggered(&self) -> bool {
        match (self.side, self.take_profit) {
            (Side::Buy, Some(tp)) => self.current_price >= tp,
            (Side::Sell, Some(tp)) => self.current_price <= tp,
            (_, None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_buy(entry: f64) -> Position {
        Position::open(&OrderId::new(1), "EURUSD".into(), Side::Buy, 1000.0, entry, 0)
    }

    #[test]
    fn unrealized_pnl_long() {
        let mut p = open_buy(1.0500);
        p.mark_to_market(1.0550);
        assert!((p.unrealized_pnl() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn unrealized_pnl_short() {
        let mut p = Position::open(&OrderId::new(2), "EURUSD".into(), Side::Sell, 1000.0, 1.0500, 0);
        p.mark_to_market(1.0450);
        assert!((p.unrealized_pnl() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_triggers_for_long_below_threshold() {
        let mut p = open_buy(1.0500).with_stop_loss(1.0450);
        p.mark_to_market(1.0440);
        assert!(p.stop_loss_triggered());
    }

    #[test]
    fn take_profit_does_not_trigger_prematurely() {
        let mut p = open_buy(1.0500).with_take_profit(1.0600);
        p.mark_to_market(1.0550);
        assert!(!p.take_profit_triggered());
    }
}
