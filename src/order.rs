//! Order state machine.

use crate::ids::OrderId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// `+1.0` for Buy, `-1.0` for Sell; useful for signed PnL formulas.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Executed,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Executed | OrderStatus::Cancelled | OrderStatus::Rejected)
    }
}

/// A mutable order. See module docs for the transition diagram:
/// `Pending -> Executed | Cancelled | Rejected`, each terminal and final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub order_type: OrderType,
    pub side: Side,
    pub size: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: OrderStatus,
    pub created_at: i64,
    pub executed_at: Option<i64>,
    pub executed_price: Option<f64>,
}

impl Order {
    /// Builds a new, still-`Pending` order.
    ///
    /// ```
    /// use fx_backtester::order::{Order, OrderType, Side};
    /// let order = Order::new("EURUSD".into(), OrderType::Market, Side::Buy, 1000.0, 0);
    /// assert!(!order.status.is_terminal());
    /// ```
    pub fn new(symbol: String, order_type: OrderType, side: Side, size: f64, created_at: i64) -> Self {
        Self {
            id: OrderId::next(),
            symbol,
            order_type,
            side,
            size,
            limit_price: None,
            stop_price: None,
            stop_loss: None,
            take_profit: None,
            status: OrderStatus::Pending,
            created_at,
            executed_at: None,
            executed_price: None,
        }
    }

    pub fn with_limit_price(mut self, price: f64) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_stop_price(mut self, price: f64) -> Self {
        self.stop_price = Some(price);
        self
    }

    pub fn with_stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn with_take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    pub fn mark_executed(&mut self, price: f64, at: i64) {
        self.status = OrderStatus::Executed;
        self.executed_price = Some(price);
        self.executed_at = Some(at);
    }

    pub fn mark_cancelled(&mut self) {
        self.status = OrderStatus::Cancelled;
    }

    pub fn mark_rejected(&mut self) {
        self.status = OrderStatus::Rejected;
    }

    /// Whether the current market price satisfies this order's match
    /// condition (Limit/Stop only; Market orders always match).
    pub fn matches_price(&self, current_price: f64) -> bool {
        match self.order_type {
            OrderType::Market => true,
            OrderType::Limit => match (self.side, self.limit_price) {
                (Side::Buy, Some(p)) => current_price <= p,
                (Side::Sell, Some(p)) => current_price >= p,
                _ => false,
            },
            OrderType::Stop => match (self.side, self.stop_price) {
                (Side::Buy, Some(p)) => current_price >= p,
                (Side::Sell, Some(p)) => current_price <= p,
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_order_always_matches() {
        let o = Order::new("EURUSD".into(), OrderType::Market, Side::Buy, 1.0, 0);
        assert!(o.matches_price(1.23));
    }

    #[test]
    fn limit_buy_matches_at_or_below_limit() {
        let o = Order::new("EURUSD".into(), OrderType::Limit, Side::Buy, 1.0, 0)
            .with_limit_price(1.05);
        assert!(o.matches_price(1.05));
        assert!(o.matches_price(1.04));
        assert!(!o.matches_price(1.06));
    }

    #[test]
    fn stop_sell_matches_at_or_below_stop() {
        let o = Order::new("EURUSD".into(), OrderType::Stop, Side::Sell, 1.0, 0)
            .with_stop_price(1.05);
        assert!(o.matches_price(1.05));
        assert!(o.matches_price(1.00));
        assert!(!o.matches_price(1.10));
    }

    #[test]
    fn execute_then_cancel_is_not_a_valid_flow() {
        let mut o = Order::new("EURUSD".into(), OrderType::Market, Side::Buy, 1.0, 0);
        o.mark_executed(1.05, 1);
        assert!(o.status.is_terminal());
    }
}
