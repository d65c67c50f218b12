//! Order/position execution core: the Broker.
//!
//! Owns `positions`, `pendingOrders`, `tradeHistory`, and `balance`
//! exclusively; all public accessors return read-only snapshots.

use crate::error::{BrokerError, BrokerResult};
use crate::ids::OrderId;
use crate::order::{Order, OrderStatus, OrderType, Side};
use crate::position::Position;
use crate::trade::Trade;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Execution-price helpers implementing the spec's fixed asymmetric-spread
/// model: Buy executes at `price + spread`, Sell at `price - spread`; a
/// close uses the opposing side's adjustment.
pub mod pricing {
    use super::Side;

    pub fn execution_price(current_price: f64, side: Side, spread: f64, slippage: f64) -> f64 {
        match side {
            Side::Buy => current_price + spread + slippage,
            Side::Sell => current_price - spread - slippage,
        }
    }

    /// Closing a position applies the opposite side's spread adjustment.
    pub fn close_price(current_price: f64, opening_side: Side, spread: f64, slippage: f64) -> f64 {
        execution_price(current_price, opening_side.opposite(), spread, slippage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub initial_balance: f64,
    pub spread: f64,
    pub commission: f64,
    pub slippage: f64,
    pub leverage: f64,
    /// Margin level (percent) at or below which all positions are force-closed.
    pub stop_out_level: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            spread: 0.0001,
            commission: 0.0,
            slippage: 0.0,
            leverage: 100.0,
            stop_out_level: 50.0,
        }
    }
}

/// Snapshot of account-level figures, derived on demand (never stored).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: f64,
    pub equity: f64,
    pub used_margin: f64,
    pub free_margin: f64,
    pub margin_level: f64,
}

struct BrokerState {
    balance: f64,
    positions: HashMap<String, Position>,
    pending_orders: HashMap<String, Order>,
    trade_history: Vec<Trade>,
}

/// Events the Backtester should translate into streamed envelopes.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    OrderExecuted(Order),
    OrderPendingCreated(Order),
    OrderCancelled(OrderId),
    PositionOpened(Position),
    PositionClosed(Trade),
    MarginCall { closed: Vec<Trade> },
}

pub struct Broker {
    config: BrokerConfig,
    state: RwLock<BrokerState>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let balance = config.initial_balance;
        Self {
            config,
            state: RwLock::new(BrokerState {
                balance,
                positions: HashMap::new(),
                pending_orders: HashMap::new(),
                trade_history: Vec::new(),
            }),
        }
    }

    fn validate_order(order: &Order) -> BrokerResult<()> {
        if order.size <= 0.0 {
            return Err(BrokerError::Validation("size must be positive".into()));
        }
        if order.symbol.is_empty() {
            return Err(BrokerError::Validation("symbol must not be empty".into()));
        }
        match order.order_type {
            OrderType::Limit if order.limit_price.map_or(true, |p| p <= 0.0) => {
                return Err(BrokerError::Validation("limit orders require a positive limitPrice".into()));
            }
            OrderType::Stop if order.stop_price.map_or(true, |p| p <= 0.0) => {
                return Err(BrokerError::Validation("stop orders require a positive stopPrice".into()));
            }
            _ => {}
        }
        Ok(())
    }

    /// §4.2.1: validates, then either executes immediately (Market) or
    /// parks the order (Limit/Stop, no margin reserved yet).
    pub fn place_order(&self, mut order: Order, current_price: f64, now: i64) -> BrokerResult<(Order, Option<BrokerEvent>)> {
        Self::validate_order(&order)?;

        if order.order_type != OrderType::Market {
            let mut state = self.state.write();
            state.pending_orders.insert(order.id.0.clone(), order.clone());
            return Ok((order.clone(), Some(BrokerEvent::OrderPendingCreated(order))));
        }

        if current_price <= 0.0 {
            return Err(BrokerError::InvalidPrice);
        }

        let mut state = self.state.write();
        let exec_price = pricing::execution_price(current_price, order.side, self.config.spread, self.config.slippage);
        let margin = (exec_price * order.size) / self.config.leverage;
        let total_cost = margin + self.config.commission;
        if state.balance < total_cost {
            return Err(BrokerError::InsufficientBalance);
        }

        order.mark_executed(exec_price, now);
        state.balance -= total_cost;
        let mut position = Position::open(&order.id, order.symbol.clone(), order.side, order.size, exec_price, now);
        if let Some(sl) = order.stop_loss {
            position = position.with_stop_loss(sl);
        }
        if let Some(tp) = order.take_profit {
            position = position.with_take_profit(tp);
        }
        state.positions.insert(position.id.0.clone(), position.clone());

        Ok((order, Some(BrokerEvent::PositionOpened(position))))
    }

    /// §4.2.2.
    pub fn cancel_order(&self, id: &OrderId) -> BrokerResult<()> {
        let mut state = self.state.write();
        match state.pending_orders.get(&id.0) {
            None => Err(BrokerError::OrderNotFound),
            Some(order) if order.status.is_terminal() => Err(BrokerError::OrderAlreadyExecuted),
            Some(_) => {
                let mut order = state.pending_orders.remove(&id.0).unwrap();
                order.mark_cancelled();
                Ok(())
            }
        }
    }

    /// §4.2.3: matches pending orders against `current_price` in ascending
    /// order-id (== creation) order. Insufficient balance leaves an order
    /// pending rather than rejecting it.
    fn process_pending_orders(&self, state: &mut BrokerState, current_price: f64, now: i64) -> Vec<BrokerEvent> {
        let mut events = Vec::new();
        if current_price <= 0.0 {
            return events;
        }
        let mut ids: Vec<String> = state.pending_orders.keys().cloned().collect();
        ids.sort();

        for id in ids {
            let matched = match state.pending_orders.get(&id) {
                Some(order) => order.matches_price(current_price),
                None => false,
            };
            if !matched {
                continue;
            }
            let mut order = state.pending_orders.get(&id).unwrap().clone();
            let exec_price = pricing::execution_price(current_price, order.side, self.config.spread, self.config.slippage);
            let margin = (exec_price * order.size) / self.config.leverage;
            let total_cost = margin + self.config.commission;
            if state.balance < total_cost {
                continue; // retried next tick
            }

            order.mark_executed(exec_price, now);
            state.balance -= total_cost;
            let mut position = Position::open(&order.id, order.symbol.clone(), order.side, order.size, exec_price, now);
            if let Some(sl) = order.stop_loss {
                position = position.with_stop_loss(sl);
            }
            if let Some(tp) = order.take_profit {
                position = position.with_take_profit(tp);
            }
            state.pending_orders.remove(&id);
            state.positions.insert(position.id.0.clone(), position.clone());
            events.push(BrokerEvent::OrderExecuted(order));
            events.push(BrokerEvent::PositionOpened(position));
        }
        events
    }

    /// §4.2.5.
    pub fn close_position(&self, id: &str, current_price: f64, now: i64) -> BrokerResult<Trade> {
        let mut state = self.state.write();
        self.close_position_locked(&mut state, id, current_price, now)
    }

    fn close_position_locked(&self, state: &mut BrokerState, id: &str, current_price: f64, now: i64) -> BrokerResult<Trade> {
        let position = state.positions.remove(id).ok_or(BrokerError::PositionNotFound)?;
        let exit_price = pricing::close_price(current_price, position.side, self.config.spread, self.config.slippage);
        let margin = position.required_margin(self.config.leverage);
        let trade = Trade::close(&position, exit_price, now);
        state.balance += margin + trade.pnl - self.config.commission;
        state.trade_history.push(trade.clone());
        Ok(trade)
    }

    /// §4.2.7: mark positions to market, then run the pending-order engine,
    /// SL triggers, TP triggers, and the margin-call engine, in that order.
    pub fn update_positions(&self, current_price: f64, now: i64) -> Vec<BrokerEvent> {
        let mut state = self.state.write();
        let mut events = Vec::new();

        for position in state.positions.values_mut() {
            position.mark_to_market(current_price);
        }

        events.extend(self.process_pending_orders(&mut state, current_price, now));

        let sl_ids: Vec<String> = state
            .positions
            .values()
            .filter(|p| p.stop_loss_triggered())
            .map(|p| p.id.0.clone())
            .collect();
        for id in sl_ids {
            if let Ok(trade) = self.close_position_locked(&mut state, &id, current_price, now) {
                events.push(BrokerEvent::PositionClosed(trade));
            }
        }

        let tp_ids: Vec<String> = state
            .positions
            .values()
            .filter(|p| p.take_profit_triggered())
            .map(|p| p.id.0.clone())
            .collect();
        for id in tp_ids {
            if let Ok(trade) = self.close_position_locked(&mut state, &id, current_price, now) {
                events.push(BrokerEvent::PositionClosed(trade));
            }
        }

        if let Some(margin_call_events) = self.run_margin_call(&mut state, current_price, now) {
            events.push(margin_call_events);
        }

        events
    }

    /// §4.2.6: closes all positions, in ascending id order, if margin level
    /// has fallen to or below the stop-out level.
    fn run_margin_call(&self, state: &mut BrokerState, current_price: f64, now: i64) -> Option<BrokerEvent> {
        let account = self.account_state_locked(state);
        if account.used_margin <= 0.0 || account.margin_level > self.config.stop_out_level {
            return None;
        }
        let mut ids: Vec<String> = state.positions.keys().cloned().collect();
        ids.sort();
        let mut closed = Vec::new();
        for id in ids {
            if let Ok(trade) = self.close_position_locked(state, &id, current_price, now) {
                closed.push(trade);
            }
        }
        if closed.is_empty() {
            None
        } else {
            Some(BrokerEvent::MarginCall { closed })
        }
    }

    fn account_state_locked(&self, state: &BrokerState) -> AccountState {
        let unrealized: f64 = state.positions.values().map(|p| p.unrealized_pnl()).sum();
        let used_margin: f64 = state.positions.values().map(|p| p.required_margin(self.config.leverage)).sum();
        let equity = state.balance + unrealized;
        let free_margin = equity - used_margin;
        let margin_level = if used_margin > 0.0 { (equity / used_margin) * 100.0 } else { 0.0 };
        AccountState { balance: state.balance, equity, used_margin, free_margin, margin_level }
    }

    pub fn account_state(&self) -> AccountState {
        self.account_state_locked(&self.state.read())
    }

    pub fn balance(&self) -> f64 {
        self.state.read().balance
    }

    pub fn positions(&self) -> Vec<Position> {
        self.state.read().positions.values().cloned().collect()
    }

    pub fn pending_orders(&self) -> Vec<Order> {
        self.state.read().pending_orders.values().cloned().collect()
    }

    pub fn trade_history(&self) -> Vec<Trade> {
        self.state.read().trade_history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> Broker {
        Broker::new(BrokerConfig { initial_balance: 10_000.0, spread: 0.0001, leverage: 100.0, ..Default::default() })
    }

    #[test]
    fn s1_single_market_buy_round_trip() {
        let broker = broker();
        let order = Order::new("EURUSD".into(), OrderType::Market, Side::Buy, 1000.0, 0);
        let (order, _) = broker.place_order(order, 1.0500, 0).unwrap();
        assert_eq!(order.status, OrderStatus::Executed);
        assert!((order.executed_price.unwrap() - 1.0501).abs() < 1e-9);

        let positions = broker.positions();
        assert_eq!(positions.len(), 1);
        let pos_id = positions[0].id.0.clone();

        let trade = broker.close_position(&pos_id, 1.0500, 10).unwrap();
        assert!((trade.pnl - (-0.2)).abs() < 1e-9);
        assert!((broker.balance() - 9999.8).abs() < 1e-9);
        assert_eq!(broker.trade_history().len(), 1);
    }

    #[test]
    fn r1_place_then_cancel_limit_is_a_no_op() {
        let broker = broker();
        let balance_before = broker.balance();
        let order = Order::new("EURUSD".into(), OrderType::Limit, Side::Buy, 1000.0, 0).with_limit_price(1.0000);
        let (order, _) = broker.place_order(order, 1.0500, 0).unwrap();
        broker.cancel_order(&order.id).unwrap();
        assert_eq!(broker.balance(), balance_before);
        assert!(broker.positions().is_empty());
        assert!(broker.trade_history().is_empty());
    }

    #[test]
    fn s2_limit_fill_on_price_cross() {
        let broker = broker();
        let order = Order::new("EURUSD".into(), OrderType::Limit, Side::Buy, 5000.0, 0).with_limit_price(1.0480);
        broker.place_order(order, 1.0500, 0).unwrap();
        assert!(broker.positions().is_empty());

        let events = broker.update_positions(1.0470, 60);
        assert!(events.iter().any(|e| matches!(e, BrokerEvent::OrderExecuted(_))));
        assert_eq!(broker.positions().len(), 1);
        assert!(broker.pending_orders().is_empty());
    }

    #[test]
    fn s3_stop_loss_trigger() {
        let broker = broker();
        let order = Order::new("EURUSD".into(), OrderType::Market, Side::Buy, 1000.0, 0).with_stop_loss(1.0450);
        broker.place_order(order, 1.0500, 0).unwrap();

        let events = broker.update_positions(1.0440, 60);
        assert!(events.iter().any(|e| matches!(e, BrokerEvent::PositionClosed(_))));
        assert!(broker.positions().is_empty());
        let history = broker.trade_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].pnl < 0.0);
    }

    #[test]
    fn s4_margin_call_cascade() {
        let broker = Broker::new(BrokerConfig { initial_balance: 1000.0, leverage: 10.0, spread: 0.0, ..Default::default() });
        let order = Order::new("EURUSD".into(), OrderType::Market, Side::Buy, 9000.0, 0);
        broker.place_order(order, 1.0500, 0).unwrap();

        let events = broker.update_positions(1.0200, 60);
        assert!(events.iter().any(|e| matches!(e, BrokerEvent::MarginCall { .. })));
        assert!(broker.positions().is_empty());
        assert!(broker.balance() >= 0.0);
    }

    #[test]
    fn insufficient_balance_rejects_market_order() {
        let broker = Broker::new(BrokerConfig { initial_balance: 1.0, leverage: 1.0, ..Default::default() });
        let order = Order::new("EURUSD".into(), OrderType::Market, Side::Buy, 1000.0, 0);
        let result = broker.place_order(order, 1.0500, 0);
        assert!(matches!(result, Err(BrokerError::InsufficientBalance)));
    }

    #[test]
    fn pending_limit_order_stays_pending_on_insufficient_balance_at_match_time() {
        let broker = Broker::new(BrokerConfig { initial_balance: 1.0, leverage: 1.0, spread: 0.0, ..Default::default() });
        let order = Order::new("EURUSD".into(), OrderType::Limit, Side::Buy, 1000.0, 0).with_limit_price(1.05);
        broker.place_order(order, 1.10, 0).unwrap();
        broker.update_positions(1.00, 60);
        assert_eq!(broker.pending_orders().len(), 1);
        assert!(broker.positions().is_empty());
    }
}
