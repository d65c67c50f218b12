//! The Backtester facade: composes [`Market`] + [`Broker`], hosts playback
//! control, and fans out events to the streaming [`Hub`].
//!
//! Grounded on the teacher's composition-root style (one owning struct,
//! everything else reachable only through it — no globals, no singletons,
//! per §9) and its `tokio`-driven main loop shape.

use crate::broker::{Broker, BrokerConfig, BrokerEvent};
use crate::config::BacktestConfig;
use crate::error::{BacktestError, BacktestResult};
use crate::ids::OrderId;
use crate::market::Market;
use crate::order::{Order, OrderType, Side};
use crate::playback::{PlaybackController, PlaybackState};
use crate::position::Position;
use crate::statistics::{Statistics, StatisticsAccumulator};
use crate::streaming::{ControlSink, Envelope, EnvelopeKind, Hub, TradeEventPayload};
use crate::trade::Trade;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A single cancellation token shared by the time loop, the hub, and every
/// per-client task (§5.1). A plain flag plus a `Notify` is enough for the
/// one token this core needs; the teacher's stack has no `tokio-util`
/// dependency to reach for `CancellationToken`, so this doesn't add one.
#[derive(Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Why a `Forward()` call stopped returning `true`, carried in the
/// terminal `backtest_state` event for diagnostics (§4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MarketExhausted,
    MaxStepsReached,
    Cancelled,
}

impl StopReason {
    fn describe(self) -> &'static str {
        match self {
            StopReason::MarketExhausted => "market data exhausted",
            StopReason::MaxStepsReached => "max_steps reached",
            StopReason::Cancelled => "cancelled",
        }
    }
}

/// Composes the Market, the Broker, playback control, statistics, and
/// (optionally) a streaming hub into the single public trading API.
pub struct Backtester {
    symbol: String,
    market: Arc<Market>,
    broker: Arc<Broker>,
    playback: PlaybackController,
    statistics: RwLock<StatisticsAccumulator>,
    cancellation: CancellationToken,
    config: BacktestConfig,
    hub: RwLock<Option<Hub>>,
    step_count: AtomicU64,
}

impl Backtester {
    pub fn new(
        symbol: impl Into<String>,
        market: Arc<Market>,
        broker_config: BrokerConfig,
        config: BacktestConfig,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            market,
            broker: Arc::new(Broker::new(broker_config)),
            playback: PlaybackController::new(),
            statistics: RwLock::new(StatisticsAccumulator::new()),
            cancellation: CancellationToken::new(),
            config,
            hub: RwLock::new(None),
            step_count: AtomicU64::new(0),
        }
    }

    /// Attaches a streaming hub so subsequent ticks fan out events to it.
    /// Optional: a `Backtester` run headless (no visualization) simply
    /// never calls this.
    pub fn attach_hub(&self, hub: Hub) {
        *self.hub.write() = Some(hub);
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// §4.3 `Initialize`: loads the Market's first window and marks
    /// playback `Running` if it is still `Idle`.
    pub fn initialize(&self) -> BacktestResult<()> {
        self.market.initialize()?;
        self.playback.mark_running_if_idle();
        Ok(())
    }

    fn emit(&self, kind: EnvelopeKind) {
        if let Some(hub) = self.hub.read().as_ref() {
            hub.broadcast(Envelope::new(kind, self.market.current_time()));
        }
    }

    fn emit_broker_event(&self, event: BrokerEvent) {
        let account = self.broker.account_state();
        let payload = match event {
            BrokerEvent::OrderExecuted(order) => TradeEventPayload::OrderExecuted { order },
            BrokerEvent::OrderPendingCreated(order) => TradeEventPayload::OrderPendingCreated { order },
            BrokerEvent::OrderCancelled(id) => TradeEventPayload::OrderCancelled { order_id: id.0 },
            BrokerEvent::PositionOpened(position) => TradeEventPayload::PositionOpened { position },
            BrokerEvent::PositionClosed(trade) => {
                self.statistics.write().record(&trade);
                TradeEventPayload::PositionClosed { trade, account }
            }
            BrokerEvent::MarginCall { closed } => {
                for trade in &closed {
                    self.statistics.write().record(trade);
                }
                TradeEventPayload::MarginCall { closed, account }
            }
        };
        self.emit(EnvelopeKind::TradeEvent(payload));
    }

    fn emit_terminal_state(&self, reason: StopReason) {
        self.emit(EnvelopeKind::BacktestState {
            state: self.playback.state(),
            reason: Some(reason.describe().to_string()),
        });
    }

    /// §4.3 `Forward`: honors the pause gate and speed delay, advances the
    /// Market, then runs the Broker's full per-tick sub-phase order, and
    /// finally fans out this tick's events — all before returning control.
    pub async fn forward(&self) -> bool {
        if self.cancellation.is_cancelled() {
            self.playback.mark_stopped();
            self.emit_terminal_state(StopReason::Cancelled);
            return false;
        }

        if let Some(max_steps) = self.config.max_steps {
            if self.step_count.load(Ordering::SeqCst) >= max_steps {
                self.playback.mark_completed();
                self.emit_terminal_state(StopReason::MaxStepsReached);
                return false;
            }
        }

        tokio::select! {
            _ = self.playback.wait_while_paused() => {}
            _ = self.wait_for_cancellation() => {
                self.playback.mark_stopped();
                self.emit_terminal_state(StopReason::Cancelled);
                return false;
            }
        }
        if self.cancellation.is_cancelled() {
            self.playback.mark_stopped();
            self.emit_terminal_state(StopReason::Cancelled);
            return false;
        }

        let delay = self.playback.tick_delay(self.config.base_tick_duration());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.wait_for_cancellation() => {
                self.playback.mark_stopped();
                self.emit_terminal_state(StopReason::Cancelled);
                return false;
            }
        }

        if !self.market.forward() {
            self.playback.mark_completed();
            self.emit_terminal_state(StopReason::MarketExhausted);
            return false;
        }
        self.step_count.fetch_add(1, Ordering::SeqCst);

        let price = self.market.current_price();
        let now = self.market.current_time();
        let events = self.broker.update_positions(price, now);

        self.emit(EnvelopeKind::CandleUpdate {
            candle: self.market.current_candle().unwrap_or(crate::candle::Candle::new(now, price, price, price, price, 0.0)),
            price,
        });
        for event in events {
            self.emit_broker_event(event);
        }
        self.emit(EnvelopeKind::StatisticsUpdate(self.statistics.read().snapshot()));

        true
    }

    async fn wait_for_cancellation(&self) {
        loop {
            // Register interest before checking the flag: `notify_waiters`
            // only wakes futures already enlisted, so checking after would
            // risk missing a cancellation that lands in between.
            let notified = self.cancellation.notify.notified();
            if self.cancellation.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    fn synth_order(&self, order_type: OrderType, side: Side, size: f64) -> Order {
        Order::new(self.symbol.clone(), order_type, side, size, self.market.current_time())
    }

    /// §4.3 `Buy`: synthesizes and places a Market order on the buy side.
    pub fn buy(&self, size: f64) -> BacktestResult<Order> {
        self.place_market(Side::Buy, size)
    }

    /// §4.3 `Sell`: synthesizes and places a Market order on the sell side.
    pub fn sell(&self, size: f64) -> BacktestResult<Order> {
        self.place_market(Side::Sell, size)
    }

    fn place_market(&self, side: Side, size: f64) -> BacktestResult<Order> {
        let order = self.synth_order(OrderType::Market, side, size);
        let price = self.market.current_price();
        let now = self.market.current_time();
        let (order, event) = self.broker.place_order(order, price, now)?;
        if let Some(event) = event {
            self.emit_broker_event(event);
        }
        Ok(order)
    }

    /// Places a Limit or Stop order; no margin is reserved until it matches.
    pub fn place_pending_order(&self, order: Order) -> BacktestResult<Order> {
        let price = self.market.current_price();
        let now = self.market.current_time();
        let (order, event) = self.broker.place_order(order, price, now)?;
        if let Some(event) = event {
            self.emit_broker_event(event);
        }
        Ok(order)
    }

    pub fn cancel_order(&self, id: &OrderId) -> BacktestResult<()> {
        self.broker.cancel_order(id)?;
        self.emit_broker_event(BrokerEvent::OrderCancelled(id.clone()));
        Ok(())
    }

    /// §4.3 `ClosePosition`.
    pub fn close_position(&self, id: &str) -> BacktestResult<Trade> {
        let price = self.market.current_price();
        let now = self.market.current_time();
        let trade = self.broker.close_position(id, price, now)?;
        self.emit_broker_event(BrokerEvent::PositionClosed(trade.clone()));
        Ok(trade)
    }

    /// §4.3 `CloseAllPositions`: one trade event per close.
    pub fn close_all_positions(&self) -> Vec<Trade> {
        let ids: Vec<String> = self.broker.positions().into_iter().map(|p| p.id.0).collect();
        let mut trades = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(trade) = self.close_position(&id) {
                trades.push(trade);
            }
        }
        trades
    }

    pub fn current_price(&self) -> f64 {
        self.market.current_price()
    }

    pub fn current_time(&self) -> i64 {
        self.market.current_time()
    }

    pub fn balance(&self) -> f64 {
        self.broker.balance()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.broker.positions()
    }

    pub fn trade_history(&self) -> Vec<Trade> {
        self.broker.trade_history()
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics.read().snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.market.is_finished()
    }

    /// §4.3 `Stop`: cancels the token, halts playback, and tears down the
    /// streaming surface's client connections.
    pub fn stop(&self) {
        self.cancellation.cancel();
        self.playback.mark_stopped();
        if let Some(hub) = self.hub.read().as_ref() {
            hub.shutdown();
        }
    }
}

/// Lets the streaming hub dispatch ingress `play`/`pause`/`speed_change`
/// commands into the Playback Controller without holding a back-pointer
/// into the facade (§9's cyclic-reference redesign note).
impl ControlSink for Backtester {
    fn play(&self, speed: Option<f64>) {
        self.playback.play(speed.unwrap_or_else(|| self.playback.speed()));
    }

    fn pause(&self) {
        self.playback.pause();
    }

    fn set_speed(&self, speed: f64) {
        self.playback.set_speed(speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Candle;
    use crate::data_provider::VecDataProvider;

    fn candles(n: i64, start: f64, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = start + step * i as f64;
                Candle::new(i * 60, close, close + 0.001, close - 0.001, close, 100.0)
            })
            .collect()
    }

    fn backtester(candles: Vec<Candle>) -> Backtester {
        let market = Arc::new(Market::new(Arc::new(VecDataProvider::new(candles))));
        let mut config = BacktestConfig::default();
        config.base_tick_ms = 0; // tests run at full speed, no wall-clock delay
        let bt = Backtester::new("EURUSD", market, BrokerConfig::default(), config);
        bt.initialize().unwrap();
        bt
    }

    #[tokio::test]
    async fn forward_advances_and_returns_false_at_end() {
        let bt = backtester(candles(3, 1.05, 0.0));
        assert!(bt.forward().await);
        assert!(bt.forward().await);
        assert!(!bt.forward().await);
        assert!(bt.is_finished());
    }

    #[tokio::test]
    async fn buy_then_close_produces_one_trade() {
        let bt = backtester(candles(2, 1.0500, 0.0));
        let order = bt.buy(1000.0).unwrap();
        assert_eq!(order.status, crate::order::OrderStatus::Executed);
        let positions = bt.positions();
        assert_eq!(positions.len(), 1);
        let trade = bt.close_position(&positions[0].id.0).unwrap();
        assert_eq!(bt.trade_history().len(), 1);
        assert_eq!(bt.statistics().total_trades, 1);
        assert!(trade.pnl < 0.0); // round-trip through spread costs money (R2)
    }

    #[tokio::test]
    async fn max_steps_stops_forward_before_market_exhaustion() {
        let mut bt = backtester(candles(100, 1.05, 0.0001));
        bt.config.max_steps = Some(2);
        assert!(bt.forward().await);
        assert!(bt.forward().await);
        assert!(!bt.forward().await);
        assert!(!bt.is_finished()); // market itself still has data left
    }

    #[tokio::test]
    async fn stop_cancels_forward() {
        let bt = backtester(candles(100, 1.05, 0.0));
        bt.stop();
        assert!(!bt.forward().await);
        assert_eq!(bt.playback().state(), PlaybackState::Stopped);
    }
}
