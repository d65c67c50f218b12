//! Crate-wide error taxonomy.
//!
//! Every module exposes its own narrow error enum and this file stitches them
//! into one [`BacktestError`] via `From` impls, so callers of [`crate::Backtester`]
//! see a single closed set while `Market`/`Broker` stay unit-testable in isolation.

use std::fmt;

/// Errors surfaced by [`crate::market::Market`].
#[derive(Debug, Clone, PartialEq)]
pub enum MarketError {
    /// The configured data provider returned a corrupt or non-monotonic candle.
    Data(String),
    /// An operation was attempted before `Initialize` completed.
    NotInitialized,
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketError::Data(msg) => write!(f, "data error: {msg}"),
            MarketError::NotInitialized => write!(f, "market not initialized"),
        }
    }
}

impl std::error::Error for MarketError {}

/// Errors surfaced by [`crate::broker::Broker`].
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// Order input failed structural validation (non-positive size, missing limit/stop price).
    Validation(String),
    /// A market order could not reserve the required margin.
    InsufficientBalance,
    /// The current market price is unavailable (non-positive).
    InvalidPrice,
    /// No order with the given id is pending.
    OrderNotFound,
    /// The order has already executed and cannot be cancelled.
    OrderAlreadyExecuted,
    /// The order has already been cancelled.
    OrderAlreadyCancelled,
    /// No open position with the given id.
    PositionNotFound,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::Validation(msg) => write!(f, "validation error: {msg}"),
            BrokerError::InsufficientBalance => write!(f, "insufficient balance for margin"),
            BrokerError::InvalidPrice => write!(f, "current price unavailable"),
            BrokerError::OrderNotFound => write!(f, "order not found"),
            BrokerError::OrderAlreadyExecuted => write!(f, "order already executed"),
            BrokerError::OrderAlreadyCancelled => write!(f, "order already cancelled"),
            BrokerError::PositionNotFound => write!(f, "position not found"),
        }
    }
}

impl std::error::Error for BrokerError {}

/// Unified error taxonomy for the whole engine. A Non-goal-adjacent wrapper
/// around `MarketError` / `BrokerError` plus the facade-level concerns.
#[derive(Debug, Clone, PartialEq)]
pub enum BacktestError {
    Configuration(String),
    Market(MarketError),
    Broker(BrokerError),
    /// The streaming surface failed to deliver to a specific client; the
    /// client is dropped and the run continues.
    Stream(String),
    /// The run was cancelled via `Backtester::stop`.
    Cancelled,
}

impl fmt::Display for BacktestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacktestError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            BacktestError::Market(e) => write!(f, "{e}"),
            BacktestError::Broker(e) => write!(f, "{e}"),
            BacktestError::Stream(msg) => write!(f, "stream error: {msg}"),
            BacktestError::Cancelled => write!(f, "backtest cancelled"),
        }
    }
}

impl std::error::Error for BacktestError {}

impl From<MarketError> for BacktestError {
    fn from(e: MarketError) -> Self {
        BacktestError::Market(e)
    }
}

impl From<BrokerError> for BacktestError {
    fn from(e: BrokerError) -> Self {
        BacktestError::Broker(e)
    }
}

pub type MarketResult<T> = Result<T, MarketError>;
pub type BrokerResult<T> = Result<T, BrokerError>;
pub type BacktestResult<T> = Result<T, BacktestError>;
