//! Incremental trade-level statistics.
//!
//! Folds closed trades one at a time into running totals; [`Statistics`] is
//! the on-demand snapshot derived from those totals. Recomputing from the
//! full trade history must equal the incrementally folded result (P4).

use crate::trade::Trade;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Statistics {
    pub total_trades: u64,
    pub winners: u64,
    pub losers: u64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub average_trade_duration: f64,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    /// Signed run length: positive for a streak of wins, negative for losses.
    pub current_streak: i32,
}

#[derive(Default)]
pub struct StatisticsAccumulator {
    total_trades: u64,
    winners: u64,
    losers: u64,
    gross_profit: f64,
    gross_loss: f64,
    largest_win: f64,
    largest_loss: f64,
    total_duration: i64,
    max_consecutive_wins: u32,
    max_consecutive_losses: u32,
    current_streak: i32,
}

impl StatisticsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an accumulator from a full trade history (used by tests to
    /// check P4 against the incremental accumulation path).
    pub fn from_history(trades: &[Trade]) -> Self {
        let mut acc = Self::new();
        for t in trades {
            acc.record(t);
        }
        acc
    }

    pub fn record(&mut self, trade: &Trade) {
        self.total_trades += 1;
        self.total_duration += trade.duration();

        if trade.pnl > 0.0 {
            self.winners += 1;
            self.gross_profit += trade.pnl;
            self.largest_win = self.largest_win.max(trade.pnl);
            self.current_streak = if self.current_streak > 0 { self.current_streak + 1 } else { 1 };
            self.max_consecutive_wins = self.max_consecutive_wins.max(self.current_streak as u32);
        } else if trade.pnl < 0.0 {
            self.losers += 1;
            self.gross_loss += -trade.pnl;
            self.largest_loss = self.largest_loss.min(trade.pnl);
            self.current_streak = if self.current_streak < 0 { self.current_streak - 1 } else { -1 };
            self.max_consecutive_losses = self.max_consecutive_losses.max((-self.current_streak) as u32);
        } else {
            self.current_streak = 0;
        }
    }

    pub fn snapshot(&self) -> Statistics {
        let win_rate = if self.total_trades > 0 {
            self.winners as f64 / self.total_trades as f64 * 100.0
        } else {
            0.0
        };
        let profit_factor = if self.gross_loss > 0.0 {
            self.gross_profit / self.gross_loss
        } else if self.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        let average_win = if self.winners > 0 { self.gross_profit / self.winners as f64 } else { 0.0 };
        let average_loss = if self.losers > 0 { self.gross_loss / self.losers as f64 } else { 0.0 };
        let average_trade_duration = if self.total_trades > 0 {
            self.total_duration as f64 / self.total_trades as f64
        } else {
            0.0
        };

        Statistics {
            total_trades: self.total_trades,
            winners: self.winners,
            losers: self.losers,
            gross_profit: self.gross_profit,
            gross_loss: self.gross_loss,
            win_rate,
            profit_factor,
            average_win,
            average_loss,
            largest_win: self.largest_win,
            largest_loss: self.largest_loss,
            average_trade_duration,
            max_consecutive_wins: self.max_consecutive_wins,
            max_consecutive_losses: self.max_consecutive_losses,
            current_streak: self.current_streak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::OrderId;
    use crate::order::Side;
    use crate::position::Position;

    fn trade(pnl: f64) -> Trade {
        let pos = Position::open(&OrderId::next(), "EURUSD".into(), Side::Buy, 1000.0, 1.05, 0);
        let exit = 1.05 + pnl / 1000.0;
        Trade::close(&pos, exit, 10)
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let mut acc = StatisticsAccumulator::new();
        acc.record(&trade(10.0));
        acc.record(&trade(-5.0));
        acc.record(&trade(20.0));
        let snap = acc.snapshot();
        assert_eq!(snap.total_trades, 3);
        assert_eq!(snap.winners, 2);
        assert_eq!(snap.losers, 1);
        assert!((snap.win_rate - 66.66666666666667).abs() < 1e-6);
        assert!((snap.profit_factor - 6.0).abs() < 1e-6);
    }

    #[test]
    fn p4_incremental_matches_from_history() {
        let trades = vec![trade(5.0), trade(-3.0), trade(7.0), trade(-1.0)];
        let mut incremental = StatisticsAccumulator::new();
        for t in &trades {
            incremental.record(t);
        }
        let rebuilt = StatisticsAccumulator::from_history(&trades);

        let a = incremental.snapshot();
        let b = rebuilt.snapshot();
        assert_eq!(a.total_trades, b.total_trades);
        assert_eq!(a.winners, b.winners);
        assert_eq!(a.losers, b.losers);
        assert!((a.profit_factor - b.profit_factor).abs() < 1e-12);
    }

    #[test]
    fn consecutive_streaks_tracked() {
        let mut acc = StatisticsAccumulator::new();
        acc.record(&trade(1.0));
        acc.record(&trade(1.0));
        acc.record(&trade(-1.0));
        acc.record(&trade(-1.0));
        acc.record(&trade(-1.0));
        let snap = acc.snapshot();
        assert_eq!(snap.max_consecutive_wins, 2);
        assert_eq!(snap.max_consecutive_losses, 3);
        assert_eq!(snap.current_streak, -3);
    }
}
