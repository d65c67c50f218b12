//! Cursor-driven candle stream over a [`DataProvider`].
//!
//! The cursor advances one candle at a time via [`Market::forward`]; the
//! cache is refilled from the provider once its tail grows thin. There is a
//! single logical cursor — no random seek, no rewinding.

use crate::candle::Candle;
use crate::data_provider::DataProvider;
use crate::error::MarketError;
use parking_lot::RwLock;
use std::sync::Arc;

const DEFAULT_CACHE_SIZE: usize = 500;
const DEFAULT_REFILL_THRESHOLD: usize = 100;

struct MarketState {
    cache: Vec<Candle>,
    current_index: i64,
    last_index_fetched: i64,
    finished: bool,
    initialized: bool,
    consecutive_empty_refills: u8,
}

/// A single-instrument candle stream with a bounded lookahead cache.
pub struct Market {
    provider: Arc<dyn DataProvider>,
    cache_size: usize,
    refill_threshold: usize,
    state: RwLock<MarketState>,
}

impl Market {
    pub fn new(provider: Arc<dyn DataProvider>) -> Self {
        Self::with_cache_size(provider, DEFAULT_CACHE_SIZE, DEFAULT_REFILL_THRESHOLD)
    }

    pub fn with_cache_size(
        provider: Arc<dyn DataProvider>,
        cache_size: usize,
        refill_threshold: usize,
    ) -> Self {
        Self {
            provider,
            cache_size,
            refill_threshold,
            state: RwLock::new(MarketState {
                cache: Vec::new(),
                current_index: -1,
                last_index_fetched: -1,
                finished: false,
                initialized: false,
                consecutive_empty_refills: 0,
            }),
        }
    }

    /// Loads the first window of candles. Idempotent once initialized.
    pub fn initialize(&self) -> Result<(), MarketError> {
        let mut state = self.state.write();
        if state.initialized {
            return Ok(());
        }
        let batch = self.provider.get_candles_by_index(0, self.cache_size.saturating_sub(1));
        state.last_index_fetched = batch.len() as i64 - 1;
        if batch.is_empty() {
            state.finished = true;
        } else {
            state.current_index = 0;
        }
        state.cache = batch;
        state.initialized = true;
        Ok(())
    }

    /// Advances the cursor by one candle. Returns `false` once the stream is
    /// finished (or was never initialized).
    pub fn forward(&self) -> bool {
        let mut state = self.state.write();
        if !state.initialized || state.finished {
            return false;
        }

        let tail_len = state.cache.len() as i64 - state.current_index;
        if tail_len <= self.refill_threshold as i64 {
            self.refill(&mut state);
        }

        let next = state.current_index + 1;
        if next >= state.cache.len() as i64 {
            state.finished = true;
            return false;
        }
        state.current_index = next;
        true
    }

    fn refill(&self, state: &mut MarketState) {
        let start = (state.last_index_fetched + 1).max(0) as usize;
        let end = start + self.cache_size - 1;
        let batch = self.provider.get_candles_by_index(start, end);
        if batch.is_empty() {
            state.consecutive_empty_refills = state.consecutive_empty_refills.saturating_add(1);
            return;
        }
        state.consecutive_empty_refills = 0;
        state.last_index_fetched += batch.len() as i64;
        state.cache.extend(batch);
    }

    pub fn current_candle(&self) -> Option<Candle> {
        let state = self.state.read();
        if state.current_index < 0 {
            return None;
        }
        state.cache.get(state.current_index as usize).copied()
    }

    pub fn current_price(&self) -> f64 {
        self.current_candle().map(|c| c.close).unwrap_or(0.0)
    }

    pub fn current_time(&self) -> i64 {
        self.current_candle().map(|c| c.timestamp).unwrap_or(0)
    }

    pub fn is_finished(&self) -> bool {
        self.state.read().finished
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().initialized
    }

    /// Returns the cached subrange `[first, current_index)` where `first` is
    /// the smallest cached position with `timestamp >= start_time`.
    ///
    /// Returns empty if `index` is out of range, or if `start_time` is
    /// strictly after the candle immediately preceding `index`.
    pub fn prev_candles(&self, start_time: i64, index: usize) -> Vec<Candle> {
        let state = self.state.read();
        if index == 0 || index > state.cache.len() {
            return Vec::new();
        }
        if start_time > state.cache[index - 1].timestamp {
            return Vec::new();
        }
        let first = state.cache[..index]
            .iter()
            .position(|c| c.timestamp >= start_time)
            .unwrap_or(0);
        state.cache[first..index].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_provider::VecDataProvider;

    fn make_market(n: usize) -> Market {
        let candles: Vec<Candle> = (0..n as i64)
            .map(|i| Candle::new(i * 60, 1.0, 1.01, 0.99, 1.0, 10.0))
            .collect();
        Market::with_cache_size(Arc::new(VecDataProvider::new(candles)), 5, 2)
    }

    #[test]
    fn initialize_empty_provider_finishes_immediately() {
        let market = Market::new(Arc::new(VecDataProvider::new(Vec::new())));
        market.initialize().unwrap();
        assert!(market.is_finished());
        assert!(!market.forward());
    }

    #[test]
    fn forward_advances_cursor_and_refills() {
        let market = make_market(12);
        market.initialize().unwrap();
        assert_eq!(market.current_time(), 0);
        let mut steps = 0;
        while market.forward() {
            steps += 1;
        }
        assert_eq!(steps, 11);
        assert!(market.is_finished());
    }

    #[test]
    fn prev_candles_out_of_range_index_is_empty() {
        let market = make_market(5);
        market.initialize().unwrap();
        assert!(market.prev_candles(0, 0).is_empty());
        assert!(market.prev_candles(0, 999).is_empty());
    }

    #[test]
    fn prev_candles_start_time_after_window_is_empty() {
        let market = make_market(5);
        market.initialize().unwrap();
        // candle[index-1].timestamp for index=2 is candle[1].timestamp == 60
        assert!(market.prev_candles(1000, 2).is_empty());
    }

    #[test]
    fn prev_candles_returns_bounded_subrange() {
        let market = make_market(5);
        market.initialize().unwrap();
        let got = market.prev_candles(60, 3);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].timestamp, 60);
    }
}
