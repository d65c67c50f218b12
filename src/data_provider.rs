//! Historical candle sources consumed by [`crate::market::Market`].
//!
//! `DataProvider` is deliberately synchronous: candle lookups are plain
//! in-memory slice operations once a provider has loaded its data, so the
//! Market's cursor loop never has to await a provider call mid-tick.

use crate::candle::Candle;
use crate::error::MarketError;
use std::path::Path;

/// A source of time-ordered candles, queried by index range or time range.
pub trait DataProvider: Send + Sync {
    /// Returns candles `[start_idx, end_idx]` inclusive. May return fewer
    /// than requested at end-of-data; never an error for that reason alone.
    fn get_candles_by_index(&self, start_idx: usize, end_idx: usize) -> Vec<Candle>;

    /// Returns candles with `start <= timestamp <= end`.
    fn get_candles_by_time(&self, start: i64, end: i64) -> Vec<Candle>;

    /// Total number of candles currently available from this provider.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts a timestamp to the index of the first candle at or after it.
    fn time_to_index(&self, t: i64) -> Option<usize>;

    /// Converts an index to its candle's timestamp.
    fn index_to_time(&self, idx: usize) -> Option<i64>;
}

/// An in-memory provider over a caller-supplied, pre-sorted candle vector.
///
/// Used throughout the test suite to avoid filesystem dependencies.
pub struct VecDataProvider {
    candles: Vec<Candle>,
}

impl VecDataProvider {
    pub fn new(candles: Vec<Candle>) -> Self {
        Self { candles }
    }
}

impl DataProvider for VecDataProvider {
    fn get_candles_by_index(&self, start_idx: usize, end_idx: usize) -> Vec<Candle> {
        if start_idx >= self.candles.len() {
            return Vec::new();
        }
        let end = end_idx.min(self.candles.len().saturating_sub(1));
        if start_idx > end {
            return Vec::new();
        }
        self.candles[start_idx..=end].to_vec()
    }

    fn get_candles_by_time(&self, start: i64, end: i64) -> Vec<Candle> {
        self.candles
            .iter()
            .filter(|c| c.timestamp >= start && c.timestamp <= end)
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.candles.len()
    }

    fn time_to_index(&self, t: i64) -> Option<usize> {
        self.candles.iter().position(|c| c.timestamp >= t)
    }

    fn index_to_time(&self, idx: usize) -> Option<i64> {
        self.candles.get(idx).map(|c| c.timestamp)
    }
}

/// A provider that eagerly parses a `timestamp,open,high,low,close,volume`
/// CSV file into memory at construction, then serves lookups from that
/// vector exactly like [`VecDataProvider`].
pub struct CsvDataProvider {
    inner: VecDataProvider,
}

impl CsvDataProvider {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MarketError> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| MarketError::Data(format!("opening {}: {e}", path.display())))?;

        let mut candles = Vec::new();
        let mut last_ts: Option<i64> = None;
        for result in reader.records() {
            let record = result.map_err(|e| MarketError::Data(format!("reading row: {e}")))?;
            if record.len() < 6 {
                return Err(MarketError::Data(format!(
                    "expected 6 columns, found {}",
                    record.len()
                )));
            }
            let timestamp = parse_timestamp(&record[0])?;
            let open: f64 = record[1]
                .parse()
                .map_err(|_| MarketError::Data(format!("bad open {:?}", &record[1])))?;
            let high: f64 = record[2]
                .parse()
                .map_err(|_| MarketError::Data(format!("bad high {:?}", &record[2])))?;
            let low: f64 = record[3]
                .parse()
                .map_err(|_| MarketError::Data(format!("bad low {:?}", &record[3])))?;
            let close: f64 = record[4]
                .parse()
                .map_err(|_| MarketError::Data(format!("bad close {:?}", &record[4])))?;
            let volume: f64 = record[5]
                .parse()
                .map_err(|_| MarketError::Data(format!("bad volume {:?}", &record[5])))?;

            let candle = Candle::new(timestamp, open, high, low, close, volume);
            candle
                .validate()
                .map_err(|e| MarketError::Data(e.to_string()))?;

            if let Some(prev) = last_ts {
                if timestamp < prev {
                    return Err(MarketError::Data(format!(
                        "timestamps must be non-decreasing: {timestamp} after {prev}"
                    )));
                }
            }
            last_ts = Some(timestamp);
            candles.push(candle);
        }

        Ok(Self { inner: VecDataProvider::new(candles) })
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS` (assumed UTC) into Unix seconds.
fn parse_timestamp(s: &str) -> Result<i64, MarketError> {
    use chrono::NaiveDateTime;
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc().timestamp())
        .map_err(|e| MarketError::Data(format!("bad timestamp {s:?}: {e}")))
}

impl DataProvider for CsvDataProvider {
    fn get_candles_by_index(&self, start_idx: usize, end_idx: usize) -> Vec<Candle> {
        self.inner.get_candles_by_index(start_idx, end_idx)
    }

    fn get_candles_by_time(&self, start: i64, end: i64) -> Vec<Candle> {
        self.inner.get_candles_by_time(start, end)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn time_to_index(&self, t: i64) -> Option<usize> {
        self.inner.time_to_index(t)
    }

    fn index_to_time(&self, idx: usize) -> Option<i64> {
        self.inner.index_to_time(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Candle> {
        vec![
            Candle::new(0, 1.0, 1.1, 0.9, 1.05, 100.0),
            Candle::new(60, 1.05, 1.2, 1.0, 1.10, 110.0),
            Candle::new(120, 1.10, 1.15, 1.05, 1.08, 90.0),
        ]
    }

    #[test]
    fn vec_provider_index_range() {
        let p = VecDataProvider::new(sample());
        assert_eq!(p.get_candles_by_index(0, 1).len(), 2);
        assert_eq!(p.get_candles_by_index(0, 100).len(), 3);
        assert!(p.get_candles_by_index(10, 20).is_empty());
    }

    #[test]
    fn vec_provider_time_range() {
        let p = VecDataProvider::new(sample());
        let got = p.get_candles_by_time(60, 120);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn vec_provider_time_to_index() {
        let p = VecDataProvider::new(sample());
        assert_eq!(p.time_to_index(60), Some(1));
        assert_eq!(p.time_to_index(1000), None);
    }

    #[test]
    fn csv_rejects_non_monotonic_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candles.csv");
        std::fs::write(
            &path,
            "timestamp,open,high,low,close,volume\n\
             2024-01-01 00:01:00,1.05,1.06,1.04,1.05,10\n\
             2024-01-01 00:00:00,1.05,1.06,1.04,1.05,10\n",
        )
        .unwrap();
        assert!(CsvDataProvider::load(&path).is_err());
    }

    #[test]
    fn csv_loads_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("candles.csv");
        std::fs::write(
            &path,
            "timestamp,open,high,low,close,volume\n\
             2024-01-01 00:00:00,1.05000,1.06000,1.04000,1.05500,100\n\
             2024-01-01 00:01:00,1.05500,1.07000,1.05000,1.06000,120\n",
        )
        .unwrap();
        let provider = CsvDataProvider::load(&path).unwrap();
        assert_eq!(provider.len(), 2);
    }
}
