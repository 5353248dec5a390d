pub mod loader;
pub mod synthetic;

pub use loader::{load_csv, load_json, read_csv};
pub use synthetic::{generate_synthetic_bars, SyntheticProvider};

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use common::{BacktestError, BarSet, Result};

/// Source of historical bars for a backtest
///
/// Implementations return one [`BarSet`] per trading timestamp in
/// `[start, end)`, oldest first, restricted to the requested tickers. A ticker
/// missing from a timestamp is left missing; the engine decides what that
/// means.
pub trait MarketDataProvider {
    fn fetch(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> Result<Vec<BarSet>>;
}

/// Load bar sets from file, detecting format from extension
pub fn load_file(path: &Path) -> Result<Vec<BarSet>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "csv" => load_csv(path),
        "json" => load_json(path),
        _ => Err(BacktestError::DataLoadError(format!(
            "Unsupported file format: {}",
            ext
        ))),
    }
}

/// Keep bar sets inside `[start, end)` and drop tickers nobody asked for
fn select(
    bar_sets: &[BarSet],
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<BarSet> {
    bar_sets
        .iter()
        .filter(|set| {
            let date = set.timestamp.date_naive();
            date >= start && date < end
        })
        .map(|set| {
            let mut selected = BarSet::new(set.timestamp);
            for ticker in tickers {
                if let Some(bar) = set.get(ticker) {
                    selected.insert(ticker.clone(), *bar);
                }
            }
            selected
        })
        .collect()
}

/// Serves pre-built bar sets, e.g. for tests or replays
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    bar_sets: Vec<BarSet>,
}

impl InMemoryProvider {
    pub fn new(bar_sets: Vec<BarSet>) -> Self {
        Self { bar_sets }
    }
}

impl MarketDataProvider for InMemoryProvider {
    fn fetch(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> Result<Vec<BarSet>> {
        Ok(select(&self.bar_sets, tickers, start, end))
    }
}

/// Reads bars from a CSV or JSON file on every fetch
#[derive(Debug, Clone)]
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MarketDataProvider for FileProvider {
    fn fetch(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> Result<Vec<BarSet>> {
        let bar_sets = load_file(&self.path)?;
        Ok(select(&bar_sets, tickers, start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::Bar;
    use std::io::Write;

    fn set(day: u32, tickers: &[&str]) -> BarSet {
        let mut set = BarSet::new(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap());
        for t in tickers {
            set.insert(*t, Bar::new(1.0, 1.0, 1.0, 1.0, 1.0));
        }
        set
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_in_memory_provider_filters_range_and_tickers() {
        let provider = InMemoryProvider::new(vec![
            set(1, &["A", "B"]),
            set(2, &["A", "B"]),
            set(3, &["A", "B"]),
            set(4, &["A", "B"]),
        ]);

        let fetched = provider.fetch(&["A".to_string()], date(2), date(4)).unwrap();

        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].timestamp.date_naive(), date(2));
        assert_eq!(fetched[1].timestamp.date_naive(), date(3));
        assert!(fetched.iter().all(|s| s.len() == 1 && s.contains("A")));
    }

    #[test]
    fn test_missing_ticker_is_not_filled_in() {
        let provider = InMemoryProvider::new(vec![set(1, &["A"])]);
        let fetched = provider
            .fetch(&["A".to_string(), "B".to_string()], date(1), date(2))
            .unwrap();
        assert!(!fetched[0].contains("B"));
    }

    #[test]
    fn test_unsupported_extension() {
        let result = load_file(Path::new("bars.parquet"));
        assert!(matches!(result, Err(BacktestError::DataLoadError(_))));
    }

    #[test]
    fn test_file_provider_reads_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,ticker,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-02,X,10,11,9,10.5,1000").unwrap();
        writeln!(file, "2024-01-02,Y,20,21,19,20.5,2000").unwrap();
        writeln!(file, "2024-01-03,X,10.5,12,10,11.5,1500").unwrap();
        writeln!(file, "2024-01-03,Y,20.5,22,20,21.5,2500").unwrap();
        file.flush().unwrap();

        let provider = FileProvider::new(file.path());
        let fetched = provider
            .fetch(&["X".to_string(), "Y".to_string()], date(1), date(31))
            .unwrap();

        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[1].close("X"), Some(11.5));
        assert_eq!(fetched[1].close("Y"), Some(21.5));
    }
}
