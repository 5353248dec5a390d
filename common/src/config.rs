use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, Result};

/// Moving-average crossover settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovingAverageParams {
    pub short_window: usize,
    pub long_window: usize,
    /// Shares per emitted order
    pub quantity: f64,
    /// Skip a signal identical to the last one emitted for the same ticker
    pub suppress_repeated_signals: bool,
}

impl Default for MovingAverageParams {
    fn default() -> Self {
        Self {
            short_window: 5,
            long_window: 30,
            quantity: 5.0,
            suppress_repeated_signals: false,
        }
    }
}

impl MovingAverageParams {
    pub fn validate(&self) -> Result<()> {
        if self.short_window == 0 || self.long_window == 0 {
            return Err(BacktestError::Configuration(
                "moving average windows must be at least 1".to_string(),
            ));
        }
        if self.short_window > self.long_window {
            return Err(BacktestError::Configuration(format!(
                "short window ({}) exceeds long window ({})",
                self.short_window, self.long_window
            )));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(BacktestError::Configuration(format!(
                "order quantity must be positive, got {}",
                self.quantity
            )));
        }
        Ok(())
    }
}

/// Backtest parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestParameters {
    // Universe
    pub tickers: Vec<String>,
    // Period, end exclusive
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    // Capital
    pub initial_capital: f64,
    // Strategy
    pub strategy: MovingAverageParams,
}

impl Default for BacktestParameters {
    fn default() -> Self {
        let tickers = [
            "AAPL", "NVDA", "GOOG", "RIVN", "NKE", "TSLA", "INFY", "WBD", "FOLD", "UBER", "CVX",
            "AMZN", "VNDA", "MSFT", "META", "JPM", "DIS",
        ];
        Self {
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
            start_date: NaiveDate::from_ymd_opt(2023, 1, 5).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 5).unwrap_or_default(),
            initial_capital: 50000.0,
            strategy: MovingAverageParams::default(),
        }
    }
}

impl BacktestParameters {
    /// Load parameters from a JSON file; absent fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            BacktestError::Configuration(format!("cannot open {}: {}", path.display(), e))
        })?;
        let params: Self = serde_json::from_reader(BufReader::new(file))?;
        Ok(params)
    }

    pub fn with_capital(mut self, capital: f64) -> Self {
        self.initial_capital = capital;
        self
    }

    pub fn with_tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tickers = tickers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_period(mut self, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    pub fn with_windows(mut self, short_window: usize, long_window: usize) -> Self {
        self.strategy.short_window = short_window;
        self.strategy.long_window = long_window;
        self
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.strategy.quantity = quantity;
        self
    }

    pub fn with_repeat_suppression(mut self) -> Self {
        self.strategy.suppress_repeated_signals = true;
        self
    }

    /// Reject configurations that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        validate_universe(&self.tickers)?;
        validate_capital(self.initial_capital)?;
        validate_period(self.start_date, self.end_date)?;
        self.strategy.validate()
    }
}

pub fn validate_universe(tickers: &[String]) -> Result<()> {
    if tickers.is_empty() {
        return Err(BacktestError::Configuration(
            "ticker universe is empty".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for ticker in tickers {
        if ticker.trim().is_empty() {
            return Err(BacktestError::Configuration(
                "ticker identifiers must not be blank".to_string(),
            ));
        }
        if !seen.insert(ticker.as_str()) {
            return Err(BacktestError::Configuration(format!(
                "ticker {} listed more than once",
                ticker
            )));
        }
    }
    Ok(())
}

pub fn validate_capital(capital: f64) -> Result<()> {
    if !capital.is_finite() || capital < 0.0 {
        return Err(BacktestError::Configuration(format!(
            "initial capital must be a non-negative amount, got {}",
            capital
        )));
    }
    Ok(())
}

pub fn validate_period(start_date: NaiveDate, end_date: NaiveDate) -> Result<()> {
    if start_date >= end_date {
        return Err(BacktestError::Configuration(format!(
            "start date {} is not before end date {}",
            start_date, end_date
        )));
    }
    Ok(())
}
