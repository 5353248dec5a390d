use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single order was refused by the portfolio
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("insufficient cash: need ${required:.2}, have ${available:.2}")]
    InsufficientCash { required: f64, available: f64 },

    #[error("insufficient shares: selling {requested}, holding {held}")]
    InsufficientShares { requested: f64, held: f64 },

    #[error("ticker is not in the tracked universe")]
    UnknownTicker,

    #[error("quantity must be a positive number, got {quantity}")]
    InvalidQuantity { quantity: f64 },

    #[error("no bar for ticker in the current bar set")]
    MissingPrice,
}

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Order for {ticker} rejected: {reason}")]
    OrderRejected {
        ticker: String,
        reason: RejectionReason,
    },

    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    #[error("History is empty: no bars have been processed")]
    EmptyHistory,

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Backtest has not completed; no final state to report")]
    NotRun,

    #[error("Backtest cancelled after {processed_bars} bars")]
    Cancelled { processed_bars: usize },

    #[error("Timestamp {current} precedes previously processed {previous}")]
    NonMonotonicTimestamp {
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("Data loading error: {0}")]
    DataLoadError(String),

    #[error("CSV parse error: {0}")]
    CsvError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BacktestError>;
