use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RejectionReason;

/// OHLCV bar data for one ticker at one timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Check the OHLCV consistency rules, reporting the first violation
    pub fn validate(&self) -> std::result::Result<(), String> {
        let fields = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(format!("{} is not a finite number", name));
            }
            if value < 0.0 {
                return Err(format!("{} is negative ({})", name, value));
            }
        }

        if self.high < self.low {
            return Err(format!("high {} below low {}", self.high, self.low));
        }
        if self.high < self.open.max(self.close) {
            return Err(format!("high {} below open/close", self.high));
        }
        if self.low > self.open.min(self.close) {
            return Err(format!("low {} above open/close", self.low));
        }

        Ok(())
    }
}

/// Bars for every tracked ticker at a single timestamp
///
/// Tickers keep the order they were inserted in, which is the order strategies
/// see them and therefore the order their orders compete for cash. Serialized
/// as a JSON object whose key order is preserved on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSet {
    pub timestamp: DateTime<Utc>,
    #[serde(with = "ordered_bars")]
    bars: Vec<(String, Bar)>,
}

impl BarSet {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bars: Vec::new(),
        }
    }

    pub fn with_bar(mut self, ticker: impl Into<String>, bar: Bar) -> Self {
        self.insert(ticker, bar);
        self
    }

    /// Add a bar, replacing an existing one for the same ticker in place
    pub fn insert(&mut self, ticker: impl Into<String>, bar: Bar) {
        let ticker = ticker.into();
        match self.bars.iter_mut().find(|(t, _)| *t == ticker) {
            Some((_, existing)) => *existing = bar,
            None => self.bars.push((ticker, bar)),
        }
    }

    pub fn get(&self, ticker: &str) -> Option<&Bar> {
        self.bars.iter().find(|(t, _)| t == ticker).map(|(_, b)| b)
    }

    pub fn close(&self, ticker: &str) -> Option<f64> {
        self.get(ticker).map(|b| b.close)
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.get(ticker).is_some()
    }

    /// Iterate bars in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bar)> {
        self.bars.iter().map(|(t, b)| (t.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

mod ordered_bars {
    use std::fmt;

    use serde::de::{self, MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::Bar;

    pub fn serialize<S: Serializer>(bars: &[(String, Bar)], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(bars.len()))?;
        for (ticker, bar) in bars {
            map.serialize_entry(ticker, bar)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, Bar)>, D::Error> {
        struct BarsVisitor;

        impl<'de> Visitor<'de> for BarsVisitor {
            type Value = Vec<(String, Bar)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of ticker to bar")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut bars: Vec<(String, Bar)> = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((ticker, bar)) = access.next_entry::<String, Bar>()? {
                    if bars.iter().any(|(t, _)| *t == ticker) {
                        return Err(de::Error::custom(format!("duplicate ticker {}", ticker)));
                    }
                    bars.push((ticker, bar));
                }
                Ok(bars)
            }
        }

        deserializer.deserialize_map(BarsVisitor)
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// A proposed transaction emitted by a strategy for the current bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub ticker: String,
    pub action: Action,
    pub quantity: f64,
}

impl Order {
    pub fn new(ticker: impl Into<String>, action: Action, quantity: f64) -> Self {
        Self {
            ticker: ticker.into(),
            action,
            quantity,
        }
    }

    pub fn buy(ticker: impl Into<String>, quantity: f64) -> Self {
        Self::new(ticker, Action::Buy, quantity)
    }

    pub fn sell(ticker: impl Into<String>, quantity: f64) -> Self {
        Self::new(ticker, Action::Sell, quantity)
    }

    /// Positive for buys, negative for sells
    pub fn signed_quantity(&self) -> f64 {
        match self.action {
            Action::Buy => self.quantity,
            Action::Sell => -self.quantity,
        }
    }
}

/// Immutable per-bar snapshot of the portfolio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub total_value: f64,
    pub positions: BTreeMap<String, f64>,
}

/// Record of an order the portfolio refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRejection {
    pub timestamp: DateTime<Utc>,
    pub order: Order,
    pub reason: RejectionReason,
}

/// One line of the final report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldingReport {
    pub ticker: String,
    pub quantity: f64,
    pub last_close: f64,
    pub market_value: f64,
}

/// End-of-run valuation against the engine's last seen closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub initial_capital: f64,
    pub holdings: Vec<HoldingReport>,
    pub cash: f64,
    pub total_invested: f64,
    pub total_value: f64,
    pub delta: f64,
}

/// Backtest result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub report: FinalReport,
    pub history: Vec<HistoryEntry>,
    pub rejections: Vec<OrderRejection>,
    pub tickers: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub bars_processed: usize,
    pub execution_time_ms: u64,
}
