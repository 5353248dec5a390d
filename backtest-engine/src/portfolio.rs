use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{
    BacktestError, BarSet, HistoryEntry, Order, OrderRejection, RejectionReason, Result,
};
use tracing::{debug, warn};

use crate::report::{self, Chart};

/// Cash and position book for one backtest run
///
/// Every tracked ticker starts with a zero position and a zero last price, so
/// "absent" and "flat" never mean different things. State only changes through
/// [`Portfolio::update_positions`] and [`Portfolio::apply_order`].
#[derive(Debug, Clone)]
pub struct Portfolio {
    initial_capital: f64,
    cash: f64,
    tickers: Vec<String>,
    positions: BTreeMap<String, f64>,
    last_price: BTreeMap<String, f64>,
    history: Vec<HistoryEntry>,
    rejections: Vec<OrderRejection>,
}

impl Portfolio {
    pub fn new(initial_capital: f64, tickers: &[String]) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            tickers: tickers.to_vec(),
            positions: tickers.iter().map(|t| (t.clone(), 0.0)).collect(),
            last_price: tickers.iter().map(|t| (t.clone(), 0.0)).collect(),
            history: Vec::new(),
            rejections: Vec::new(),
        }
    }

    /// Get available cash
    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Get quantity held per tracked ticker
    pub fn positions(&self) -> &BTreeMap<String, f64> {
        &self.positions
    }

    pub fn position(&self, ticker: &str) -> f64 {
        self.positions.get(ticker).copied().unwrap_or(0.0)
    }

    /// Get the close looked up by the most recent order per tracked ticker
    pub fn last_prices(&self) -> &BTreeMap<String, f64> {
        &self.last_price
    }

    pub fn last_price(&self, ticker: &str) -> Option<f64> {
        self.last_price.get(ticker).copied()
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// One entry per processed bar, oldest first
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Every order refused so far, in processing order
    pub fn rejections(&self) -> &[OrderRejection] {
        &self.rejections
    }

    /// Cash plus every position marked at its last seen price
    pub fn total_value(&self) -> f64 {
        self.cash
            + self
                .tickers
                .iter()
                .map(|t| self.position(t) * self.last_price.get(t).copied().unwrap_or(0.0))
                .sum::<f64>()
    }

    /// Validate and apply a single order at the bar's close
    ///
    /// The close is recorded as the ticker's last price before the solvency and
    /// inventory checks run, so a rejected order still moves `last_price`.
    pub fn apply_order(&mut self, order: &Order, bars: &BarSet) -> Result<()> {
        let reject = |reason: RejectionReason| BacktestError::OrderRejected {
            ticker: order.ticker.clone(),
            reason,
        };

        if !self.positions.contains_key(&order.ticker) {
            return Err(reject(RejectionReason::UnknownTicker));
        }
        if !order.quantity.is_finite() || order.quantity <= 0.0 {
            return Err(reject(RejectionReason::InvalidQuantity {
                quantity: order.quantity,
            }));
        }
        let price = bars
            .close(&order.ticker)
            .ok_or_else(|| reject(RejectionReason::MissingPrice))?;

        self.last_price.insert(order.ticker.clone(), price);

        let delta = order.signed_quantity();
        let cost = delta * price;

        if self.cash - cost < 0.0 {
            return Err(reject(RejectionReason::InsufficientCash {
                required: cost,
                available: self.cash,
            }));
        }

        let held = self.position(&order.ticker);
        if held + delta < 0.0 {
            return Err(reject(RejectionReason::InsufficientShares {
                requested: order.quantity,
                held,
            }));
        }

        if let Some(quantity) = self.positions.get_mut(&order.ticker) {
            *quantity += delta;
        }
        self.cash -= cost;

        debug!(
            ticker = %order.ticker,
            action = %order.action,
            quantity = order.quantity,
            price,
            cash = self.cash,
            "order filled"
        );

        Ok(())
    }

    /// Process one bar's orders in sequence, then append a history entry
    ///
    /// Positions are valued at each ticker's `last_price`, which only moves
    /// when an order for that ticker is looked up. A held ticker nobody
    /// trades on this bar keeps its older price.
    ///
    /// Rejected orders are logged and recorded but never abort the bar. The
    /// only error is a timestamp older than the last recorded entry, in which
    /// case nothing is changed.
    pub fn update_positions(
        &mut self,
        orders: &[Order],
        bars: &BarSet,
        timestamp: DateTime<Utc>,
    ) -> Result<&HistoryEntry> {
        if let Some(last) = self.history.last() {
            if timestamp < last.timestamp {
                return Err(BacktestError::NonMonotonicTimestamp {
                    previous: last.timestamp,
                    current: timestamp,
                });
            }
        }

        for order in orders {
            match self.apply_order(order, bars) {
                Ok(()) => {}
                Err(BacktestError::OrderRejected { reason, .. }) => {
                    warn!(
                        %timestamp,
                        ticker = %order.ticker,
                        action = %order.action,
                        quantity = order.quantity,
                        %reason,
                        "order rejected"
                    );
                    self.rejections.push(OrderRejection {
                        timestamp,
                        order: order.clone(),
                        reason,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        let entry = HistoryEntry {
            timestamp,
            cash: self.cash,
            total_value: self.total_value(),
            positions: self.positions.clone(),
        };
        let index = self.history.len();
        self.history.push(entry);

        Ok(&self.history[index])
    }

    /// Total value, cash and positions value over time
    pub fn portfolio_chart(&self) -> Result<Chart> {
        report::portfolio_chart(&self.history)
    }

    pub fn total_balance_chart(&self) -> Result<Chart> {
        report::total_balance_chart(&self.history)
    }

    pub fn cash_balance_chart(&self) -> Result<Chart> {
        report::cash_balance_chart(&self.history)
    }

    /// Quantity held per tracked ticker over time
    pub fn holdings_chart(&self) -> Result<Chart> {
        report::holdings_chart(&self.history, &self.tickers)
    }
}
