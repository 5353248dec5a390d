use std::collections::{HashMap, VecDeque};

use common::{Action, BarSet, MovingAverageParams, Order, Result};
use tracing::debug;

use super::Strategy;
use crate::indicators::trailing_sma;

/// Moving-average crossover: long while the short SMA is above the long SMA
///
/// Each ticker keeps its own window of the last `long_window` closes. Nothing
/// is emitted until that window is full. By default a signal is re-emitted on
/// every bar the crossover condition holds; `suppress_repeated_signals` only
/// lets a signal through when it differs from the last one for that ticker.
pub struct MovingAverageStrategy {
    params: MovingAverageParams,
    prices: HashMap<String, VecDeque<f64>>,
    last_signal: HashMap<String, Action>,
}

impl MovingAverageStrategy {
    pub fn new(params: MovingAverageParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            prices: HashMap::new(),
            last_signal: HashMap::new(),
        })
    }

    fn signal(&self, closes: &[f64]) -> Option<Action> {
        let short_ma = trailing_sma(closes, self.params.short_window)?;
        let long_ma = trailing_sma(closes, self.params.long_window)?;

        if short_ma > long_ma {
            Some(Action::Buy)
        } else if short_ma < long_ma {
            Some(Action::Sell)
        } else {
            None
        }
    }
}

impl Strategy for MovingAverageStrategy {
    fn on_bar(&mut self, bars: &BarSet) -> Vec<Order> {
        let long_window = self.params.long_window;
        let mut orders = Vec::new();

        for (ticker, bar) in bars.iter() {
            let window = self
                .prices
                .entry(ticker.to_string())
                .or_insert_with(|| VecDeque::with_capacity(long_window));
            if window.len() == long_window {
                window.pop_front();
            }
            window.push_back(bar.close);

            if window.len() < long_window {
                continue;
            }

            let closes: Vec<f64> = window.iter().copied().collect();
            let Some(action) = self.signal(&closes) else {
                continue;
            };

            if self.params.suppress_repeated_signals
                && self.last_signal.get(ticker) == Some(&action)
            {
                continue;
            }

            debug!(ticker, %action, close = bar.close, "crossover signal");
            self.last_signal.insert(ticker.to_string(), action);
            orders.push(Order::new(ticker, action, self.params.quantity));
        }

        orders
    }

    fn name(&self) -> &str {
        "moving-average-crossover"
    }
}
