use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use common::{BacktestError, Bar, BarSet, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::MarketDataProvider;

// Equity-like parameters
const DAILY_VOLATILITY: f64 = 0.02;
const DRIFT: f64 = 0.0003;
const BASE_VOLUME: f64 = 5_000_000.0;

/// Generate a random walk of daily bars for every ticker on each weekday in
/// `[start, end)`
///
/// The walk starts every ticker at `initial_price`, which must be finite and
/// positive.
pub fn generate_synthetic_bars<R: Rng>(
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
    initial_price: f64,
    rng: &mut R,
) -> Result<Vec<BarSet>> {
    if !initial_price.is_finite() || initial_price <= 0.0 {
        return Err(BacktestError::Configuration(format!(
            "synthetic initial price must be a positive number, got {}",
            initial_price
        )));
    }

    let mut prices = vec![initial_price; tickers.len()];
    let mut bar_sets = Vec::new();

    let mut date = start;
    while date < end {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            let mut set = BarSet::new(date.and_time(NaiveTime::MIN).and_utc());

            for (ticker, price) in tickers.iter().zip(prices.iter_mut()) {
                let random_return: f64 = rng.gen_range(-1.0..1.0);
                let daily_return = DRIFT + DAILY_VOLATILITY * random_return;
                let new_price = *price * (1.0 + daily_return);

                // Generate OHLC
                let intraday_range = *price * rng.gen_range(0.01..0.04);
                let open = *price + rng.gen_range(-intraday_range / 2.0..intraday_range / 2.0);
                let close = new_price;
                let high = open.max(close) + rng.gen_range(0.0..intraday_range / 2.0);
                let low = (open.min(close) - rng.gen_range(0.0..intraday_range / 2.0)).max(0.0);

                // Higher volume on volatile days
                let volume_multiplier = 1.0 + daily_return.abs() * 10.0;
                let volume = (BASE_VOLUME * volume_multiplier * rng.gen_range(0.8..1.2)).round();

                set.insert(ticker.clone(), Bar::new(open, high, low, close, volume));
                *price = new_price;
            }

            bar_sets.push(set);
        }
        date += Duration::days(1);
    }

    Ok(bar_sets)
}

/// Provider backed by [`generate_synthetic_bars`]
///
/// With a seed, repeated fetches return identical data.
#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    initial_price: f64,
    seed: Option<u64>,
}

impl SyntheticProvider {
    pub fn new(initial_price: f64) -> Self {
        Self {
            initial_price,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl MarketDataProvider for SyntheticProvider {
    fn fetch(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> Result<Vec<BarSet>> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        generate_synthetic_bars(tickers, start, end, self.initial_price, &mut rng)
    }
}
