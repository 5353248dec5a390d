use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use common::config::{validate_capital, validate_period, validate_universe};
use common::{BacktestError, BacktestResult, BarSet, FinalReport, HoldingReport, Result};
use tracing::{debug, info};

use crate::data::MarketDataProvider;
use crate::portfolio::Portfolio;
use crate::report::FinalReportText;
use crate::strategy::Strategy;

/// Lifecycle of a [`BacktestEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No portfolio yet, or the last run failed
    Uninitialized,
    Running,
    /// All bars processed, final state available
    Completed,
}

/// Drives a strategy bar by bar against historical data
pub struct BacktestEngine {
    initial_capital: f64,
    state: EngineState,
    portfolio: Option<Portfolio>,
    last_close_price: BTreeMap<String, f64>,
    tickers: Vec<String>,
    period: Option<(NaiveDate, NaiveDate)>,
    bars_processed: usize,
    execution_time_ms: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl BacktestEngine {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            state: EngineState::Uninitialized,
            portfolio: None,
            last_close_price: BTreeMap::new(),
            tickers: Vec::new(),
            period: None,
            bars_processed: 0,
            execution_time_ms: 0,
            cancel: None,
        }
    }

    /// Stop the bar loop before the next bar once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Portfolio of the last completed run
    pub fn portfolio(&self) -> Option<&Portfolio> {
        match self.state {
            EngineState::Completed => self.portfolio.as_ref(),
            _ => None,
        }
    }

    /// Close of every ticker at the last processed bar
    pub fn last_close_prices(&self) -> &BTreeMap<String, f64> {
        &self.last_close_price
    }

    pub fn bars_processed(&self) -> usize {
        self.bars_processed
    }

    /// Run a full backtest over `[start_date, end_date)`
    ///
    /// Always starts from a fresh portfolio. The run either processes every
    /// bar and leaves the engine `Completed`, or fails and leaves it
    /// `Uninitialized` with no partial state.
    pub fn run_backtest<S, P>(
        &mut self,
        strategy: &mut S,
        provider: &P,
        tickers: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<&Portfolio>
    where
        S: Strategy + ?Sized,
        P: MarketDataProvider + ?Sized,
    {
        let start_time = Instant::now();
        self.reset();

        validate_universe(tickers)?;
        validate_capital(self.initial_capital)?;
        validate_period(start_date, end_date)?;

        self.state = EngineState::Running;
        self.tickers = tickers.to_vec();
        self.period = Some((start_date, end_date));

        match self.simulate(strategy, provider, tickers, start_date, end_date) {
            Ok(portfolio) => {
                self.execution_time_ms = start_time.elapsed().as_millis() as u64;
                self.state = EngineState::Completed;
                Ok(&*self.portfolio.insert(portfolio))
            }
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    fn simulate<S, P>(
        &mut self,
        strategy: &mut S,
        provider: &P,
        tickers: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Portfolio>
    where
        S: Strategy + ?Sized,
        P: MarketDataProvider + ?Sized,
    {
        let mut portfolio = Portfolio::new(self.initial_capital, tickers);

        info!(
            tickers = %tickers.join(","),
            start = %start_date,
            end = %end_date,
            "fetching market data"
        );
        let bar_sets = provider.fetch(tickers, start_date, end_date)?;
        if bar_sets.is_empty() {
            return Err(BacktestError::DataUnavailable(format!(
                "no bars for {} between {} and {}",
                tickers.join(","),
                start_date,
                end_date
            )));
        }

        info!(
            bars = bar_sets.len(),
            strategy = strategy.name(),
            capital = self.initial_capital,
            "starting backtest"
        );

        let mut previous: Option<DateTime<Utc>> = None;
        for (index, bars) in bar_sets.iter().enumerate() {
            if self.is_cancelled() {
                info!(processed = index, "backtest cancelled");
                return Err(BacktestError::Cancelled {
                    processed_bars: index,
                });
            }

            if let Some(prev) = previous {
                if bars.timestamp < prev {
                    return Err(BacktestError::DataUnavailable(format!(
                        "bar at {} delivered after bar at {}",
                        bars.timestamp, prev
                    )));
                }
            }
            check_bar_set(bars, tickers)?;

            for ticker in tickers {
                if let Some(close) = bars.close(ticker) {
                    self.last_close_price.insert(ticker.clone(), close);
                }
            }

            let orders = strategy.on_bar(bars);
            debug!(timestamp = %bars.timestamp, orders = orders.len(), "processing bar");

            portfolio.update_positions(&orders, bars, bars.timestamp)?;
            self.bars_processed = index + 1;
            previous = Some(bars.timestamp);
        }

        info!(
            bars = self.bars_processed,
            cash = portfolio.cash(),
            total_value = portfolio.total_value(),
            rejected = portfolio.rejections().len(),
            "backtest completed"
        );

        Ok(portfolio)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn reset(&mut self) {
        self.state = EngineState::Uninitialized;
        self.portfolio = None;
        self.last_close_price.clear();
        self.tickers.clear();
        self.period = None;
        self.bars_processed = 0;
        self.execution_time_ms = 0;
    }

    fn completed_portfolio(&self) -> Result<&Portfolio> {
        self.portfolio().ok_or(BacktestError::NotRun)
    }

    /// Value final positions at the engine's last seen closes
    pub fn final_report(&self) -> Result<FinalReport> {
        let portfolio = self.completed_portfolio()?;

        let holdings: Vec<HoldingReport> = portfolio
            .tickers()
            .iter()
            .map(|ticker| {
                let quantity = portfolio.position(ticker);
                let last_close = self.last_close_price.get(ticker).copied().unwrap_or(0.0);
                HoldingReport {
                    ticker: ticker.clone(),
                    quantity,
                    last_close,
                    market_value: quantity * last_close,
                }
            })
            .collect();

        let total_invested: f64 = holdings.iter().map(|h| h.market_value).sum();
        let cash = portfolio.cash();
        let total_value = cash + total_invested;

        Ok(FinalReport {
            initial_capital: self.initial_capital,
            holdings,
            cash,
            total_invested,
            total_value,
            delta: total_value - self.initial_capital,
        })
    }

    pub fn print_final_report(&self) -> Result<()> {
        let report = self.final_report()?;
        print!("{}", FinalReportText(&report));
        Ok(())
    }

    /// Everything a reporting consumer needs from the completed run
    pub fn result(&self) -> Result<BacktestResult> {
        let portfolio = self.completed_portfolio()?;
        let (start_date, end_date) = self.period.ok_or(BacktestError::NotRun)?;

        Ok(BacktestResult {
            report: self.final_report()?,
            history: portfolio.history().to_vec(),
            rejections: portfolio.rejections().to_vec(),
            tickers: self.tickers.clone(),
            start_date,
            end_date,
            bars_processed: self.bars_processed,
            execution_time_ms: self.execution_time_ms,
        })
    }
}

/// Every requested ticker must have a well-formed bar; prices are never
/// made up
fn check_bar_set(bars: &BarSet, tickers: &[String]) -> Result<()> {
    for ticker in tickers {
        let bar = bars.get(ticker).ok_or_else(|| {
            BacktestError::DataUnavailable(format!(
                "missing bar for {} at {}",
                ticker, bars.timestamp
            ))
        })?;
        bar.validate().map_err(|reason| {
            BacktestError::DataUnavailable(format!(
                "malformed bar for {} at {}: {}",
                ticker, bars.timestamp, reason
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryProvider;
    use chrono::{Duration, TimeZone};
    use common::{Bar, Order, RejectionReason};

    /// Replays a fixed order list per bar
    struct Scripted {
        script: Vec<Vec<Order>>,
        calls: usize,
    }

    impl Scripted {
        fn new(script: Vec<Vec<Order>>) -> Self {
            Self { script, calls: 0 }
        }
    }

    impl Strategy for Scripted {
        fn on_bar(&mut self, _bars: &BarSet) -> Vec<Order> {
            let orders = self.script.get(self.calls).cloned().unwrap_or_default();
            self.calls += 1;
            orders
        }
    }

    struct CancelAfter {
        flag: Arc<AtomicBool>,
        bars: usize,
        calls: usize,
    }

    impl Strategy for CancelAfter {
        fn on_bar(&mut self, _bars: &BarSet) -> Vec<Order> {
            self.calls += 1;
            if self.calls == self.bars {
                self.flag.store(true, Ordering::Relaxed);
            }
            Vec::new()
        }
    }

    struct FailingProvider;

    impl MarketDataProvider for FailingProvider {
        fn fetch(&self, _: &[String], _: NaiveDate, _: NaiveDate) -> Result<Vec<BarSet>> {
            Err(BacktestError::DataLoadError("provider offline".to_string()))
        }
    }

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn bar_set(n: i64, closes: &[(&str, f64)]) -> BarSet {
        let mut set = BarSet::new(day(n));
        for (ticker, close) in closes {
            set.insert(*ticker, Bar::new(*close, *close, *close, *close, 1000.0));
        }
        set
    }

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|t| t.to_string()).collect()
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn test_buy_then_sell_end_to_end() {
        let provider = InMemoryProvider::new(vec![
            bar_set(0, &[("X", 100.0)]),
            bar_set(1, &[("X", 120.0)]),
        ]);
        let mut strategy = Scripted::new(vec![
            vec![Order::buy("X", 10.0)],
            vec![Order::sell("X", 5.0)],
        ]);
        let mut engine = BacktestEngine::new(10000.0);
        assert_eq!(engine.state(), EngineState::Uninitialized);

        let portfolio = engine
            .run_backtest(&mut strategy, &provider, &tickers(&["X"]), start(), end())
            .unwrap();

        let history = portfolio.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].cash, 9000.0);
        assert_eq!(history[0].positions["X"], 10.0);
        assert_eq!(history[0].total_value, 10000.0);
        assert_eq!(history[1].cash, 9600.0);
        assert_eq!(history[1].positions["X"], 5.0);
        assert_eq!(history[1].total_value, 10200.0);

        assert_eq!(engine.state(), EngineState::Completed);
        let report = engine.final_report().unwrap();
        assert_eq!(report.total_invested, 600.0);
        assert_eq!(report.total_value, 10200.0);
        assert_eq!(report.delta, 200.0);
    }

    #[test]
    fn test_engine_tracks_closes_without_orders() {
        let provider = InMemoryProvider::new(vec![
            bar_set(0, &[("X", 10.0), ("Y", 20.0)]),
            bar_set(1, &[("X", 11.0), ("Y", 25.0)]),
        ]);
        let mut strategy = Scripted::new(vec![vec![Order::buy("Y", 4.0)]]);
        let mut engine = BacktestEngine::new(1000.0);

        engine
            .run_backtest(&mut strategy, &provider, &tickers(&["X", "Y"]), start(), end())
            .unwrap();

        assert_eq!(engine.last_close_prices()["X"], 11.0);
        assert_eq!(engine.last_close_prices()["Y"], 25.0);

        let report = engine.final_report().unwrap();
        assert_eq!(report.holdings.len(), 2);
        assert_eq!(report.holdings[1].market_value, 100.0);
        assert_eq!(report.cash, 920.0);
        assert_eq!(report.total_value, 1020.0);
        assert_eq!(report.delta, 20.0);
    }

    #[test]
    fn test_rejections_do_not_abort_the_run() {
        let provider = InMemoryProvider::new(vec![
            bar_set(0, &[("X", 100.0)]),
            bar_set(1, &[("X", 100.0)]),
        ]);
        let mut strategy = Scripted::new(vec![
            vec![Order::buy("X", 1000.0), Order::buy("X", 1.0)],
            vec![Order::sell("X", 2.0)],
        ]);
        let mut engine = BacktestEngine::new(500.0);

        let portfolio = engine
            .run_backtest(&mut strategy, &provider, &tickers(&["X"]), start(), end())
            .unwrap();

        assert_eq!(portfolio.history().len(), 2);
        assert_eq!(portfolio.position("X"), 1.0);
        let reasons: Vec<_> = portfolio.rejections().iter().map(|r| &r.reason).collect();
        assert!(matches!(reasons[0], RejectionReason::InsufficientCash { .. }));
        assert!(matches!(reasons[1], RejectionReason::InsufficientShares { .. }));
    }

    #[test]
    fn test_empty_data_is_fatal() {
        let provider = InMemoryProvider::new(Vec::new());
        let mut engine = BacktestEngine::new(1000.0);

        let result = engine.run_backtest(
            &mut Scripted::new(vec![]),
            &provider,
            &tickers(&["X"]),
            start(),
            end(),
        );

        assert!(matches!(result, Err(BacktestError::DataUnavailable(_))));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(engine.portfolio().is_none());
    }

    #[test]
    fn test_provider_error_propagates() {
        let mut engine = BacktestEngine::new(1000.0);
        let result = engine.run_backtest(
            &mut Scripted::new(vec![]),
            &FailingProvider,
            &tickers(&["X"]),
            start(),
            end(),
        );
        assert!(matches!(result, Err(BacktestError::DataLoadError(_))));
    }

    #[test]
    fn test_missing_ticker_is_fatal() {
        let provider = InMemoryProvider::new(vec![
            bar_set(0, &[("X", 10.0), ("Y", 5.0)]),
            bar_set(1, &[("X", 11.0)]),
        ]);
        let mut engine = BacktestEngine::new(1000.0);

        let result = engine.run_backtest(
            &mut Scripted::new(vec![]),
            &provider,
            &tickers(&["X", "Y"]),
            start(),
            end(),
        );

        match result {
            Err(BacktestError::DataUnavailable(msg)) => assert!(msg.contains("missing bar for Y")),
            other => panic!("unexpected result: {:?}", other.map(|p| p.cash())),
        }
        assert!(engine.final_report().is_err());
    }

    #[test]
    fn test_malformed_bar_is_fatal() {
        let mut bad = BarSet::new(day(0));
        bad.insert("X", Bar::new(10.0, 9.0, 11.0, 10.0, 100.0));
        let provider = InMemoryProvider::new(vec![bad]);
        let mut engine = BacktestEngine::new(1000.0);

        let result = engine.run_backtest(
            &mut Scripted::new(vec![]),
            &provider,
            &tickers(&["X"]),
            start(),
            end(),
        );

        assert!(matches!(result, Err(BacktestError::DataUnavailable(_))));
    }

    #[test]
    fn test_out_of_order_bars_are_fatal() {
        let provider = InMemoryProvider::new(vec![
            bar_set(3, &[("X", 10.0)]),
            bar_set(2, &[("X", 10.0)]),
        ]);
        let mut engine = BacktestEngine::new(1000.0);

        let result = engine.run_backtest(
            &mut Scripted::new(vec![]),
            &provider,
            &tickers(&["X"]),
            start(),
            end(),
        );

        assert!(matches!(result, Err(BacktestError::DataUnavailable(_))));
    }

    #[test]
    fn test_configuration_errors() {
        let provider = InMemoryProvider::new(vec![bar_set(0, &[("X", 10.0)])]);
        let mut strategy = Scripted::new(vec![]);

        let mut engine = BacktestEngine::new(1000.0);
        assert!(matches!(
            engine.run_backtest(&mut strategy, &provider, &[], start(), end()),
            Err(BacktestError::Configuration(_))
        ));
        assert!(matches!(
            engine.run_backtest(&mut strategy, &provider, &tickers(&["X"]), end(), start()),
            Err(BacktestError::Configuration(_))
        ));

        let mut broke = BacktestEngine::new(f64::NAN);
        assert!(matches!(
            broke.run_backtest(&mut strategy, &provider, &tickers(&["X"]), start(), end()),
            Err(BacktestError::Configuration(_))
        ));
    }

    #[test]
    fn test_report_before_run() {
        let engine = BacktestEngine::new(1000.0);
        assert!(matches!(engine.final_report(), Err(BacktestError::NotRun)));
        assert!(matches!(engine.print_final_report(), Err(BacktestError::NotRun)));
        assert!(matches!(engine.result(), Err(BacktestError::NotRun)));
    }

    #[test]
    fn test_cancellation_stops_before_next_bar() {
        let flag = Arc::new(AtomicBool::new(false));
        let provider = InMemoryProvider::new((0..5).map(|i| bar_set(i, &[("X", 10.0)])).collect());
        let mut strategy = CancelAfter {
            flag: Arc::clone(&flag),
            bars: 2,
            calls: 0,
        };
        let mut engine = BacktestEngine::new(1000.0).with_cancel_flag(flag);

        let result = engine.run_backtest(&mut strategy, &provider, &tickers(&["X"]), start(), end());

        assert!(matches!(
            result,
            Err(BacktestError::Cancelled { processed_bars: 2 })
        ));
        assert_eq!(strategy.calls, 2);
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn test_rerun_starts_fresh() {
        let provider = InMemoryProvider::new(vec![bar_set(0, &[("X", 100.0)])]);
        let mut engine = BacktestEngine::new(1000.0);

        engine
            .run_backtest(
                &mut Scripted::new(vec![vec![Order::buy("X", 5.0)]]),
                &provider,
                &tickers(&["X"]),
                start(),
                end(),
            )
            .unwrap();
        let portfolio = engine
            .run_backtest(
                &mut Scripted::new(vec![vec![Order::buy("X", 5.0)]]),
                &provider,
                &tickers(&["X"]),
                start(),
                end(),
            )
            .unwrap();

        assert_eq!(portfolio.history().len(), 1);
        assert_eq!(portfolio.cash(), 500.0);
    }

    #[test]
    fn test_result_contents() {
        let provider = InMemoryProvider::new(vec![
            bar_set(0, &[("X", 100.0)]),
            bar_set(1, &[("X", 90.0)]),
        ]);
        let mut strategy = Scripted::new(vec![vec![Order::buy("X", 50.0)]]);
        let mut engine = BacktestEngine::new(1000.0);
        engine
            .run_backtest(&mut strategy, &provider, &tickers(&["X"]), start(), end())
            .unwrap();

        let result = engine.result().unwrap();
        assert_eq!(result.bars_processed, 2);
        assert_eq!(result.history.len(), 2);
        assert_eq!(result.rejections.len(), 1);
        assert_eq!(result.start_date, start());
        assert_eq!(result.tickers, tickers(&["X"]));
        assert_eq!(result.report.delta, 0.0);
    }
}
