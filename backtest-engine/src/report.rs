//! Read-only views over a finished (or running) backtest
//!
//! Chart builders turn the portfolio history into plottable series with axis
//! bounds; the final report renders the end-of-run valuation as text.

use std::fmt;

use chrono::{DateTime, Utc};
use common::{BacktestError, FinalReport, HistoryEntry, Result};
use serde::Serialize;

/// Padding applied above and below value charts
const VALUE_MARGIN: f64 = 100.0;
/// Headroom above the largest holding
const HOLDINGS_MARGIN: f64 = 5.0;

const RULE_HEAVY: &str = "================================================================";
const RULE_LIGHT: &str = "----------------------------------------------------------------";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartLine {
    pub label: String,
    pub points: Vec<(DateTime<Utc>, f64)>,
}

/// A time-series chart ready to hand to a plotting frontend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub x_range: (DateTime<Utc>, DateTime<Utc>),
    pub y_range: (f64, f64),
    pub lines: Vec<ChartLine>,
}

fn time_range(history: &[HistoryEntry]) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    match (history.first(), history.last()) {
        (Some(first), Some(last)) => Ok((first.timestamp, last.timestamp)),
        _ => Err(BacktestError::EmptyHistory),
    }
}

fn series(
    history: &[HistoryEntry],
    value: impl Fn(&HistoryEntry) -> f64,
) -> Vec<(DateTime<Utc>, f64)> {
    history.iter().map(|e| (e.timestamp, value(e))).collect()
}

fn padded_range<'a>(lines: impl IntoIterator<Item = &'a ChartLine>) -> (f64, f64) {
    let (min, max) = lines
        .into_iter()
        .flat_map(|l| l.points.iter().map(|(_, v)| *v))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    (min - VALUE_MARGIN, max + VALUE_MARGIN)
}

fn value_chart(history: &[HistoryEntry], title: &str, lines: Vec<ChartLine>) -> Result<Chart> {
    let x_range = time_range(history)?;
    let y_range = padded_range(&lines);
    Ok(Chart {
        title: title.to_string(),
        x_label: "Time".to_string(),
        y_label: "Value ($)".to_string(),
        x_range,
        y_range,
        lines,
    })
}

/// Total value, cash and positions value on one chart
pub fn portfolio_chart(history: &[HistoryEntry]) -> Result<Chart> {
    let lines = vec![
        ChartLine {
            label: "Total Portfolio Value".to_string(),
            points: series(history, |e| e.total_value),
        },
        ChartLine {
            label: "Cash Balance".to_string(),
            points: series(history, |e| e.cash),
        },
        ChartLine {
            label: "Positions Value".to_string(),
            points: series(history, |e| e.total_value - e.cash),
        },
    ];
    value_chart(history, "Backtest Performance", lines)
}

pub fn total_balance_chart(history: &[HistoryEntry]) -> Result<Chart> {
    let lines = vec![ChartLine {
        label: "Total Portfolio Value".to_string(),
        points: series(history, |e| e.total_value),
    }];
    value_chart(history, "Total Portfolio Performance", lines)
}

pub fn cash_balance_chart(history: &[HistoryEntry]) -> Result<Chart> {
    let lines = vec![ChartLine {
        label: "Cash Balance Value".to_string(),
        points: series(history, |e| e.cash),
    }];
    value_chart(history, "Cash Balance Performance", lines)
}

/// One line per ticker, y axis from zero to the largest holding plus headroom
pub fn holdings_chart(history: &[HistoryEntry], tickers: &[String]) -> Result<Chart> {
    let x_range = time_range(history)?;

    let lines: Vec<ChartLine> = tickers
        .iter()
        .map(|ticker| ChartLine {
            label: ticker.clone(),
            points: series(history, |e| e.positions.get(ticker).copied().unwrap_or(0.0)),
        })
        .collect();

    let max_holding = lines
        .iter()
        .flat_map(|l| l.points.iter().map(|(_, q)| *q))
        .fold(0.0_f64, f64::max);

    Ok(Chart {
        title: "Positions Performance".to_string(),
        x_label: "Time".to_string(),
        y_label: "Quantity".to_string(),
        x_range,
        y_range: (0.0, max_holding + HOLDINGS_MARGIN),
        lines,
    })
}

/// Text form of a [`FinalReport`], as the CLI prints it
pub struct FinalReportText<'a>(pub &'a FinalReport);

impl fmt::Display for FinalReportText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(f)?;
        writeln!(f, "{}", RULE_HEAVY)?;
        writeln!(f, "  FINAL PORTFOLIO REPORT")?;
        writeln!(f, "{}", RULE_HEAVY)?;
        writeln!(f, "  Initial Capital:  ${:>12.2}", report.initial_capital)?;
        writeln!(f)?;
        writeln!(f, "  POSITIONS")?;
        writeln!(f, "{}", RULE_LIGHT)?;
        for holding in &report.holdings {
            writeln!(
                f,
                "  - {} shares of {} @ {:.2} -> {:.2}",
                holding.quantity, holding.ticker, holding.last_close, holding.market_value
            )?;
        }
        writeln!(f, "{}", RULE_LIGHT)?;
        writeln!(f, "  Total Invested:   ${:>12.2}", report.total_invested)?;
        writeln!(f, "  Cash Remaining:   ${:>12.2}", report.cash)?;
        writeln!(f, "  Total Value:      ${:>12.2}", report.total_value)?;
        writeln!(f)?;
        writeln!(f, "  Delta:            ${:>+12.2}", report.delta)?;
        writeln!(f, "{}", RULE_HEAVY)
    }
}

pub fn render_final_report(report: &FinalReport) -> String {
    FinalReportText(report).to_string()
}
