use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use backtest_engine::{
    BacktestEngine, BacktestParameters, FileProvider, MarketDataProvider, MovingAverageStrategy,
    SyntheticProvider,
};

#[derive(Parser, Debug)]
#[command(name = "backtest-engine")]
#[command(version = "0.1.0")]
#[command(about = "Bar-by-bar moving-average crossover backtest engine", long_about = None)]
struct Args {
    /// JSON parameter file; command-line flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Comma-separated ticker universe
    #[arg(short, long, value_delimiter = ',')]
    tickers: Vec<String>,

    /// First date of the backtest (inclusive, YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last date of the backtest (exclusive, YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Initial capital
    #[arg(short, long)]
    capital: Option<f64>,

    /// Data file path (CSV/JSON). If not provided, uses synthetic data.
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Short moving average window
    #[arg(long)]
    short_window: Option<usize>,

    /// Long moving average window
    #[arg(long)]
    long_window: Option<usize>,

    /// Shares per order
    #[arg(short, long)]
    quantity: Option<f64>,

    /// Only emit a signal when it differs from the previous one
    #[arg(long)]
    suppress_repeats: bool,

    /// Initial price for synthetic data
    #[arg(long, default_value = "100.0")]
    initial_price: f64,

    /// Seed for synthetic data
    #[arg(long)]
    seed: Option<u64>,

    /// Output format (json, text)
    #[arg(short, long, default_value = "json")]
    output: String,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,

    /// Include chart series in JSON output
    #[arg(long)]
    charts: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let params = build_parameters(&args)?;
    params.validate()?;

    let provider: Box<dyn MarketDataProvider> = match &args.data_file {
        Some(path) => {
            info!(path = %path.display(), "loading data from file");
            Box::new(FileProvider::new(path.clone()))
        }
        None => {
            info!(initial_price = args.initial_price, "using synthetic data");
            let provider = SyntheticProvider::new(args.initial_price);
            Box::new(match args.seed {
                Some(seed) => provider.with_seed(seed),
                None => provider,
            })
        }
    };

    let mut strategy = MovingAverageStrategy::new(params.strategy.clone())?;
    let mut engine = BacktestEngine::new(params.initial_capital);
    engine.run_backtest(
        &mut strategy,
        provider.as_ref(),
        &params.tickers,
        params.start_date,
        params.end_date,
    )?;

    match args.output.as_str() {
        "json" => print_json(&engine, args.pretty, args.charts)?,
        "text" => print_text(&engine)?,
        _ => {
            eprintln!("Unknown output format: {}. Using text.", args.output);
            print_text(&engine)?;
        }
    }

    Ok(())
}

fn build_parameters(args: &Args) -> Result<BacktestParameters> {
    let mut params = match &args.config {
        Some(path) => BacktestParameters::from_json_file(path)?,
        None => BacktestParameters::default(),
    };

    if !args.tickers.is_empty() {
        params = params.with_tickers(args.tickers.iter().cloned());
    }
    if args.start.is_some() || args.end.is_some() {
        let start = args.start.unwrap_or(params.start_date);
        let end = args.end.unwrap_or(params.end_date);
        params = params.with_period(start, end);
    }
    if let Some(capital) = args.capital {
        params = params.with_capital(capital);
    }
    if args.short_window.is_some() || args.long_window.is_some() {
        let short_window = args.short_window.unwrap_or(params.strategy.short_window);
        let long_window = args.long_window.unwrap_or(params.strategy.long_window);
        params = params.with_windows(short_window, long_window);
    }
    if let Some(quantity) = args.quantity {
        params = params.with_quantity(quantity);
    }
    if args.suppress_repeats {
        params = params.with_repeat_suppression();
    }

    Ok(params)
}

fn print_json(engine: &BacktestEngine, pretty: bool, charts: bool) -> Result<()> {
    let result = engine.result()?;

    let value = if charts {
        let portfolio = engine.portfolio().ok_or(backtest_engine::BacktestError::NotRun)?;
        serde_json::json!({
            "result": result,
            "charts": {
                "portfolio": portfolio.portfolio_chart()?,
                "total_balance": portfolio.total_balance_chart()?,
                "cash_balance": portfolio.cash_balance_chart()?,
                "holdings": portfolio.holdings_chart()?,
            },
        })
    } else {
        serde_json::to_value(&result)?
    };

    let json = if pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    println!("{}", json);
    Ok(())
}

fn print_text(engine: &BacktestEngine) -> Result<()> {
    let result = engine.result()?;

    println!();
    println!("  Period: {} to {}", result.start_date, result.end_date);
    println!("  Bars Processed: {}", result.bars_processed);
    println!("  Rejected Orders: {}", result.rejections.len());
    println!("  Execution Time: {}ms", result.execution_time_ms);
    engine.print_final_report()?;

    if !result.rejections.is_empty() {
        println!();
        println!("  RECENT REJECTIONS (last 5)");
        println!("----------------------------------------------------------------");
        for rejection in result.rejections.iter().rev().take(5) {
            println!(
                "  {} | {} {} {} | {}",
                rejection.timestamp.format("%Y-%m-%d"),
                rejection.order.action,
                rejection.order.quantity,
                rejection.order.ticker,
                rejection.reason
            );
        }
        println!();
    }

    Ok(())
}
