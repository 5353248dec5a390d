pub mod data;
pub mod engine;
pub mod indicators;
pub mod portfolio;
pub mod report;
pub mod strategy;

pub use data::{
    generate_synthetic_bars, load_file, FileProvider, InMemoryProvider, MarketDataProvider,
    SyntheticProvider,
};
pub use engine::{BacktestEngine, EngineState};
pub use portfolio::Portfolio;
pub use report::{render_final_report, Chart, ChartLine, FinalReportText};
pub use strategy::{MovingAverageStrategy, Strategy};

// Re-export common types
pub use common::{
    Action, BacktestError, BacktestParameters, BacktestResult, Bar, BarSet, FinalReport,
    HistoryEntry, HoldingReport, MovingAverageParams, Order, OrderRejection, RejectionReason,
    Result,
};
