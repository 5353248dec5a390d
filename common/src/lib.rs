pub mod config;
pub mod error;
pub mod types;

pub use config::{BacktestParameters, MovingAverageParams};
pub use error::{BacktestError, RejectionReason, Result};
pub use types::*;
