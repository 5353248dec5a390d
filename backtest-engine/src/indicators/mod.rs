pub mod sma;

pub use sma::trailing_sma;
