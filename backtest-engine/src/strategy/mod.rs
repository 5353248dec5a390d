pub mod moving_average;

pub use moving_average::MovingAverageStrategy;

use common::{BarSet, Order};

/// Produces orders from the bars of the current timestamp
///
/// Called exactly once per bar, in chronological order. Returned orders are
/// executed in sequence; an empty vector means no trades this bar.
pub trait Strategy {
    fn on_bar(&mut self, bars: &BarSet) -> Vec<Order>;

    fn name(&self) -> &str {
        "strategy"
    }
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn on_bar(&mut self, bars: &BarSet) -> Vec<Order> {
        (**self).on_bar(bars)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
