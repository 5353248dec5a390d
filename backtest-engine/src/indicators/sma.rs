/// Calculate the Simple Moving Average of the most recent `period` prices
///
/// # Arguments
/// * `prices` - Slice of prices, oldest first
/// * `period` - SMA period
///
/// # Returns
/// None when the period is zero or fewer than `period` prices are available
pub fn trailing_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let window = &prices[prices.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}
