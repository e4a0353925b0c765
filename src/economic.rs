//! Economic model: block subsidy and fees

use crate::constants::*;
use crate::types::*;

/// GetBlockSubsidy: ℕ → ℤ
///
/// Subsidy halves every HALVING_INTERVAL (100) blocks.
///
/// Formula: subsidy = 50 * COIN * 2^(-⌊h/H⌋)
pub fn get_block_subsidy(height: Height) -> Amount {
    let halving_period = height / HALVING_INTERVAL;

    // After 64 halvings, subsidy becomes 0
    if halving_period >= 64 {
        return 0;
    }

    INITIAL_SUBSIDY >> halving_period
}

/// Fee = sum of input values - sum of output values, `None` if outputs exceed inputs
pub fn calculate_fee(input_values: &[Amount], outputs: &[TransactionOutput]) -> Option<Amount> {
    let total_in: Amount = input_values.iter().sum();
    let total_out = total_output_value(outputs);
    total_in.checked_sub(total_out)
}

pub fn total_output_value(outputs: &[TransactionOutput]) -> Amount {
    outputs.iter().map(|o| o.value).sum()
}

/// Render base units as a decimal coin amount, e.g. `12.5`
pub fn format_amount(value: Amount) -> String {
    let whole = value / COIN;
    let frac = value % COIN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:08}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsidy_halves_every_hundred_blocks() {
        assert_eq!(get_block_subsidy(0), 50 * COIN);
        assert_eq!(get_block_subsidy(99), 50 * COIN);
        assert_eq!(get_block_subsidy(100), 25 * COIN);
        assert_eq!(get_block_subsidy(200), 12 * COIN + COIN / 2);
    }

    #[test]
    fn test_subsidy_runs_out() {
        assert_eq!(get_block_subsidy(64 * HALVING_INTERVAL), 0);
        assert_eq!(get_block_subsidy(u64::MAX), 0);
    }

    #[test]
    fn test_calculate_fee() {
        let outputs = vec![TransactionOutput { value: 90, locking_script: Default::default() }];
        assert_eq!(calculate_fee(&[60, 40], &outputs), Some(10));
        assert_eq!(calculate_fee(&[50], &outputs), None);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(50 * COIN), "50");
        assert_eq!(format_amount(12 * COIN + COIN / 2), "12.5");
        assert_eq!(format_amount(5_000_000), "0.05");
    }
}
