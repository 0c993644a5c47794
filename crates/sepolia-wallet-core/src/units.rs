//! Exact ETH <-> wei conversion. No floating point anywhere on this path.

use alloy_primitives::U256;
use alloy_primitives::utils::{format_ether, parse_ether};

pub const ETH_DECIMALS: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must not be empty")]
    Empty,
    #[error("amount must be an unsigned decimal number")]
    Malformed,
    #[error("amount has more than {ETH_DECIMALS} decimal places")]
    TooPrecise,
    #[error("amount does not fit in 256 bits: {0}")]
    Overflow(String),
}

/// Converts a decimal ETH string into wei.
pub fn eth_to_wei(amount: &str) -> Result<U256, AmountError> {
    let normalized = normalize_decimal(amount)?;
    parse_ether(&normalized).map_err(|error| AmountError::Overflow(error.to_string()))
}

/// True when `amount` is a well-formed decimal strictly greater than zero.
#[must_use]
pub fn is_positive_decimal(amount: &str) -> bool {
    eth_to_wei(amount).is_ok_and(|wei| !wei.is_zero())
}

/// Renders wei as a plain ETH decimal without exponent or trailing zeros.
#[must_use]
pub fn wei_to_eth_plain(wei: U256) -> String {
    let formatted = format_ether(wei);
    if !formatted.contains('.') {
        return formatted;
    }
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn normalize_decimal(raw: &str) -> Result<String, AmountError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    let (integer, fraction) = match trimmed.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (trimmed, ""),
    };
    let all_digits = |part: &str| part.chars().all(|ch| ch.is_ascii_digit());
    if !all_digits(integer) || !all_digits(fraction) {
        return Err(AmountError::Malformed);
    }
    if integer.is_empty() && fraction.is_empty() {
        return Err(AmountError::Malformed);
    }
    if fraction.len() > ETH_DECIMALS {
        return Err(AmountError::TooPrecise);
    }

    let integer = if integer.is_empty() { "0" } else { integer };
    if fraction.is_empty() {
        Ok(integer.to_string())
    } else {
        Ok(format!("{integer}.{fraction}"))
    }
}
