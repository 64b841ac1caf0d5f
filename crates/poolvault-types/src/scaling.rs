//! Conversions between raw token amounts and live scaled18 amounts.
//!
//! `live = raw * scaling_factor * rate / ONE`, where `scaling_factor`
//! normalizes the token's decimals to 18 and `rate` is the token's current
//! exchange rate (`ONE` for standard tokens). The inverse undoes both.

use alloy_primitives::U256;

use crate::constants::MAX_TOKEN_DECIMALS;
use crate::fixed_point::{self, ONE};
use crate::{Address, Result, Rounding, VaultError};

/// `10^(18 - decimals)`.
pub fn decimal_scaling_factor(token: Address, decimals: u8) -> Result<U256> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(VaultError::InvalidTokenDecimals { token, decimals });
    }
    Ok(U256::from(10u64).pow(U256::from(MAX_TOKEN_DECIMALS - decimals)))
}

fn scale(amount: U256, scaling_factor: U256) -> Result<U256> {
    amount
        .checked_mul(scaling_factor)
        .ok_or(VaultError::MathOverflow("scale"))
}

/// Raw → scaled18, rounding down. Used for amounts leaving the vault.
pub fn to_scaled18_apply_rate_round_down(
    amount: U256,
    scaling_factor: U256,
    rate: U256,
) -> Result<U256> {
    fixed_point::mul_down(scale(amount, scaling_factor)?, rate)
}

/// Raw → scaled18, rounding up. Used for amounts entering the vault.
pub fn to_scaled18_apply_rate_round_up(
    amount: U256,
    scaling_factor: U256,
    rate: U256,
) -> Result<U256> {
    fixed_point::mul_up(scale(amount, scaling_factor)?, rate)
}

/// Scaled18 → raw, rounding down.
pub fn to_raw_undo_rate_round_down(
    amount: U256,
    scaling_factor: U256,
    rate: U256,
) -> Result<U256> {
    fixed_point::div_down(amount, scale(scaling_factor, rate)?)
}

/// Scaled18 → raw, rounding up.
pub fn to_raw_undo_rate_round_up(
    amount: U256,
    scaling_factor: U256,
    rate: U256,
) -> Result<U256> {
    fixed_point::div_up(amount, scale(scaling_factor, rate)?)
}

/// Raw → scaled18 in the given direction.
pub fn to_scaled18(
    amount: U256,
    scaling_factor: U256,
    rate: U256,
    rounding: Rounding,
) -> Result<U256> {
    match rounding {
        Rounding::Up => to_scaled18_apply_rate_round_up(amount, scaling_factor, rate),
        Rounding::Down => to_scaled18_apply_rate_round_down(amount, scaling_factor, rate),
    }
}

/// Scaled18 → raw in the given direction.
pub fn to_raw(amount: U256, scaling_factor: U256, rate: U256, rounding: Rounding) -> Result<U256> {
    match rounding {
        Rounding::Up => to_raw_undo_rate_round_up(amount, scaling_factor, rate),
        Rounding::Down => to_raw_undo_rate_round_down(amount, scaling_factor, rate),
    }
}

/// Rounds a rate up to the next integer multiple of `ONE` unless it already
/// is one.
///
/// Rates are truncated by their providers. When converting an amount that
/// must be rounded up, the truncated rate is bumped by one wei so the result
/// errs on the vault's side.
#[must_use]
pub fn compute_rate_round_up(rate: U256) -> U256 {
    let rounded = rate / ONE * ONE;
    if rounded == rate { rate } else { rate + U256::from(1u64) }
}
