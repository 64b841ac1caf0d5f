//! 18-decimal fixed-point arithmetic over [`U256`].
//!
//! Every operation comes in an explicit rounding direction. Callers pick the
//! direction that favors the vault: amounts flowing in round up, amounts
//! flowing out round down.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::{Result, VaultError};

/// `1.0` in 18-decimal fixed point.
pub const ONE: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// Rounding direction for a fixed-point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rounding {
    Up,
    Down,
}

fn checked_mul(a: U256, b: U256) -> Result<U256> {
    a.checked_mul(b).ok_or(VaultError::MathOverflow("mul"))
}

fn ceil_div(numerator: U256, denominator: U256) -> Result<U256> {
    if denominator.is_zero() {
        return Err(VaultError::ZeroDivision);
    }
    if numerator.is_zero() {
        return Ok(U256::ZERO);
    }
    Ok((numerator - U256::from(1u64)) / denominator + U256::from(1u64))
}

/// `a * b / ONE`, rounded down.
pub fn mul_down(a: U256, b: U256) -> Result<U256> {
    Ok(checked_mul(a, b)? / ONE)
}

/// `a * b / ONE`, rounded up.
pub fn mul_up(a: U256, b: U256) -> Result<U256> {
    ceil_div(checked_mul(a, b)?, ONE)
}

/// `a * ONE / b`, rounded down.
pub fn div_down(a: U256, b: U256) -> Result<U256> {
    if b.is_zero() {
        return Err(VaultError::ZeroDivision);
    }
    Ok(checked_mul(a, ONE)? / b)
}

/// `a * ONE / b`, rounded up.
pub fn div_up(a: U256, b: U256) -> Result<U256> {
    ceil_div(checked_mul(a, ONE)?, b)
}

/// `a * b / c`, rounded down. No fixed-point scaling.
pub fn mul_div_down(a: U256, b: U256, c: U256) -> Result<U256> {
    if c.is_zero() {
        return Err(VaultError::ZeroDivision);
    }
    Ok(checked_mul(a, b)? / c)
}

/// `a * b / c`, rounded up. No fixed-point scaling.
pub fn mul_div_up(a: U256, b: U256, c: U256) -> Result<U256> {
    ceil_div(checked_mul(a, b)?, c)
}

/// Fixed-point multiplication in the given direction.
pub fn mul(a: U256, b: U256, rounding: Rounding) -> Result<U256> {
    match rounding {
        Rounding::Up => mul_up(a, b),
        Rounding::Down => mul_down(a, b),
    }
}

/// `ONE - x`, saturating at zero.
#[must_use]
pub fn complement(x: U256) -> U256 {
    if x < ONE { ONE - x } else { U256::ZERO }
}

/// Checked addition with a named overflow site.
pub fn add(a: U256, b: U256, site: &'static str) -> Result<U256> {
    a.checked_add(b).ok_or(VaultError::MathOverflow(site))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(units: u64) -> U256 {
        U256::from(units) * ONE
    }

    #[test]
    fn mul_rounding_directions() {
        // 1 wei * 0.5 = 0.5 wei
        let half = ONE / U256::from(2u64);
        assert_eq!(mul_down(U256::from(1u64), half).unwrap(), U256::ZERO);
        assert_eq!(mul_up(U256::from(1u64), half).unwrap(), U256::from(1u64));
        assert_eq!(mul_down(fp(3), fp(2)).unwrap(), fp(6));
        assert_eq!(mul_up(fp(3), fp(2)).unwrap(), fp(6));
    }

    #[test]
    fn div_rounding_directions() {
        assert_eq!(div_down(fp(1), fp(3)).unwrap(), U256::from(333_333_333_333_333_333u64));
        assert_eq!(div_up(fp(1), fp(3)).unwrap(), U256::from(333_333_333_333_333_334u64));
        assert_eq!(div_up(U256::ZERO, fp(3)).unwrap(), U256::ZERO);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(div_down(fp(1), U256::ZERO), Err(VaultError::ZeroDivision));
        assert_eq!(div_up(fp(1), U256::ZERO), Err(VaultError::ZeroDivision));
        assert_eq!(
            mul_div_up(fp(1), fp(1), U256::ZERO),
            Err(VaultError::ZeroDivision)
        );
    }

    #[test]
    fn overflow_is_an_error() {
        assert!(matches!(
            mul_down(U256::MAX, fp(2)),
            Err(VaultError::MathOverflow(_))
        ));
    }

    #[test]
    fn mul_div_rounds_up_only_with_remainder() {
        let seven = U256::from(7u64);
        assert_eq!(mul_div_up(seven, seven, seven).unwrap(), seven);
        assert_eq!(
            mul_div_up(U256::from(10u64), U256::from(1u64), U256::from(3u64)).unwrap(),
            U256::from(4u64)
        );
        assert_eq!(
            mul_div_down(U256::from(10u64), U256::from(1u64), U256::from(3u64)).unwrap(),
            U256::from(3u64)
        );
    }

    #[test]
    fn up_and_down_differ_by_at_most_one() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let a = U256::from(rng.gen_range(0..u128::MAX >> 8));
            let b = U256::from(rng.gen_range(1..u128::MAX >> 8));
            let down = mul_down(a, b).unwrap();
            let up = mul_up(a, b).unwrap();
            assert!(up >= down && up - down <= U256::from(1u64));
            let down = div_down(a, b).unwrap();
            let up = div_up(a, b).unwrap();
            assert!(up >= down && up - down <= U256::from(1u64));
        }
    }

    #[test]
    fn complement_saturates() {
        assert_eq!(complement(ONE / U256::from(4u64)), ONE * U256::from(3u64) / U256::from(4u64));
        assert_eq!(complement(fp(2)), U256::ZERO);
    }
}
