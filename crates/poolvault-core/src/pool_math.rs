//! Liquidity math shared by every pool type.
//!
//! All amounts are live scaled18. Proportional operations need no pricing;
//! unbalanced and single-token operations are priced through the pool's
//! invariant, charging the swap fee on the non-proportional part only.

use poolvault_types::fixed_point::{self, complement};
use poolvault_types::{Result, Rounding, U256, VaultError};

use crate::hooks::BasePool;

/// `balances[i] * bpt_out / total_supply`, rounded up.
pub fn compute_proportional_amounts_in(
    balances: &[U256],
    total_supply: U256,
    bpt_amount_out: U256,
) -> Result<Vec<U256>> {
    balances
        .iter()
        .map(|b| fixed_point::mul_div_up(*b, bpt_amount_out, total_supply))
        .collect()
}

/// `balances[i] * bpt_in / total_supply`, rounded down.
pub fn compute_proportional_amounts_out(
    balances: &[U256],
    total_supply: U256,
    bpt_amount_in: U256,
) -> Result<Vec<U256>> {
    balances
        .iter()
        .map(|b| fixed_point::mul_div_down(*b, bpt_amount_in, total_supply))
        .collect()
}

/// BPT out and per-token swap fees for adding exact `amounts_in`.
pub fn compute_add_liquidity_unbalanced(
    balances: &[U256],
    amounts_in: &[U256],
    total_supply: U256,
    swap_fee_percentage: U256,
    pool: &dyn BasePool,
) -> Result<(U256, Vec<U256>)> {
    let one = U256::from(1u64);
    let mut new_balances = balances
        .iter()
        .zip(amounts_in)
        .map(|(b, a)| {
            b.checked_add(*a)
                .and_then(|sum| sum.checked_sub(one))
                .ok_or(VaultError::MathOverflow("unbalanced add"))
        })
        .collect::<Result<Vec<_>>>()?;

    let current_invariant = pool.compute_invariant(balances, Rounding::Up)?;
    let new_invariant = pool.compute_invariant(&new_balances, Rounding::Down)?;
    let invariant_ratio = fixed_point::div_down(new_invariant, current_invariant)?;
    ensure_invariant_ratio_below_max(pool, invariant_ratio)?;

    let mut swap_fees = vec![U256::ZERO; balances.len()];
    for (i, balance) in balances.iter().enumerate() {
        let proportional = fixed_point::mul_down(invariant_ratio, *balance)?;
        if new_balances[i] > proportional {
            let taxable = new_balances[i] - proportional;
            swap_fees[i] = fixed_point::mul_up(taxable, swap_fee_percentage)?;
            new_balances[i] = new_balances[i].saturating_sub(swap_fees[i]);
        }
    }

    let invariant_with_fees = pool.compute_invariant(&new_balances, Rounding::Down)?;
    let growth = invariant_with_fees.saturating_sub(current_invariant);
    let bpt_out = fixed_point::mul_div_down(total_supply, growth, current_invariant)?;
    Ok((bpt_out, swap_fees))
}

/// Amount of token `index` (fee included) needed to mint exactly
/// `bpt_amount_out`, and the per-token swap fees.
pub fn compute_add_liquidity_single_token_exact_out(
    balances: &[U256],
    index: usize,
    bpt_amount_out: U256,
    total_supply: U256,
    swap_fee_percentage: U256,
    pool: &dyn BasePool,
) -> Result<(U256, Vec<U256>)> {
    let new_supply = fixed_point::add(total_supply, bpt_amount_out, "single token add")?;
    let invariant_ratio = fixed_point::div_up(new_supply, total_supply)?;
    ensure_invariant_ratio_below_max(pool, invariant_ratio)?;

    let new_balance = pool.compute_balance(balances, index, invariant_ratio)?;
    let amount_in = new_balance
        .checked_sub(balances[index])
        .ok_or(VaultError::MathOverflow("single token add"))?;

    let non_taxable = fixed_point::mul_div_up(new_supply, balances[index], total_supply)?;
    let taxable = new_balance.saturating_sub(non_taxable);
    let fee = fixed_point::div_up(taxable, complement(swap_fee_percentage))?.saturating_sub(taxable);

    let mut swap_fees = vec![U256::ZERO; balances.len()];
    swap_fees[index] = fee;
    Ok((fixed_point::add(amount_in, fee, "single token add")?, swap_fees))
}

/// Amount of token `index` paid out (fee deducted) for burning exactly
/// `bpt_amount_in`, and the per-token swap fees.
pub fn compute_remove_liquidity_single_token_exact_in(
    balances: &[U256],
    index: usize,
    bpt_amount_in: U256,
    total_supply: U256,
    swap_fee_percentage: U256,
    pool: &dyn BasePool,
) -> Result<(U256, Vec<U256>)> {
    let new_supply = total_supply
        .checked_sub(bpt_amount_in)
        .ok_or(VaultError::MathOverflow("single token remove"))?;
    let invariant_ratio = fixed_point::div_up(new_supply, total_supply)?;
    ensure_invariant_ratio_above_min(pool, invariant_ratio)?;

    let new_balance = pool.compute_balance(balances, index, invariant_ratio)?;
    let amount_out = balances[index]
        .checked_sub(new_balance)
        .ok_or(VaultError::MathOverflow("single token remove"))?;

    let before_tax = fixed_point::mul_div_up(new_supply, balances[index], total_supply)?;
    let taxable = before_tax.saturating_sub(new_balance);
    let fee = fixed_point::mul_up(taxable, swap_fee_percentage)?;

    let mut swap_fees = vec![U256::ZERO; balances.len()];
    swap_fees[index] = fee;
    let net = amount_out
        .checked_sub(fee)
        .ok_or(VaultError::MathOverflow("single token remove"))?;
    Ok((net, swap_fees))
}

/// BPT to burn so that exactly `amount_out` of token `index` can leave,
/// and the per-token swap fees.
pub fn compute_remove_liquidity_single_token_exact_out(
    balances: &[U256],
    index: usize,
    amount_out: U256,
    total_supply: U256,
    swap_fee_percentage: U256,
    pool: &dyn BasePool,
) -> Result<(U256, Vec<U256>)> {
    let mut new_balances = balances.to_vec();
    new_balances[index] = new_balances[index]
        .checked_sub(amount_out)
        .ok_or(VaultError::MathOverflow("single token remove"))?;

    let current_invariant = pool.compute_invariant(balances, Rounding::Up)?;
    let invariant_ratio = fixed_point::div_up(
        pool.compute_invariant(&new_balances, Rounding::Up)?,
        current_invariant,
    )?;
    ensure_invariant_ratio_above_min(pool, invariant_ratio)?;

    let taxable = fixed_point::mul_up(invariant_ratio, balances[index])?.saturating_sub(new_balances[index]);
    let fee = fixed_point::div_up(taxable, complement(swap_fee_percentage))?.saturating_sub(taxable);
    new_balances[index] = new_balances[index]
        .checked_sub(fee)
        .ok_or(VaultError::MathOverflow("single token remove"))?;

    let invariant_with_fees = pool.compute_invariant(&new_balances, Rounding::Down)?;
    let shrink = current_invariant.saturating_sub(invariant_with_fees);
    let bpt_in = fixed_point::mul_div_up(total_supply, shrink, current_invariant)?;

    let mut swap_fees = vec![U256::ZERO; balances.len()];
    swap_fees[index] = fee;
    Ok((bpt_in, swap_fees))
}

fn ensure_invariant_ratio_below_max(pool: &dyn BasePool, ratio: U256) -> Result<()> {
    let max = pool.maximum_invariant_ratio();
    if ratio > max {
        return Err(VaultError::InvariantRatioOutOfBounds {
            ratio,
            min: pool.minimum_invariant_ratio(),
            max,
        });
    }
    Ok(())
}

fn ensure_invariant_ratio_above_min(pool: &dyn BasePool, ratio: U256) -> Result<()> {
    let min = pool.minimum_invariant_ratio();
    if ratio < min {
        return Err(VaultError::InvariantRatioOutOfBounds {
            ratio,
            min,
            max: pool.maximum_invariant_ratio(),
        });
    }
    Ok(())
}
