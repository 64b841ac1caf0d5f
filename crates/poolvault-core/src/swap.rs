//! Swaps.
//!
//! ```text
//! raw given ──scale+rate──▶ scaled18 ──fee──▶ pool.on_swap ──▶ scaled18 ──unscale──▶ raw calculated
//! ```
//!
//! Amounts entering the vault round up, amounts leaving round down. The swap
//! fee is always charged in the token in. The protocol's share of the fee
//! (the aggregate fee) stays in the vault but is kept out of the pool
//! balance.

use poolvault_types::fixed_point::{self, complement};
use poolvault_types::{
    Address, PoolSwapParams, Result, SwapKind, SwapResult, U256, VaultError, VaultEvent,
    VaultSwapParams, scaling,
};

use crate::hooks::AfterSwapParams;
use crate::vault::Vault;

/// Intermediate amounts of one swap.
struct SwapAmounts {
    amount_in_scaled18: U256,
    amount_out_scaled18: U256,
    amount_in_raw: U256,
    amount_out_raw: U256,
    amount_calculated_raw: U256,
    total_fee_scaled18: U256,
}

impl Vault {
    /// Execute a swap inside the caller's session.
    ///
    /// Records debt for the amount in and credit for the amount out.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`
    /// - `PoolNotRegistered` / `PoolNotInitialized` / `PoolPaused` /
    ///   `VaultPaused` / `PoolInRecoveryMode`
    /// - `AmountGivenZero`, `CannotSwapSameToken`, `TokenNotRegistered`
    /// - `TradeAmountTooSmall`, `SwapLimit`
    /// - `HookFailed`, or any error from the pool or its hooks
    pub fn swap(&mut self, caller: Address, params: &VaultSwapParams) -> Result<SwapResult> {
        self.ensure_handler(caller)?;
        let pool = params.pool;
        self.ensure_pool_initialized(pool)?;
        self.ensure_unpaused(pool)?;
        self.ensure_not_in_recovery_mode(pool)?;

        if params.amount_given_raw.is_zero() {
            return Err(VaultError::AmountGivenZero);
        }
        if params.token_in == params.token_out {
            return Err(VaultError::CannotSwapSameToken(params.token_in));
        }

        self.atomic(|vault| vault.swap_inner(caller, params))
    }

    fn swap_inner(&mut self, caller: Address, params: &VaultSwapParams) -> Result<SwapResult> {
        let pool = params.pool;
        let (index_in, index_out, hooks, hooks_config) = {
            let data = self.pool(pool)?;
            (
                data.token_index(pool, params.token_in)?,
                data.token_index(pool, params.token_out)?,
                data.hooks.clone(),
                data.hooks_config(),
            )
        };

        let mut pool_params = self.build_pool_swap_params(caller, params, index_in, index_out)?;

        if let Some(hooks) = &hooks {
            if hooks_config.should_call_before_swap {
                if !hooks.on_before_swap(self, pool, &pool_params)? {
                    return Err(VaultError::HookFailed {
                        pool,
                        hook: "before_swap",
                    });
                }
                // The hook may have moved balances or rates.
                pool_params = self.build_pool_swap_params(caller, params, index_in, index_out)?;
            }
        }

        let mut swap_fee_percentage = self.pool(pool)?.config.static_swap_fee_percentage;
        if let Some(hooks) = &hooks {
            if hooks_config.should_call_compute_dynamic_swap_fee {
                let (ok, fee) =
                    hooks.on_compute_dynamic_swap_fee(self, pool, &pool_params, swap_fee_percentage)?;
                if !ok {
                    return Err(VaultError::HookFailed {
                        pool,
                        hook: "compute_dynamic_swap_fee",
                    });
                }
                swap_fee_percentage = fee;
            }
        }

        let amounts = self.compute_swap(params, &mut pool_params, swap_fee_percentage)?;
        self.apply_swap(caller, params, index_in, index_out, &amounts)?;

        if let Some(hooks) = &hooks {
            if hooks_config.should_call_after_swap {
                let after = AfterSwapParams {
                    kind: params.kind,
                    token_in: params.token_in,
                    token_out: params.token_out,
                    amount_in_scaled18: amounts.amount_in_scaled18,
                    amount_out_scaled18: amounts.amount_out_scaled18,
                    amount_in_raw: amounts.amount_in_raw,
                    amount_out_raw: amounts.amount_out_raw,
                    router: caller,
                };
                if !hooks.on_after_swap(self, pool, &after)? {
                    return Err(VaultError::HookFailed {
                        pool,
                        hook: "after_swap",
                    });
                }
            }
        }

        Ok(SwapResult {
            amount_calculated_raw: amounts.amount_calculated_raw,
            amount_in_raw: amounts.amount_in_raw,
            amount_out_raw: amounts.amount_out_raw,
        })
    }

    fn build_pool_swap_params(
        &self,
        caller: Address,
        params: &VaultSwapParams,
        index_in: usize,
        index_out: usize,
    ) -> Result<PoolSwapParams> {
        let data = self.pool(params.pool)?;
        let live = data.live(&self.state.world)?;
        let amount_given_scaled18 = match params.kind {
            SwapKind::ExactIn => scaling::to_scaled18_apply_rate_round_down(
                params.amount_given_raw,
                data.scaling_factors[index_in],
                live.rates[index_in],
            )?,
            SwapKind::ExactOut => scaling::to_scaled18_apply_rate_round_up(
                params.amount_given_raw,
                data.scaling_factors[index_out],
                scaling::compute_rate_round_up(live.rates[index_out]),
            )?,
        };
        self.ensure_valid_trade_amount(amount_given_scaled18)?;

        Ok(PoolSwapParams {
            kind: params.kind,
            amount_given_scaled18,
            balances_scaled18: live.balances_scaled18,
            index_in,
            index_out,
            router: caller,
            user_data: params.user_data.clone(),
        })
    }

    /// Non-zero trade amounts must reach the configured minimum.
    pub(crate) fn ensure_valid_trade_amount(&self, amount_scaled18: U256) -> Result<()> {
        if !amount_scaled18.is_zero() && amount_scaled18 < self.config().minimum_trade_amount {
            return Err(VaultError::TradeAmountTooSmall(amount_scaled18));
        }
        Ok(())
    }

    fn compute_swap(
        &self,
        params: &VaultSwapParams,
        pool_params: &mut PoolSwapParams,
        swap_fee_percentage: U256,
    ) -> Result<SwapAmounts> {
        let data = self.pool(params.pool)?;
        let rates = data.rates(&self.state.world)?;
        let (index_in, index_out) = (pool_params.index_in, pool_params.index_out);
        let given_scaled18 = pool_params.amount_given_scaled18;

        match params.kind {
            SwapKind::ExactIn => {
                let fee = fixed_point::mul_up(given_scaled18, swap_fee_percentage)?;
                pool_params.amount_given_scaled18 = given_scaled18
                    .checked_sub(fee)
                    .ok_or(VaultError::MathOverflow("swap fee"))?;
                let out_scaled18 = data.pricing.on_swap(pool_params)?;
                self.ensure_valid_trade_amount(out_scaled18)?;
                let out_raw = scaling::to_raw_undo_rate_round_down(
                    out_scaled18,
                    data.scaling_factors[index_out],
                    rates[index_out],
                )?;
                if out_raw < params.limit_raw {
                    return Err(VaultError::SwapLimit {
                        amount: out_raw,
                        limit: params.limit_raw,
                    });
                }
                Ok(SwapAmounts {
                    amount_in_scaled18: given_scaled18,
                    amount_out_scaled18: out_scaled18,
                    amount_in_raw: params.amount_given_raw,
                    amount_out_raw: out_raw,
                    amount_calculated_raw: out_raw,
                    total_fee_scaled18: fee,
                })
            }
            SwapKind::ExactOut => {
                let in_scaled18 = data.pricing.on_swap(pool_params)?;
                self.ensure_valid_trade_amount(in_scaled18)?;
                let fee = fixed_point::mul_div_up(
                    in_scaled18,
                    swap_fee_percentage,
                    complement(swap_fee_percentage),
                )?;
                let in_with_fee = fixed_point::add(in_scaled18, fee, "swap fee")?;
                let in_raw = scaling::to_raw_undo_rate_round_up(
                    in_with_fee,
                    data.scaling_factors[index_in],
                    scaling::compute_rate_round_up(rates[index_in]),
                )?;
                if in_raw > params.limit_raw {
                    return Err(VaultError::SwapLimit {
                        amount: in_raw,
                        limit: params.limit_raw,
                    });
                }
                Ok(SwapAmounts {
                    amount_in_scaled18: in_with_fee,
                    amount_out_scaled18: given_scaled18,
                    amount_in_raw: in_raw,
                    amount_out_raw: params.amount_given_raw,
                    amount_calculated_raw: in_raw,
                    total_fee_scaled18: fee,
                })
            }
        }
    }

    fn apply_swap(
        &mut self,
        caller: Address,
        params: &VaultSwapParams,
        index_in: usize,
        index_out: usize,
        amounts: &SwapAmounts,
    ) -> Result<()> {
        let pool = params.pool;
        let aggregate_fee_raw = self.aggregate_fee_raw(pool, index_in, amounts.total_fee_scaled18)?;

        let data = self.pool_mut(pool)?;
        let balance_out = data.balances_raw[index_out];
        let new_balance_out = balance_out.checked_sub(amounts.amount_out_raw).ok_or(
            VaultError::InsufficientPoolBalance {
                pool,
                token: params.token_out,
                needed: amounts.amount_out_raw,
                available: balance_out,
            },
        )?;
        let new_balance_in = amounts
            .amount_in_raw
            .checked_sub(aggregate_fee_raw)
            .and_then(|net| data.balances_raw[index_in].checked_add(net))
            .ok_or(VaultError::MathOverflow("swap balance in"))?;
        data.balances_raw[index_in] = new_balance_in;
        data.balances_raw[index_out] = new_balance_out;
        data.aggregate_fees_raw[index_in] =
            fixed_point::add(data.aggregate_fees_raw[index_in], aggregate_fee_raw, "aggregate fee")?;

        self.state.session.take_debt(params.token_in, amounts.amount_in_raw, caller)?;
        self.state.session.supply_credit(params.token_out, amounts.amount_out_raw, caller)?;

        tracing::debug!(
            pool = %pool,
            kind = %params.kind,
            token_in = %params.token_in,
            token_out = %params.token_out,
            amount_in = %amounts.amount_in_raw,
            amount_out = %amounts.amount_out_raw,
            "Swap"
        );
        self.emit(VaultEvent::Swap {
            pool,
            kind: params.kind,
            token_in: params.token_in,
            token_out: params.token_out,
            amount_in: amounts.amount_in_raw,
            amount_out: amounts.amount_out_raw,
            swap_fee_amount: amounts.total_fee_scaled18,
        });
        Ok(())
    }

    /// Protocol share of a scaled18 fee charged in token `index`, as raw.
    pub(crate) fn aggregate_fee_raw(&self, pool: Address, index: usize, fee_scaled18: U256) -> Result<U256> {
        if fee_scaled18.is_zero() || self.aggregate_swap_fee_percentage().is_zero() {
            return Ok(U256::ZERO);
        }
        let data = self.pool(pool)?;
        if data.config.is_pool_in_recovery_mode {
            return Ok(U256::ZERO);
        }
        let rates = data.rates(&self.state.world)?;
        let fee_raw =
            scaling::to_raw_undo_rate_round_down(fee_scaled18, data.scaling_factors[index], rates[index])?;
        fixed_point::mul_down(fee_raw, self.aggregate_swap_fee_percentage())
    }
}

#[cfg(test)]
mod tests {
    use poolvault_types::fixed_point::ONE;
    use poolvault_types::{SwapKind, U256, VaultError, VaultSwapParams};

    use crate::testing::{self, ALICE, DAI, POOL, ROUTER, USDC, fp, usdc};

    fn exact_in(amount: U256, limit: U256) -> VaultSwapParams {
        VaultSwapParams {
            kind: SwapKind::ExactIn,
            pool: POOL,
            token_in: DAI,
            token_out: USDC,
            amount_given_raw: amount,
            limit_raw: limit,
            user_data: Vec::new(),
        }
    }

    #[test]
    fn exact_in_charges_fee_in_token_in() {
        let mut vault = testing::vault_with_pool();
        let fee = ONE / U256::from(100u64);
        vault.set_static_swap_fee_percentage(testing::ADMIN, POOL, fee).unwrap();

        let result = vault
            .unlock(ROUTER, |v| {
                let r = v.swap(ROUTER, &exact_in(fp(100), U256::ZERO))?;
                testing::settle_swap(v, ROUTER, DAI, USDC, ALICE, &r)?;
                Ok(r)
            })
            .unwrap();

        // Constant-sum pool: 100 DAI − 1% fee = 99 USDC.
        assert_eq!(result.amount_in_raw, fp(100));
        assert_eq!(result.amount_out_raw, usdc(99));
        let balances = vault.get_pool_token_info(POOL).unwrap().balances_raw;
        assert_eq!(balances[0], testing::INITIAL_DAI + fp(100));
        assert_eq!(balances[1], testing::INITIAL_USDC - usdc(99));
    }

    #[test]
    fn exact_out_grosses_up_fee() {
        let mut vault = testing::vault_with_pool();
        let fee = ONE / U256::from(10u64);
        vault.set_static_swap_fee_percentage(testing::ADMIN, POOL, fee).unwrap();

        let params = VaultSwapParams {
            kind: SwapKind::ExactOut,
            amount_given_raw: usdc(90),
            limit_raw: U256::MAX,
            ..exact_in(U256::ZERO, U256::ZERO)
        };
        let result = vault
            .unlock(ROUTER, |v| {
                let r = v.swap(ROUTER, &params)?;
                testing::settle_swap(v, ROUTER, DAI, USDC, ALICE, &r)?;
                Ok(r)
            })
            .unwrap();

        // 90 / (1 − 0.1) = 100.
        assert_eq!(result.amount_in_raw, fp(100));
        assert_eq!(result.amount_calculated_raw, fp(100));
    }

    #[test]
    fn limit_enforced() {
        let mut vault = testing::vault_with_pool();
        let err = vault
            .unlock(ROUTER, |v| v.swap(ROUTER, &exact_in(fp(10), usdc(11))))
            .unwrap_err();
        assert!(matches!(err, VaultError::SwapLimit { .. }));
    }

    #[test]
    fn degenerate_requests_rejected() {
        let mut vault = testing::vault_with_pool();
        vault
            .unlock(ROUTER, |v| {
                assert_eq!(
                    v.swap(ROUTER, &exact_in(U256::ZERO, U256::ZERO)),
                    Err(VaultError::AmountGivenZero)
                );
                let same = VaultSwapParams {
                    token_out: DAI,
                    ..exact_in(fp(1), U256::ZERO)
                };
                assert_eq!(v.swap(ROUTER, &same), Err(VaultError::CannotSwapSameToken(DAI)));
                assert!(matches!(
                    v.swap(ROUTER, &exact_in(U256::from(10u64), U256::ZERO)),
                    Err(VaultError::TradeAmountTooSmall(_))
                ));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn swap_requires_session_and_live_pool() {
        let mut vault = testing::vault_with_pool();
        assert_eq!(
            vault.swap(ROUTER, &exact_in(fp(1), U256::ZERO)),
            Err(VaultError::VaultIsNotUnlocked)
        );

        vault.pause_pool(testing::ADMIN, POOL).unwrap();
        let err = vault
            .unlock(ROUTER, |v| v.swap(ROUTER, &exact_in(fp(1), U256::ZERO)))
            .unwrap_err();
        assert_eq!(err, VaultError::PoolPaused(POOL));

        vault.enable_recovery_mode(ALICE, POOL).unwrap();
        vault.unpause_pool(testing::ADMIN, POOL).unwrap();
        let err = vault
            .unlock(ROUTER, |v| v.swap(ROUTER, &exact_in(fp(1), U256::ZERO)))
            .unwrap_err();
        assert_eq!(err, VaultError::PoolInRecoveryMode(POOL));
    }

    #[test]
    fn aggregate_fee_kept_out_of_pool_balance() {
        let mut vault = testing::vault_with_pool_and_aggregate_fee();
        let fee = ONE / U256::from(100u64);
        vault.set_static_swap_fee_percentage(testing::ADMIN, POOL, fee).unwrap();

        vault
            .unlock(ROUTER, |v| {
                let r = v.swap(ROUTER, &exact_in(fp(100), U256::ZERO))?;
                testing::settle_swap(v, ROUTER, DAI, USDC, ALICE, &r)
            })
            .unwrap();

        // 1 DAI fee, half to the protocol.
        let aggregate = vault.get_aggregate_swap_fee_amount(POOL, DAI).unwrap();
        assert_eq!(aggregate, fp(1) / U256::from(2u64));
        let balances = vault.get_pool_token_info(POOL).unwrap().balances_raw;
        assert_eq!(balances[0], testing::INITIAL_DAI + fp(100) - aggregate);
        assert_eq!(
            vault.reserves_of(DAI),
            balances[0] + aggregate,
            "reserves cover pool balance plus protocol fees"
        );
    }
}
