//! Pool liquidity: seeding, adding, removing and the recovery-mode exit.
//!
//! ```text
//! register ─▶ initialize ─▶ add_liquidity ◀─▶ remove_liquidity
//!                                  │
//!                      recovery mode └─▶ remove_liquidity_recovery
//! ```
//!
//! Token amounts entering the vault round up and amounts leaving round
//! down, both in raw ↔ scaled18 conversions and in the pool math. Tokens
//! move as session deltas of the handler; BPT is minted to the receiver and
//! burned from the owner directly.

use poolvault_types::constants::POOL_MINIMUM_TOTAL_SUPPLY;
use poolvault_types::{
    AddLiquidityKind, AddLiquidityParams, AddLiquidityResult, Address, RemoveLiquidityKind,
    RemoveLiquidityParams, RemoveLiquidityResult, Result, Rounding, U256, VaultError, VaultEvent,
    fixed_point, scaling,
};

use crate::hooks::{CustomLiquidityOutcome, CustomLiquidityRequest, LiquidityHookParams};
use crate::pool_math;
use crate::pool_registry::{LiveBalances, PoolData};
use crate::vault::Vault;

/// A priced liquidity change, in scaled18.
struct PricedLiquidity {
    bpt_amount: U256,
    amounts_scaled18: Vec<U256>,
    swap_fees_scaled18: Vec<U256>,
    /// Raw amounts fixed by the caller, which skip the scaled18 round trip.
    exact_raw: Vec<Option<U256>>,
    return_data: Vec<u8>,
}

impl PricedLiquidity {
    fn from_custom(outcome: CustomLiquidityOutcome) -> Self {
        let count = outcome.amounts_scaled18.len();
        Self {
            bpt_amount: outcome.bpt_amount,
            amounts_scaled18: outcome.amounts_scaled18,
            swap_fees_scaled18: outcome.swap_fee_amounts_scaled18,
            exact_raw: vec![None; count],
            return_data: outcome.return_data,
        }
    }
}

impl Vault {
    // =================================================================
    // Initialization
    // =================================================================

    /// Seed a registered pool with its first liquidity.
    ///
    /// BPT out equals the pool invariant of the seeded balances. The first
    /// `POOL_MINIMUM_TOTAL_SUPPLY` of it is locked to the zero address; `to`
    /// receives the rest. Returns the full BPT amount.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `PoolNotRegistered`, `PoolAlreadyInitialized`, `PoolPaused`, `VaultPaused`
    /// - `InputLengthMismatch`, `TokensMismatch`
    /// - `TotalSupplyTooLow` if the invariant is below the minimum supply
    /// - `BptAmountOutBelowMin`
    pub fn initialize(
        &mut self,
        caller: Address,
        pool: Address,
        to: Address,
        tokens: &[Address],
        exact_amounts_in_raw: &[U256],
        min_bpt_amount_out: U256,
    ) -> Result<U256> {
        self.ensure_handler(caller)?;
        let _guard = self.non_reentrant()?;
        if self.pool(pool)?.config.is_pool_initialized {
            return Err(VaultError::PoolAlreadyInitialized(pool));
        }
        self.ensure_unpaused(pool)?;

        let registered = self.pool(pool)?.token_addresses();
        ensure_input_length(registered.len(), tokens.len())?;
        ensure_input_length(registered.len(), exact_amounts_in_raw.len())?;
        if let Some(index) = registered.iter().zip(tokens).position(|(a, b)| a != b) {
            return Err(VaultError::TokensMismatch { pool, index });
        }

        self.atomic(|vault| {
            for (token, amount) in registered.iter().zip(exact_amounts_in_raw) {
                vault.state.session.take_debt(*token, *amount, caller)?;
            }
            vault.pool_mut(pool)?.balances_raw = exact_amounts_in_raw.to_vec();

            let data = vault.pool(pool)?;
            let live = data.live(&vault.state.world)?;
            let bpt_amount_out = data
                .pricing
                .compute_invariant(&live.balances_scaled18, Rounding::Down)?;
            if bpt_amount_out < POOL_MINIMUM_TOTAL_SUPPLY {
                return Err(VaultError::TotalSupplyTooLow {
                    token: pool,
                    total_supply: bpt_amount_out,
                });
            }
            if bpt_amount_out < min_bpt_amount_out {
                return Err(VaultError::BptAmountOutBelowMin {
                    amount: bpt_amount_out,
                    min: min_bpt_amount_out,
                });
            }

            vault.state.bpt.mint_minimum_supply_reserve(pool)?;
            vault.emit(VaultEvent::Transfer {
                token: pool,
                from: Address::ZERO,
                to: Address::ZERO,
                amount: POOL_MINIMUM_TOTAL_SUPPLY,
            });
            vault.mint_bpt(pool, to, bpt_amount_out - POOL_MINIMUM_TOTAL_SUPPLY)?;

            vault.pool_mut(pool)?.config.is_pool_initialized = true;
            tracing::info!(pool = %pool, to = %to, bpt_out = %bpt_amount_out, "Pool initialized");
            vault.emit(VaultEvent::PoolInitialized {
                pool,
                bpt_amount_out,
            });
            Ok(bpt_amount_out)
        })
    }

    // =================================================================
    // Add liquidity
    // =================================================================

    /// Add liquidity to an initialized pool.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `PoolNotInitialized`, `PoolPaused`, `VaultPaused`
    /// - `PoolInRecoveryMode` for anything but a proportional add
    /// - `OperationNotSupported` when the pool disabled the kind
    /// - `InputLengthMismatch`, `InvalidSingleTokenInput`
    /// - `AmountInAboveMax`, `BptAmountOutBelowMin`, `TradeAmountTooSmall`
    /// - `HookFailed`, or any error from the pool or its hooks
    pub fn add_liquidity(&mut self, caller: Address, params: &AddLiquidityParams) -> Result<AddLiquidityResult> {
        self.ensure_handler(caller)?;
        let pool = params.pool;
        self.ensure_pool_initialized(pool)?;
        self.ensure_unpaused(pool)?;
        if params.kind != AddLiquidityKind::Proportional {
            self.ensure_not_in_recovery_mode(pool)?;
        }
        ensure_input_length(self.pool(pool)?.tokens.len(), params.max_amounts_in_raw.len())?;

        self.atomic(|vault| vault.add_liquidity_inner(caller, params))
    }

    fn add_liquidity_inner(&mut self, caller: Address, params: &AddLiquidityParams) -> Result<AddLiquidityResult> {
        let pool = params.pool;
        let (hooks, hooks_config) = {
            let data = self.pool(pool)?;
            (data.hooks.clone(), data.hooks_config())
        };

        if let Some(hooks) = hooks.as_ref().filter(|_| hooks_config.should_call_before_add_liquidity) {
            let (live, max_scaled18) = self.live_and_scaled(pool, &params.max_amounts_in_raw, Rounding::Down)?;
            let hook_params = LiquidityHookParams {
                router: caller,
                amounts_scaled18: &max_scaled18,
                bpt_amount: params.min_bpt_amount_out,
                balances_scaled18: &live.balances_scaled18,
            };
            if !hooks.on_before_add_liquidity(self, pool, params.kind, &hook_params)? {
                return Err(VaultError::HookFailed {
                    pool,
                    hook: "before_add_liquidity",
                });
            }
        }

        let (priced, amounts_in_raw) = {
            let _guard = self.non_reentrant()?;
            let (live, max_scaled18) = self.live_and_scaled(pool, &params.max_amounts_in_raw, Rounding::Down)?;
            let priced = self.price_add_liquidity(caller, params, &live, &max_scaled18)?;

            let data = self.pool(pool)?;
            let tokens = data.token_addresses();
            let mut amounts_in_raw = Vec::with_capacity(tokens.len());
            for (i, token) in tokens.iter().enumerate() {
                let amount_in_raw = match priced.exact_raw[i] {
                    Some(raw) => raw,
                    None => scaling::to_raw_undo_rate_round_up(
                        priced.amounts_scaled18[i],
                        data.scaling_factors[i],
                        scaling::compute_rate_round_up(live.rates[i]),
                    )?,
                };
                if amount_in_raw > params.max_amounts_in_raw[i] {
                    return Err(VaultError::AmountInAboveMax {
                        token: *token,
                        amount: amount_in_raw,
                        max: params.max_amounts_in_raw[i],
                    });
                }
                amounts_in_raw.push(amount_in_raw);
            }

            if priced.bpt_amount < params.min_bpt_amount_out {
                return Err(VaultError::BptAmountOutBelowMin {
                    amount: priced.bpt_amount,
                    min: params.min_bpt_amount_out,
                });
            }
            self.ensure_valid_trade_amount(priced.bpt_amount)?;

            let aggregate_fees = self.aggregate_fees_raw(pool, &priced.swap_fees_scaled18)?;
            for (i, token) in tokens.iter().enumerate() {
                self.state.session.take_debt(*token, amounts_in_raw[i], caller)?;
            }
            let data = self.pool_mut(pool)?;
            for (i, amount_in_raw) in amounts_in_raw.iter().enumerate() {
                let net = amount_in_raw
                    .checked_sub(aggregate_fees[i])
                    .ok_or(VaultError::MathOverflow("add liquidity fee"))?;
                data.balances_raw[i] = fixed_point::add(data.balances_raw[i], net, "add liquidity")?;
                data.aggregate_fees_raw[i] =
                    fixed_point::add(data.aggregate_fees_raw[i], aggregate_fees[i], "aggregate fee")?;
            }

            self.mint_bpt(pool, params.to, priced.bpt_amount)?;
            (priced, amounts_in_raw)
        };

        if let Some(hooks) = hooks.as_ref().filter(|_| hooks_config.should_call_after_add_liquidity) {
            let live = self.pool(pool)?.live(&self.state.world)?;
            let hook_params = LiquidityHookParams {
                router: caller,
                amounts_scaled18: &priced.amounts_scaled18,
                bpt_amount: priced.bpt_amount,
                balances_scaled18: &live.balances_scaled18,
            };
            if !hooks.on_after_add_liquidity(self, pool, params.kind, &hook_params)? {
                return Err(VaultError::HookFailed {
                    pool,
                    hook: "after_add_liquidity",
                });
            }
        }

        tracing::debug!(
            pool = %pool,
            kind = ?params.kind,
            to = %params.to,
            bpt_out = %priced.bpt_amount,
            "Liquidity added"
        );
        self.emit(VaultEvent::LiquidityAdded {
            pool,
            to: params.to,
            kind: params.kind,
            amounts_in: amounts_in_raw.clone(),
            bpt_amount_out: priced.bpt_amount,
        });

        Ok(AddLiquidityResult {
            amounts_in_raw,
            bpt_amount_out: priced.bpt_amount,
            return_data: priced.return_data,
        })
    }

    fn price_add_liquidity(
        &self,
        caller: Address,
        params: &AddLiquidityParams,
        live: &LiveBalances,
        max_amounts_in_scaled18: &[U256],
    ) -> Result<PricedLiquidity> {
        let pool = params.pool;
        let data = self.pool(pool)?;
        let management = data.config.liquidity_management;
        let balances = &live.balances_scaled18;
        let total_supply = self.total_supply(pool);
        let swap_fee = data.config.static_swap_fee_percentage;
        let count = balances.len();
        let no_fees = vec![U256::ZERO; count];

        match params.kind {
            AddLiquidityKind::Proportional => {
                let bpt_amount = params.min_bpt_amount_out;
                Ok(PricedLiquidity {
                    bpt_amount,
                    amounts_scaled18: pool_math::compute_proportional_amounts_in(balances, total_supply, bpt_amount)?,
                    swap_fees_scaled18: no_fees,
                    exact_raw: vec![None; count],
                    return_data: Vec::new(),
                })
            }
            AddLiquidityKind::Donation => {
                if !management.enable_donation {
                    return Err(not_supported(pool, "add_liquidity_donation"));
                }
                Ok(PricedLiquidity {
                    bpt_amount: U256::ZERO,
                    amounts_scaled18: max_amounts_in_scaled18.to_vec(),
                    swap_fees_scaled18: no_fees,
                    exact_raw: params.max_amounts_in_raw.iter().copied().map(Some).collect(),
                    return_data: Vec::new(),
                })
            }
            AddLiquidityKind::Unbalanced => {
                if management.disable_unbalanced_liquidity {
                    return Err(not_supported(pool, "add_liquidity_unbalanced"));
                }
                let (bpt_amount, swap_fees) = pool_math::compute_add_liquidity_unbalanced(
                    balances,
                    max_amounts_in_scaled18,
                    total_supply,
                    swap_fee,
                    data.pricing.as_ref(),
                )?;
                Ok(PricedLiquidity {
                    bpt_amount,
                    amounts_scaled18: max_amounts_in_scaled18.to_vec(),
                    swap_fees_scaled18: swap_fees,
                    exact_raw: params.max_amounts_in_raw.iter().copied().map(Some).collect(),
                    return_data: Vec::new(),
                })
            }
            AddLiquidityKind::SingleTokenExactOut => {
                if management.disable_unbalanced_liquidity {
                    return Err(not_supported(pool, "add_liquidity_single_token_exact_out"));
                }
                let index = single_token_index(&params.max_amounts_in_raw)?;
                let bpt_amount = params.min_bpt_amount_out;
                let (amount_in, swap_fees) = pool_math::compute_add_liquidity_single_token_exact_out(
                    balances,
                    index,
                    bpt_amount,
                    total_supply,
                    swap_fee,
                    data.pricing.as_ref(),
                )?;
                let mut amounts_scaled18 = vec![U256::ZERO; count];
                amounts_scaled18[index] = amount_in;
                Ok(PricedLiquidity {
                    bpt_amount,
                    amounts_scaled18,
                    swap_fees_scaled18: swap_fees,
                    exact_raw: vec![None; count],
                    return_data: Vec::new(),
                })
            }
            AddLiquidityKind::Custom => {
                if !management.enable_add_liquidity_custom {
                    return Err(not_supported(pool, "add_liquidity_custom"));
                }
                let outcome = data.pricing.on_add_liquidity_custom(&CustomLiquidityRequest {
                    pool,
                    router: caller,
                    bpt_amount: params.min_bpt_amount_out,
                    amounts_scaled18: max_amounts_in_scaled18,
                    balances_scaled18: balances,
                    user_data: &params.user_data,
                })?;
                ensure_custom_shape(count, &outcome)?;
                Ok(PricedLiquidity::from_custom(outcome))
            }
        }
    }

    // =================================================================
    // Remove liquidity
    // =================================================================

    /// Remove liquidity from an initialized pool.
    ///
    /// When `caller` is not `params.from`, the BPT burned is spent from the
    /// allowance `from` granted to `caller`. In a simulated session `from`
    /// is first credited `max_bpt_amount_in` so any amount can be quoted.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `PoolNotInitialized`, `PoolPaused`, `VaultPaused`
    /// - `PoolInRecoveryMode` for anything but a proportional removal
    /// - `OperationNotSupported` when the pool disabled the kind
    /// - `InputLengthMismatch`, `InvalidSingleTokenInput`
    /// - `AmountOutBelowMin`, `BptAmountInAboveMax`, `TradeAmountTooSmall`
    /// - `InsufficientAllowance`, `InsufficientBalance`, `TotalSupplyTooLow`
    /// - `HookFailed`, or any error from the pool or its hooks
    pub fn remove_liquidity(
        &mut self,
        caller: Address,
        params: &RemoveLiquidityParams,
    ) -> Result<RemoveLiquidityResult> {
        self.ensure_handler(caller)?;
        let pool = params.pool;
        self.ensure_pool_initialized(pool)?;
        self.ensure_unpaused(pool)?;
        if params.kind != RemoveLiquidityKind::Proportional {
            self.ensure_not_in_recovery_mode(pool)?;
        }
        ensure_input_length(self.pool(pool)?.tokens.len(), params.min_amounts_out_raw.len())?;

        self.atomic(|vault| {
            if vault.state.session.is_simulated() {
                let mode = vault.state.session.mode();
                vault
                    .state
                    .bpt
                    .query_mode_balance_increase(pool, params.from, params.max_bpt_amount_in, mode)?;
            }
            vault.remove_liquidity_inner(caller, params)
        })
    }

    fn remove_liquidity_inner(
        &mut self,
        caller: Address,
        params: &RemoveLiquidityParams,
    ) -> Result<RemoveLiquidityResult> {
        let pool = params.pool;
        let (hooks, hooks_config) = {
            let data = self.pool(pool)?;
            (data.hooks.clone(), data.hooks_config())
        };

        if let Some(hooks) = hooks.as_ref().filter(|_| hooks_config.should_call_before_remove_liquidity) {
            let (live, min_scaled18) = self.live_and_scaled(pool, &params.min_amounts_out_raw, Rounding::Up)?;
            let hook_params = LiquidityHookParams {
                router: caller,
                amounts_scaled18: &min_scaled18,
                bpt_amount: params.max_bpt_amount_in,
                balances_scaled18: &live.balances_scaled18,
            };
            if !hooks.on_before_remove_liquidity(self, pool, params.kind, &hook_params)? {
                return Err(VaultError::HookFailed {
                    pool,
                    hook: "before_remove_liquidity",
                });
            }
        }

        let (priced, amounts_out_raw) = {
            let _guard = self.non_reentrant()?;
            let (live, min_scaled18) = self.live_and_scaled(pool, &params.min_amounts_out_raw, Rounding::Up)?;
            let priced = self.price_remove_liquidity(caller, params, &live, &min_scaled18)?;

            if priced.bpt_amount > params.max_bpt_amount_in {
                return Err(VaultError::BptAmountInAboveMax {
                    amount: priced.bpt_amount,
                    max: params.max_bpt_amount_in,
                });
            }
            self.ensure_valid_trade_amount(priced.bpt_amount)?;

            let data = self.pool(pool)?;
            let tokens = data.token_addresses();
            let mut amounts_out_raw = Vec::with_capacity(tokens.len());
            for (i, token) in tokens.iter().enumerate() {
                let amount_out_raw = match priced.exact_raw[i] {
                    Some(raw) => raw,
                    None => scaling::to_raw_undo_rate_round_down(
                        priced.amounts_scaled18[i],
                        data.scaling_factors[i],
                        live.rates[i],
                    )?,
                };
                if amount_out_raw < params.min_amounts_out_raw[i] {
                    return Err(VaultError::AmountOutBelowMin {
                        token: *token,
                        amount: amount_out_raw,
                        min: params.min_amounts_out_raw[i],
                    });
                }
                amounts_out_raw.push(amount_out_raw);
            }

            let aggregate_fees = self.aggregate_fees_raw(pool, &priced.swap_fees_scaled18)?;
            for (i, token) in tokens.iter().enumerate() {
                self.state.session.supply_credit(*token, amounts_out_raw[i], caller)?;
            }
            self.debit_pool_balances(pool, &tokens, &amounts_out_raw, &aggregate_fees)?;

            self.state
                .bpt
                .spend_allowance(pool, params.from, caller, priced.bpt_amount)?;
            self.burn_bpt(pool, params.from, priced.bpt_amount)?;
            (priced, amounts_out_raw)
        };

        if let Some(hooks) = hooks.as_ref().filter(|_| hooks_config.should_call_after_remove_liquidity) {
            let live = self.pool(pool)?.live(&self.state.world)?;
            let hook_params = LiquidityHookParams {
                router: caller,
                amounts_scaled18: &priced.amounts_scaled18,
                bpt_amount: priced.bpt_amount,
                balances_scaled18: &live.balances_scaled18,
            };
            if !hooks.on_after_remove_liquidity(self, pool, params.kind, &hook_params)? {
                return Err(VaultError::HookFailed {
                    pool,
                    hook: "after_remove_liquidity",
                });
            }
        }

        tracing::debug!(
            pool = %pool,
            kind = ?params.kind,
            from = %params.from,
            bpt_in = %priced.bpt_amount,
            "Liquidity removed"
        );
        self.emit(VaultEvent::LiquidityRemoved {
            pool,
            from: params.from,
            kind: params.kind,
            amounts_out: amounts_out_raw.clone(),
            bpt_amount_in: priced.bpt_amount,
        });

        Ok(RemoveLiquidityResult {
            bpt_amount_in: priced.bpt_amount,
            amounts_out_raw,
            return_data: priced.return_data,
        })
    }

    fn price_remove_liquidity(
        &self,
        caller: Address,
        params: &RemoveLiquidityParams,
        live: &LiveBalances,
        min_amounts_out_scaled18: &[U256],
    ) -> Result<PricedLiquidity> {
        let pool = params.pool;
        let data = self.pool(pool)?;
        let management = data.config.liquidity_management;
        let balances = &live.balances_scaled18;
        let total_supply = self.total_supply(pool);
        let swap_fee = data.config.static_swap_fee_percentage;
        let count = balances.len();

        match params.kind {
            RemoveLiquidityKind::Proportional => {
                let bpt_amount = params.max_bpt_amount_in;
                Ok(PricedLiquidity {
                    bpt_amount,
                    amounts_scaled18: pool_math::compute_proportional_amounts_out(balances, total_supply, bpt_amount)?,
                    swap_fees_scaled18: vec![U256::ZERO; count],
                    exact_raw: vec![None; count],
                    return_data: Vec::new(),
                })
            }
            RemoveLiquidityKind::SingleTokenExactIn => {
                if management.disable_unbalanced_liquidity {
                    return Err(not_supported(pool, "remove_liquidity_single_token_exact_in"));
                }
                let index = single_token_index(&params.min_amounts_out_raw)?;
                let bpt_amount = params.max_bpt_amount_in;
                let (amount_out, swap_fees) = pool_math::compute_remove_liquidity_single_token_exact_in(
                    balances,
                    index,
                    bpt_amount,
                    total_supply,
                    swap_fee,
                    data.pricing.as_ref(),
                )?;
                let mut amounts_scaled18 = vec![U256::ZERO; count];
                amounts_scaled18[index] = amount_out;
                Ok(PricedLiquidity {
                    bpt_amount,
                    amounts_scaled18,
                    swap_fees_scaled18: swap_fees,
                    exact_raw: vec![None; count],
                    return_data: Vec::new(),
                })
            }
            RemoveLiquidityKind::SingleTokenExactOut => {
                if management.disable_unbalanced_liquidity {
                    return Err(not_supported(pool, "remove_liquidity_single_token_exact_out"));
                }
                let index = single_token_index(&params.min_amounts_out_raw)?;
                let amount_out = min_amounts_out_scaled18[index];
                let (bpt_amount, swap_fees) = pool_math::compute_remove_liquidity_single_token_exact_out(
                    balances,
                    index,
                    amount_out,
                    total_supply,
                    swap_fee,
                    data.pricing.as_ref(),
                )?;
                let mut amounts_scaled18 = vec![U256::ZERO; count];
                amounts_scaled18[index] = amount_out;
                let mut exact_raw = vec![None; count];
                exact_raw[index] = Some(params.min_amounts_out_raw[index]);
                Ok(PricedLiquidity {
                    bpt_amount,
                    amounts_scaled18,
                    swap_fees_scaled18: swap_fees,
                    exact_raw,
                    return_data: Vec::new(),
                })
            }
            RemoveLiquidityKind::Custom => {
                if !management.enable_remove_liquidity_custom {
                    return Err(not_supported(pool, "remove_liquidity_custom"));
                }
                let outcome = data.pricing.on_remove_liquidity_custom(&CustomLiquidityRequest {
                    pool,
                    router: caller,
                    bpt_amount: params.max_bpt_amount_in,
                    amounts_scaled18: min_amounts_out_scaled18,
                    balances_scaled18: balances,
                    user_data: &params.user_data,
                })?;
                ensure_custom_shape(count, &outcome)?;
                Ok(PricedLiquidity::from_custom(outcome))
            }
        }
    }

    // =================================================================
    // Recovery mode exit
    // =================================================================

    /// Proportional exit over raw balances for a pool in recovery mode.
    ///
    /// No hooks, rates or fees are involved, and it works while the pool or
    /// the vault is paused. Returns the raw amounts out.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `PoolNotInitialized`, `PoolNotInRecoveryMode`
    /// - `InputLengthMismatch`, `AmountOutBelowMin`
    /// - `InsufficientAllowance`, `InsufficientBalance`, `TotalSupplyTooLow`
    pub fn remove_liquidity_recovery(
        &mut self,
        caller: Address,
        pool: Address,
        from: Address,
        exact_bpt_amount_in: U256,
        min_amounts_out_raw: &[U256],
    ) -> Result<Vec<U256>> {
        self.ensure_handler(caller)?;
        self.ensure_pool_initialized(pool)?;
        if !self.is_pool_in_recovery_mode(pool) {
            return Err(VaultError::PoolNotInRecoveryMode(pool));
        }
        let _guard = self.non_reentrant()?;
        let tokens = self.pool(pool)?.token_addresses();
        ensure_input_length(tokens.len(), min_amounts_out_raw.len())?;

        self.atomic(|vault| {
            if vault.state.session.is_simulated() {
                let mode = vault.state.session.mode();
                vault
                    .state
                    .bpt
                    .query_mode_balance_increase(pool, from, exact_bpt_amount_in, mode)?;
            }

            let amounts_out_raw = pool_math::compute_proportional_amounts_out(
                &vault.pool(pool)?.balances_raw,
                vault.total_supply(pool),
                exact_bpt_amount_in,
            )?;
            for (i, token) in tokens.iter().enumerate() {
                if amounts_out_raw[i] < min_amounts_out_raw[i] {
                    return Err(VaultError::AmountOutBelowMin {
                        token: *token,
                        amount: amounts_out_raw[i],
                        min: min_amounts_out_raw[i],
                    });
                }
                vault.state.session.supply_credit(*token, amounts_out_raw[i], caller)?;
            }
            let no_fees = vec![U256::ZERO; tokens.len()];
            vault.debit_pool_balances(pool, &tokens, &amounts_out_raw, &no_fees)?;

            vault.state.bpt.spend_allowance(pool, from, caller, exact_bpt_amount_in)?;
            vault.burn_bpt(pool, from, exact_bpt_amount_in)?;

            tracing::info!(pool = %pool, from = %from, bpt_in = %exact_bpt_amount_in, "Recovery exit");
            vault.emit(VaultEvent::RecoveryLiquidityRemoved {
                pool,
                from,
                amounts_out: amounts_out_raw.clone(),
                bpt_amount_in: exact_bpt_amount_in,
            });
            Ok(amounts_out_raw)
        })
    }

    // =================================================================
    // Protocol fees
    // =================================================================

    /// Hand the pool's accumulated aggregate fees to `caller` as session
    /// credit, to be withdrawn with `send_to`. Returns the raw amounts.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `SenderNotAllowed` unless `caller` is the admin
    /// - `PoolNotRegistered`
    pub fn collect_aggregate_fees(&mut self, caller: Address, pool: Address) -> Result<Vec<U256>> {
        self.ensure_handler(caller)?;
        self.ensure_admin(caller)?;
        let _guard = self.non_reentrant()?;

        self.atomic(|vault| {
            let data = vault.pool_mut(pool)?;
            let tokens = data.token_addresses();
            let collected = std::mem::replace(&mut data.aggregate_fees_raw, vec![U256::ZERO; tokens.len()]);

            for (token, amount) in tokens.iter().zip(&collected) {
                if amount.is_zero() {
                    continue;
                }
                vault.state.session.supply_credit(*token, *amount, caller)?;
                tracing::info!(pool = %pool, token = %token, amount = %amount, "Aggregate fees collected");
                vault.emit(VaultEvent::AggregateFeesCollected {
                    pool,
                    token: *token,
                    amount: *amount,
                });
            }
            Ok(collected)
        })
    }

    // =================================================================
    // Helpers
    // =================================================================

    fn live_and_scaled(&self, pool: Address, raw: &[U256], rounding: Rounding) -> Result<(LiveBalances, Vec<U256>)> {
        let data = self.pool(pool)?;
        let live = data.live(&self.state.world)?;
        let scaled = to_scaled18_all(data, &live.rates, raw, rounding)?;
        Ok((live, scaled))
    }

    fn aggregate_fees_raw(&self, pool: Address, swap_fees_scaled18: &[U256]) -> Result<Vec<U256>> {
        swap_fees_scaled18
            .iter()
            .enumerate()
            .map(|(i, fee)| self.aggregate_fee_raw(pool, i, *fee))
            .collect()
    }

    /// Remove `amounts_out_raw` plus the protocol's fee share from the pool
    /// balances, booking the fee share as aggregate fees.
    fn debit_pool_balances(
        &mut self,
        pool: Address,
        tokens: &[Address],
        amounts_out_raw: &[U256],
        aggregate_fees: &[U256],
    ) -> Result<()> {
        let data = self.pool_mut(pool)?;
        for (i, token) in tokens.iter().enumerate() {
            let needed = fixed_point::add(amounts_out_raw[i], aggregate_fees[i], "remove liquidity")?;
            let available = data.balances_raw[i];
            data.balances_raw[i] = available
                .checked_sub(needed)
                .ok_or(VaultError::InsufficientPoolBalance {
                    pool,
                    token: *token,
                    needed,
                    available,
                })?;
            data.aggregate_fees_raw[i] =
                fixed_point::add(data.aggregate_fees_raw[i], aggregate_fees[i], "aggregate fee")?;
        }
        Ok(())
    }
}

fn to_scaled18_all(data: &PoolData, rates: &[U256], raw: &[U256], rounding: Rounding) -> Result<Vec<U256>> {
    raw.iter()
        .zip(&data.scaling_factors)
        .zip(rates)
        .map(|((amount, sf), rate)| match rounding {
            Rounding::Down => scaling::to_scaled18_apply_rate_round_down(*amount, *sf, *rate),
            Rounding::Up => {
                scaling::to_scaled18_apply_rate_round_up(*amount, *sf, scaling::compute_rate_round_up(*rate))
            }
        })
        .collect()
}

fn ensure_input_length(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(VaultError::InputLengthMismatch { expected, actual })
    }
}

fn ensure_custom_shape(count: usize, outcome: &CustomLiquidityOutcome) -> Result<()> {
    ensure_input_length(count, outcome.amounts_scaled18.len())?;
    ensure_input_length(count, outcome.swap_fee_amounts_scaled18.len())
}

/// Index of the only non-zero amount.
fn single_token_index(amounts: &[U256]) -> Result<usize> {
    let mut found = None;
    for (i, amount) in amounts.iter().enumerate() {
        if amount.is_zero() {
            continue;
        }
        if found.is_some() {
            return Err(VaultError::InvalidSingleTokenInput);
        }
        found = Some(i);
    }
    found.ok_or(VaultError::InvalidSingleTokenInput)
}

fn not_supported(pool: Address, operation: &'static str) -> VaultError {
    VaultError::OperationNotSupported { pool, operation }
}

#[cfg(test)]
mod tests {
    use poolvault_types::constants::POOL_MINIMUM_TOTAL_SUPPLY;
    use poolvault_types::fixed_point::ONE;
    use poolvault_types::{
        AddLiquidityKind, AddLiquidityParams, RemoveLiquidityKind, RemoveLiquidityParams, U256,
        VaultError, VaultEvent,
    };

    use crate::pool_registry::TokenConfig;
    use crate::testing::{self, ADMIN, ALICE, BOB, DAI, POOL, ROUTER, USDC, fp, usdc};

    fn add(kind: AddLiquidityKind, max_in: Vec<U256>, min_bpt: U256) -> AddLiquidityParams {
        AddLiquidityParams {
            pool: POOL,
            to: ALICE,
            max_amounts_in_raw: max_in,
            min_bpt_amount_out: min_bpt,
            kind,
            user_data: Vec::new(),
        }
    }

    fn remove(kind: RemoveLiquidityKind, max_bpt: U256, min_out: Vec<U256>) -> RemoveLiquidityParams {
        RemoveLiquidityParams {
            pool: POOL,
            from: ALICE,
            max_bpt_amount_in: max_bpt,
            min_amounts_out_raw: min_out,
            kind,
            user_data: Vec::new(),
        }
    }

    #[test]
    fn initialize_locks_minimum_supply() {
        let vault = testing::vault_with_pool();
        // Constant-sum invariant of 1000 DAI + 1000 USDC.
        let bpt = fp(2000);
        assert!(vault.is_pool_initialized(POOL));
        assert_eq!(vault.total_supply(POOL), bpt);
        assert_eq!(vault.balance_of(POOL, ALICE), bpt - POOL_MINIMUM_TOTAL_SUPPLY);
        assert_eq!(vault.balance_of(POOL, poolvault_types::Address::ZERO), POOL_MINIMUM_TOTAL_SUPPLY);
        assert!(vault
            .events()
            .events()
            .iter()
            .any(|e| matches!(e, VaultEvent::PoolInitialized { bpt_amount_out, .. } if *bpt_amount_out == bpt)));
    }

    #[test]
    fn initialize_rejects_second_call_and_token_mismatch() {
        let mut vault = testing::vault_with_pool();
        let err = vault
            .unlock(ROUTER, |v| {
                v.initialize(ROUTER, POOL, ALICE, &[DAI, USDC], &[fp(1), usdc(1)], U256::ZERO)
            })
            .unwrap_err();
        assert_eq!(err, VaultError::PoolAlreadyInitialized(POOL));

        let mut vault = testing::vault_with_tokens();
        vault
            .register_pool(testing::pool_registration(
                POOL,
                vec![TokenConfig::standard(DAI), TokenConfig::standard(USDC)],
                &vault,
            ))
            .unwrap();
        let err = vault
            .unlock(ROUTER, |v| {
                v.initialize(ROUTER, POOL, ALICE, &[USDC, DAI], &[fp(1), usdc(1)], U256::ZERO)
            })
            .unwrap_err();
        assert_eq!(err, VaultError::TokensMismatch { pool: POOL, index: 0 });
    }

    #[test]
    fn initialize_below_minimum_supply_fails() {
        let mut vault = testing::vault_with_tokens();
        vault
            .register_pool(testing::pool_registration(
                POOL,
                vec![TokenConfig::standard(DAI), TokenConfig::standard(USDC)],
                &vault,
            ))
            .unwrap();
        let tiny = U256::from(1000u64);
        let err = vault
            .unlock(ROUTER, |v| {
                v.initialize(ROUTER, POOL, ALICE, &[DAI, USDC], &[tiny, U256::ZERO], U256::ZERO)
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::TotalSupplyTooLow { .. }));
        assert!(!vault.is_pool_initialized(POOL));
    }

    #[test]
    fn proportional_add_rounds_up_amounts_in() {
        let mut vault = testing::vault_with_pool();
        let supply = vault.total_supply(POOL);
        let result = vault
            .unlock(ROUTER, |v| {
                let r = v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::Proportional, vec![fp(200), usdc(200)], fp(200)),
                )?;
                testing::pay_in(v, ROUTER, ALICE, &[DAI, USDC], &r.amounts_in_raw)?;
                Ok(r)
            })
            .unwrap();

        // 10% of a 1000/1000 pool.
        assert_eq!(result.bpt_amount_out, fp(200));
        assert_eq!(result.amounts_in_raw, vec![fp(100), usdc(100)]);
        assert_eq!(vault.total_supply(POOL), supply + fp(200));
    }

    #[test]
    fn proportional_add_respects_max_in() {
        let mut vault = testing::vault_with_pool();
        let err = vault
            .unlock(ROUTER, |v| {
                v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::Proportional, vec![fp(99), usdc(200)], fp(200)),
                )
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::AmountInAboveMax { token, .. } if token == DAI));
    }

    #[test]
    fn unbalanced_add_uses_exact_amounts() {
        let mut vault = testing::vault_with_pool();
        let result = vault
            .unlock(ROUTER, |v| {
                let r = v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::Unbalanced, vec![fp(50), U256::ZERO], U256::ZERO),
                )?;
                testing::pay_in(v, ROUTER, ALICE, &[DAI, USDC], &r.amounts_in_raw)?;
                Ok(r)
            })
            .unwrap();
        assert_eq!(result.amounts_in_raw, vec![fp(50), U256::ZERO]);
        assert!(result.bpt_amount_out > fp(49) && result.bpt_amount_out <= fp(50));
        let balances = vault.get_pool_token_info(POOL).unwrap().balances_raw;
        assert_eq!(balances[0], testing::INITIAL_DAI + fp(50));
    }

    #[test]
    fn single_token_exact_out_add() {
        let mut vault = testing::vault_with_pool();
        let result = vault
            .unlock(ROUTER, |v| {
                let r = v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::SingleTokenExactOut, vec![U256::ZERO, usdc(100)], fp(20)),
                )?;
                testing::pay_in(v, ROUTER, ALICE, &[DAI, USDC], &r.amounts_in_raw)?;
                Ok(r)
            })
            .unwrap();
        assert_eq!(result.bpt_amount_out, fp(20));
        assert_eq!(result.amounts_in_raw[0], U256::ZERO);
        // 1% of the invariant, rounded up into raw USDC.
        assert!(result.amounts_in_raw[1] >= usdc(20) && result.amounts_in_raw[1] <= usdc(20) + U256::from(1u64));

        let err = vault
            .unlock(ROUTER, |v| {
                v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::SingleTokenExactOut, vec![fp(1), usdc(1)], fp(1)),
                )
            })
            .unwrap_err();
        assert_eq!(err, VaultError::InvalidSingleTokenInput);
    }

    #[test]
    fn donation_requires_opt_in() {
        let mut vault = testing::vault_with_pool();
        let err = vault
            .unlock(ROUTER, |v| {
                v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::Donation, vec![fp(1), U256::ZERO], U256::ZERO),
                )
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::OperationNotSupported { .. }));

        let err = vault
            .unlock(ROUTER, |v| {
                v.add_liquidity(ROUTER, &add(AddLiquidityKind::Custom, vec![fp(1), usdc(1)], U256::ZERO))
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::OperationNotSupported { .. }));
    }

    #[test]
    fn donation_adds_balance_without_bpt() {
        let mut vault = testing::vault_with_pool_flags(|m| m.enable_donation = true);
        let supply = vault.total_supply(POOL);
        vault
            .unlock(ROUTER, |v| {
                let r = v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::Donation, vec![fp(5), U256::ZERO], U256::ZERO),
                )?;
                assert_eq!(r.bpt_amount_out, U256::ZERO);
                testing::pay_in(v, ROUTER, ALICE, &[DAI, USDC], &r.amounts_in_raw)
            })
            .unwrap();
        assert_eq!(vault.total_supply(POOL), supply);
        let balances = vault.get_pool_token_info(POOL).unwrap().balances_raw;
        assert_eq!(balances[0], testing::INITIAL_DAI + fp(5));
    }

    #[test]
    fn unbalanced_disabled_by_pool() {
        let mut vault = testing::vault_with_pool_flags(|m| m.disable_unbalanced_liquidity = true);
        let err = vault
            .unlock(ROUTER, |v| {
                v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::Unbalanced, vec![fp(1), U256::ZERO], U256::ZERO),
                )
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::OperationNotSupported { .. }));
    }

    #[test]
    fn proportional_remove_rounds_down_amounts_out() {
        let mut vault = testing::vault_with_pool();
        let result = vault
            .unlock(ROUTER, |v| {
                let r = v.remove_liquidity(
                    ROUTER,
                    &remove(RemoveLiquidityKind::Proportional, fp(200), vec![U256::ZERO, U256::ZERO]),
                )?;
                testing::pay_out(v, ROUTER, ALICE, &[DAI, USDC], &r.amounts_out_raw)?;
                Ok(r)
            })
            .unwrap();
        assert_eq!(result.bpt_amount_in, fp(200));
        assert_eq!(result.amounts_out_raw, vec![fp(100), usdc(100)]);
    }

    #[test]
    fn remove_by_third_party_spends_allowance() {
        let mut vault = testing::vault_with_pool();
        let params = remove(RemoveLiquidityKind::Proportional, fp(10), vec![U256::ZERO, U256::ZERO]);

        let err = vault
            .unlock(BOB, |v| v.remove_liquidity(BOB, &params))
            .unwrap_err();
        assert!(matches!(err, VaultError::InsufficientAllowance { .. }));

        vault.approve(ALICE, POOL, BOB, fp(10)).unwrap();
        vault
            .unlock(BOB, |v| {
                let r = v.remove_liquidity(BOB, &params)?;
                testing::pay_out(v, BOB, BOB, &[DAI, USDC], &r.amounts_out_raw)
            })
            .unwrap();
        assert_eq!(vault.allowance(POOL, ALICE, BOB), U256::ZERO);
    }

    #[test]
    fn single_token_exact_in_remove_charges_fee() {
        let mut vault = testing::vault_with_pool();
        vault
            .set_static_swap_fee_percentage(ADMIN, POOL, ONE / U256::from(100u64))
            .unwrap();
        let result = vault
            .unlock(ROUTER, |v| {
                let r = v.remove_liquidity(
                    ROUTER,
                    &remove(RemoveLiquidityKind::SingleTokenExactIn, fp(20), vec![fp(1), U256::ZERO]),
                )?;
                testing::pay_out(v, ROUTER, ALICE, &[DAI, USDC], &r.amounts_out_raw)?;
                Ok(r)
            })
            .unwrap();
        // 1% of the pool value is 20 DAI before fees; the fee is charged on
        // the part above the proportional share.
        assert!(result.amounts_out_raw[0] < fp(20));
        assert!(result.amounts_out_raw[0] > fp(19));
        assert_eq!(result.amounts_out_raw[1], U256::ZERO);
    }

    #[test]
    fn single_token_exact_out_remove_burns_enough_bpt() {
        let mut vault = testing::vault_with_pool();
        let result = vault
            .unlock(ROUTER, |v| {
                let r = v.remove_liquidity(
                    ROUTER,
                    &remove(RemoveLiquidityKind::SingleTokenExactOut, fp(30), vec![U256::ZERO, usdc(25)]),
                )?;
                testing::pay_out(v, ROUTER, ALICE, &[DAI, USDC], &r.amounts_out_raw)?;
                Ok(r)
            })
            .unwrap();
        assert_eq!(result.amounts_out_raw, vec![U256::ZERO, usdc(25)]);
        assert!(result.bpt_amount_in >= fp(25));

        let err = vault
            .unlock(ROUTER, |v| {
                v.remove_liquidity(
                    ROUTER,
                    &remove(RemoveLiquidityKind::SingleTokenExactOut, fp(1), vec![U256::ZERO, usdc(25)]),
                )
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::BptAmountInAboveMax { .. }));
    }

    #[test]
    fn recovery_mode_narrows_operations() {
        let mut vault = testing::vault_with_pool();
        vault.pause_pool(ADMIN, POOL).unwrap();
        vault.enable_recovery_mode(ALICE, POOL).unwrap();

        // Paused: the regular paths are closed, the recovery exit is open.
        let err = vault
            .unlock(ROUTER, |v| {
                v.remove_liquidity(
                    ROUTER,
                    &remove(RemoveLiquidityKind::Proportional, fp(10), vec![U256::ZERO, U256::ZERO]),
                )
            })
            .unwrap_err();
        assert_eq!(err, VaultError::PoolPaused(POOL));

        let out = vault
            .unlock(ALICE, |v| {
                let out = v.remove_liquidity_recovery(ALICE, POOL, ALICE, fp(200), &[U256::ZERO, U256::ZERO])?;
                testing::pay_out(v, ALICE, ALICE, &[DAI, USDC], &out)?;
                Ok(out)
            })
            .unwrap();
        assert_eq!(out, vec![fp(100), usdc(100)]);

        vault.unpause_pool(ADMIN, POOL).unwrap();
        let err = vault
            .unlock(ROUTER, |v| {
                v.add_liquidity(
                    ROUTER,
                    &add(AddLiquidityKind::Unbalanced, vec![fp(1), U256::ZERO], U256::ZERO),
                )
            })
            .unwrap_err();
        assert_eq!(err, VaultError::PoolInRecoveryMode(POOL));
    }

    #[test]
    fn recovery_exit_requires_recovery_mode() {
        let mut vault = testing::vault_with_pool();
        let err = vault
            .unlock(ALICE, |v| v.remove_liquidity_recovery(ALICE, POOL, ALICE, fp(1), &[U256::ZERO, U256::ZERO]))
            .unwrap_err();
        assert_eq!(err, VaultError::PoolNotInRecoveryMode(POOL));
    }

    #[test]
    fn quote_remove_without_holding_bpt() {
        let mut vault = testing::vault_with_pool();
        let quoted = vault
            .quote(ROUTER, |v| {
                let params = RemoveLiquidityParams {
                    from: ROUTER,
                    ..remove(RemoveLiquidityKind::Proportional, fp(200), vec![U256::ZERO, U256::ZERO])
                };
                v.remove_liquidity(ROUTER, &params)
            })
            .unwrap();
        assert_eq!(quoted.amounts_out_raw, vec![fp(100), usdc(100)]);
        assert_eq!(vault.balance_of(POOL, ROUTER), U256::ZERO);
        assert_eq!(vault.total_supply(POOL), fp(2000));

        // The same call in a live session has no BPT to burn.
        let err = vault
            .unlock(ROUTER, |v| {
                let params = RemoveLiquidityParams {
                    from: ROUTER,
                    ..remove(RemoveLiquidityKind::Proportional, fp(200), vec![U256::ZERO, U256::ZERO])
                };
                v.remove_liquidity(ROUTER, &params)
            })
            .unwrap_err();
        assert!(matches!(err, VaultError::InsufficientBalance { .. }));
    }

    #[test]
    fn collect_aggregate_fees_credits_admin() {
        let mut vault = testing::vault_with_pool_and_aggregate_fee();
        vault
            .set_static_swap_fee_percentage(ADMIN, POOL, ONE / U256::from(100u64))
            .unwrap();
        let swap = poolvault_types::VaultSwapParams {
            kind: poolvault_types::SwapKind::ExactIn,
            pool: POOL,
            token_in: DAI,
            token_out: USDC,
            amount_given_raw: fp(100),
            limit_raw: U256::ZERO,
            user_data: Vec::new(),
        };
        vault
            .unlock(ROUTER, |v| {
                let r = v.swap(ROUTER, &swap)?;
                testing::settle_swap(v, ROUTER, DAI, USDC, ALICE, &r)
            })
            .unwrap();

        let err = vault
            .unlock(ROUTER, |v| v.collect_aggregate_fees(ROUTER, POOL))
            .unwrap_err();
        assert_eq!(err, VaultError::SenderNotAllowed(ROUTER));

        let collected = vault
            .unlock(ADMIN, |v| {
                let fees = v.collect_aggregate_fees(ADMIN, POOL)?;
                v.send_to(ADMIN, DAI, ADMIN, fees[0])?;
                Ok(fees)
            })
            .unwrap();
        assert_eq!(collected, vec![fp(1) / U256::from(2u64), U256::ZERO]);
        assert_eq!(vault.world().bank.balance_of(DAI, ADMIN), fp(1) / U256::from(2u64));
        assert_eq!(vault.get_aggregate_swap_fee_amount(POOL, DAI).unwrap(), U256::ZERO);
        vault.verify_reserves(DAI).unwrap();
    }

    #[test]
    fn length_mismatch_rejected() {
        let mut vault = testing::vault_with_pool();
        let err = vault
            .unlock(ROUTER, |v| {
                v.add_liquidity(ROUTER, &add(AddLiquidityKind::Proportional, vec![fp(1)], fp(1)))
            })
            .unwrap_err();
        assert_eq!(err, VaultError::InputLengthMismatch { expected: 2, actual: 1 });
    }
}
