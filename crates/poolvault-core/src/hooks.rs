//! Extension points: pool pricing and pool hooks.
//!
//! The vault owns the books; pricing and policy live behind two traits.
//!
//! - [`BasePool`]: the pool's invariant and swap math in live scaled18
//!   units. The vault never prices anything itself.
//! - [`PoolHooks`]: optional callbacks around swaps and liquidity changes.
//!   Hooks receive `&mut Vault` and run outside the vault's non-reentrant
//!   sections, so they may call back into it (swap, settle, send_to). A
//!   guarded operation entered while another one is running fails with
//!   `ReentrantCall`.
//!
//! Every hook returns `Ok(false)` to veto the operation, which the vault
//! surfaces as `HookFailed`.

use std::fmt;

use poolvault_types::fixed_point::ONE;
use poolvault_types::{
    AddLiquidityKind, Address, HooksConfig, LiquidityManagement, PoolSwapParams,
    RemoveLiquidityKind, Result, Rounding, SwapKind, U256, VaultError,
};

use crate::vault::Vault;

/// Inputs to a pool's custom add / remove liquidity handler.
#[derive(Debug, Clone, Copy)]
pub struct CustomLiquidityRequest<'a> {
    pub pool: Address,
    pub router: Address,
    /// Min BPT out (add) or max BPT in (remove).
    pub bpt_amount: U256,
    /// Max amounts in (add) or min amounts out (remove).
    pub amounts_scaled18: &'a [U256],
    pub balances_scaled18: &'a [U256],
    pub user_data: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomLiquidityOutcome {
    pub bpt_amount: U256,
    pub amounts_scaled18: Vec<U256>,
    pub swap_fee_amounts_scaled18: Vec<U256>,
    pub return_data: Vec<u8>,
}

/// Pricing implementation of a pool.
pub trait BasePool: fmt::Debug + Send + Sync {
    /// Invariant of the given live balances.
    fn compute_invariant(&self, balances_scaled18: &[U256], rounding: Rounding) -> Result<U256>;

    /// New balance of `token_index` such that the invariant is multiplied by
    /// `invariant_ratio`, other balances unchanged.
    fn compute_balance(
        &self,
        balances_scaled18: &[U256],
        token_index: usize,
        invariant_ratio: U256,
    ) -> Result<U256>;

    /// Amount out (ExactIn) or amount in (ExactOut), scaled18, fees excluded.
    fn on_swap(&self, params: &PoolSwapParams) -> Result<U256>;

    fn minimum_swap_fee_percentage(&self) -> U256 {
        U256::ZERO
    }

    fn maximum_swap_fee_percentage(&self) -> U256 {
        ONE
    }

    fn minimum_invariant_ratio(&self) -> U256 {
        U256::ZERO
    }

    fn maximum_invariant_ratio(&self) -> U256 {
        U256::MAX
    }

    fn on_add_liquidity_custom(
        &self,
        request: &CustomLiquidityRequest<'_>,
    ) -> Result<CustomLiquidityOutcome> {
        Err(VaultError::OperationNotSupported {
            pool: request.pool,
            operation: "add_liquidity_custom",
        })
    }

    fn on_remove_liquidity_custom(
        &self,
        request: &CustomLiquidityRequest<'_>,
    ) -> Result<CustomLiquidityOutcome> {
        Err(VaultError::OperationNotSupported {
            pool: request.pool,
            operation: "remove_liquidity_custom",
        })
    }
}

/// What an after-swap hook sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterSwapParams {
    pub kind: SwapKind,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in_scaled18: U256,
    pub amount_out_scaled18: U256,
    pub amount_in_raw: U256,
    pub amount_out_raw: U256,
    pub router: Address,
}

/// What a liquidity hook sees.
#[derive(Debug, Clone, Copy)]
pub struct LiquidityHookParams<'a> {
    pub router: Address,
    /// Max amounts in before an add, amounts in after one; min amounts out
    /// before a remove, amounts out after one.
    pub amounts_scaled18: &'a [U256],
    /// Min BPT out / max BPT in before; actual BPT after.
    pub bpt_amount: U256,
    pub balances_scaled18: &'a [U256],
}

#[allow(unused_variables)]
pub trait PoolHooks: fmt::Debug + Send + Sync {
    /// Extension points the vault should call.
    fn hooks_config(&self) -> HooksConfig;

    /// Consulted once at registration; `false` aborts it.
    fn on_register(
        &self,
        pool: Address,
        tokens: &[Address],
        liquidity_management: &LiquidityManagement,
    ) -> bool {
        true
    }

    fn on_before_swap(&self, vault: &mut Vault, pool: Address, params: &PoolSwapParams) -> Result<bool> {
        Ok(true)
    }

    fn on_after_swap(&self, vault: &mut Vault, pool: Address, params: &AfterSwapParams) -> Result<bool> {
        Ok(true)
    }

    /// Returns the fee to charge instead of the static one.
    fn on_compute_dynamic_swap_fee(
        &self,
        vault: &Vault,
        pool: Address,
        params: &PoolSwapParams,
        static_swap_fee_percentage: U256,
    ) -> Result<(bool, U256)> {
        Ok((true, static_swap_fee_percentage))
    }

    fn on_before_add_liquidity(
        &self,
        vault: &mut Vault,
        pool: Address,
        kind: AddLiquidityKind,
        params: &LiquidityHookParams<'_>,
    ) -> Result<bool> {
        Ok(true)
    }

    fn on_after_add_liquidity(
        &self,
        vault: &mut Vault,
        pool: Address,
        kind: AddLiquidityKind,
        params: &LiquidityHookParams<'_>,
    ) -> Result<bool> {
        Ok(true)
    }

    fn on_before_remove_liquidity(
        &self,
        vault: &mut Vault,
        pool: Address,
        kind: RemoveLiquidityKind,
        params: &LiquidityHookParams<'_>,
    ) -> Result<bool> {
        Ok(true)
    }

    fn on_after_remove_liquidity(
        &self,
        vault: &mut Vault,
        pool: Address,
        kind: RemoveLiquidityKind,
        params: &LiquidityHookParams<'_>,
    ) -> Result<bool> {
        Ok(true)
    }
}
