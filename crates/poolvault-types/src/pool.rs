//! Pool model: configuration flags, operation kinds, and the parameter /
//! result types exchanged between routers, the vault, and pool pricing code.
//!
//! ## Lifecycle
//!
//! ```text
//!   ┌──────────────┐ register ┌────────────┐ initialize ┌─────────────┐
//!   │ UNREGISTERED ├─────────▶│ REGISTERED ├───────────▶│ INITIALIZED │
//!   └──────────────┘          └────────────┘            └─────────────┘
//! ```
//!
//! `paused` and `in_recovery_mode` are independent overlay flags on a
//! registered pool.

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the vault obtains a token's exchange rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// Rate is always `ONE`.
    Standard,
    /// Rate comes from an external rate provider.
    WithRate,
}

/// Which liquidity operations a pool opts into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityManagement {
    pub disable_unbalanced_liquidity: bool,
    pub enable_add_liquidity_custom: bool,
    pub enable_remove_liquidity_custom: bool,
    pub enable_donation: bool,
}

/// Which hook extension points the vault calls for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HooksConfig {
    pub should_call_before_swap: bool,
    pub should_call_after_swap: bool,
    pub should_call_compute_dynamic_swap_fee: bool,
    pub should_call_before_add_liquidity: bool,
    pub should_call_after_add_liquidity: bool,
    pub should_call_before_remove_liquidity: bool,
    pub should_call_after_remove_liquidity: bool,
}

/// Accounts allowed to manage a pool, besides the vault admin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRoleAccounts {
    /// May pause and unpause the pool.
    pub pause_manager: Address,
    /// May change the static swap fee.
    pub swap_fee_manager: Address,
    /// Informational; recorded at registration.
    pub pool_creator: Address,
}

/// Persistent per-pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub is_pool_registered: bool,
    pub is_pool_initialized: bool,
    pub is_pool_paused: bool,
    pub is_pool_in_recovery_mode: bool,
    /// 18-decimal fixed point.
    pub static_swap_fee_percentage: U256,
    /// After this instant the pool can no longer be paused and the paused
    /// flag is ignored.
    pub pause_window_end_time: DateTime<Utc>,
    pub liquidity_management: LiquidityManagement,
    pub hooks_config: HooksConfig,
}

/// Direction of the given amount in a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapKind {
    /// The amount given is the exact amount in.
    ExactIn,
    /// The amount given is the exact amount out.
    ExactOut,
}

impl std::fmt::Display for SwapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExactIn => write!(f, "EXACT_IN"),
            Self::ExactOut => write!(f, "EXACT_OUT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddLiquidityKind {
    Proportional,
    Unbalanced,
    SingleTokenExactOut,
    Donation,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoveLiquidityKind {
    Proportional,
    SingleTokenExactIn,
    SingleTokenExactOut,
    Custom,
}

/// Swap request as issued by a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSwapParams {
    pub kind: SwapKind,
    pub pool: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_given_raw: U256,
    /// Minimum amount out (ExactIn) or maximum amount in (ExactOut).
    pub limit_raw: U256,
    pub user_data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapResult {
    pub amount_calculated_raw: U256,
    pub amount_in_raw: U256,
    pub amount_out_raw: U256,
}

/// Swap request as seen by the pool's pricing code: live balances, fee
/// already deducted from an ExactIn amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSwapParams {
    pub kind: SwapKind,
    pub amount_given_scaled18: U256,
    pub balances_scaled18: Vec<U256>,
    pub index_in: usize,
    pub index_out: usize,
    pub router: Address,
    pub user_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLiquidityParams {
    pub pool: Address,
    /// Receives the BPT.
    pub to: Address,
    pub max_amounts_in_raw: Vec<U256>,
    pub min_bpt_amount_out: U256,
    pub kind: AddLiquidityKind,
    pub user_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLiquidityResult {
    pub amounts_in_raw: Vec<U256>,
    pub bpt_amount_out: U256,
    pub return_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLiquidityParams {
    pub pool: Address,
    /// Owner of the BPT being burned.
    pub from: Address,
    pub max_bpt_amount_in: U256,
    pub min_amounts_out_raw: Vec<U256>,
    pub kind: RemoveLiquidityKind,
    pub user_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLiquidityResult {
    pub bpt_amount_in: U256,
    pub amounts_out_raw: Vec<U256>,
    pub return_data: Vec<u8>,
}

/// Per-token view returned by pool queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTokenInfo {
    pub tokens: Vec<Address>,
    pub token_types: Vec<TokenType>,
    pub decimals: Vec<u8>,
    pub balances_raw: Vec<U256>,
    pub balances_live_scaled18: Vec<U256>,
    pub token_rates: Vec<U256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_kind_display() {
        assert_eq!(SwapKind::ExactIn.to_string(), "EXACT_IN");
        assert_eq!(SwapKind::ExactOut.to_string(), "EXACT_OUT");
    }

    #[test]
    fn default_flags_are_off() {
        let lm = LiquidityManagement::default();
        assert!(!lm.disable_unbalanced_liquidity && !lm.enable_donation);
        let hooks = HooksConfig::default();
        assert!(!hooks.should_call_before_swap && !hooks.should_call_after_remove_liquidity);
    }

    #[test]
    fn swap_params_serde_roundtrip() {
        let params = VaultSwapParams {
            kind: SwapKind::ExactOut,
            pool: Address::repeat_byte(0xaa),
            token_in: Address::repeat_byte(0x01),
            token_out: Address::repeat_byte(0x02),
            amount_given_raw: U256::from(1_000u64),
            limit_raw: U256::from(2_000u64),
            user_data: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: VaultSwapParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
