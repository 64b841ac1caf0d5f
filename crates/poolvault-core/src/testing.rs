//! Fixtures for unit and integration tests.
//!
//! Enabled by `cfg(test)` or the `test-helpers` feature. The standard world:
//!
//! | address  | what                                          |
//! |----------|-----------------------------------------------|
//! | `DAI`    | 18-decimal token                              |
//! | `USDC`   | 6-decimal token                               |
//! | `WDAI`   | ERC4626 wrapper over DAI, 1:1 until yield     |
//! | `ALICE`  | funded user, also the pool's first LP         |
//! | `BOB`    | funded user                                   |
//! | `ROUTER` | session handler for user flows, holds nothing |
//! | `ADMIN`  | vault admin, holds nothing                    |

#![allow(clippy::missing_panics_doc)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use poolvault_types::fixed_point::{self, ONE};
use poolvault_types::{
    Address, LiquidityManagement, PoolRoleAccounts, PoolSwapParams, Result, Rounding, SwapResult,
    U256, VaultConfig, VaultError,
};

use crate::hooks::BasePool;
use crate::pool_registry::{PoolRegistration, TokenConfig};
use crate::vault::Vault;

pub const VAULT: Address = Address::new([0xee; 20]);
pub const ADMIN: Address = Address::new([0xad; 20]);
pub const ROUTER: Address = Address::new([0x70; 20]);
pub const ALICE: Address = Address::new([0xa1; 20]);
pub const BOB: Address = Address::new([0xb0; 20]);
pub const POOL: Address = Address::new([0x90; 20]);

/// Sorted: `DAI < USDC`.
pub const DAI: Address = Address::new([0x1a; 20]);
pub const USDC: Address = Address::new([0x2b; 20]);
pub const WDAI: Address = Address::new([0x3c; 20]);

/// 1000 DAI (1000 * 10^18).
pub const INITIAL_DAI: U256 = U256::from_limbs([3_875_820_019_684_212_736, 54, 0, 0]);
/// 1000 USDC (1000 * 10^6).
pub const INITIAL_USDC: U256 = U256::from_limbs([1_000_000_000, 0, 0, 0]);

const USER_DAI: u64 = 10_000_000;
const USER_USDC: u64 = 10_000_000;
const USER_WDAI: u64 = 2_000_000;

/// `n` whole units of an 18-decimal token.
#[must_use]
pub fn fp(n: u64) -> U256 {
    U256::from(n) * ONE
}

/// `n` whole USDC.
#[must_use]
pub fn usdc(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000u64)
}

/// 2025-01-01T00:00:00Z.
#[must_use]
pub fn genesis() -> DateTime<Utc> {
    DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

// =================================================================
// Pools
// =================================================================

/// Invariant = sum of live balances; swaps are 1:1 before fees.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantSumPool;

impl BasePool for ConstantSumPool {
    fn compute_invariant(&self, balances_scaled18: &[U256], _rounding: Rounding) -> Result<U256> {
        balances_scaled18
            .iter()
            .try_fold(U256::ZERO, |acc, b| fixed_point::add(acc, *b, "constant sum"))
    }

    fn compute_balance(&self, balances_scaled18: &[U256], token_index: usize, invariant_ratio: U256) -> Result<U256> {
        let invariant = self.compute_invariant(balances_scaled18, Rounding::Down)?;
        let others = invariant - balances_scaled18[token_index];
        fixed_point::mul_down(invariant, invariant_ratio)?
            .checked_sub(others)
            .ok_or(VaultError::MathOverflow("constant sum balance"))
    }

    fn on_swap(&self, params: &PoolSwapParams) -> Result<U256> {
        Ok(params.amount_given_scaled18)
    }
}

/// DAI/USDC-style registration for `pool`: no fee, no hooks, admin roles.
#[must_use]
pub fn pool_registration(pool: Address, tokens: Vec<TokenConfig>, vault: &Vault) -> PoolRegistration {
    PoolRegistration {
        pool,
        tokens,
        swap_fee_percentage: U256::ZERO,
        pause_window_end_time: Some(vault.now() + Duration::days(90)),
        role_accounts: PoolRoleAccounts::default(),
        hooks: None,
        liquidity_management: LiquidityManagement::default(),
        pricing: Arc::new(ConstantSumPool),
    }
}

// =================================================================
// Vaults
// =================================================================

/// Vault with the standard tokens and funded users, nothing registered.
#[must_use]
pub fn vault_with_tokens() -> Vault {
    vault_with_config(VaultConfig::default())
}

#[must_use]
pub fn vault_with_config(config: VaultConfig) -> Vault {
    let mut vault = Vault::new(VAULT, ADMIN, config, genesis()).expect("valid vault config");
    let world = vault.world_mut();
    world.create_token(DAI, 18).expect("create DAI");
    world.create_token(USDC, 6).expect("create USDC");
    let wdai = world.create_wrapper(WDAI, DAI).expect("create WDAI");

    for user in [ALICE, BOB] {
        world.bank.mint(DAI, user, fp(USER_DAI)).expect("fund DAI");
        world.bank.mint(USDC, user, usdc(USER_USDC)).expect("fund USDC");
        wdai.deposit(&mut world.bank, user, fp(USER_WDAI), user)
            .expect("fund WDAI");
    }
    vault
}

/// DAI/USDC constant-sum pool seeded by ALICE with 1000 of each; ROUTER may
/// spend ALICE's BPT.
#[must_use]
pub fn vault_with_pool() -> Vault {
    vault_with_pool_flags(|_| {})
}

/// As [`vault_with_pool`], with the pool's liquidity flags adjusted.
#[must_use]
pub fn vault_with_pool_flags(adjust: impl FnOnce(&mut LiquidityManagement)) -> Vault {
    let mut liquidity_management = LiquidityManagement::default();
    adjust(&mut liquidity_management);
    seed_pool(vault_with_tokens(), liquidity_management)
}

/// As [`vault_with_pool`], with half of every swap fee going to the protocol.
#[must_use]
pub fn vault_with_pool_and_aggregate_fee() -> Vault {
    let config = VaultConfig::from_json(r#"{ "aggregate_swap_fee_percentage": "0.5" }"#)
        .expect("valid aggregate fee config");
    seed_pool(vault_with_config(config), LiquidityManagement::default())
}

fn seed_pool(mut vault: Vault, liquidity_management: LiquidityManagement) -> Vault {
    let mut registration = pool_registration(
        POOL,
        vec![TokenConfig::standard(DAI), TokenConfig::standard(USDC)],
        &vault,
    );
    registration.liquidity_management = liquidity_management;
    vault.register_pool(registration).expect("register pool");

    let amounts = [INITIAL_DAI, INITIAL_USDC];
    vault
        .unlock(ROUTER, |v| {
            v.initialize(ROUTER, POOL, ALICE, &[DAI, USDC], &amounts, U256::ZERO)?;
            pay_in(v, ROUTER, ALICE, &[DAI, USDC], &amounts)
        })
        .expect("initialize pool");
    vault.approve(ALICE, POOL, ROUTER, U256::MAX).expect("approve router");
    vault
}

/// Vault whose WDAI buffer ALICE seeded with the given raw amounts.
#[must_use]
pub fn vault_with_buffer(underlying: U256, wrapped: U256) -> Vault {
    let mut vault = vault_with_tokens();
    vault
        .unlock(ALICE, |v| {
            v.initialize_buffer(ALICE, WDAI, underlying, wrapped, U256::ZERO, ALICE)?;
            pay_in(v, ALICE, ALICE, &[DAI, WDAI], &[underlying, wrapped])
        })
        .expect("initialize buffer");
    vault
}

// =================================================================
// Router moves
// =================================================================

/// Transfer each non-zero amount from `from` to the vault and settle it for
/// `handler`.
pub fn pay_in(vault: &mut Vault, handler: Address, from: Address, tokens: &[Address], amounts: &[U256]) -> Result<()> {
    let vault_address = vault.address();
    for (token, amount) in tokens.iter().zip(amounts) {
        if amount.is_zero() {
            continue;
        }
        vault.world_mut().bank.transfer(*token, from, vault_address, *amount)?;
        vault.settle(handler, *token, *amount)?;
    }
    Ok(())
}

/// Send each non-zero amount to `to`, charged to `handler`.
pub fn pay_out(vault: &mut Vault, handler: Address, to: Address, tokens: &[Address], amounts: &[U256]) -> Result<()> {
    for (token, amount) in tokens.iter().zip(amounts) {
        if !amount.is_zero() {
            vault.send_to(handler, *token, to, *amount)?;
        }
    }
    Ok(())
}

/// Settle both legs of a swap on behalf of `user`.
pub fn settle_swap(
    vault: &mut Vault,
    handler: Address,
    token_in: Address,
    token_out: Address,
    user: Address,
    result: &SwapResult,
) -> Result<()> {
    pay_in(vault, handler, user, &[token_in], &[result.amount_in_raw])?;
    pay_out(vault, handler, user, &[token_out], &[result.amount_out_raw])
}
