//! Pool registration, configuration and state flags.
//!
//! ## Lifecycle
//!
//! ```text
//!   register_pool          initialize
//!  ─────────────▶ REGISTERED ──────────▶ INITIALIZED
//!                      │                      │
//!                      └── overlays: PAUSED (until pause window end)
//!                                    RECOVERY MODE
//! ```
//!
//! A pool's token set is fixed at registration. The paused flag is ignored
//! once the pool's pause window has elapsed, so a pool becomes permanently
//! live at that point.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use poolvault_ledger::PauseWindow;
use poolvault_types::constants::{MAX_TOKENS, MIN_TOKENS};
use poolvault_types::fixed_point::ONE;
use poolvault_types::{
    Address, HooksConfig, LiquidityManagement, PoolConfig, PoolRoleAccounts, PoolTokenInfo,
    Result, TokenType, U256, VaultError, VaultEvent, scaling,
};

use crate::external::{ExternalWorld, RateProvider};
use crate::hooks::{BasePool, PoolHooks};
use crate::vault::Vault;

/// One token of a pool, as supplied at registration.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub token: Address,
    pub token_type: TokenType,
    /// Required for `WithRate`, forbidden for `Standard`.
    pub rate_provider: Option<Arc<dyn RateProvider>>,
}

impl TokenConfig {
    #[must_use]
    pub fn standard(token: Address) -> Self {
        Self {
            token,
            token_type: TokenType::Standard,
            rate_provider: None,
        }
    }

    #[must_use]
    pub fn with_rate(token: Address, provider: Arc<dyn RateProvider>) -> Self {
        Self {
            token,
            token_type: TokenType::WithRate,
            rate_provider: Some(provider),
        }
    }
}

/// Everything needed to register a pool.
#[derive(Debug, Clone)]
pub struct PoolRegistration {
    /// Pool address; also the address of its BPT.
    pub pool: Address,
    pub tokens: Vec<TokenConfig>,
    pub swap_fee_percentage: U256,
    /// End of the pool's pause window. `None` inherits the vault's window;
    /// a pool registered after that has closed can never be paused.
    pub pause_window_end_time: Option<DateTime<Utc>>,
    pub role_accounts: PoolRoleAccounts,
    pub hooks: Option<Arc<dyn PoolHooks>>,
    pub liquidity_management: LiquidityManagement,
    pub pricing: Arc<dyn BasePool>,
}

/// Stored per pool.
#[derive(Debug, Clone)]
pub(crate) struct PoolData {
    pub(crate) config: PoolConfig,
    pub(crate) tokens: Vec<TokenConfig>,
    pub(crate) decimals: Vec<u8>,
    pub(crate) scaling_factors: Vec<U256>,
    pub(crate) balances_raw: Vec<U256>,
    /// Protocol share of swap fees, raw, per token. Held by the vault but
    /// excluded from the pool's balances.
    pub(crate) aggregate_fees_raw: Vec<U256>,
    pub(crate) role_accounts: PoolRoleAccounts,
    pub(crate) pause_window: PauseWindow,
    pub(crate) pricing: Arc<dyn BasePool>,
    pub(crate) hooks: Option<Arc<dyn PoolHooks>>,
}

/// Balances and rates of a pool at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LiveBalances {
    pub(crate) rates: Vec<U256>,
    pub(crate) balances_scaled18: Vec<U256>,
}

impl PoolData {
    pub(crate) fn token_addresses(&self) -> Vec<Address> {
        self.tokens.iter().map(|t| t.token).collect()
    }

    pub(crate) fn token_index(&self, pool: Address, token: Address) -> Result<usize> {
        self.tokens
            .iter()
            .position(|t| t.token == token)
            .ok_or(VaultError::TokenNotRegistered { pool, token })
    }

    pub(crate) fn rates(&self, world: &ExternalWorld) -> Result<Vec<U256>> {
        self.tokens
            .iter()
            .map(|t| match (&t.token_type, &t.rate_provider) {
                (TokenType::WithRate, Some(provider)) => provider.get_rate(world),
                _ => Ok(ONE),
            })
            .collect()
    }

    /// Live balances rounded down.
    pub(crate) fn live(&self, world: &ExternalWorld) -> Result<LiveBalances> {
        let rates = self.rates(world)?;
        let balances_scaled18 = self
            .balances_raw
            .iter()
            .zip(&self.scaling_factors)
            .zip(&rates)
            .map(|((raw, sf), rate)| scaling::to_scaled18_apply_rate_round_down(*raw, *sf, *rate))
            .collect::<Result<Vec<_>>>()?;
        Ok(LiveBalances {
            rates,
            balances_scaled18,
        })
    }

    pub(crate) fn hooks_config(&self) -> HooksConfig {
        self.config.hooks_config
    }
}

impl Vault {
    // =================================================================
    // Registration
    // =================================================================

    /// Register a pool with a fixed token set.
    ///
    /// # Errors
    /// - `VaultPaused`
    /// - `PoolAlreadyRegistered`
    /// - `MinTokens` / `MaxTokens`, `InvalidToken`, `TokensNotSorted`,
    ///   `TokenAlreadyRegistered`, `InvalidTokenDecimals`,
    ///   `InvalidTokenConfiguration`
    /// - `SwapFeePercentageOutOfBounds`
    /// - `InvalidPauseWindow` if the end time is in the past or more than
    ///   four years away
    /// - `HookRegistrationFailed`
    pub fn register_pool(&mut self, registration: PoolRegistration) -> Result<()> {
        self.ensure_vault_not_paused()?;
        let pool = registration.pool;
        if pool.is_zero() {
            return Err(VaultError::InvalidToken(pool));
        }
        if self.state.pools.contains_key(&pool) {
            return Err(VaultError::PoolAlreadyRegistered(pool));
        }

        let count = registration.tokens.len();
        if count < MIN_TOKENS {
            return Err(VaultError::MinTokens {
                min: MIN_TOKENS,
                actual: count,
            });
        }
        if count > MAX_TOKENS {
            return Err(VaultError::MaxTokens {
                max: MAX_TOKENS,
                actual: count,
            });
        }

        let mut decimals = Vec::with_capacity(count);
        let mut scaling_factors = Vec::with_capacity(count);
        let mut previous: Option<Address> = None;
        for config in &registration.tokens {
            let token = config.token;
            if token.is_zero() || token == pool {
                return Err(VaultError::InvalidToken(token));
            }
            if let Some(prev) = previous {
                if token == prev {
                    return Err(VaultError::TokenAlreadyRegistered(token));
                }
                if token < prev {
                    return Err(VaultError::TokensNotSorted);
                }
            }
            previous = Some(token);

            match (config.token_type, config.rate_provider.is_some()) {
                (TokenType::Standard, true) => {
                    return Err(VaultError::InvalidTokenConfiguration {
                        token,
                        reason: "standard token cannot have a rate provider".into(),
                    });
                }
                (TokenType::WithRate, false) => {
                    return Err(VaultError::InvalidTokenConfiguration {
                        token,
                        reason: "token with rate requires a rate provider".into(),
                    });
                }
                _ => {}
            }

            let token_decimals = self.state.world.bank.decimals(token)?;
            scaling_factors.push(scaling::decimal_scaling_factor(token, token_decimals)?);
            decimals.push(token_decimals);
        }

        ensure_swap_fee_in_bounds(registration.pricing.as_ref(), registration.swap_fee_percentage)?;
        let pause_window = self.pool_pause_window(pool, registration.pause_window_end_time)?;

        let tokens: Vec<Address> = registration.tokens.iter().map(|t| t.token).collect();
        let hooks_config = match &registration.hooks {
            Some(hooks) => {
                if !hooks.on_register(pool, &tokens, &registration.liquidity_management) {
                    return Err(VaultError::HookRegistrationFailed(pool));
                }
                hooks.hooks_config()
            }
            None => HooksConfig::default(),
        };

        let data = PoolData {
            config: PoolConfig {
                is_pool_registered: true,
                is_pool_initialized: false,
                is_pool_paused: false,
                is_pool_in_recovery_mode: false,
                static_swap_fee_percentage: registration.swap_fee_percentage,
                pause_window_end_time: pause_window.end_time(),
                liquidity_management: registration.liquidity_management,
                hooks_config,
            },
            decimals,
            scaling_factors,
            balances_raw: vec![U256::ZERO; count],
            aggregate_fees_raw: vec![U256::ZERO; count],
            tokens: registration.tokens,
            role_accounts: registration.role_accounts,
            pause_window,
            pricing: registration.pricing,
            hooks: registration.hooks,
        };
        self.state.pools.insert(pool, data);

        tracing::info!(pool = %pool, tokens = count, "Pool registered");
        self.emit(VaultEvent::PoolRegistered {
            pool,
            tokens,
            swap_fee_percentage: registration.swap_fee_percentage,
        });
        Ok(())
    }

    /// The window a pool registered now gets for `end_time`.
    fn pool_pause_window(&self, pool: Address, end_time: Option<DateTime<Utc>>) -> Result<PauseWindow> {
        let now = self.state.now;
        let end_time = end_time
            .or_else(|| self.pause_window().new_pool_pause_window_end_time(now))
            .unwrap_or(now);
        PauseWindow::ending_at(now, end_time).map_err(|err| VaultError::InvalidPauseWindow {
            pool,
            reason: err.to_string(),
        })
    }

    // =================================================================
    // Guards
    // =================================================================

    pub(crate) fn pool(&self, pool: Address) -> Result<&PoolData> {
        self.state
            .pools
            .get(&pool)
            .ok_or(VaultError::PoolNotRegistered(pool))
    }

    pub(crate) fn pool_mut(&mut self, pool: Address) -> Result<&mut PoolData> {
        self.state
            .pools
            .get_mut(&pool)
            .ok_or(VaultError::PoolNotRegistered(pool))
    }

    pub(crate) fn ensure_pool_registered(&self, pool: Address) -> Result<()> {
        self.pool(pool).map(|_| ())
    }

    pub(crate) fn ensure_pool_initialized(&self, pool: Address) -> Result<()> {
        if self.pool(pool)?.config.is_pool_initialized {
            Ok(())
        } else {
            Err(VaultError::PoolNotInitialized(pool))
        }
    }

    /// Neither the vault nor the pool is paused.
    pub(crate) fn ensure_unpaused(&self, pool: Address) -> Result<()> {
        self.ensure_vault_not_paused()?;
        if self.is_pool_paused(pool) {
            return Err(VaultError::PoolPaused(pool));
        }
        Ok(())
    }

    pub(crate) fn ensure_not_in_recovery_mode(&self, pool: Address) -> Result<()> {
        if self.is_pool_in_recovery_mode(pool) {
            Err(VaultError::PoolInRecoveryMode(pool))
        } else {
            Ok(())
        }
    }

    // =================================================================
    // Pause
    // =================================================================

    /// # Errors
    /// - `PoolNotRegistered`
    /// - `SenderNotAllowed` unless `caller` is the pause manager (or the
    ///   admin when no pause manager is set)
    /// - `PoolPauseWindowExpired` once the pool's window has closed
    pub fn pause_pool(&mut self, caller: Address, pool: Address) -> Result<()> {
        let data = self.pool(pool)?;
        self.ensure_role(caller, data.role_accounts.pause_manager)?;
        if data.pause_window.is_expired(self.state.now) {
            return Err(VaultError::PoolPauseWindowExpired(pool));
        }
        self.set_pool_paused(pool, true)
    }

    pub fn unpause_pool(&mut self, caller: Address, pool: Address) -> Result<()> {
        let data = self.pool(pool)?;
        self.ensure_role(caller, data.role_accounts.pause_manager)?;
        self.set_pool_paused(pool, false)
    }

    fn set_pool_paused(&mut self, pool: Address, paused: bool) -> Result<()> {
        self.pool_mut(pool)?.config.is_pool_paused = paused;
        tracing::info!(pool = %pool, paused, "Pool paused state changed");
        self.emit(VaultEvent::PoolPausedStateChanged { pool, paused });
        Ok(())
    }

    /// A delegated role if one is set, otherwise the admin.
    fn ensure_role(&self, caller: Address, manager: Address) -> Result<()> {
        if manager.is_zero() {
            self.ensure_admin(caller)
        } else if caller == manager {
            Ok(())
        } else {
            Err(VaultError::SenderNotAllowed(caller))
        }
    }

    // =================================================================
    // Recovery mode
    // =================================================================

    /// Permissionless while the pool or the vault is paused; admin-only
    /// otherwise.
    ///
    /// # Errors
    /// `PoolInRecoveryMode` if already enabled.
    pub fn enable_recovery_mode(&mut self, caller: Address, pool: Address) -> Result<()> {
        self.ensure_pool_registered(pool)?;
        if self.is_pool_in_recovery_mode(pool) {
            return Err(VaultError::PoolInRecoveryMode(pool));
        }
        if !self.is_pool_paused(pool) && !self.is_vault_paused() {
            self.ensure_admin(caller)?;
        }
        self.set_recovery_mode(pool, true)
    }

    /// # Errors
    /// `SenderNotAllowed` unless admin; `PoolNotInRecoveryMode`.
    pub fn disable_recovery_mode(&mut self, caller: Address, pool: Address) -> Result<()> {
        self.ensure_pool_registered(pool)?;
        self.ensure_admin(caller)?;
        if !self.is_pool_in_recovery_mode(pool) {
            return Err(VaultError::PoolNotInRecoveryMode(pool));
        }
        self.set_recovery_mode(pool, false)
    }

    fn set_recovery_mode(&mut self, pool: Address, recovery_mode: bool) -> Result<()> {
        self.pool_mut(pool)?.config.is_pool_in_recovery_mode = recovery_mode;
        tracing::info!(pool = %pool, recovery_mode, "Pool recovery mode changed");
        self.emit(VaultEvent::PoolRecoveryModeStateChanged {
            pool,
            recovery_mode,
        });
        Ok(())
    }

    // =================================================================
    // Fees
    // =================================================================

    /// # Errors
    /// - `SenderNotAllowed` unless swap fee manager (or admin when unset)
    /// - `PoolPaused` / `VaultPaused`
    /// - `SwapFeePercentageOutOfBounds`
    pub fn set_static_swap_fee_percentage(
        &mut self,
        caller: Address,
        pool: Address,
        swap_fee_percentage: U256,
    ) -> Result<()> {
        let data = self.pool(pool)?;
        self.ensure_role(caller, data.role_accounts.swap_fee_manager)?;
        ensure_swap_fee_in_bounds(data.pricing.as_ref(), swap_fee_percentage)?;
        self.ensure_unpaused(pool)?;

        self.pool_mut(pool)?.config.static_swap_fee_percentage = swap_fee_percentage;
        tracing::info!(pool = %pool, fee = %swap_fee_percentage, "Static swap fee changed");
        self.emit(VaultEvent::SwapFeePercentageChanged {
            pool,
            swap_fee_percentage,
        });
        Ok(())
    }

    pub fn get_static_swap_fee_percentage(&self, pool: Address) -> Result<U256> {
        Ok(self.pool(pool)?.config.static_swap_fee_percentage)
    }

    /// Protocol fees accumulated for `token` in `pool`, raw.
    pub fn get_aggregate_swap_fee_amount(&self, pool: Address, token: Address) -> Result<U256> {
        let data = self.pool(pool)?;
        let index = data.token_index(pool, token)?;
        Ok(data.aggregate_fees_raw[index])
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn is_pool_registered(&self, pool: Address) -> bool {
        self.state.pools.contains_key(&pool)
    }

    #[must_use]
    pub fn is_pool_initialized(&self, pool: Address) -> bool {
        self.state
            .pools
            .get(&pool)
            .is_some_and(|p| p.config.is_pool_initialized)
    }

    /// Paused flag set and the pool's pause window still open.
    #[must_use]
    pub fn is_pool_paused(&self, pool: Address) -> bool {
        self.state.pools.get(&pool).is_some_and(|p| {
            p.config.is_pool_paused && !p.pause_window.is_expired(self.state.now)
        })
    }

    #[must_use]
    pub fn is_pool_in_recovery_mode(&self, pool: Address) -> bool {
        self.state
            .pools
            .get(&pool)
            .is_some_and(|p| p.config.is_pool_in_recovery_mode)
    }

    pub fn get_pool_config(&self, pool: Address) -> Result<PoolConfig> {
        let data = self.pool(pool)?;
        let mut config = data.config.clone();
        config.is_pool_paused = self.is_pool_paused(pool);
        Ok(config)
    }

    pub fn get_pool_tokens(&self, pool: Address) -> Result<Vec<Address>> {
        Ok(self.pool(pool)?.token_addresses())
    }

    pub fn get_pool_role_accounts(&self, pool: Address) -> Result<PoolRoleAccounts> {
        Ok(self.pool(pool)?.role_accounts)
    }

    pub fn get_pool_token_info(&self, pool: Address) -> Result<PoolTokenInfo> {
        let data = self.pool(pool)?;
        let live = data.live(&self.state.world)?;
        Ok(PoolTokenInfo {
            tokens: data.token_addresses(),
            token_types: data.tokens.iter().map(|t| t.token_type).collect(),
            decimals: data.decimals.clone(),
            balances_raw: data.balances_raw.clone(),
            balances_live_scaled18: live.balances_scaled18,
            token_rates: live.rates,
        })
    }
}

fn ensure_swap_fee_in_bounds(pricing: &dyn BasePool, fee: U256) -> Result<()> {
    let min = pricing.minimum_swap_fee_percentage();
    let max = pricing.maximum_swap_fee_percentage().min(ONE);
    if fee < min || fee > max {
        return Err(VaultError::SwapFeePercentageOutOfBounds { fee, min, max });
    }
    Ok(())
}
