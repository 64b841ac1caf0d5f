//! ERC4626 liquidity buffers.
//!
//! A buffer holds some of a wrapped token and of its underlying asset so
//! that most wraps and unwraps are a swap against the buffer instead of a
//! round trip through the wrapper.
//!
//! ```text
//!                        fits in buffer?
//!  wrap / unwrap ──────┬─────────────────────▶ buffer balances only
//!                      │ no
//!                      └─▶ wrapper.deposit / mint / redeem / withdraw
//!                          (whole amount; dust stays in the buffer)
//! ```
//!
//! ## Rounding
//!
//! Previews are taken one unit away from the caller: exact-in amounts lose
//! one unit before and after the preview, exact-out amounts gain one. The
//! buffer therefore never hands out more value than it takes in.
//!
//! ## Shares
//!
//! Buffer shares are denominated in underlying units. The first
//! `BUFFER_MINIMUM_TOTAL_SUPPLY` shares belong to the zero address forever.

use std::collections::HashMap;

use poolvault_types::constants::BUFFER_MINIMUM_TOTAL_SUPPLY;
use poolvault_types::{
    Address, BufferBalance, BufferWrapOrUnwrapParams, BufferWrapOrUnwrapResult, Result, SwapKind,
    U256, VaultError, VaultEvent, WrappingDirection, fixed_point,
};
use serde::{Deserialize, Serialize};

use crate::external::{Erc4626Wrapper, ExternalWorld};
use crate::vault::Vault;

/// Books of one buffer, keyed by its wrapped token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BufferState {
    pub(crate) underlying_token: Address,
    pub(crate) balance: BufferBalance,
    pub(crate) total_shares: U256,
    pub(crate) owner_shares: HashMap<Address, U256>,
}

impl BufferState {
    fn shares_of(&self, owner: Address) -> U256 {
        self.owner_shares.get(&owner).copied().unwrap_or_default()
    }

    fn mint_shares(&mut self, owner: Address, shares: U256) -> Result<()> {
        let balance = fixed_point::add(self.shares_of(owner), shares, "buffer shares")?;
        self.total_shares = fixed_point::add(self.total_shares, shares, "buffer shares")?;
        self.owner_shares.insert(owner, balance);
        Ok(())
    }

    fn burn_shares(&mut self, owner: Address, shares: U256) -> Result<()> {
        let available = self.shares_of(owner);
        let balance = available
            .checked_sub(shares)
            .ok_or(VaultError::NotEnoughBufferShares {
                needed: shares,
                available,
            })?;
        let total = self.total_shares.saturating_sub(shares);
        if total < BUFFER_MINIMUM_TOTAL_SUPPLY {
            return Err(VaultError::BufferTotalSupplyTooLow(total));
        }
        self.total_shares = total;
        self.owner_shares.insert(owner, balance);
        Ok(())
    }

    /// Underlying plus wrapped, valued in underlying.
    fn value_in_underlying(&self, world: &ExternalWorld, wrapper: &Erc4626Wrapper) -> Result<U256> {
        let wrapped_value = wrapper.preview_redeem(&world.bank, self.balance.wrapped_raw)?;
        fixed_point::add(self.balance.underlying_raw, wrapped_value, "buffer value")
    }
}

impl Vault {
    // =================================================================
    // Buffer liquidity
    // =================================================================

    /// Create the buffer of `wrapped_token`, seeding it with both tokens.
    ///
    /// Shares issued = `preview_redeem(wrapped_in) + underlying_in`, of which
    /// `BUFFER_MINIMUM_TOTAL_SUPPLY` is locked; `owner` receives the rest,
    /// which is also the return value.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `VaultBuffersArePaused`, `VaultPaused`
    /// - `BufferAlreadyInitialized`, `UnknownWrappedToken`,
    ///   `InvalidUnderlyingToken`
    /// - `BufferTotalSupplyTooLow`, `IssuedSharesBelowMin`
    pub fn initialize_buffer(
        &mut self,
        caller: Address,
        wrapped_token: Address,
        exact_underlying_in: U256,
        exact_wrapped_in: U256,
        min_issued_shares: U256,
        owner: Address,
    ) -> Result<U256> {
        self.ensure_handler(caller)?;
        let _guard = self.non_reentrant()?;
        self.ensure_buffers_not_paused()?;
        self.ensure_vault_not_paused()?;
        if self.is_buffer_initialized(wrapped_token) {
            return Err(VaultError::BufferAlreadyInitialized(wrapped_token));
        }
        let wrapper = self.state.world.wrapper(wrapped_token)?;
        let underlying_token = wrapper.asset();
        if underlying_token.is_zero() || underlying_token == wrapped_token {
            return Err(VaultError::InvalidUnderlyingToken(wrapped_token));
        }

        self.atomic(|vault| {
            vault.state.session.take_debt(underlying_token, exact_underlying_in, caller)?;
            vault.state.session.take_debt(wrapped_token, exact_wrapped_in, caller)?;

            let wrapped_value = wrapper.preview_redeem(&vault.state.world.bank, exact_wrapped_in)?;
            let total = fixed_point::add(wrapped_value, exact_underlying_in, "buffer shares")?;
            if total < BUFFER_MINIMUM_TOTAL_SUPPLY {
                return Err(VaultError::BufferTotalSupplyTooLow(total));
            }
            let issued = total - BUFFER_MINIMUM_TOTAL_SUPPLY;
            if issued < min_issued_shares {
                return Err(VaultError::IssuedSharesBelowMin {
                    issued,
                    min: min_issued_shares,
                });
            }

            let mut buffer = BufferState {
                underlying_token,
                balance: BufferBalance::new(exact_underlying_in, exact_wrapped_in),
                ..BufferState::default()
            };
            buffer.mint_shares(Address::ZERO, BUFFER_MINIMUM_TOTAL_SUPPLY)?;
            buffer.mint_shares(owner, issued)?;
            vault.state.buffers.insert(wrapped_token, buffer);

            tracing::info!(
                wrapped = %wrapped_token,
                underlying = %underlying_token,
                owner = %owner,
                shares = %issued,
                "Buffer initialized"
            );
            vault.emit(VaultEvent::BufferInitialized {
                wrapped_token,
                underlying_token,
                issued_shares: issued,
            });
            Ok(issued)
        })
    }

    /// Issue exactly `exact_shares` to `owner` for a proportional deposit of
    /// both tokens, rounded up. Returns `(underlying_in, wrapped_in)`.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `VaultBuffersArePaused`, `VaultPaused`, `BufferNotInitialized`
    /// - `WrongUnderlyingToken`, `AmountInAboveMax`
    pub fn add_liquidity_to_buffer(
        &mut self,
        caller: Address,
        wrapped_token: Address,
        max_underlying_in: U256,
        max_wrapped_in: U256,
        exact_shares: U256,
        owner: Address,
    ) -> Result<(U256, U256)> {
        self.ensure_handler(caller)?;
        let _guard = self.non_reentrant()?;
        self.ensure_buffers_not_paused()?;
        self.ensure_vault_not_paused()?;
        let underlying_token = self.ensure_buffer_asset(wrapped_token)?;

        self.atomic(|vault| {
            let buffer = vault.buffer_mut(wrapped_token)?;
            let underlying_in =
                fixed_point::mul_div_up(buffer.balance.underlying_raw, exact_shares, buffer.total_shares)?;
            let wrapped_in = fixed_point::mul_div_up(buffer.balance.wrapped_raw, exact_shares, buffer.total_shares)?;
            if underlying_in > max_underlying_in {
                return Err(VaultError::AmountInAboveMax {
                    token: underlying_token,
                    amount: underlying_in,
                    max: max_underlying_in,
                });
            }
            if wrapped_in > max_wrapped_in {
                return Err(VaultError::AmountInAboveMax {
                    token: wrapped_token,
                    amount: wrapped_in,
                    max: max_wrapped_in,
                });
            }

            buffer.balance.underlying_raw =
                fixed_point::add(buffer.balance.underlying_raw, underlying_in, "buffer balance")?;
            buffer.balance.wrapped_raw = fixed_point::add(buffer.balance.wrapped_raw, wrapped_in, "buffer balance")?;
            buffer.mint_shares(owner, exact_shares)?;

            vault.state.session.take_debt(underlying_token, underlying_in, caller)?;
            vault.state.session.take_debt(wrapped_token, wrapped_in, caller)?;

            tracing::debug!(wrapped = %wrapped_token, owner = %owner, shares = %exact_shares, "Buffer liquidity added");
            vault.emit(VaultEvent::BufferLiquidityAdded {
                wrapped_token,
                amount_underlying: underlying_in,
                amount_wrapped: wrapped_in,
                shares: exact_shares,
            });
            Ok((underlying_in, wrapped_in))
        })
    }

    /// Burn `shares` of `caller` and credit the proportional share of both
    /// tokens, rounded down. Allowed while buffers are paused. Returns
    /// `(underlying_out, wrapped_out)`.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `BufferNotInitialized`, `NotEnoughBufferShares`
    /// - `AmountOutBelowMin`, `BufferTotalSupplyTooLow`
    pub fn remove_liquidity_from_buffer(
        &mut self,
        caller: Address,
        wrapped_token: Address,
        shares: U256,
        min_underlying_out: U256,
        min_wrapped_out: U256,
    ) -> Result<(U256, U256)> {
        self.ensure_handler(caller)?;
        let _guard = self.non_reentrant()?;
        let underlying_token = self.buffer(wrapped_token)?.underlying_token;

        self.atomic(|vault| {
            let buffer = vault.buffer_mut(wrapped_token)?;
            let available = buffer.shares_of(caller);
            if shares > available {
                return Err(VaultError::NotEnoughBufferShares {
                    needed: shares,
                    available,
                });
            }
            let underlying_out =
                fixed_point::mul_div_down(buffer.balance.underlying_raw, shares, buffer.total_shares)?;
            let wrapped_out = fixed_point::mul_div_down(buffer.balance.wrapped_raw, shares, buffer.total_shares)?;
            if underlying_out < min_underlying_out {
                return Err(VaultError::AmountOutBelowMin {
                    token: underlying_token,
                    amount: underlying_out,
                    min: min_underlying_out,
                });
            }
            if wrapped_out < min_wrapped_out {
                return Err(VaultError::AmountOutBelowMin {
                    token: wrapped_token,
                    amount: wrapped_out,
                    min: min_wrapped_out,
                });
            }

            buffer.balance.underlying_raw -= underlying_out;
            buffer.balance.wrapped_raw -= wrapped_out;
            buffer.burn_shares(caller, shares)?;

            vault.state.session.supply_credit(underlying_token, underlying_out, caller)?;
            vault.state.session.supply_credit(wrapped_token, wrapped_out, caller)?;

            tracing::debug!(wrapped = %wrapped_token, owner = %caller, shares = %shares, "Buffer liquidity removed");
            vault.emit(VaultEvent::BufferLiquidityRemoved {
                wrapped_token,
                amount_underlying: underlying_out,
                amount_wrapped: wrapped_out,
                shares,
            });
            Ok((underlying_out, wrapped_out))
        })
    }

    // =================================================================
    // Wrap / unwrap
    // =================================================================

    /// Wrap or unwrap through the buffer of `params.wrapped_token`.
    ///
    /// Debt is taken in the token going in and credit supplied in the token
    /// coming out, like a swap.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`, `ReentrantCall`
    /// - `VaultBuffersArePaused`, `VaultPaused`, `BufferNotInitialized`,
    ///   `WrongUnderlyingToken`
    /// - `AmountGivenZero`, `WrapAmountTooSmall`, `SwapLimit`
    /// - `NotEnoughUnderlying` / `NotEnoughWrapped` if the wrapper paid out
    ///   less than previewed
    pub fn erc4626_buffer_wrap_or_unwrap(
        &mut self,
        caller: Address,
        params: &BufferWrapOrUnwrapParams,
    ) -> Result<BufferWrapOrUnwrapResult> {
        self.ensure_handler(caller)?;
        let _guard = self.non_reentrant()?;
        self.ensure_buffers_not_paused()?;
        self.ensure_vault_not_paused()?;
        let wrapped_token = params.wrapped_token;
        let underlying_token = self.ensure_buffer_asset(wrapped_token)?;

        if params.amount_given_raw.is_zero() {
            return Err(VaultError::AmountGivenZero);
        }
        self.ensure_valid_wrap_amount(wrapped_token, params.amount_given_raw)?;

        self.atomic(|vault| {
            let wrapper = vault.state.world.wrapper(wrapped_token)?;
            let (amount_in, amount_out) = preview_wrap_or_unwrap(&vault.state.world, &wrapper, params)?;
            let (token_in, token_out) = match params.direction {
                WrappingDirection::Wrap => (underlying_token, wrapped_token),
                WrappingDirection::Unwrap => (wrapped_token, underlying_token),
            };

            let within_buffer = match params.direction {
                WrappingDirection::Wrap => vault.buffer(wrapped_token)?.balance.wrapped_raw >= amount_out,
                WrappingDirection::Unwrap => vault.buffer(wrapped_token)?.balance.underlying_raw >= amount_out,
            };
            if within_buffer {
                let balance = &mut vault.buffer_mut(wrapped_token)?.balance;
                match params.direction {
                    WrappingDirection::Wrap => {
                        balance.underlying_raw = fixed_point::add(balance.underlying_raw, amount_in, "buffer wrap")?;
                        balance.wrapped_raw -= amount_out;
                    }
                    WrappingDirection::Unwrap => {
                        balance.wrapped_raw = fixed_point::add(balance.wrapped_raw, amount_in, "buffer unwrap")?;
                        balance.underlying_raw -= amount_out;
                    }
                }
            } else {
                vault.wrap_or_unwrap_externally(&wrapper, params, amount_in, amount_out)?;
            }

            let (amount_calculated, limit_exceeded) = match params.kind {
                SwapKind::ExactIn => (amount_out, amount_out < params.limit_raw),
                SwapKind::ExactOut => (amount_in, amount_in > params.limit_raw),
            };
            if limit_exceeded {
                return Err(VaultError::SwapLimit {
                    amount: amount_calculated,
                    limit: params.limit_raw,
                });
            }
            vault.ensure_valid_wrap_amount(wrapped_token, amount_calculated)?;

            vault.state.session.take_debt(token_in, amount_in, caller)?;
            vault.state.session.supply_credit(token_out, amount_out, caller)?;

            tracing::debug!(
                wrapped = %wrapped_token,
                direction = %params.direction,
                kind = %params.kind,
                amount_in = %amount_in,
                amount_out = %amount_out,
                within_buffer,
                "Buffer wrap/unwrap"
            );
            vault.emit(VaultEvent::Wrapped {
                wrapped_token,
                direction: params.direction,
                amount_in,
                amount_out,
                within_buffer,
            });
            Ok(BufferWrapOrUnwrapResult {
                amount_calculated_raw: amount_calculated,
                amount_in_raw: amount_in,
                amount_out_raw: amount_out,
            })
        })
    }

    /// Route the whole request through the wrapper. Whatever the wrapper
    /// returns beyond the previewed amount stays in the buffer.
    fn wrap_or_unwrap_externally(
        &mut self,
        wrapper: &Erc4626Wrapper,
        params: &BufferWrapOrUnwrapParams,
        amount_in: U256,
        amount_out: U256,
    ) -> Result<()> {
        let vault_address = self.address();
        let bank = &mut self.state.world.bank;
        match params.direction {
            WrappingDirection::Wrap => {
                let (underlying_sent, wrapped_received) = match params.kind {
                    SwapKind::ExactIn => {
                        let shares = wrapper.deposit(bank, vault_address, amount_in, vault_address)?;
                        (amount_in, shares)
                    }
                    SwapKind::ExactOut => {
                        let assets = wrapper.mint(bank, vault_address, amount_out, vault_address)?;
                        (assets, amount_out)
                    }
                };
                self.reconcile_external_wrap(wrapper, underlying_sent, wrapped_received)?;

                let underlying_dust = amount_in
                    .checked_sub(underlying_sent)
                    .ok_or(VaultError::NotEnoughUnderlying {
                        wrapped: wrapper.address(),
                        expected: underlying_sent,
                        actual: amount_in,
                    })?;
                let wrapped_dust = wrapped_received
                    .checked_sub(amount_out)
                    .ok_or(VaultError::NotEnoughWrapped {
                        wrapped: wrapper.address(),
                        expected: amount_out,
                        actual: wrapped_received,
                    })?;
                self.credit_buffer(wrapper.address(), underlying_dust, wrapped_dust)
            }
            WrappingDirection::Unwrap => {
                let (wrapped_sent, underlying_received) = match params.kind {
                    SwapKind::ExactIn => {
                        let assets = wrapper.redeem(bank, vault_address, amount_in, vault_address)?;
                        (amount_in, assets)
                    }
                    SwapKind::ExactOut => {
                        let shares = wrapper.withdraw(bank, vault_address, amount_out, vault_address)?;
                        (shares, amount_out)
                    }
                };
                self.reconcile_external_unwrap(wrapper, wrapped_sent, underlying_received)?;

                let wrapped_dust = amount_in
                    .checked_sub(wrapped_sent)
                    .ok_or(VaultError::NotEnoughWrapped {
                        wrapped: wrapper.address(),
                        expected: wrapped_sent,
                        actual: amount_in,
                    })?;
                let underlying_dust = underlying_received
                    .checked_sub(amount_out)
                    .ok_or(VaultError::NotEnoughUnderlying {
                        wrapped: wrapper.address(),
                        expected: amount_out,
                        actual: underlying_received,
                    })?;
                self.credit_buffer(wrapper.address(), underlying_dust, wrapped_dust)
            }
        }
    }

    // =================================================================
    // Rebalance
    // =================================================================

    /// Move half of the buffer's value imbalance through the wrapper so both
    /// sides are worth about the same. Records no session deltas.
    ///
    /// A no-op when the half imbalance is within
    /// `VaultConfig::buffer_rebalance_tolerance`, which also makes a second
    /// consecutive call a no-op.
    ///
    /// # Errors
    /// - `SenderNotAllowed` unless `caller` is the admin
    /// - `VaultIsNotUnlocked`, `ReentrantCall`
    /// - `BufferNotInitialized`, `VaultBuffersArePaused`, `VaultPaused`
    pub fn rebalance(&mut self, caller: Address, wrapped_token: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        self.state.session.ensure_unlocked()?;
        let _guard = self.non_reentrant()?;
        self.ensure_buffer_asset(wrapped_token)?;
        self.ensure_buffers_not_paused()?;
        self.ensure_vault_not_paused()?;

        self.atomic(|vault| {
            let wrapper = vault.state.world.wrapper(wrapped_token)?;
            let vault_address = vault.address();
            let tolerance = vault.config().buffer_rebalance_tolerance;
            let balance = vault.buffer(wrapped_token)?.balance;
            let wrapped_value = wrapper.preview_redeem(&vault.state.world.bank, balance.wrapped_raw)?;

            if balance.underlying_raw > wrapped_value {
                let half = (balance.underlying_raw - wrapped_value) / U256::from(2u64);
                if half <= tolerance {
                    return Ok(());
                }
                let shares_before = vault.state.world.bank.balance_of(wrapped_token, vault_address);
                wrapper.deposit(&mut vault.state.world.bank, vault_address, half, vault_address)?;
                let received = vault
                    .state
                    .world
                    .bank
                    .balance_of(wrapped_token, vault_address)
                    .saturating_sub(shares_before);
                vault.reconcile_external_wrap(&wrapper, half, received)?;

                let buffer = vault.buffer_mut(wrapped_token)?;
                buffer.balance.underlying_raw -= half;
                buffer.balance.wrapped_raw = fixed_point::add(buffer.balance.wrapped_raw, received, "rebalance")?;
                vault.record_rebalance(wrapped_token, half, received, WrappingDirection::Wrap);
            } else {
                let half = (wrapped_value - balance.underlying_raw) / U256::from(2u64);
                if half <= tolerance {
                    return Ok(());
                }
                let shares = wrapper
                    .convert_to_shares(&vault.state.world.bank, half)?
                    .min(balance.wrapped_raw);
                let assets_before = vault.state.world.bank.balance_of(wrapper.asset(), vault_address);
                wrapper.redeem(&mut vault.state.world.bank, vault_address, shares, vault_address)?;
                let received = vault
                    .state
                    .world
                    .bank
                    .balance_of(wrapper.asset(), vault_address)
                    .saturating_sub(assets_before);
                vault.reconcile_external_unwrap(&wrapper, shares, received)?;

                let buffer = vault.buffer_mut(wrapped_token)?;
                buffer.balance.wrapped_raw -= shares;
                buffer.balance.underlying_raw =
                    fixed_point::add(buffer.balance.underlying_raw, received, "rebalance")?;
                vault.record_rebalance(wrapped_token, received, shares, WrappingDirection::Unwrap);
            }
            Ok(())
        })
    }

    fn record_rebalance(
        &mut self,
        wrapped_token: Address,
        underlying_delta: U256,
        wrapped_delta: U256,
        direction: WrappingDirection,
    ) {
        tracing::info!(
            wrapped = %wrapped_token,
            direction = %direction,
            underlying = %underlying_delta,
            wrapped_amount = %wrapped_delta,
            "Buffer rebalanced"
        );
        self.emit(VaultEvent::BufferRebalanced {
            wrapped_token,
            underlying_delta,
            wrapped_delta,
            direction,
        });
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn is_buffer_initialized(&self, wrapped_token: Address) -> bool {
        self.state.buffers.contains_key(&wrapped_token)
    }

    /// Raw balances held by the buffer.
    ///
    /// # Errors
    /// `BufferNotInitialized`.
    pub fn get_buffer_balance(&self, wrapped_token: Address) -> Result<BufferBalance> {
        Ok(self.buffer(wrapped_token)?.balance)
    }

    /// Total issued shares, zero for an unknown buffer.
    #[must_use]
    pub fn get_buffer_total_shares(&self, wrapped_token: Address) -> U256 {
        self.state
            .buffers
            .get(&wrapped_token)
            .map_or(U256::ZERO, |b| b.total_shares)
    }

    #[must_use]
    pub fn get_buffer_owner_shares(&self, wrapped_token: Address, owner: Address) -> U256 {
        self.state
            .buffers
            .get(&wrapped_token)
            .map_or(U256::ZERO, |b| b.shares_of(owner))
    }

    /// Underlying asset recorded when the buffer was initialized.
    #[must_use]
    pub fn get_buffer_asset(&self, wrapped_token: Address) -> Option<Address> {
        self.state.buffers.get(&wrapped_token).map(|b| b.underlying_token)
    }

    /// Buffer value in underlying units, for invariant checks.
    ///
    /// # Errors
    /// `BufferNotInitialized`, `UnknownWrappedToken`.
    pub fn get_buffer_value_in_underlying(&self, wrapped_token: Address) -> Result<U256> {
        let wrapper = self.state.world.wrapper(wrapped_token)?;
        self.buffer(wrapped_token)?
            .value_in_underlying(&self.state.world, &wrapper)
    }

    // =================================================================
    // Helpers
    // =================================================================

    fn buffer(&self, wrapped_token: Address) -> Result<&BufferState> {
        self.state
            .buffers
            .get(&wrapped_token)
            .ok_or(VaultError::BufferNotInitialized(wrapped_token))
    }

    fn buffer_mut(&mut self, wrapped_token: Address) -> Result<&mut BufferState> {
        self.state
            .buffers
            .get_mut(&wrapped_token)
            .ok_or(VaultError::BufferNotInitialized(wrapped_token))
    }

    /// The buffer exists and its wrapper still reports the registered asset.
    /// Returns the underlying token.
    fn ensure_buffer_asset(&self, wrapped_token: Address) -> Result<Address> {
        let expected = self.buffer(wrapped_token)?.underlying_token;
        let actual = self.state.world.wrapper(wrapped_token)?.asset();
        if actual != expected {
            return Err(VaultError::WrongUnderlyingToken {
                wrapped: wrapped_token,
                expected,
                actual,
            });
        }
        Ok(expected)
    }

    fn ensure_valid_wrap_amount(&self, wrapped_token: Address, amount: U256) -> Result<()> {
        if !amount.is_zero() && amount < self.config().minimum_wrap_amount {
            return Err(VaultError::WrapAmountTooSmall {
                wrapped: wrapped_token,
                amount,
            });
        }
        Ok(())
    }

    fn credit_buffer(&mut self, wrapped_token: Address, underlying: U256, wrapped: U256) -> Result<()> {
        let balance = &mut self.buffer_mut(wrapped_token)?.balance;
        balance.underlying_raw = fixed_point::add(balance.underlying_raw, underlying, "buffer dust")?;
        balance.wrapped_raw = fixed_point::add(balance.wrapped_raw, wrapped, "buffer dust")?;
        Ok(())
    }

    /// After the vault deposited `underlying_sent` and got `wrapped_received`:
    /// reserves must still cover what the books say, then track actuals.
    fn reconcile_external_wrap(
        &mut self,
        wrapper: &Erc4626Wrapper,
        underlying_sent: U256,
        wrapped_received: U256,
    ) -> Result<()> {
        let (underlying, wrapped) = (wrapper.asset(), wrapper.address());
        let expected_underlying = self.state.reserves.reserves_of(underlying).saturating_sub(underlying_sent);
        let expected_wrapped =
            fixed_point::add(self.state.reserves.reserves_of(wrapped), wrapped_received, "reserves")?;
        self.reconcile_reserves(wrapped, underlying, expected_underlying, wrapped, expected_wrapped)
    }

    fn reconcile_external_unwrap(
        &mut self,
        wrapper: &Erc4626Wrapper,
        wrapped_sent: U256,
        underlying_received: U256,
    ) -> Result<()> {
        let (underlying, wrapped) = (wrapper.asset(), wrapper.address());
        let expected_underlying =
            fixed_point::add(self.state.reserves.reserves_of(underlying), underlying_received, "reserves")?;
        let expected_wrapped = self.state.reserves.reserves_of(wrapped).saturating_sub(wrapped_sent);
        self.reconcile_reserves(wrapped, underlying, expected_underlying, wrapped, expected_wrapped)
    }

    fn reconcile_reserves(
        &mut self,
        wrapper: Address,
        underlying: Address,
        expected_underlying: U256,
        wrapped: Address,
        expected_wrapped: U256,
    ) -> Result<()> {
        let vault_address = self.address();
        let actual_underlying = self.state.world.bank.balance_of(underlying, vault_address);
        if actual_underlying < expected_underlying {
            return Err(VaultError::NotEnoughUnderlying {
                wrapped: wrapper,
                expected: expected_underlying,
                actual: actual_underlying,
            });
        }
        let actual_wrapped = self.state.world.bank.balance_of(wrapped, vault_address);
        if actual_wrapped < expected_wrapped {
            return Err(VaultError::NotEnoughWrapped {
                wrapped: wrapper,
                expected: expected_wrapped,
                actual: actual_wrapped,
            });
        }
        self.state
            .reserves
            .reconcile(underlying, expected_underlying, actual_underlying)?;
        self.state.reserves.reconcile(wrapped, expected_wrapped, actual_wrapped)
    }
}

/// `(amount_in, amount_out)` of a wrap or unwrap, rounded against the caller.
fn preview_wrap_or_unwrap(
    world: &ExternalWorld,
    wrapper: &Erc4626Wrapper,
    params: &BufferWrapOrUnwrapParams,
) -> Result<(U256, U256)> {
    let one = U256::from(1u64);
    let given = params.amount_given_raw;
    let bank = &world.bank;
    let too_small = || VaultError::WrapAmountTooSmall {
        wrapped: wrapper.address(),
        amount: given,
    };

    match (params.direction, params.kind) {
        (WrappingDirection::Wrap, SwapKind::ExactIn) => {
            let out = wrapper.preview_deposit(bank, given - one)?;
            Ok((given, out.checked_sub(one).ok_or_else(too_small)?))
        }
        (WrappingDirection::Wrap, SwapKind::ExactOut) => {
            let amount_in = wrapper.preview_mint(bank, fixed_point::add(given, one, "wrap")?)?;
            Ok((fixed_point::add(amount_in, one, "wrap")?, given))
        }
        (WrappingDirection::Unwrap, SwapKind::ExactIn) => {
            let out = wrapper.preview_redeem(bank, given - one)?;
            Ok((given, out.checked_sub(one).ok_or_else(too_small)?))
        }
        (WrappingDirection::Unwrap, SwapKind::ExactOut) => {
            let amount_in = wrapper.preview_withdraw(bank, fixed_point::add(given, one, "unwrap")?)?;
            Ok((fixed_point::add(amount_in, one, "unwrap")?, given))
        }
    }
}
