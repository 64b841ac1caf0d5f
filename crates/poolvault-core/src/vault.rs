//! The vault facade.
//!
//! [`Vault`] owns every piece of state: the session ledger, reserves, the
//! BPT ledger, pool and buffer records, the event log and the external token
//! world. Operations are split across modules as `impl Vault` blocks:
//!
//! | module            | operations                                                  |
//! |-------------------|-------------------------------------------------------------|
//! | `pool_registry`   | register, pause, recovery mode, fees, pool queries          |
//! | `settlement`      | `settle`, `send_to`                                         |
//! | `swap`            | `swap`                                                      |
//! | `liquidity`       | initialize, add / remove, recovery exit, fee collection     |
//! | `buffer`          | buffer init / add / remove, wrap / unwrap, rebalance        |
//!
//! ## Atomicity
//!
//! Every public mutating operation runs in a frame: the complete state is
//! snapshotted on entry and restored if the operation fails. The event log
//! stays out of the snapshot and is truncated back to its checkpoint
//! instead, so a frame costs the same however long the history. An `unlock`
//! is one such frame around the caller's closure plus the settlement check,
//! so a failing session leaves nothing behind, external balances included.

use chrono::{DateTime, Utc};
use poolvault_ledger::{
    ExecutionMode, PauseWindow, ReentrancyGuard, ReentrancyLock, ReserveTracker, SessionLedger,
    TokenLedger,
};
use poolvault_types::constants::POOL_MINIMUM_TOTAL_SUPPLY;
use poolvault_types::{Address, I256, Result, U256, VaultConfig, VaultError, VaultEvent};
use std::collections::HashMap;

use crate::buffer::BufferState;
use crate::events::EventLog;
use crate::external::ExternalWorld;
use crate::pool_registry::PoolData;

/// Everything a failed frame restores from its snapshot. Events are rolled
/// back separately through [`EventLog::rollback`].
#[derive(Debug, Clone)]
pub(crate) struct VaultState {
    pub(crate) now: DateTime<Utc>,
    pub(crate) session: SessionLedger,
    pub(crate) reserves: ReserveTracker,
    pub(crate) bpt: TokenLedger,
    pub(crate) pools: HashMap<Address, PoolData>,
    pub(crate) buffers: HashMap<Address, BufferState>,
    pub(crate) world: ExternalWorld,
    pub(crate) vault_paused: bool,
    pub(crate) buffers_paused: bool,
}

#[derive(Debug)]
pub struct Vault {
    address: Address,
    admin: Address,
    config: VaultConfig,
    /// Aggregate swap fee as 18-decimal fixed point.
    aggregate_swap_fee: U256,
    pause_window: PauseWindow,
    pub(crate) state: VaultState,
    events: EventLog,
    lock: ReentrancyLock,
}

impl Vault {
    /// Deploy a vault at `address`, governed by `admin`, with the clock at
    /// `now`.
    ///
    /// # Errors
    /// `Configuration` if `config` fails validation.
    pub fn new(address: Address, admin: Address, config: VaultConfig, now: DateTime<Utc>) -> Result<Self> {
        config.validate()?;
        if address.is_zero() {
            return Err(VaultError::Configuration("vault address must be non-zero".into()));
        }
        let aggregate_swap_fee = config.aggregate_swap_fee()?;
        let pause_window = PauseWindow::new(now, config.pause_window_duration_secs)?;

        tracing::info!(
            vault = %address,
            admin = %admin,
            pause_window_end = %pause_window.end_time(),
            "Vault deployed"
        );

        Ok(Self {
            address,
            admin,
            aggregate_swap_fee,
            pause_window,
            state: VaultState {
                now,
                session: SessionLedger::new(),
                reserves: ReserveTracker::new(),
                bpt: TokenLedger::new(address, POOL_MINIMUM_TOTAL_SUPPLY),
                pools: HashMap::new(),
                buffers: HashMap::new(),
                world: ExternalWorld::new(),
                vault_paused: false,
                buffers_paused: false,
            },
            events: EventLog::new(),
            config,
            lock: ReentrancyLock::new(),
        })
    }

    // =================================================================
    // Identity, clock, world
    // =================================================================

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn admin(&self) -> Address {
        self.admin
    }

    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    #[must_use]
    pub fn aggregate_swap_fee_percentage(&self) -> U256 {
        self.aggregate_swap_fee
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.state.now
    }

    /// Move the block clock.
    pub fn set_timestamp(&mut self, now: DateTime<Utc>) {
        self.state.now = now;
    }

    #[must_use]
    pub fn pause_window(&self) -> PauseWindow {
        self.pause_window
    }

    #[must_use]
    pub fn world(&self) -> &ExternalWorld {
        &self.state.world
    }

    /// Direct access to external balances: funding users, donating yield,
    /// transferring tokens to the vault before `settle`.
    pub fn world_mut(&mut self) -> &mut ExternalWorld {
        &mut self.state.world
    }

    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn emit(&mut self, event: VaultEvent) {
        self.events.record(event);
    }

    // =================================================================
    // Frames and sessions
    // =================================================================

    /// Run `f` against the vault; restore the previous state if it fails.
    pub(crate) fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.state.clone();
        let checkpoint = self.events.checkpoint();
        let result = f(self);
        if let Err(err) = &result {
            tracing::debug!(error = %err, "Frame rolled back");
            self.state = snapshot;
            self.events.rollback(checkpoint);
        }
        result
    }

    pub(crate) fn non_reentrant(&self) -> Result<ReentrancyGuard> {
        self.lock.enter()
    }

    /// Open a session for `caller`, run `f`, and close the session.
    ///
    /// Sessions nest: an `unlock` inside `f` pushes another handler. Only
    /// the outermost close requires every delta to be zero.
    ///
    /// # Errors
    /// Whatever `f` returns, or `BalanceNotSettled`. In both cases every
    /// state change made inside the session is discarded.
    pub fn unlock<T>(&mut self, caller: Address, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.atomic(|vault| {
            vault.state.session.open(caller);
            let value = f(vault)?;
            vault.state.session.close()?;
            Ok(value)
        })
    }

    /// Run `f` in a simulated session and discard everything it did.
    ///
    /// Settlement is not enforced and the query-only BPT balance increase is
    /// available, so routers can preview any sequence of operations.
    pub fn quote<T>(&mut self, caller: Address, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.state.clone();
        let checkpoint = self.events.checkpoint();
        self.state.session.set_mode(ExecutionMode::Simulated);
        self.state.session.open(caller);
        let result = f(self).and_then(|value| self.state.session.close().map(|_| value));
        self.state = snapshot;
        self.events.rollback(checkpoint);
        result
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.state.session.is_unlocked()
    }

    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.state.session.mode()
    }

    /// Delta of `(handler, token)` in the open session.
    #[must_use]
    pub fn token_delta(&self, handler: Address, token: Address) -> I256 {
        self.state.session.token_delta(handler, token)
    }

    #[must_use]
    pub fn nonzero_delta_count(&self) -> usize {
        self.state.session.nonzero_delta_count()
    }

    pub(crate) fn ensure_handler(&self, caller: Address) -> Result<()> {
        self.state.session.ensure_handler(caller)
    }

    // =================================================================
    // Reserves
    // =================================================================

    #[must_use]
    pub fn reserves_of(&self, token: Address) -> U256 {
        self.state.reserves.reserves_of(token)
    }

    /// Check that the vault really holds at least its recorded reserves.
    ///
    /// # Errors
    /// `ReservesShortfall` otherwise.
    pub fn verify_reserves(&self, token: Address) -> Result<()> {
        let actual = self.state.world.bank.balance_of(token, self.address);
        self.state.reserves.verify(token, actual)
    }

    // =================================================================
    // Vault administration
    // =================================================================

    pub(crate) fn ensure_admin(&self, caller: Address) -> Result<()> {
        if caller == self.admin {
            Ok(())
        } else {
            Err(VaultError::SenderNotAllowed(caller))
        }
    }

    /// Paused flag set and the vault's pause window still open.
    #[must_use]
    pub fn is_vault_paused(&self) -> bool {
        self.state.vault_paused && !self.pause_window.is_expired(self.state.now)
    }

    pub(crate) fn ensure_vault_not_paused(&self) -> Result<()> {
        if self.is_vault_paused() {
            Err(VaultError::VaultPaused)
        } else {
            Ok(())
        }
    }

    /// # Errors
    /// - `SenderNotAllowed` unless `caller` is the admin
    /// - `VaultPauseWindowExpired` once the vault's pause window has closed
    pub fn pause_vault(&mut self, caller: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        if self.pause_window.is_expired(self.state.now) {
            return Err(VaultError::VaultPauseWindowExpired);
        }
        self.set_vault_paused(true);
        Ok(())
    }

    /// Unpausing is allowed at any time.
    pub fn unpause_vault(&mut self, caller: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        self.set_vault_paused(false);
        Ok(())
    }

    fn set_vault_paused(&mut self, paused: bool) {
        self.state.vault_paused = paused;
        tracing::info!(paused, "Vault paused state changed");
        self.emit(VaultEvent::VaultPausedStateChanged { paused });
    }

    #[must_use]
    pub fn are_buffers_paused(&self) -> bool {
        self.state.buffers_paused
    }

    pub(crate) fn ensure_buffers_not_paused(&self) -> Result<()> {
        if self.state.buffers_paused {
            Err(VaultError::VaultBuffersArePaused)
        } else {
            Ok(())
        }
    }

    pub fn pause_vault_buffers(&mut self, caller: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        self.set_buffers_paused(true);
        Ok(())
    }

    pub fn unpause_vault_buffers(&mut self, caller: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        self.set_buffers_paused(false);
        Ok(())
    }

    fn set_buffers_paused(&mut self, paused: bool) {
        self.state.buffers_paused = paused;
        tracing::info!(paused, "Vault buffers paused state changed");
        self.emit(VaultEvent::VaultBuffersPausedStateChanged { paused });
    }

    // =================================================================
    // BPT (pool share tokens)
    // =================================================================

    #[must_use]
    pub fn balance_of(&self, pool: Address, owner: Address) -> U256 {
        self.state.bpt.balance_of(pool, owner)
    }

    #[must_use]
    pub fn total_supply(&self, pool: Address) -> U256 {
        self.state.bpt.total_supply(pool)
    }

    #[must_use]
    pub fn allowance(&self, pool: Address, owner: Address, spender: Address) -> U256 {
        self.state.bpt.allowance(pool, owner, spender)
    }

    pub fn approve(&mut self, owner: Address, pool: Address, spender: Address, amount: U256) -> Result<()> {
        self.ensure_pool_registered(pool)?;
        self.state.bpt.approve(pool, owner, spender, amount)?;
        self.emit(VaultEvent::Approval {
            token: pool,
            owner,
            spender,
            amount,
        });
        Ok(())
    }

    pub fn transfer(&mut self, caller: Address, pool: Address, to: Address, amount: U256) -> Result<()> {
        self.ensure_pool_registered(pool)?;
        self.state.bpt.transfer(pool, caller, to, amount)?;
        self.emit(VaultEvent::Transfer {
            token: pool,
            from: caller,
            to,
            amount,
        });
        Ok(())
    }

    pub fn transfer_from(
        &mut self,
        spender: Address,
        pool: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<()> {
        self.ensure_pool_registered(pool)?;
        self.atomic(|vault| {
            vault.state.bpt.transfer_from(pool, spender, from, to, amount)?;
            vault.emit(VaultEvent::Transfer {
                token: pool,
                from,
                to,
                amount,
            });
            Ok(())
        })
    }

    pub(crate) fn mint_bpt(&mut self, pool: Address, to: Address, amount: U256) -> Result<()> {
        self.state.bpt.mint(pool, to, amount)?;
        self.emit(VaultEvent::Transfer {
            token: pool,
            from: Address::ZERO,
            to,
            amount,
        });
        Ok(())
    }

    pub(crate) fn burn_bpt(&mut self, pool: Address, from: Address, amount: U256) -> Result<()> {
        self.state.bpt.burn(pool, from, amount)?;
        self.emit(VaultEvent::Transfer {
            token: pool,
            from,
            to: Address::ZERO,
            amount,
        });
        Ok(())
    }
}
