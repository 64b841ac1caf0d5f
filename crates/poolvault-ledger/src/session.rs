//! Transient session ledger (the "unlock" state machine).
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  open(handler)   ┌──────────┐
//!   │ LOCKED ├─────────────────▶│ UNLOCKED │◀──┐ open / close (nested)
//!   └────────┘                  └────┬─────┘───┘
//!        ▲   close() with every delta│zero
//!        └───────────────────────────┘
//! ```
//!
//! Every operation inside a session records signed deltas per
//! (handler, token): positive is debt owed to the vault, negative is credit
//! owed by the vault. A counter of non-zero deltas is maintained on every
//! transition to and from zero, so "is everything settled" is O(1) no matter
//! how many tokens were touched.
//!
//! Nested sessions push another handler. Only the outermost `close` checks
//! that the session is settled; inner closes just pop.

use std::collections::HashMap;

use poolvault_types::{Address, I256, Result, U256, VaultError};

/// Whether the current session will be committed or discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// State changes are committed when the session closes.
    #[default]
    Live,
    /// Read-only simulation: state is always discarded afterwards, so
    /// settlement is not enforced and query-only balance increases are
    /// permitted.
    Simulated,
}

#[derive(Debug, Clone, Default)]
pub struct SessionLedger {
    /// Active handlers, innermost last.
    handlers: Vec<Address>,
    /// `(handler, token) → delta`. Zero deltas are not stored.
    deltas: HashMap<(Address, Address), I256>,
    nonzero_delta_count: usize,
    mode: ExecutionMode,
}

impl SessionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Number of nested sessions currently open.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn is_simulated(&self) -> bool {
        self.mode == ExecutionMode::Simulated
    }

    /// Switch the execution mode. Only meaningful before the outermost
    /// `open`; closing the outermost session resets it to `Live`.
    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn ensure_unlocked(&self) -> Result<()> {
        if self.is_unlocked() {
            Ok(())
        } else {
            Err(VaultError::VaultIsNotUnlocked)
        }
    }

    /// The handler on top of the stack.
    pub fn current_handler(&self) -> Result<Address> {
        self.handlers.last().copied().ok_or(VaultError::NoHandler)
    }

    /// Fails unless a session is open and `caller` is its current handler.
    pub fn ensure_handler(&self, caller: Address) -> Result<()> {
        self.ensure_unlocked()?;
        let current = self.current_handler()?;
        if current == caller {
            Ok(())
        } else {
            Err(VaultError::WrongHandler {
                handler: caller,
                current,
            })
        }
    }

    /// Push `handler`, unlocking the ledger if it was locked.
    pub fn open(&mut self, handler: Address) {
        self.handlers.push(handler);
        tracing::debug!(handler = %handler, depth = self.handlers.len(), "Session opened");
    }

    /// Pop the current handler.
    ///
    /// Closing the outermost session requires every delta to be zero (unless
    /// simulated); on failure the stack is left untouched so the caller can
    /// settle and retry.
    ///
    /// # Errors
    /// - `NoHandler` if no session is open
    /// - `BalanceNotSettled` if the outermost session still has deltas
    pub fn close(&mut self) -> Result<Address> {
        if self.handlers.is_empty() {
            return Err(VaultError::NoHandler);
        }
        let outermost = self.handlers.len() == 1;
        if outermost && !self.is_simulated() && self.nonzero_delta_count != 0 {
            tracing::warn!(
                nonzero_deltas = self.nonzero_delta_count,
                "Session close rejected: balance not settled"
            );
            return Err(VaultError::BalanceNotSettled {
                nonzero_deltas: self.nonzero_delta_count,
            });
        }
        let handler = self.handlers.pop().ok_or(VaultError::NoHandler)?;
        if outermost {
            self.reset();
        }
        tracing::debug!(handler = %handler, depth = self.handlers.len(), "Session closed");
        Ok(handler)
    }

    /// Add `delta` to `(handler, token)`.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` outside a session
    /// - `WrongHandler` unless `handler` is on top of the stack
    pub fn account_delta(&mut self, token: Address, delta: I256, handler: Address) -> Result<()> {
        self.ensure_handler(handler)?;
        if delta.is_zero() {
            return Ok(());
        }

        let key = (handler, token);
        let current = self.deltas.get(&key).copied().unwrap_or(I256::ZERO);
        let next = current
            .checked_add(delta)
            .ok_or(VaultError::MathOverflow("account_delta"))?;

        if next.is_zero() {
            self.nonzero_delta_count -= 1;
            self.deltas.remove(&key);
        } else {
            if current.is_zero() {
                self.nonzero_delta_count += 1;
            }
            self.deltas.insert(key, next);
        }

        tracing::debug!(
            handler = %handler,
            token = %token,
            delta = %delta,
            balance = %next,
            nonzero_deltas = self.nonzero_delta_count,
            "Delta recorded"
        );
        Ok(())
    }

    /// Record that `handler` owes the vault `amount` of `token`.
    pub fn take_debt(&mut self, token: Address, amount: U256, handler: Address) -> Result<()> {
        self.account_delta(token, to_signed(amount)?, handler)
    }

    /// Record that the vault owes `handler` `amount` of `token`.
    pub fn supply_credit(&mut self, token: Address, amount: U256, handler: Address) -> Result<()> {
        let credit = to_signed(amount)?
            .checked_neg()
            .ok_or(VaultError::MathOverflow("supply_credit"))?;
        self.account_delta(token, credit, handler)
    }

    /// Current delta of `(handler, token)`; zero if untouched.
    #[must_use]
    pub fn token_delta(&self, handler: Address, token: Address) -> I256 {
        self.deltas
            .get(&(handler, token))
            .copied()
            .unwrap_or(I256::ZERO)
    }

    #[must_use]
    pub fn nonzero_delta_count(&self) -> usize {
        self.nonzero_delta_count
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.nonzero_delta_count == 0
    }

    fn reset(&mut self) {
        self.handlers.clear();
        self.deltas.clear();
        self.nonzero_delta_count = 0;
        self.mode = ExecutionMode::Live;
    }
}

fn to_signed(amount: U256) -> Result<I256> {
    I256::try_from(amount).map_err(|_| VaultError::MathOverflow("delta"))
}
