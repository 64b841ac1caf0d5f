//! Reserve tracker.
//!
//! The vault's view of how much of each token it holds. Incoming transfers
//! are discovered by comparing the real balance against the recorded reserve:
//!
//! ```text
//! settle(token):   credit = actual_balance − reserves[token];  reserves[token] = actual_balance
//! send(token, x):  reserves[token] −= x
//! ```
//!
//! Invariant: `reserves[token] <= actual_balance(token)` after every
//! operation. [`ReserveTracker::verify`] is the check run by callers that
//! can observe the real balance.

use std::collections::HashMap;

use poolvault_types::{Address, Result, U256, VaultError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReserveTracker {
    reserves: HashMap<Address, U256>,
}

impl ReserveTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded reserve for `token`; zero if never seen.
    #[must_use]
    pub fn reserves_of(&self, token: Address) -> U256 {
        self.reserves.get(&token).copied().unwrap_or(U256::ZERO)
    }

    /// Absorb everything that arrived since the last sync.
    ///
    /// Returns the credit to grant: `actual − reserves`, capped at `hint`.
    /// The reserve always advances to `actual`, so any excess above the hint
    /// stays in the vault unclaimed.
    ///
    /// # Errors
    /// `ReservesShortfall` if the real balance is below the recorded reserve.
    pub fn settle(&mut self, token: Address, actual: U256, hint: U256) -> Result<U256> {
        let reserves = self.reserves_of(token);
        let received = actual
            .checked_sub(reserves)
            .ok_or(VaultError::ReservesShortfall {
                token,
                expected: reserves,
                actual,
            })?;
        self.reserves.insert(token, actual);

        let credit = received.min(hint);
        if credit < received {
            tracing::debug!(
                token = %token,
                received = %received,
                credited = %credit,
                "Settle capped at hint"
            );
        }
        Ok(credit)
    }

    /// Decrease the recorded reserve before tokens leave the vault.
    ///
    /// # Errors
    /// `ReservesShortfall` if `amount` exceeds the recorded reserve.
    pub fn release(&mut self, token: Address, amount: U256) -> Result<()> {
        let reserves = self.reserves_of(token);
        let next = reserves
            .checked_sub(amount)
            .ok_or(VaultError::ReservesShortfall {
                token,
                expected: amount,
                actual: reserves,
            })?;
        self.reserves.insert(token, next);
        Ok(())
    }

    /// Bring the reserve in line with a balance change the vault performed
    /// itself (an external wrap or unwrap).
    ///
    /// `expected` is the balance the vault requires after the operation;
    /// the reserve becomes `actual` as long as it is at least `expected`.
    ///
    /// # Errors
    /// `ReservesShortfall` if `actual < expected`.
    pub fn reconcile(&mut self, token: Address, expected: U256, actual: U256) -> Result<()> {
        if actual < expected {
            return Err(VaultError::ReservesShortfall {
                token,
                expected,
                actual,
            });
        }
        self.reserves.insert(token, actual);
        Ok(())
    }

    /// Check `reserves[token] <= actual`.
    ///
    /// # Errors
    /// `ReservesShortfall` if the invariant is broken.
    pub fn verify(&self, token: Address, actual: U256) -> Result<()> {
        let expected = self.reserves_of(token);
        if actual < expected {
            tracing::error!(
                token = %token,
                expected = %expected,
                actual = %actual,
                "Reserve invariant violated"
            );
            return Err(VaultError::ReservesShortfall {
                token,
                expected,
                actual,
            });
        }
        Ok(())
    }
}
