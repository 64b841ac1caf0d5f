//! Multi-token ledger for pool share tokens (BPT).
//!
//! One ledger holds balances, allowances and total supply for every pool's
//! share token, keyed by the pool address. Semantics follow a standard
//! fungible-token ledger with three differences:
//!
//! - The ledger's own address has an implicit infinite allowance over every
//!   token, and an owner never needs an allowance to move its own tokens.
//! - Total supply never lands in the open interval `(0, minimum_total_supply)`:
//!   mint and burn both reject a resulting supply below the floor.
//! - [`TokenLedger::query_mode_balance_increase`] inflates a balance, but
//!   only while the caller is running in [`ExecutionMode::Simulated`].

use std::collections::HashMap;

use poolvault_types::{Address, Result, U256, VaultError};
use serde::{Deserialize, Serialize};

use crate::session::ExecutionMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLedger {
    /// The address holding implicit infinite allowance.
    ledger_address: Address,
    minimum_total_supply: U256,
    /// `(token, owner) → balance`
    balances: HashMap<(Address, Address), U256>,
    /// `(token, owner, spender) → allowance`
    allowances: HashMap<(Address, Address, Address), U256>,
    total_supply: HashMap<Address, U256>,
}

impl TokenLedger {
    #[must_use]
    pub fn new(ledger_address: Address, minimum_total_supply: U256) -> Self {
        Self {
            ledger_address,
            minimum_total_supply,
            balances: HashMap::new(),
            allowances: HashMap::new(),
            total_supply: HashMap::new(),
        }
    }

    #[must_use]
    pub fn ledger_address(&self) -> Address {
        self.ledger_address
    }

    #[must_use]
    pub fn minimum_total_supply(&self) -> U256 {
        self.minimum_total_supply
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn balance_of(&self, token: Address, owner: Address) -> U256 {
        self.balances
            .get(&(token, owner))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    #[must_use]
    pub fn total_supply(&self, token: Address) -> U256 {
        self.total_supply.get(&token).copied().unwrap_or(U256::ZERO)
    }

    /// Allowance granted by `owner` to `spender`. Infinite for the ledger
    /// itself and for the owner spending its own tokens.
    #[must_use]
    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        if spender == self.ledger_address || owner == spender {
            return U256::MAX;
        }
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    // =================================================================
    // Allowances
    // =================================================================

    /// # Errors
    /// `InvalidSender` / `InvalidReceiver` if owner or spender is zero.
    pub fn approve(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<()> {
        if owner.is_zero() {
            return Err(VaultError::InvalidSender(owner));
        }
        if spender.is_zero() {
            return Err(VaultError::InvalidReceiver(spender));
        }
        self.allowances.insert((token, owner, spender), amount);
        Ok(())
    }

    /// Consume `amount` of the allowance `owner` granted to `spender`.
    /// Infinite allowances are left untouched.
    ///
    /// # Errors
    /// `InsufficientAllowance` if the allowance is too small.
    pub fn spend_allowance(
        &mut self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<()> {
        let current = self.allowance(token, owner, spender);
        if current == U256::MAX {
            return Ok(());
        }
        let remaining = current
            .checked_sub(amount)
            .ok_or(VaultError::InsufficientAllowance {
                token,
                owner,
                spender,
                needed: amount,
                available: current,
            })?;
        self.allowances.insert((token, owner, spender), remaining);
        Ok(())
    }

    // =================================================================
    // Supply changes
    // =================================================================

    /// # Errors
    /// - `InvalidReceiver` if `to` is the zero address
    /// - `TotalSupplyTooLow` if the resulting supply is below the floor
    pub fn mint(&mut self, token: Address, to: Address, amount: U256) -> Result<()> {
        if to.is_zero() {
            return Err(VaultError::InvalidReceiver(to));
        }
        self.mint_unchecked_receiver(token, to, amount)
    }

    /// Mint the permanent minimum-supply reserve to the zero address.
    /// Called once when a pool is initialized.
    ///
    /// # Errors
    /// `MathOverflow` if supply overflows.
    pub fn mint_minimum_supply_reserve(&mut self, token: Address) -> Result<()> {
        self.mint_unchecked_receiver(token, Address::ZERO, self.minimum_total_supply)
    }

    fn mint_unchecked_receiver(&mut self, token: Address, to: Address, amount: U256) -> Result<()> {
        let supply = self
            .total_supply(token)
            .checked_add(amount)
            .ok_or(VaultError::MathOverflow("mint"))?;
        self.ensure_minimum_total_supply(token, supply)?;

        let balance = self
            .balance_of(token, to)
            .checked_add(amount)
            .ok_or(VaultError::MathOverflow("mint"))?;
        self.total_supply.insert(token, supply);
        self.balances.insert((token, to), balance);
        Ok(())
    }

    /// # Errors
    /// - `InvalidSender` if `from` is the zero address
    /// - `InsufficientBalance` if `from` holds less than `amount`
    /// - `TotalSupplyTooLow` if the resulting supply is below the floor
    pub fn burn(&mut self, token: Address, from: Address, amount: U256) -> Result<()> {
        if from.is_zero() {
            return Err(VaultError::InvalidSender(from));
        }
        let available = self.balance_of(token, from);
        let balance = available
            .checked_sub(amount)
            .ok_or(VaultError::InsufficientBalance {
                token,
                owner: from,
                needed: amount,
                available,
            })?;
        // Saturates only for query-mode balances, which are never live.
        let supply = self.total_supply(token).saturating_sub(amount);
        self.ensure_minimum_total_supply(token, supply)?;

        self.balances.insert((token, from), balance);
        self.total_supply.insert(token, supply);
        Ok(())
    }

    /// Inflate `to`'s balance without backing. Total supply is left alone so
    /// pricing sees the real supply. Only legal in a simulated session, whose
    /// state is always discarded.
    ///
    /// # Errors
    /// `NotStaticCall` when `mode` is `Live`.
    pub fn query_mode_balance_increase(
        &mut self,
        token: Address,
        to: Address,
        amount: U256,
        mode: ExecutionMode,
    ) -> Result<()> {
        if mode != ExecutionMode::Simulated {
            return Err(VaultError::NotStaticCall);
        }
        let balance = self
            .balance_of(token, to)
            .checked_add(amount)
            .ok_or(VaultError::MathOverflow("query_mode_balance_increase"))?;
        self.balances.insert((token, to), balance);
        Ok(())
    }

    // =================================================================
    // Transfers
    // =================================================================

    /// # Errors
    /// - `InvalidSender` / `InvalidReceiver` for zero addresses
    /// - `InsufficientBalance` if `from` holds less than `amount`
    pub fn transfer(&mut self, token: Address, from: Address, to: Address, amount: U256) -> Result<()> {
        if from.is_zero() {
            return Err(VaultError::InvalidSender(from));
        }
        if to.is_zero() {
            return Err(VaultError::InvalidReceiver(to));
        }
        let available = self.balance_of(token, from);
        let remaining = available
            .checked_sub(amount)
            .ok_or(VaultError::InsufficientBalance {
                token,
                owner: from,
                needed: amount,
                available,
            })?;
        self.balances.insert((token, from), remaining);
        let received = self
            .balance_of(token, to)
            .checked_add(amount)
            .ok_or(VaultError::MathOverflow("transfer"))?;
        self.balances.insert((token, to), received);
        Ok(())
    }

    /// Move tokens on behalf of `from`, spending `spender`'s allowance.
    ///
    /// # Errors
    /// As [`Self::spend_allowance`] and [`Self::transfer`].
    pub fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<()> {
        self.spend_allowance(token, from, spender, amount)?;
        self.transfer(token, from, to, amount)
    }

    fn ensure_minimum_total_supply(&self, token: Address, total_supply: U256) -> Result<()> {
        if total_supply < self.minimum_total_supply {
            return Err(VaultError::TotalSupplyTooLow {
                token,
                total_supply,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const MIN: u64 = 1_000_000;

    fn vault() -> Address {
        Address::repeat_byte(0xee)
    }

    fn pool() -> Address {
        Address::repeat_byte(0x50)
    }

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn bob() -> Address {
        Address::repeat_byte(0xb0)
    }

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    fn ledger() -> TokenLedger {
        TokenLedger::new(vault(), u(MIN))
    }

    #[test]
    fn mint_below_floor_rejected() {
        let mut l = ledger();
        let err = l.mint(pool(), alice(), u(MIN - 1)).unwrap_err();
        assert!(matches!(err, VaultError::TotalSupplyTooLow { .. }));
        assert_eq!(l.total_supply(pool()), U256::ZERO);
    }

    #[test]
    fn mint_to_zero_rejected() {
        let mut l = ledger();
        assert_eq!(
            l.mint(pool(), Address::ZERO, u(MIN)),
            Err(VaultError::InvalidReceiver(Address::ZERO))
        );
    }

    #[test]
    fn minimum_reserve_goes_to_zero_address() {
        let mut l = ledger();
        l.mint_minimum_supply_reserve(pool()).unwrap();
        assert_eq!(l.balance_of(pool(), Address::ZERO), u(MIN));
        assert_eq!(l.total_supply(pool()), u(MIN));
        // Anything above the floor can now be minted.
        l.mint(pool(), alice(), u(1)).unwrap();
    }

    #[test]
    fn burn_cannot_cross_floor() {
        let mut l = ledger();
        l.mint_minimum_supply_reserve(pool()).unwrap();
        l.mint(pool(), alice(), u(500)).unwrap();
        l.burn(pool(), alice(), u(500)).unwrap();
        assert_eq!(l.total_supply(pool()), u(MIN));

        l.mint(pool(), alice(), u(10)).unwrap();
        l.transfer(pool(), alice(), bob(), u(5)).unwrap();
        assert!(l.burn(pool(), bob(), u(6)).is_err());
    }

    #[test]
    fn burn_more_than_balance_rejected() {
        let mut l = ledger();
        l.mint(pool(), alice(), u(MIN)).unwrap();
        let err = l.burn(pool(), alice(), u(MIN + 1)).unwrap_err();
        assert!(matches!(err, VaultError::InsufficientBalance { .. }));
    }

    #[test]
    fn ledger_and_owner_have_infinite_allowance() {
        let l = ledger();
        assert_eq!(l.allowance(pool(), alice(), vault()), U256::MAX);
        assert_eq!(l.allowance(pool(), alice(), alice()), U256::MAX);
        assert_eq!(l.allowance(pool(), alice(), bob()), U256::ZERO);
    }

    #[test]
    fn transfer_from_spends_allowance() {
        let mut l = ledger();
        l.mint(pool(), alice(), u(MIN)).unwrap();
        l.approve(pool(), alice(), bob(), u(100)).unwrap();
        l.transfer_from(pool(), bob(), alice(), bob(), u(60)).unwrap();
        assert_eq!(l.allowance(pool(), alice(), bob()), u(40));
        assert_eq!(l.balance_of(pool(), bob()), u(60));

        let err = l.transfer_from(pool(), bob(), alice(), bob(), u(41)).unwrap_err();
        assert!(matches!(err, VaultError::InsufficientAllowance { .. }));
    }

    #[test]
    fn infinite_approval_not_decremented() {
        let mut l = ledger();
        l.mint(pool(), alice(), u(MIN)).unwrap();
        l.approve(pool(), alice(), bob(), U256::MAX).unwrap();
        l.transfer_from(pool(), bob(), alice(), bob(), u(60)).unwrap();
        assert_eq!(l.allowance(pool(), alice(), bob()), U256::MAX);
    }

    #[test]
    fn transfer_to_zero_rejected() {
        let mut l = ledger();
        l.mint(pool(), alice(), u(MIN)).unwrap();
        assert_eq!(
            l.transfer(pool(), alice(), Address::ZERO, u(1)),
            Err(VaultError::InvalidReceiver(Address::ZERO))
        );
    }

    #[test]
    fn query_mode_increase_requires_simulation() {
        let mut l = ledger();
        assert_eq!(
            l.query_mode_balance_increase(pool(), alice(), u(5), ExecutionMode::Live),
            Err(VaultError::NotStaticCall)
        );
        l.query_mode_balance_increase(pool(), alice(), u(5), ExecutionMode::Simulated)
            .unwrap();
        assert_eq!(l.balance_of(pool(), alice()), u(5));
        assert_eq!(l.total_supply(pool()), U256::ZERO, "supply seen by pricing is unchanged");
    }

    #[test]
    fn supply_never_inside_open_floor_interval() {
        let mut rng = StdRng::seed_from_u64(42);
        let holders = [alice(), bob()];

        for _ in 0..50 {
            let mut l = ledger();
            for _ in 0..100 {
                let who = holders[rng.gen_range(0..holders.len())];
                let amount = u(rng.gen_range(0..3 * MIN));
                if rng.gen_bool(0.5) {
                    let _ = l.mint(pool(), who, amount);
                } else {
                    let _ = l.burn(pool(), who, amount);
                }
                let supply = l.total_supply(pool());
                assert!(supply.is_zero() || supply >= u(MIN), "supply {supply}");
            }
        }
    }
}
