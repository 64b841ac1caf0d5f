//! Moving real tokens in and out of an open session.
//!
//! ```text
//! router ──transfer──▶ vault balance
//!        ──settle────▶ credit = balance − reserves      (cancels debt)
//!        ◀─send_to──── debt, reserves −= amount          (cancels credit)
//! ```

use poolvault_types::{Address, Result, U256};

use crate::vault::Vault;

impl Vault {
    /// Credit `caller` with everything transferred to the vault since the
    /// last sync, capped at `amount_hint`. Returns the credit.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`
    /// - `ReentrantCall`
    /// - `ReservesShortfall` if the vault holds less than its reserves
    pub fn settle(&mut self, caller: Address, token: Address, amount_hint: U256) -> Result<U256> {
        self.ensure_handler(caller)?;
        let _guard = self.non_reentrant()?;
        self.atomic(|vault| {
            let actual = vault.state.world.bank.balance_of(token, vault.address());
            let credit = vault.state.reserves.settle(token, actual, amount_hint)?;
            vault.state.session.supply_credit(token, credit, caller)?;
            tracing::debug!(handler = %caller, token = %token, credit = %credit, "Settled");
            Ok(credit)
        })
    }

    /// Pay `amount` of `token` out to `to`, charging it to `caller`.
    ///
    /// # Errors
    /// - `VaultIsNotUnlocked` / `WrongHandler`
    /// - `ReentrantCall`
    /// - `ReservesShortfall` if `amount` exceeds the vault's reserves
    pub fn send_to(&mut self, caller: Address, token: Address, to: Address, amount: U256) -> Result<()> {
        self.ensure_handler(caller)?;
        let _guard = self.non_reentrant()?;
        self.atomic(|vault| {
            vault.state.session.take_debt(token, amount, caller)?;
            vault.state.reserves.release(token, amount)?;
            let from = vault.address();
            vault.state.world.bank.transfer(token, from, to, amount)?;
            tracing::debug!(handler = %caller, token = %token, to = %to, amount = %amount, "Sent");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use poolvault_types::{I256, VaultError};

    use crate::testing::{self, ALICE, DAI, ROUTER, fp};

    #[test]
    fn settle_outside_session_fails() {
        let mut vault = testing::vault_with_tokens();
        assert_eq!(
            vault.settle(ROUTER, DAI, fp(1)),
            Err(VaultError::VaultIsNotUnlocked)
        );
        assert_eq!(
            vault.send_to(ROUTER, DAI, ALICE, fp(1)),
            Err(VaultError::VaultIsNotUnlocked)
        );
    }

    #[test]
    fn deposit_then_withdraw_round_trip() {
        let mut vault = testing::vault_with_tokens();
        let vault_address = vault.address();

        vault
            .unlock(ROUTER, |v| {
                v.world_mut().bank.transfer(DAI, ALICE, vault_address, fp(10))?;
                let credit = v.settle(ROUTER, DAI, fp(10))?;
                assert_eq!(credit, fp(10));
                assert_eq!(v.token_delta(ROUTER, DAI), -I256::try_from(fp(10)).unwrap());
                v.send_to(ROUTER, DAI, ALICE, fp(10))
            })
            .unwrap();

        assert_eq!(vault.reserves_of(DAI), fp(0));
        vault.verify_reserves(DAI).unwrap();
    }

    #[test]
    fn hint_caps_credit_and_excess_becomes_reserve() {
        let mut vault = testing::vault_with_tokens();
        let vault_address = vault.address();

        vault
            .unlock(ROUTER, |v| {
                v.world_mut().bank.transfer(DAI, ALICE, vault_address, fp(10))?;
                let credit = v.settle(ROUTER, DAI, fp(4))?;
                v.send_to(ROUTER, DAI, ALICE, credit)
            })
            .unwrap();

        assert_eq!(vault.reserves_of(DAI), fp(6));
        vault.verify_reserves(DAI).unwrap();
    }

    #[test]
    fn send_beyond_reserves_rolls_back() {
        let mut vault = testing::vault_with_tokens();
        let before = vault.world().bank.balance_of(DAI, ALICE);
        let err = vault
            .unlock(ROUTER, |v| v.send_to(ROUTER, DAI, ALICE, fp(1)))
            .unwrap_err();
        assert!(matches!(err, VaultError::ReservesShortfall { .. }));
        assert_eq!(vault.world().bank.balance_of(DAI, ALICE), before);
    }

    #[test]
    fn unsettled_session_rolls_back_transfer() {
        let mut vault = testing::vault_with_tokens();
        let vault_address = vault.address();
        let before = vault.world().bank.balance_of(DAI, ALICE);

        let err = vault
            .unlock(ROUTER, |v| {
                v.world_mut().bank.transfer(DAI, ALICE, vault_address, fp(5))?;
                v.settle(ROUTER, DAI, fp(5))
            })
            .unwrap_err();
        assert_eq!(err, VaultError::BalanceNotSettled { nonzero_deltas: 1 });
        assert_eq!(vault.world().bank.balance_of(DAI, ALICE), before);
        assert_eq!(vault.reserves_of(DAI), fp(0));
    }

    #[test]
    fn settle_rejects_reentry_while_guard_held() {
        let mut vault = testing::vault_with_tokens();
        vault
            .unlock(ROUTER, |v| {
                let _guard = v.non_reentrant()?;
                assert_eq!(v.settle(ROUTER, DAI, fp(1)), Err(VaultError::ReentrantCall));
                assert_eq!(v.send_to(ROUTER, DAI, ALICE, fp(1)), Err(VaultError::ReentrantCall));
                Ok(())
            })
            .unwrap();
    }
}
