//! The token world outside the vault.
//!
//! The vault custodies real ERC20 balances and calls real ERC4626 wrappers.
//! Both are modelled here as plain state so that the vault's atomic frames
//! can snapshot and restore them together with its own books.
//!
//! - [`TokenBank`]: balances, supply and decimals of every external token
//! - [`Erc4626Wrapper`]: a yield-bearing vault over one underlying asset,
//!   whose assets and shares both live in the bank
//! - [`RateProvider`]: exchange-rate source for `WithRate` pool tokens

use std::collections::HashMap;
use std::fmt;

use poolvault_types::fixed_point::{self, ONE};
use poolvault_types::{Address, Result, Rounding, U256, VaultError};

// =================================================================
// TokenBank
// =================================================================

#[derive(Debug, Clone, Default)]
pub struct TokenBank {
    decimals: HashMap<Address, u8>,
    balances: HashMap<(Address, Address), U256>,
    total_supply: HashMap<Address, U256>,
}

impl TokenBank {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a token with the given decimals.
    ///
    /// # Errors
    /// `InvalidToken` for the zero address or an already deployed token.
    pub fn create_token(&mut self, token: Address, decimals: u8) -> Result<()> {
        if token.is_zero() || self.decimals.contains_key(&token) {
            return Err(VaultError::InvalidToken(token));
        }
        self.decimals.insert(token, decimals);
        Ok(())
    }

    #[must_use]
    pub fn exists(&self, token: Address) -> bool {
        self.decimals.contains_key(&token)
    }

    pub fn decimals(&self, token: Address) -> Result<u8> {
        self.decimals
            .get(&token)
            .copied()
            .ok_or(VaultError::InvalidToken(token))
    }

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

    pub fn mint(&mut self, token: Address, to: Address, amount: U256) -> Result<()> {
        self.decimals(token)?;
        let supply = fixed_point::add(self.total_supply(token), amount, "bank mint")?;
        let balance = fixed_point::add(self.balance_of(token, to), amount, "bank mint")?;
        self.total_supply.insert(token, supply);
        self.balances.insert((token, to), balance);
        Ok(())
    }

    pub fn burn(&mut self, token: Address, from: Address, amount: U256) -> Result<()> {
        let available = self.balance_of(token, from);
        let balance = available
            .checked_sub(amount)
            .ok_or(VaultError::InsufficientBalance {
                token,
                owner: from,
                needed: amount,
                available,
            })?;
        self.balances.insert((token, from), balance);
        self.total_supply
            .insert(token, self.total_supply(token).saturating_sub(amount));
        Ok(())
    }

    pub fn transfer(&mut self, token: Address, from: Address, to: Address, amount: U256) -> Result<()> {
        self.decimals(token)?;
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
        let received = fixed_point::add(self.balance_of(token, to), amount, "bank transfer")?;
        self.balances.insert((token, to), received);
        Ok(())
    }
}

// =================================================================
// ERC4626 wrapper
// =================================================================

/// A standard tokenized vault over `asset`.
///
/// Shares are a bank token at `address`; assets are whatever the bank says
/// `address` holds of `asset`. Conversions use a virtual share and a virtual
/// asset of one unit each, so an empty wrapper starts at a 1:1 rate and
/// inflation attacks cost more than they gain. Yield accrues by transferring
/// `asset` to `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Erc4626Wrapper {
    address: Address,
    asset: Address,
}

impl Erc4626Wrapper {
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn asset(&self) -> Address {
        self.asset
    }

    #[must_use]
    pub fn total_assets(&self, bank: &TokenBank) -> U256 {
        bank.balance_of(self.asset, self.address)
    }

    #[must_use]
    pub fn total_supply(&self, bank: &TokenBank) -> U256 {
        bank.total_supply(self.address)
    }

    fn to_shares(&self, bank: &TokenBank, assets: U256, rounding: Rounding) -> Result<U256> {
        let supply = fixed_point::add(self.total_supply(bank), U256::from(1u64), "erc4626")?;
        let total_assets = fixed_point::add(self.total_assets(bank), U256::from(1u64), "erc4626")?;
        match rounding {
            Rounding::Up => fixed_point::mul_div_up(assets, supply, total_assets),
            Rounding::Down => fixed_point::mul_div_down(assets, supply, total_assets),
        }
    }

    fn to_assets(&self, bank: &TokenBank, shares: U256, rounding: Rounding) -> Result<U256> {
        let supply = fixed_point::add(self.total_supply(bank), U256::from(1u64), "erc4626")?;
        let total_assets = fixed_point::add(self.total_assets(bank), U256::from(1u64), "erc4626")?;
        match rounding {
            Rounding::Up => fixed_point::mul_div_up(shares, total_assets, supply),
            Rounding::Down => fixed_point::mul_div_down(shares, total_assets, supply),
        }
    }

    pub fn convert_to_shares(&self, bank: &TokenBank, assets: U256) -> Result<U256> {
        self.to_shares(bank, assets, Rounding::Down)
    }

    pub fn convert_to_assets(&self, bank: &TokenBank, shares: U256) -> Result<U256> {
        self.to_assets(bank, shares, Rounding::Down)
    }

    /// Shares minted for depositing `assets`.
    pub fn preview_deposit(&self, bank: &TokenBank, assets: U256) -> Result<U256> {
        self.to_shares(bank, assets, Rounding::Down)
    }

    /// Assets needed to mint exactly `shares`.
    pub fn preview_mint(&self, bank: &TokenBank, shares: U256) -> Result<U256> {
        self.to_assets(bank, shares, Rounding::Up)
    }

    /// Shares burned to withdraw exactly `assets`.
    pub fn preview_withdraw(&self, bank: &TokenBank, assets: U256) -> Result<U256> {
        self.to_shares(bank, assets, Rounding::Up)
    }

    /// Assets paid out for redeeming `shares`.
    pub fn preview_redeem(&self, bank: &TokenBank, shares: U256) -> Result<U256> {
        self.to_assets(bank, shares, Rounding::Down)
    }

    pub fn deposit(&self, bank: &mut TokenBank, caller: Address, assets: U256, receiver: Address) -> Result<U256> {
        let shares = self.preview_deposit(bank, assets)?;
        bank.transfer(self.asset, caller, self.address, assets)?;
        bank.mint(self.address, receiver, shares)?;
        Ok(shares)
    }

    pub fn mint(&self, bank: &mut TokenBank, caller: Address, shares: U256, receiver: Address) -> Result<U256> {
        let assets = self.preview_mint(bank, shares)?;
        bank.transfer(self.asset, caller, self.address, assets)?;
        bank.mint(self.address, receiver, shares)?;
        Ok(assets)
    }

    pub fn withdraw(&self, bank: &mut TokenBank, owner: Address, assets: U256, receiver: Address) -> Result<U256> {
        let shares = self.preview_withdraw(bank, assets)?;
        bank.burn(self.address, owner, shares)?;
        bank.transfer(self.asset, self.address, receiver, assets)?;
        Ok(shares)
    }

    pub fn redeem(&self, bank: &mut TokenBank, owner: Address, shares: U256, receiver: Address) -> Result<U256> {
        let assets = self.preview_redeem(bank, shares)?;
        bank.burn(self.address, owner, shares)?;
        bank.transfer(self.asset, self.address, receiver, assets)?;
        Ok(assets)
    }
}

// =================================================================
// World
// =================================================================

/// Every external token and wrapper the vault can interact with.
#[derive(Debug, Clone, Default)]
pub struct ExternalWorld {
    pub bank: TokenBank,
    wrappers: HashMap<Address, Erc4626Wrapper>,
}

impl ExternalWorld {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_token(&mut self, token: Address, decimals: u8) -> Result<()> {
        self.bank.create_token(token, decimals)
    }

    /// Deploy an ERC4626 wrapper at `address` over an existing `asset`.
    /// Shares take the asset's decimals.
    pub fn create_wrapper(&mut self, address: Address, asset: Address) -> Result<Erc4626Wrapper> {
        let decimals = self.bank.decimals(asset)?;
        self.bank.create_token(address, decimals)?;
        let wrapper = Erc4626Wrapper { address, asset };
        self.wrappers.insert(address, wrapper);
        Ok(wrapper)
    }

    pub fn wrapper(&self, address: Address) -> Result<Erc4626Wrapper> {
        self.wrappers
            .get(&address)
            .copied()
            .ok_or(VaultError::UnknownWrappedToken(address))
    }

    /// Credit `amount` of the wrapper's asset to its holders.
    pub fn donate_yield(&mut self, wrapper: Address, from: Address, amount: U256) -> Result<()> {
        let wrapper = self.wrapper(wrapper)?;
        self.bank.transfer(wrapper.asset, from, wrapper.address, amount)
    }
}

// =================================================================
// Rate providers
// =================================================================

/// Source of a token's 18-decimal exchange rate.
pub trait RateProvider: fmt::Debug + Send + Sync {
    fn get_rate(&self, world: &ExternalWorld) -> Result<U256>;
}

/// A fixed rate.
#[derive(Debug, Clone, Copy)]
pub struct ConstantRateProvider(pub U256);

impl RateProvider for ConstantRateProvider {
    fn get_rate(&self, _world: &ExternalWorld) -> Result<U256> {
        Ok(self.0)
    }
}

/// The asset value of one whole share of an ERC4626 wrapper.
#[derive(Debug, Clone, Copy)]
pub struct Erc4626RateProvider {
    pub wrapper: Address,
}

impl RateProvider for Erc4626RateProvider {
    fn get_rate(&self, world: &ExternalWorld) -> Result<U256> {
        let wrapper = world.wrapper(self.wrapper)?;
        let decimals = world.bank.decimals(self.wrapper)?;
        let one_share = U256::from(10u64).pow(U256::from(decimals));
        let assets = wrapper.convert_to_assets(&world.bank, one_share)?;
        fixed_point::mul_div_down(assets, ONE, one_share)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dai() -> Address {
        Address::repeat_byte(0xda)
    }

    fn wdai() -> Address {
        Address::repeat_byte(0xdb)
    }

    fn alice() -> Address {
        Address::repeat_byte(0xa1)
    }

    fn e18(v: u64) -> U256 {
        U256::from(v) * ONE
    }

    fn world() -> ExternalWorld {
        let mut world = ExternalWorld::new();
        world.create_token(dai(), 18).unwrap();
        world.create_wrapper(wdai(), dai()).unwrap();
        world.bank.mint(dai(), alice(), e18(1_000)).unwrap();
        world
    }

    #[test]
    fn bank_transfer_checks_balance() {
        let mut w = world();
        let bob = Address::repeat_byte(0xb0);
        w.bank.transfer(dai(), alice(), bob, e18(10)).unwrap();
        assert_eq!(w.bank.balance_of(dai(), bob), e18(10));
        let err = w.bank.transfer(dai(), bob, alice(), e18(11)).unwrap_err();
        assert!(matches!(err, VaultError::InsufficientBalance { .. }));
    }

    #[test]
    fn unknown_token_rejected() {
        let mut w = world();
        let ghost = Address::repeat_byte(0x99);
        assert_eq!(
            w.bank.mint(ghost, alice(), U256::from(1u64)),
            Err(VaultError::InvalidToken(ghost))
        );
    }

    #[test]
    fn empty_wrapper_is_one_to_one() {
        let w = world();
        let wrapper = w.wrapper(wdai()).unwrap();
        assert_eq!(wrapper.preview_deposit(&w.bank, e18(5)).unwrap(), e18(5));
    }

    #[test]
    fn yield_raises_share_price_and_rounding_favors_wrapper() {
        let mut w = world();
        let wrapper = w.wrapper(wdai()).unwrap();
        wrapper.deposit(&mut w.bank, alice(), e18(100), alice()).unwrap();
        w.donate_yield(wdai(), alice(), e18(50)).unwrap();

        let shares = e18(10);
        let redeem = wrapper.preview_redeem(&w.bank, shares).unwrap();
        let mint = wrapper.preview_mint(&w.bank, shares).unwrap();
        assert!(redeem <= mint);
        assert!(redeem > e18(14) && redeem < e18(15) + U256::from(1u64));

        let assets = wrapper.redeem(&mut w.bank, alice(), shares, alice()).unwrap();
        assert_eq!(assets, redeem);
    }

    #[test]
    fn withdraw_burns_at_least_previewed_shares() {
        let mut w = world();
        let wrapper = w.wrapper(wdai()).unwrap();
        wrapper.deposit(&mut w.bank, alice(), e18(300), alice()).unwrap();
        w.donate_yield(wdai(), alice(), e18(7)).unwrap();

        let assets = e18(3);
        let previewed = wrapper.preview_withdraw(&w.bank, assets).unwrap();
        let fair = wrapper.convert_to_shares(&w.bank, assets).unwrap();
        let shares_before = w.bank.balance_of(wdai(), alice());
        let burned = wrapper.withdraw(&mut w.bank, alice(), assets, alice()).unwrap();
        assert_eq!(burned, previewed);
        assert!(burned >= fair);
        assert_eq!(shares_before - w.bank.balance_of(wdai(), alice()), burned);
    }

    #[test]
    fn erc4626_rate_tracks_yield() {
        let mut w = world();
        let wrapper = w.wrapper(wdai()).unwrap();
        wrapper.deposit(&mut w.bank, alice(), e18(100), alice()).unwrap();
        let provider = Erc4626RateProvider { wrapper: wdai() };
        let before = provider.get_rate(&w).unwrap();
        w.donate_yield(wdai(), alice(), e18(100)).unwrap();
        let after = provider.get_rate(&w).unwrap();
        assert!(after > before);
        assert!(after <= e18(2));
    }
}
