//! # poolvault-types
//!
//! Shared types, errors, and configuration for the **PoolVault** ledger.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Primitives**: [`Address`], [`U256`], [`I256`] (re-exported from `alloy-primitives`)
//! - **Fixed-point math**: [`fixed_point`], [`Rounding`] and the scaling helpers in [`scaling`]
//! - **Pool model**: [`PoolConfig`], [`TokenType`], [`SwapKind`], liquidity kinds and parameters
//! - **Buffer model**: [`WrappingDirection`], [`BufferWrapOrUnwrapParams`]
//! - **Events**: [`VaultEvent`]
//! - **Configuration**: [`VaultConfig`]
//! - **Errors**: [`VaultError`] with `VLT_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod buffer;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod fixed_point;
pub mod pool;
pub mod scaling;

pub use alloy_primitives::{Address, I256, U256};

pub use buffer::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use fixed_point::Rounding;
pub use pool::*;

// Constants are accessed via `poolvault_types::constants::FOO`
// (not re-exported to avoid name collisions).
