//! # poolvault-core
//!
//! The **PoolVault** facade: one custodian holding the tokens of every
//! registered pool, settling each multi-step interaction only at the end.
//!
//! - [`Vault`]: sessions, settlement, swaps, liquidity, buffers
//! - [`BasePool`] / [`PoolHooks`]: pluggable pricing and policy per pool
//! - [`ExternalWorld`]: the token bank and ERC4626 wrappers the vault talks to
//! - [`EventLog`]: append-only events with a rolling SHA-256 digest
//! - [`pool_math`]: proportional / unbalanced / single-token liquidity math
//!
//! ## Session Lifecycle
//!
//! ```text
//!  unlock(router, f)
//!  ┌────────────────────────────────────────────────────────────────┐
//!  │ swap / add / remove / wrap  ──▶  debt (+) and credit (−) deltas│
//!  │ transfer + settle           ──▶  credit for tokens paid in     │
//!  │ send_to                     ──▶  debt for tokens paid out      │
//!  └────────────────────────────────────────────────────────────────┘
//!        │ every delta zero?  yes ──▶ commit
//!        └──────────────────  no  ──▶ BalanceNotSettled, full rollback
//! ```

pub mod buffer;
pub mod events;
pub mod external;
pub mod hooks;
pub mod liquidity;
pub mod pool_math;
pub mod pool_registry;
pub mod settlement;
pub mod swap;
pub mod vault;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use events::EventLog;
pub use external::{
    ConstantRateProvider, Erc4626RateProvider, Erc4626Wrapper, ExternalWorld, RateProvider,
    TokenBank,
};
pub use hooks::{
    AfterSwapParams, BasePool, CustomLiquidityOutcome, CustomLiquidityRequest,
    LiquidityHookParams, PoolHooks,
};
pub use pool_registry::{PoolRegistration, TokenConfig};
pub use vault::Vault;
