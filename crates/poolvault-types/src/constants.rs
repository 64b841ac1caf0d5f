//! System-wide constants for the PoolVault ledger.

use alloy_primitives::U256;

/// Minimum number of tokens a pool may register.
pub const MIN_TOKENS: usize = 2;

/// Maximum number of tokens a pool may register.
pub const MAX_TOKENS: usize = 8;

/// Tokens with more decimals than this cannot be scaled to 18 decimals.
pub const MAX_TOKEN_DECIMALS: u8 = 18;

/// BPT permanently locked at pool initialization (owned by the zero address).
///
/// Total supply of a pool token may never be driven below this value.
pub const POOL_MINIMUM_TOTAL_SUPPLY: U256 = U256::from_limbs([1_000_000, 0, 0, 0]);

/// Buffer shares permanently locked at buffer initialization.
pub const BUFFER_MINIMUM_TOTAL_SUPPLY: U256 = U256::from_limbs([10_000, 0, 0, 0]);

/// Default minimum trade amount, in scaled18 units.
pub const DEFAULT_MINIMUM_TRADE_AMOUNT: u64 = 1_000_000;

/// Default minimum wrap/unwrap amount, in raw units.
pub const DEFAULT_MINIMUM_WRAP_AMOUNT: u64 = 10_000;

/// Upper bound for any pause window (four years).
pub const MAX_PAUSE_WINDOW_DURATION_SECS: u64 = 4 * 365 * 24 * 60 * 60;

/// Default vault pause window duration.
pub const DEFAULT_PAUSE_WINDOW_DURATION_SECS: u64 = MAX_PAUSE_WINDOW_DURATION_SECS;

/// Default buffer rebalance tolerance in raw base units.
pub const DEFAULT_BUFFER_REBALANCE_TOLERANCE: u64 = 2;

/// Domain separator for the event log digest.
pub const EVENT_DIGEST_DOMAIN: &[u8] = b"poolvault:events:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "PoolVault";
