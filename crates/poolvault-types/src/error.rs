//! Error types for the PoolVault ledger.
//!
//! All errors use the `VLT_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Session (unlock / settlement) errors
//! - 2xx: Pool registration errors
//! - 3xx: Pool and vault state errors
//! - 4xx: Accounting errors
//! - 5xx: ERC4626 buffer errors
//! - 6xx: Swap / liquidity limit and hook errors
//! - 9xx: Math, configuration and internal errors

use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Whether a failure may succeed if the same call is resubmitted later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caused by a toggleable state (paused pool, paused buffers, ...).
    /// Resubmitting after the state changes may succeed.
    Transient,
    /// Caused by the inputs or the accounting itself. Resubmitting the same
    /// call will fail again.
    Logic,
}

/// Central error enum for all vault operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VaultError {
    // =================================================================
    // Session Errors (1xx)
    // =================================================================
    /// An operation that requires an open session was called while locked.
    #[error("VLT_ERR_100: Vault is not unlocked")]
    VaultIsNotUnlocked,

    /// The caller is not the handler on top of the handler stack.
    #[error("VLT_ERR_101: Wrong handler: {handler} is not the current handler {current}")]
    WrongHandler { handler: Address, current: Address },

    /// The handler stack is empty.
    #[error("VLT_ERR_102: No handler")]
    NoHandler,

    /// The session cannot close while deltas are outstanding.
    #[error("VLT_ERR_103: Balance not settled: {nonzero_deltas} non-zero deltas remain")]
    BalanceNotSettled { nonzero_deltas: usize },

    /// A non-reentrant operation was re-entered.
    #[error("VLT_ERR_104: Reentrant call")]
    ReentrantCall,

    /// A simulation-only operation was invoked in a live context.
    #[error("VLT_ERR_105: Not a static call")]
    NotStaticCall,

    // =================================================================
    // Registration Errors (2xx)
    // =================================================================
    #[error("VLT_ERR_200: Pool already registered: {0}")]
    PoolAlreadyRegistered(Address),

    #[error("VLT_ERR_201: Pool not registered: {0}")]
    PoolNotRegistered(Address),

    #[error("VLT_ERR_202: Pool not initialized: {0}")]
    PoolNotInitialized(Address),

    #[error("VLT_ERR_203: Pool already initialized: {0}")]
    PoolAlreadyInitialized(Address),

    #[error("VLT_ERR_204: Pool must have at least {min} tokens, got {actual}")]
    MinTokens { min: usize, actual: usize },

    #[error("VLT_ERR_205: Pool may have at most {max} tokens, got {actual}")]
    MaxTokens { max: usize, actual: usize },

    #[error("VLT_ERR_206: Tokens not sorted")]
    TokensNotSorted,

    #[error("VLT_ERR_207: Token already registered: {0}")]
    TokenAlreadyRegistered(Address),

    #[error("VLT_ERR_208: Invalid token: {0}")]
    InvalidToken(Address),

    #[error("VLT_ERR_209: Invalid token configuration for {token}: {reason}")]
    InvalidTokenConfiguration { token: Address, reason: String },

    #[error("VLT_ERR_210: Token {token} has {decimals} decimals (max 18)")]
    InvalidTokenDecimals { token: Address, decimals: u8 },

    #[error("VLT_ERR_211: Token {token} not registered in pool {pool}")]
    TokenNotRegistered { pool: Address, token: Address },

    /// Tokens passed to an operation do not match the registered token list.
    #[error("VLT_ERR_212: Token mismatch for pool {pool} at index {index}")]
    TokensMismatch { pool: Address, index: usize },

    #[error("VLT_ERR_213: Hook registration rejected for pool {0}")]
    HookRegistrationFailed(Address),

    #[error("VLT_ERR_214: Invalid pause window for pool {pool}: {reason}")]
    InvalidPauseWindow { pool: Address, reason: String },

    // =================================================================
    // State Errors (3xx)
    // =================================================================
    #[error("VLT_ERR_300: Pool paused: {0}")]
    PoolPaused(Address),

    #[error("VLT_ERR_301: Vault paused")]
    VaultPaused,

    #[error("VLT_ERR_302: Pool pause window expired: {0}")]
    PoolPauseWindowExpired(Address),

    #[error("VLT_ERR_303: Vault pause window expired")]
    VaultPauseWindowExpired,

    #[error("VLT_ERR_304: Pool in recovery mode: {0}")]
    PoolInRecoveryMode(Address),

    #[error("VLT_ERR_305: Pool not in recovery mode: {0}")]
    PoolNotInRecoveryMode(Address),

    #[error("VLT_ERR_306: Sender not allowed: {0}")]
    SenderNotAllowed(Address),

    /// The pool's liquidity management flags do not allow this operation.
    #[error("VLT_ERR_307: Operation not supported by pool {pool}: {operation}")]
    OperationNotSupported {
        pool: Address,
        operation: &'static str,
    },

    // =================================================================
    // Accounting Errors (4xx)
    // =================================================================
    #[error("VLT_ERR_400: Insufficient balance of {token} for {owner}: need {needed}, have {available}")]
    InsufficientBalance {
        token: Address,
        owner: Address,
        needed: U256,
        available: U256,
    },

    #[error("VLT_ERR_401: Insufficient allowance of {token} from {owner} to {spender}: need {needed}, have {available}")]
    InsufficientAllowance {
        token: Address,
        owner: Address,
        spender: Address,
        needed: U256,
        available: U256,
    },

    /// A mint or burn would leave total supply below the minimum floor.
    #[error("VLT_ERR_402: Total supply of {token} too low: {total_supply}")]
    TotalSupplyTooLow { token: Address, total_supply: U256 },

    #[error("VLT_ERR_403: Invalid receiver: {0}")]
    InvalidReceiver(Address),

    #[error("VLT_ERR_404: Invalid sender: {0}")]
    InvalidSender(Address),

    /// The vault holds less of a token than its declared reserves.
    #[error("VLT_ERR_405: Reserves shortfall for {token}: expected {expected}, actual {actual}")]
    ReservesShortfall {
        token: Address,
        expected: U256,
        actual: U256,
    },

    /// A pool token balance would go negative.
    #[error("VLT_ERR_406: Insufficient pool balance of {token} in {pool}: need {needed}, have {available}")]
    InsufficientPoolBalance {
        pool: Address,
        token: Address,
        needed: U256,
        available: U256,
    },

    // =================================================================
    // Buffer Errors (5xx)
    // =================================================================
    #[error("VLT_ERR_500: Buffer not initialized: {0}")]
    BufferNotInitialized(Address),

    #[error("VLT_ERR_501: Buffer already initialized: {0}")]
    BufferAlreadyInitialized(Address),

    #[error("VLT_ERR_502: Vault buffers are paused")]
    VaultBuffersArePaused,

    /// The token is not a known ERC4626 wrapper.
    #[error("VLT_ERR_503: Unknown wrapped token: {0}")]
    UnknownWrappedToken(Address),

    #[error("VLT_ERR_504: Invalid underlying token for wrapped token {0}")]
    InvalidUnderlyingToken(Address),

    /// The wrapper's asset no longer matches the buffer's registered asset.
    #[error("VLT_ERR_505: Wrong underlying token for {wrapped}: expected {expected}, got {actual}")]
    WrongUnderlyingToken {
        wrapped: Address,
        expected: Address,
        actual: Address,
    },

    #[error("VLT_ERR_506: Buffer total supply too low: {0}")]
    BufferTotalSupplyTooLow(U256),

    #[error("VLT_ERR_507: Not enough buffer shares: need {needed}, have {available}")]
    NotEnoughBufferShares { needed: U256, available: U256 },

    #[error("VLT_ERR_508: Issued shares {issued} below minimum {min}")]
    IssuedSharesBelowMin { issued: U256, min: U256 },

    #[error("VLT_ERR_509: Wrap amount too small for {wrapped}: {amount}")]
    WrapAmountTooSmall { wrapped: Address, amount: U256 },

    #[error("VLT_ERR_510: Not enough underlying for {wrapped}: expected {expected}, actual {actual}")]
    NotEnoughUnderlying {
        wrapped: Address,
        expected: U256,
        actual: U256,
    },

    #[error("VLT_ERR_511: Not enough wrapped for {wrapped}: expected {expected}, actual {actual}")]
    NotEnoughWrapped {
        wrapped: Address,
        expected: U256,
        actual: U256,
    },

    // =================================================================
    // Swap / Liquidity Errors (6xx)
    // =================================================================
    #[error("VLT_ERR_600: Amount given is zero")]
    AmountGivenZero,

    #[error("VLT_ERR_601: Cannot swap a token for itself: {0}")]
    CannotSwapSameToken(Address),

    #[error("VLT_ERR_602: Swap limit exceeded: amount {amount}, limit {limit}")]
    SwapLimit { amount: U256, limit: U256 },

    #[error("VLT_ERR_603: Trade amount too small: {0}")]
    TradeAmountTooSmall(U256),

    #[error("VLT_ERR_604: Amount in of {token} above max: {amount} > {max}")]
    AmountInAboveMax {
        token: Address,
        amount: U256,
        max: U256,
    },

    #[error("VLT_ERR_605: Amount out of {token} below min: {amount} < {min}")]
    AmountOutBelowMin {
        token: Address,
        amount: U256,
        min: U256,
    },

    #[error("VLT_ERR_606: BPT amount out below min: {amount} < {min}")]
    BptAmountOutBelowMin { amount: U256, min: U256 },

    #[error("VLT_ERR_607: BPT amount in above max: {amount} > {max}")]
    BptAmountInAboveMax { amount: U256, max: U256 },

    #[error("VLT_ERR_608: Invariant ratio {ratio} outside [{min}, {max}]")]
    InvariantRatioOutOfBounds { ratio: U256, min: U256, max: U256 },

    #[error("VLT_ERR_609: Swap fee percentage {fee} outside [{min}, {max}]")]
    SwapFeePercentageOutOfBounds { fee: U256, min: U256, max: U256 },

    #[error("VLT_ERR_610: Hook {hook} failed for pool {pool}")]
    HookFailed { pool: Address, hook: &'static str },

    #[error("VLT_ERR_611: Input length mismatch: expected {expected}, got {actual}")]
    InputLengthMismatch { expected: usize, actual: usize },

    /// Single-token operations need exactly one non-zero input.
    #[error("VLT_ERR_612: Invalid single-token input")]
    InvalidSingleTokenInput,

    /// The pricing implementation rejected the request.
    #[error("VLT_ERR_613: Pool {pool} rejected operation: {reason}")]
    PoolRejected { pool: Address, reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    #[error("VLT_ERR_900: Math overflow in {0}")]
    MathOverflow(&'static str),

    #[error("VLT_ERR_901: Division by zero")]
    ZeroDivision,

    #[error("VLT_ERR_902: Configuration error: {0}")]
    Configuration(String),

    #[error("VLT_ERR_903: Serialization error: {0}")]
    Serialization(String),

    #[error("VLT_ERR_904: Internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Classify the error as retry-safe or not.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::PoolPaused(_)
            | Self::VaultPaused
            | Self::VaultBuffersArePaused
            | Self::PoolInRecoveryMode(_)
            | Self::PoolNotInRecoveryMode(_) => ErrorClass::Transient,
            _ => ErrorClass::Logic,
        }
    }

    /// Shorthand for `class() == ErrorClass::Transient`.
    #[must_use]
    pub fn is_retry_safe(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, VaultError>;

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = VaultError::PoolNotRegistered(Address::ZERO);
        let msg = format!("{err}");
        assert!(msg.starts_with("VLT_ERR_201"), "Got: {msg}");
    }

    #[test]
    fn insufficient_balance_display() {
        let err = VaultError::InsufficientBalance {
            token: Address::repeat_byte(1),
            owner: Address::repeat_byte(2),
            needed: U256::from(100u64),
            available: U256::from(50u64),
        };
        let msg = format!("{err}");
        assert!(msg.contains("VLT_ERR_400"));
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn paused_errors_are_retry_safe() {
        assert!(VaultError::PoolPaused(Address::ZERO).is_retry_safe());
        assert!(VaultError::VaultBuffersArePaused.is_retry_safe());
        assert_eq!(VaultError::VaultPaused.class(), ErrorClass::Transient);
    }

    #[test]
    fn accounting_errors_are_not_retry_safe() {
        let err = VaultError::TotalSupplyTooLow {
            token: Address::ZERO,
            total_supply: U256::from(1u64),
        };
        assert_eq!(err.class(), ErrorClass::Logic);
        assert!(!VaultError::BalanceNotSettled { nonzero_deltas: 1 }.is_retry_safe());
    }

    #[test]
    fn closed_pause_windows_are_final() {
        assert_eq!(VaultError::VaultPauseWindowExpired.class(), ErrorClass::Logic);
        assert_eq!(VaultError::PoolPauseWindowExpired(Address::ZERO).class(), ErrorClass::Logic);
        let invalid = VaultError::InvalidPauseWindow {
            pool: Address::ZERO,
            reason: "end before start".into(),
        };
        assert!(!invalid.is_retry_safe());
    }

    #[test]
    fn all_errors_have_vlt_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(VaultError::VaultIsNotUnlocked),
            Box::new(VaultError::NoHandler),
            Box::new(VaultError::VaultBuffersArePaused),
            Box::new(VaultError::ZeroDivision),
            Box::new(VaultError::Internal("test".into())),
            Box::new(VaultError::SwapLimit {
                amount: U256::from(1u64),
                limit: U256::from(2u64),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("VLT_ERR_"),
                "Error missing VLT_ERR_ prefix: {msg}"
            );
        }
    }
}
