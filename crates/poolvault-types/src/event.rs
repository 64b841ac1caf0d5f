//! Events emitted by vault operations.
//!
//! Every state-changing operation appends one event. Events emitted inside a
//! frame that later fails are discarded together with the rest of its state.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::{AddLiquidityKind, RemoveLiquidityKind, SwapKind, WrappingDirection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultEvent {
    PoolRegistered {
        pool: Address,
        tokens: Vec<Address>,
        swap_fee_percentage: U256,
    },
    PoolInitialized {
        pool: Address,
        bpt_amount_out: U256,
    },
    Swap {
        pool: Address,
        kind: SwapKind,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        amount_out: U256,
        swap_fee_amount: U256,
    },
    LiquidityAdded {
        pool: Address,
        to: Address,
        kind: AddLiquidityKind,
        amounts_in: Vec<U256>,
        bpt_amount_out: U256,
    },
    LiquidityRemoved {
        pool: Address,
        from: Address,
        kind: RemoveLiquidityKind,
        amounts_out: Vec<U256>,
        bpt_amount_in: U256,
    },
    RecoveryLiquidityRemoved {
        pool: Address,
        from: Address,
        amounts_out: Vec<U256>,
        bpt_amount_in: U256,
    },
    PoolPausedStateChanged {
        pool: Address,
        paused: bool,
    },
    PoolRecoveryModeStateChanged {
        pool: Address,
        recovery_mode: bool,
    },
    SwapFeePercentageChanged {
        pool: Address,
        swap_fee_percentage: U256,
    },
    AggregateFeesCollected {
        pool: Address,
        token: Address,
        amount: U256,
    },
    VaultPausedStateChanged {
        paused: bool,
    },
    VaultBuffersPausedStateChanged {
        paused: bool,
    },
    BufferInitialized {
        wrapped_token: Address,
        underlying_token: Address,
        issued_shares: U256,
    },
    BufferLiquidityAdded {
        wrapped_token: Address,
        amount_underlying: U256,
        amount_wrapped: U256,
        shares: U256,
    },
    BufferLiquidityRemoved {
        wrapped_token: Address,
        amount_underlying: U256,
        amount_wrapped: U256,
        shares: U256,
    },
    Wrapped {
        wrapped_token: Address,
        direction: WrappingDirection,
        amount_in: U256,
        amount_out: U256,
        within_buffer: bool,
    },
    BufferRebalanced {
        wrapped_token: Address,
        underlying_delta: U256,
        wrapped_delta: U256,
        direction: WrappingDirection,
    },
    Transfer {
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    },
    Approval {
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    },
}

impl VaultEvent {
    /// Short uppercase name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PoolRegistered { .. } => "POOL_REGISTERED",
            Self::PoolInitialized { .. } => "POOL_INITIALIZED",
            Self::Swap { .. } => "SWAP",
            Self::LiquidityAdded { .. } => "LIQUIDITY_ADDED",
            Self::LiquidityRemoved { .. } => "LIQUIDITY_REMOVED",
            Self::RecoveryLiquidityRemoved { .. } => "RECOVERY_LIQUIDITY_REMOVED",
            Self::PoolPausedStateChanged { .. } => "POOL_PAUSED_STATE_CHANGED",
            Self::PoolRecoveryModeStateChanged { .. } => "POOL_RECOVERY_MODE_STATE_CHANGED",
            Self::SwapFeePercentageChanged { .. } => "SWAP_FEE_PERCENTAGE_CHANGED",
            Self::AggregateFeesCollected { .. } => "AGGREGATE_FEES_COLLECTED",
            Self::VaultPausedStateChanged { .. } => "VAULT_PAUSED_STATE_CHANGED",
            Self::VaultBuffersPausedStateChanged { .. } => "VAULT_BUFFERS_PAUSED_STATE_CHANGED",
            Self::BufferInitialized { .. } => "BUFFER_INITIALIZED",
            Self::BufferLiquidityAdded { .. } => "BUFFER_LIQUIDITY_ADDED",
            Self::BufferLiquidityRemoved { .. } => "BUFFER_LIQUIDITY_REMOVED",
            Self::Wrapped { .. } => "WRAPPED",
            Self::BufferRebalanced { .. } => "BUFFER_REBALANCED",
            Self::Transfer { .. } => "TRANSFER",
            Self::Approval { .. } => "APPROVAL",
        }
    }
}
