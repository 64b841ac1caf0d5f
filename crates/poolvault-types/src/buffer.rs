//! ERC4626 buffer parameter types.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::SwapKind;

/// Which way a buffer converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrappingDirection {
    /// Underlying in, wrapped out.
    Wrap,
    /// Wrapped in, underlying out.
    Unwrap,
}

impl std::fmt::Display for WrappingDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wrap => write!(f, "WRAP"),
            Self::Unwrap => write!(f, "UNWRAP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferWrapOrUnwrapParams {
    pub kind: SwapKind,
    pub direction: WrappingDirection,
    pub wrapped_token: Address,
    pub amount_given_raw: U256,
    /// Minimum amount out (ExactIn) or maximum amount in (ExactOut).
    pub limit_raw: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferWrapOrUnwrapResult {
    pub amount_calculated_raw: U256,
    pub amount_in_raw: U256,
    pub amount_out_raw: U256,
}

/// Raw token amounts held by one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferBalance {
    pub underlying_raw: U256,
    pub wrapped_raw: U256,
}

impl BufferBalance {
    #[must_use]
    pub fn new(underlying_raw: U256, wrapped_raw: U256) -> Self {
        Self {
            underlying_raw,
            wrapped_raw,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.underlying_raw.is_zero() && self.wrapped_raw.is_zero()
    }
}
