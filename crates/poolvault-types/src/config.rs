//! Configuration for a vault deployment.

use alloy_primitives::U256;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::{Result, VaultError};

/// Deployment-time configuration of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// How long after deployment the vault itself can be paused.
    pub pause_window_duration_secs: u64,
    /// Smallest non-zero trade amount, in scaled18 units.
    pub minimum_trade_amount: U256,
    /// Smallest wrap/unwrap amount, in raw units.
    pub minimum_wrap_amount: U256,
    /// Share of every swap fee retained by the protocol, `0..=1`.
    pub aggregate_swap_fee_percentage: Decimal,
    /// Half-imbalance, in raw underlying units, at or below which a buffer
    /// rebalance moves nothing. The value a rebalance loses to wrapper
    /// rounding is bounded separately by the ERC4626 conversions.
    pub buffer_rebalance_tolerance: U256,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            pause_window_duration_secs: constants::DEFAULT_PAUSE_WINDOW_DURATION_SECS,
            minimum_trade_amount: U256::from(constants::DEFAULT_MINIMUM_TRADE_AMOUNT),
            minimum_wrap_amount: U256::from(constants::DEFAULT_MINIMUM_WRAP_AMOUNT),
            aggregate_swap_fee_percentage: Decimal::ZERO,
            buffer_rebalance_tolerance: U256::from(constants::DEFAULT_BUFFER_REBALANCE_TOLERANCE),
        }
    }
}

impl VaultConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.pause_window_duration_secs > constants::MAX_PAUSE_WINDOW_DURATION_SECS {
            return Err(VaultError::Configuration(format!(
                "pause window {}s exceeds maximum {}s",
                self.pause_window_duration_secs,
                constants::MAX_PAUSE_WINDOW_DURATION_SECS
            )));
        }
        self.aggregate_swap_fee()?;
        Ok(())
    }

    /// The aggregate swap fee percentage as an 18-decimal fixed-point value.
    pub fn aggregate_swap_fee(&self) -> Result<U256> {
        percentage_to_fixed(self.aggregate_swap_fee_percentage)
    }
}

/// Convert a `0..=1` decimal percentage to 18-decimal fixed point.
///
/// Digits beyond the 18th decimal are truncated.
pub fn percentage_to_fixed(value: Decimal) -> Result<U256> {
    if value.is_sign_negative() || value > Decimal::ONE {
        return Err(VaultError::Configuration(format!(
            "percentage {value} outside [0, 1]"
        )));
    }
    let scaled = (value * Decimal::from(1_000_000_000_000_000_000u64)).trunc();
    let units = scaled
        .to_u128()
        .ok_or_else(|| VaultError::Configuration(format!("percentage {value} not representable")))?;
    Ok(U256::from(units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_point::ONE;

    #[test]
    fn defaults_are_valid() {
        let cfg = VaultConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.minimum_trade_amount, U256::from(1_000_000u64));
        assert_eq!(cfg.aggregate_swap_fee().unwrap(), U256::ZERO);
    }

    #[test]
    fn from_json_fills_defaults() {
        let cfg = VaultConfig::from_json(r#"{ "aggregate_swap_fee_percentage": "0.5" }"#).unwrap();
        assert_eq!(cfg.aggregate_swap_fee().unwrap(), ONE / U256::from(2u64));
        assert_eq!(
            cfg.pause_window_duration_secs,
            constants::DEFAULT_PAUSE_WINDOW_DURATION_SECS
        );
    }

    #[test]
    fn from_json_rejects_out_of_range_fee() {
        let err = VaultConfig::from_json(r#"{ "aggregate_swap_fee_percentage": "1.5" }"#)
            .unwrap_err();
        assert!(matches!(err, VaultError::Configuration(_)));
    }

    #[test]
    fn from_json_rejects_long_pause_window() {
        let json = format!(
            r#"{{ "pause_window_duration_secs": {} }}"#,
            constants::MAX_PAUSE_WINDOW_DURATION_SECS + 1
        );
        assert!(VaultConfig::from_json(&json).is_err());
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err = VaultConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, VaultError::Serialization(_)));
    }

    #[test]
    fn percentage_to_fixed_truncates_past_18_decimals() {
        let pct = Decimal::new(3, 3); // 0.3%
        assert_eq!(percentage_to_fixed(pct).unwrap(), U256::from(3_000_000_000_000_000u64));
        let tiny = Decimal::new(15, 19);
        assert_eq!(percentage_to_fixed(tiny).unwrap(), U256::from(1u64));
        assert!(percentage_to_fixed(Decimal::new(-1, 2)).is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = VaultConfig {
            aggregate_swap_fee_percentage: Decimal::new(25, 2),
            ..VaultConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: VaultConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
