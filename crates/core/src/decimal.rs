//! Ledger-to-settlement decimal bridge.
//!
//! The ledger-of-record stores reward amounts as fixed-point integers with
//! `ledger_decimals` places; the settlement token uses `settlement_decimals`.
//! Conversion is a multiplication by an exact power of ten. The bridge is
//! validated once at startup so a bad pair of constants can never surface
//! while serving a request.

use thiserror::Error;

/// Decimal places of ledger reward amounts.
pub const LEDGER_DECIMALS: u8 = 6;

/// Decimal places of the settlement token mint.
pub const SETTLEMENT_DECIMALS: u8 = 9;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecimalError {
    #[error("Settlement decimals ({settlement}) must be >= ledger decimals ({ledger})")]
    SettlementBelowLedger { ledger: u8, settlement: u8 },

    #[error("Decimal shift of {0} places does not fit a u64 multiplier")]
    ShiftTooLarge(u8),

    #[error("Amount {0} overflows when converted to settlement units")]
    Overflow(u128),
}

/// Exact conversion from ledger units to settlement atomic units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecimalBridge {
    ledger_decimals: u8,
    settlement_decimals: u8,
    multiplier: u64,
}

impl DecimalBridge {
    /// Validate a decimal pair and precompute the multiplier.
    pub fn new(ledger_decimals: u8, settlement_decimals: u8) -> Result<Self, DecimalError> {
        if settlement_decimals < ledger_decimals {
            return Err(DecimalError::SettlementBelowLedger {
                ledger: ledger_decimals,
                settlement: settlement_decimals,
            });
        }

        let shift = settlement_decimals - ledger_decimals;
        let multiplier = 10u64
            .checked_pow(shift as u32)
            .ok_or(DecimalError::ShiftTooLarge(shift))?;

        Ok(Self {
            ledger_decimals,
            settlement_decimals,
            multiplier,
        })
    }

    /// The deployment default: 6-decimal ledger, 9-decimal mint.
    pub const fn standard() -> Self {
        Self {
            ledger_decimals: LEDGER_DECIMALS,
            settlement_decimals: SETTLEMENT_DECIMALS,
            multiplier: 1_000,
        }
    }

    pub fn ledger_decimals(&self) -> u8 {
        self.ledger_decimals
    }

    pub fn settlement_decimals(&self) -> u8 {
        self.settlement_decimals
    }

    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    /// `ledger_amount * 10^(settlement_decimals - ledger_decimals)`
    pub fn to_settlement_atomic(&self, ledger_amount: u128) -> Result<u128, DecimalError> {
        ledger_amount
            .checked_mul(self.multiplier as u128)
            .ok_or(DecimalError::Overflow(ledger_amount))
    }
}

impl Default for DecimalBridge {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_bridge() {
        let bridge = DecimalBridge::standard();
        assert_eq!(bridge, DecimalBridge::new(6, 9).unwrap());
        assert_eq!(bridge.multiplier(), 1_000);
    }

    #[test]
    fn test_one_token_converts_exactly() {
        let bridge = DecimalBridge::new(6, 9).unwrap();
        assert_eq!(bridge.to_settlement_atomic(1_000000).unwrap(), 1_000000000);
    }

    #[test]
    fn test_large_values_exact() {
        let bridge = DecimalBridge::standard();
        let ledger = 1_000_000_000_000_000u128; // 10^15
        assert_eq!(bridge.to_settlement_atomic(ledger).unwrap(), 1_000_000_000_000_000_000);

        let odd = 123_456_789_012_345u128;
        assert_eq!(bridge.to_settlement_atomic(odd).unwrap(), 123_456_789_012_345_000);
    }

    #[test]
    fn test_equal_decimals_is_identity() {
        let bridge = DecimalBridge::new(9, 9).unwrap();
        assert_eq!(bridge.multiplier(), 1);
        assert_eq!(bridge.to_settlement_atomic(42).unwrap(), 42);
    }

    #[test]
    fn test_settlement_below_ledger_rejected() {
        let err = DecimalBridge::new(9, 6).unwrap_err();
        assert_eq!(err, DecimalError::SettlementBelowLedger { ledger: 9, settlement: 6 });
    }

    #[test]
    fn test_shift_too_large_rejected() {
        assert_eq!(DecimalBridge::new(0, 20).unwrap_err(), DecimalError::ShiftTooLarge(20));
        assert!(DecimalBridge::new(0, 19).is_ok());
    }

    #[test]
    fn test_overflow_reported() {
        let bridge = DecimalBridge::standard();
        assert!(matches!(
            bridge.to_settlement_atomic(u128::MAX),
            Err(DecimalError::Overflow(_))
        ));
    }
}
