//! Bridging fee calculation and fee/volume accounting
//!
//! Fee formula, reproducible off-chain for client quoting:
//!
//! ```text
//! fee = base_fee + per_type_fee[type] + gas_budget * gas_unit_rate + value * value_rate_bps / 10000
//! ```
//!
//! The value component rounds down.

use crate::{BridgeError, MessageType, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Basis points denominator (10000 = 100%)
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Maximum value rate in basis points (1% = 100 bps)
pub const MAX_VALUE_RATE_BPS: u32 = 100;

/// Fee schedule parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Flat fee charged on every message
    pub base_fee: u128,
    /// Additional fee per message type; types absent here are unsupported
    pub per_type_fee: BTreeMap<MessageType, u128>,
    /// Price of one unit of destination gas
    pub gas_unit_rate: u128,
    /// Proportional fee on the carried value, in basis points
    pub value_rate_bps: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        let per_type_fee = BTreeMap::from([
            (MessageType::TokenTransfer, 500),
            (MessageType::PaymentSettlement, 250),
            (MessageType::NftTransfer, 2_000),
            (MessageType::GovernanceAction, 0),
            (MessageType::DataTransfer, 100),
        ]);

        Self {
            base_fee: 1_000,
            per_type_fee,
            gas_unit_rate: 1,
            value_rate_bps: 30,
        }
    }
}

impl FeeSchedule {
    pub fn validate(&self) -> Result<()> {
        if self.value_rate_bps > MAX_VALUE_RATE_BPS {
            return Err(BridgeError::InvalidConfig(format!(
                "Value rate {} bps exceeds max {}",
                self.value_rate_bps, MAX_VALUE_RATE_BPS
            )));
        }

        if self.per_type_fee.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "Fee schedule must support at least one message type".to_string(),
            ));
        }

        Ok(())
    }

    pub fn supports(&self, message_type: MessageType) -> bool {
        self.per_type_fee.contains_key(&message_type)
    }

    /// Compute the fee for a message. Pure and deterministic.
    pub fn compute_fee(&self, message_type: MessageType, gas_budget: u64, value: u128) -> Result<u128> {
        let type_fee = *self
            .per_type_fee
            .get(&message_type)
            .ok_or_else(|| BridgeError::unsupported(message_type))?;

        let gas_fee = (gas_budget as u128)
            .checked_mul(self.gas_unit_rate)
            .ok_or(BridgeError::Overflow("gas fee"))?;

        let value_fee = value
            .checked_mul(self.value_rate_bps as u128)
            .ok_or(BridgeError::Overflow("value fee"))?
            / BPS_DENOMINATOR;

        self.base_fee
            .checked_add(type_fee)
            .and_then(|fee| fee.checked_add(gas_fee))
            .and_then(|fee| fee.checked_add(value_fee))
            .ok_or(BridgeError::Overflow("total fee"))
    }
}

/// Running fee and volume totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLedger {
    /// Gross value locked through the bridge
    pub total_volume: u128,
    /// Fees routed to the fee sink
    pub total_fees: u128,
    /// Net value released to recipients
    pub total_released: u128,
    /// Net value returned to senders
    pub total_refunded: u128,
    pub messages_by_type: HashMap<MessageType, u64>,
}

impl FeeLedger {
    pub fn record_lock(&mut self, message_type: MessageType, gross: u128, fee: u128) {
        self.total_volume = self.total_volume.saturating_add(gross);
        self.total_fees = self.total_fees.saturating_add(fee);
        *self.messages_by_type.entry(message_type).or_insert(0) += 1;
    }

    pub fn record_relayed(&mut self, message_type: MessageType) {
        *self.messages_by_type.entry(message_type).or_insert(0) += 1;
    }

    pub fn record_release(&mut self, amount: u128) {
        self.total_released = self.total_released.saturating_add(amount);
    }

    pub fn record_refund(&mut self, amount: u128) {
        self.total_refunded = self.total_refunded.saturating_add(amount);
    }

    pub fn message_count(&self) -> u64 {
        self.messages_by_type.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_components() {
        let schedule = FeeSchedule::default();
        // 1000 + 500 + 200_000 * 1 + 1_000_000 * 30 / 10000
        let fee = schedule
            .compute_fee(MessageType::TokenTransfer, 200_000, 1_000_000)
            .unwrap();
        assert_eq!(fee, 1_000 + 500 + 200_000 + 3_000);
    }

    #[test]
    fn test_value_component_rounds_down() {
        let schedule = FeeSchedule::default();
        let a = schedule.compute_fee(MessageType::DataTransfer, 0, 333).unwrap();
        let b = schedule.compute_fee(MessageType::DataTransfer, 0, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unsupported_type() {
        let mut schedule = FeeSchedule::default();
        schedule.per_type_fee.remove(&MessageType::NftTransfer);
        let err = schedule
            .compute_fee(MessageType::NftTransfer, 1, 1)
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedMessageType(_)));
    }

    #[test]
    fn test_overflow_is_rejected() {
        let schedule = FeeSchedule::default();
        let err = schedule
            .compute_fee(MessageType::TokenTransfer, 0, u128::MAX)
            .unwrap_err();
        assert_eq!(err, BridgeError::Overflow("value fee"));
    }

    #[test]
    fn test_schedule_validation() {
        let mut schedule = FeeSchedule::default();
        assert!(schedule.validate().is_ok());
        schedule.value_rate_bps = MAX_VALUE_RATE_BPS + 1;
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_ledger_totals() {
        let mut ledger = FeeLedger::default();
        ledger.record_lock(MessageType::TokenTransfer, 10_000, 100);
        ledger.record_lock(MessageType::TokenTransfer, 5_000, 50);
        ledger.record_release(9_900);
        assert_eq!(ledger.total_volume, 15_000);
        assert_eq!(ledger.total_fees, 150);
        assert_eq!(ledger.total_released, 9_900);
        assert_eq!(ledger.messages_by_type[&MessageType::TokenTransfer], 2);
        assert_eq!(ledger.message_count(), 2);
    }
}
