//! Validator roster and bonded stake
//!
//! Finality is count-based: each active validator has one vote regardless of
//! stake. Stake is only a bond that must meet the configured minimum.

use crate::{message::ValidatorId, BridgeError, Result};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: ValidatorId,
    pub active: bool,
    pub stake: u128,
    pub joined_at: u64,
    pub removed_at: Option<u64>,
}

/// Validator table keyed by id. Removed validators stay in the table as
/// inactive records so their past attestations remain attributable.
#[derive(Debug, Default)]
pub struct ValidatorSet {
    validators: RwLock<HashMap<ValidatorId, Validator>>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the roster for reading across a compound check.
    pub fn read(&self) -> ValidatorRoster<'_> {
        ValidatorRoster(self.validators.read())
    }

    /// Hold the roster for writing across a compound check-and-update.
    pub fn write(&self) -> ValidatorRosterMut<'_> {
        ValidatorRosterMut(self.validators.write())
    }

    pub fn get(&self, id: &ValidatorId) -> Option<Validator> {
        self.validators.read().get(id).cloned()
    }

    pub fn is_active(&self, id: &ValidatorId) -> bool {
        self.read().is_active(id)
    }

    pub fn active_count(&self) -> usize {
        self.read().active_count()
    }

    pub fn active_validators(&self) -> Vec<Validator> {
        let mut active: Vec<Validator> = self
            .validators
            .read()
            .values()
            .filter(|v| v.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    pub fn total_bonded(&self) -> u128 {
        self.validators
            .read()
            .values()
            .filter(|v| v.active)
            .map(|v| v.stake)
            .sum()
    }
}

pub struct ValidatorRoster<'a>(RwLockReadGuard<'a, HashMap<ValidatorId, Validator>>);

impl ValidatorRoster<'_> {
    pub fn is_active(&self, id: &ValidatorId) -> bool {
        self.0.get(id).map(|v| v.active).unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.0.values().filter(|v| v.active).count()
    }
}

pub struct ValidatorRosterMut<'a>(RwLockWriteGuard<'a, HashMap<ValidatorId, Validator>>);

impl ValidatorRosterMut<'_> {
    pub fn is_active(&self, id: &ValidatorId) -> bool {
        self.0.get(id).map(|v| v.active).unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.0.values().filter(|v| v.active).count()
    }

    pub fn add(&mut self, id: ValidatorId, stake: u128, min_stake: u128, now: u64) -> Result<Validator> {
        id.ensure_valid("validator id")?;

        if stake < min_stake {
            return Err(BridgeError::StakeTooLow {
                stake,
                min: min_stake,
            });
        }

        if self.0.get(&id).map(|v| v.active).unwrap_or(false) {
            return Err(BridgeError::ValidatorAlreadyActive(id.to_string()));
        }

        let validator = Validator {
            id: id.clone(),
            active: true,
            stake,
            joined_at: now,
            removed_at: None,
        };
        self.0.insert(id, validator.clone());
        info!("Validator {} added with stake {}", validator.id, stake);
        Ok(validator)
    }

    /// Deactivate a validator. Returns the record with the bond to return.
    pub fn remove(&mut self, id: &ValidatorId, now: u64) -> Result<Validator> {
        let validator = self
            .0
            .get_mut(id)
            .filter(|v| v.active)
            .ok_or_else(|| BridgeError::ValidatorNotActive(id.to_string()))?;

        validator.active = false;
        validator.removed_at = Some(now);
        info!("Validator {} removed", id);
        Ok(validator.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Address;

    #[test]
    fn test_add_validator() {
        let set = ValidatorSet::new();
        let v = Address::from("v1");

        assert!(set.write().add(v.clone(), 1_000, 1_000, 0).is_ok());
        assert!(set.is_active(&v));
        assert_eq!(set.active_count(), 1);
        assert_eq!(set.total_bonded(), 1_000);

        let err = set.write().add(v, 5_000, 1_000, 0).unwrap_err();
        assert!(matches!(err, BridgeError::ValidatorAlreadyActive(_)));
    }

    #[test]
    fn test_stake_minimum() {
        let set = ValidatorSet::new();
        let err = set
            .write()
            .add(Address::from("v1"), 999, 1_000, 0)
            .unwrap_err();
        assert_eq!(err, BridgeError::StakeTooLow { stake: 999, min: 1_000 });
        assert_eq!(set.active_count(), 0);
    }

    #[test]
    fn test_remove_keeps_record() {
        let set = ValidatorSet::new();
        let v = Address::from("v1");
        set.write().add(v.clone(), 1_000, 1_000, 10).unwrap();

        let removed = set.write().remove(&v, 20).unwrap();
        assert!(!removed.active);
        assert_eq!(removed.stake, 1_000);
        assert!(!set.is_active(&v));
        assert_eq!(set.get(&v).unwrap().removed_at, Some(20));

        assert!(set.write().remove(&v, 30).is_err());
        // Rejoining after removal is allowed
        assert!(set.write().add(v.clone(), 2_000, 1_000, 40).is_ok());
        assert!(set.is_active(&v));
    }

    #[test]
    fn test_zero_id_rejected() {
        let set = ValidatorSet::new();
        assert!(set.write().add(Address::new(vec![0u8; 20]), 1_000, 1, 0).is_err());
    }
}
