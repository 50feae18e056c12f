//! Bridge operating parameters and the controller that publishes them

use crate::{
    auth::{Capabilities, Role},
    fees::FeeSchedule,
    Address, BridgeError, Result,
};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Approving attestations required to finalize a message
    pub confirmation_threshold: u32,
    /// Largest gas budget a message may request
    pub max_gas_budget: u64,
    pub fee_schedule: FeeSchedule,
    /// Seconds a message may wait for finality before it expires
    pub message_timeout_secs: u64,
    /// Message creation and attestation are halted while false
    pub active: bool,
    pub min_lock_amount: u128,
    pub max_lock_amount: u128,
    /// Bond a validator must post to join the set
    pub min_validator_stake: u128,
    /// Source-chain confirmations a relayer must wait for
    pub required_confirmations: u32,
    /// Account receiving bridging fees
    pub fee_sink: Address,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            confirmation_threshold: 1,
            max_gas_budget: 1_000_000,
            fee_schedule: FeeSchedule::default(),
            message_timeout_secs: 3600,
            active: true,
            min_lock_amount: 10_000,
            max_lock_amount: 1_000_000_000_000,
            min_validator_stake: 1_000,
            required_confirmations: 6,
            fee_sink: Address::from("fee-sink"),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.confirmation_threshold == 0 {
            return Err(BridgeError::InvalidConfig(
                "Confirmation threshold must be greater than 0".to_string(),
            ));
        }

        if self.max_gas_budget == 0 {
            return Err(BridgeError::InvalidConfig(
                "Maximum gas budget must be greater than 0".to_string(),
            ));
        }

        if self.message_timeout_secs == 0 {
            return Err(BridgeError::InvalidConfig(
                "Message timeout must be greater than 0".to_string(),
            ));
        }

        if self.min_lock_amount == 0 || self.min_lock_amount > self.max_lock_amount {
            return Err(BridgeError::InvalidConfig(format!(
                "Invalid lock range [{}, {}]",
                self.min_lock_amount, self.max_lock_amount
            )));
        }

        self.fee_sink.ensure_valid("fee sink")?;
        self.fee_schedule.validate()
    }
}

/// Parameters accepted by [`ConfigController::update`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub confirmation_threshold: u32,
    pub max_gas_budget: u64,
    pub fee_schedule: FeeSchedule,
    pub message_timeout_secs: u64,
    pub active: bool,
}

impl ConfigUpdate {
    /// Start from the current values of `config`.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            confirmation_threshold: config.confirmation_threshold,
            max_gas_budget: config.max_gas_budget,
            fee_schedule: config.fee_schedule.clone(),
            message_timeout_secs: config.message_timeout_secs,
            active: config.active,
        }
    }
}

/// Owns the mutable configuration and publishes immutable snapshots.
///
/// Readers hold an `Arc<BridgeConfig>` for the duration of an operation, so an
/// update never changes the parameters a running call observes.
pub struct ConfigController {
    current: RwLock<Arc<BridgeConfig>>,
    capabilities: Arc<dyn Capabilities>,
}

impl ConfigController {
    pub fn new(config: BridgeConfig, capabilities: Arc<dyn Capabilities>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            capabilities,
        })
    }

    pub fn snapshot(&self) -> Arc<BridgeConfig> {
        self.current.read().clone()
    }

    /// Hold the current configuration. Updates and pause toggles wait until
    /// the guard is dropped.
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Arc<BridgeConfig>> {
        self.current.read()
    }

    pub fn ensure_admin(&self, caller: &Address) -> Result<()> {
        self.capabilities.require(caller, Role::Admin)
    }

    /// Replace the mutable parameters. `active_validators` must be read under
    /// the roster lock by the caller so the threshold check cannot race a
    /// removal.
    pub fn update(
        &self,
        caller: &Address,
        update: ConfigUpdate,
        active_validators: usize,
    ) -> Result<Arc<BridgeConfig>> {
        self.ensure_admin(caller)?;

        if update.confirmation_threshold == 0
            || update.confirmation_threshold as usize > active_validators
        {
            return Err(BridgeError::InvalidThreshold {
                threshold: update.confirmation_threshold,
                active_validators,
            });
        }

        let mut guard = self.current.write();
        let mut next = (**guard).clone();
        next.confirmation_threshold = update.confirmation_threshold;
        next.max_gas_budget = update.max_gas_budget;
        next.fee_schedule = update.fee_schedule;
        next.message_timeout_secs = update.message_timeout_secs;
        next.active = update.active;
        next.validate()?;

        let next = Arc::new(next);
        *guard = next.clone();
        info!(
            "Config updated: threshold={} max_gas={} timeout={}s active={}",
            next.confirmation_threshold, next.max_gas_budget, next.message_timeout_secs, next.active
        );
        Ok(next)
    }

    /// Flip the active switch. Returns false when it already had that value.
    pub fn set_active(&self, caller: &Address, active: bool) -> Result<bool> {
        self.ensure_admin(caller)?;

        let mut guard = self.current.write();
        if guard.active == active {
            warn!("Bridge active flag already {}", active);
            return Ok(false);
        }

        let mut next = (**guard).clone();
        next.active = active;
        *guard = Arc::new(next);
        info!("Bridge {}", if active { "unpaused" } else { "paused" });
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::RoleRegistry;

    fn controller() -> (ConfigController, Address) {
        let admin = Address::from("admin");
        let roles = RoleRegistry::new();
        roles.grant(admin.clone(), Role::Admin);
        let controller = ConfigController::new(BridgeConfig::default(), Arc::new(roles)).unwrap();
        (controller, admin)
    }

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.active);
        assert_eq!(config.message_timeout_secs, 3600);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = BridgeConfig::default();
        config.confirmation_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.min_lock_amount = config.max_lock_amount + 1;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.fee_sink = Address::new(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config = BridgeConfig::from_json_str(
            r#"{"confirmation_threshold": 3, "max_gas_budget": 500000, "message_timeout_secs": 600}"#,
        )
        .unwrap();
        assert_eq!(config.confirmation_threshold, 3);
        assert_eq!(config.max_gas_budget, 500_000);
        assert_eq!(config.min_lock_amount, BridgeConfig::default().min_lock_amount);

        assert!(BridgeConfig::from_json_str(r#"{"confirmation_threshold": 0}"#).is_err());
        assert!(BridgeConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_update_requires_admin() {
        let (controller, _) = controller();
        let update = ConfigUpdate::from_config(&controller.snapshot());
        let err = controller
            .update(&Address::from("mallory"), update, 3)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Unauthorized(_)));
    }

    #[test]
    fn test_update_threshold_bounds() {
        let (controller, admin) = controller();
        let mut update = ConfigUpdate::from_config(&controller.snapshot());

        update.confirmation_threshold = 4;
        assert!(controller.update(&admin, update.clone(), 3).is_err());

        update.confirmation_threshold = 0;
        assert!(controller.update(&admin, update.clone(), 3).is_err());

        update.confirmation_threshold = 3;
        let next = controller.update(&admin, update, 3).unwrap();
        assert_eq!(next.confirmation_threshold, 3);
    }

    #[test]
    fn test_snapshots_are_stable() {
        let (controller, admin) = controller();
        let before = controller.snapshot();
        controller.set_active(&admin, false).unwrap();
        assert!(before.active);
        assert!(!controller.snapshot().active);
        assert!(!controller.set_active(&admin, false).unwrap());
    }
}
