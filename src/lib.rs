//! Cross-Chain Message Bridge
//!
//! This crate provides a validator-attested message bridge with:
//! - Value locking with deterministic bridging fees
//! - Count-based N-of-M validator finality with per-message threshold snapshots
//! - Exactly-once release, refund and reclaim out of custody
//! - Timeouts, pause control and relayed inbound messages

pub mod auth;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod custody;
pub mod engine;
pub mod errors;
pub mod events;
pub mod fees;
pub mod message;
pub mod proof;
pub mod registry;
pub mod validators;

pub use auth::{Capabilities, Role, RoleRegistry};
pub use bridge::{Bridge, BridgeStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BridgeConfig, ConfigUpdate};
pub use custody::{InMemoryLedger, Transfer, TransferKind, ValueLedger};
pub use engine::AttestOutcome;
pub use errors::{BridgeError, ErrorKind, Result};
pub use events::BridgeEvent;
pub use fees::{FeeLedger, FeeSchedule};
pub use message::{
    Address, Attestation, BridgeMessage, MessageId, MessageOrigin, MessageStatus, MessageType,
    ValidatorId,
};
pub use proof::ProofVerifier;
pub use registry::{NewMessage, RelayedMessage};
pub use validators::Validator;

use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeInitError {
    #[error("Bridge initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Invalid bridge configuration: {0}")]
    InvalidConfiguration(String),
}

pub type BridgeInitResult<T> = std::result::Result<T, BridgeInitError>;

/// Build a bridge from a JSON configuration document.
pub fn init_bridge(
    config_json: &str,
    capabilities: Arc<dyn Capabilities>,
    ledger: Arc<dyn ValueLedger>,
) -> BridgeInitResult<Bridge> {
    let config = BridgeConfig::from_json_str(config_json).map_err(|e| match e {
        BridgeError::InvalidConfig(reason) => BridgeInitError::InvalidConfiguration(reason),
        other => BridgeInitError::InitializationFailed(other.to_string()),
    })?;

    Bridge::new(config, capabilities, ledger)
        .map_err(|e| BridgeInitError::InitializationFailed(e.to_string()))
}
