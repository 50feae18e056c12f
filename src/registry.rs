//! Message registry: message table, attestation records and sender nonces
//!
//! Each message entry is the serialization point for everything that touches
//! that message. [`MessageRegistry::update`] runs a closure while holding the
//! entry exclusively, so guard checks and the writes they protect are atomic
//! with respect to concurrent callers. Different messages do not contend
//! beyond their map shard.

use crate::{
    config::BridgeConfig,
    message::{Attestation, BridgeMessage, MessageOrigin, MessageStatus, MessageType, ValidatorId},
    Address, BridgeError, MessageId, Result,
};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Arguments for a locally created message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: Address,
    pub recipient: Address,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub value: u128,
    pub gas_budget: u64,
}

/// A message observed on the other chain, as presented by a relayer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    /// Id assigned on the source chain
    pub id: MessageId,
    pub sender: Address,
    pub recipient: Address,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub value: u128,
    pub gas_budget: u64,
    pub nonce: u64,
    /// Source-chain confirmations observed by the relayer
    pub confirmations: u32,
}

/// A message together with its attestation records
#[derive(Debug, Clone)]
pub(crate) struct MessageRecord {
    pub message: BridgeMessage,
    pub attestations: HashMap<ValidatorId, Attestation>,
    /// Set once the destination effect (release or refund) has run
    pub processed: bool,
}

#[derive(Debug, Default)]
pub struct MessageRegistry {
    messages: DashMap<MessageId, MessageRecord>,
    nonces: DashMap<Address, u64>,
    sequence: AtomicU64,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_common(
        config: &BridgeConfig,
        recipient: &Address,
        message_type: MessageType,
        gas_budget: u64,
    ) -> Result<()> {
        if !config.active {
            return Err(BridgeError::BridgePaused);
        }

        recipient.ensure_valid("recipient")?;

        if gas_budget > config.max_gas_budget {
            return Err(BridgeError::GasBudgetExceeded {
                gas_budget,
                max: config.max_gas_budget,
            });
        }

        if !config.fee_schedule.supports(message_type) {
            return Err(BridgeError::unsupported(message_type));
        }

        Ok(())
    }

    /// Validate a message against `config` without recording anything.
    pub fn check_new(&self, config: &BridgeConfig, new: &NewMessage) -> Result<()> {
        new.sender.ensure_valid("sender")?;
        Self::check_common(config, &new.recipient, new.message_type, new.gas_budget)
    }

    /// Record a new PENDING message. The sender nonce is read, used in the id
    /// and incremented while its entry is held, so concurrent calls from the
    /// same sender never share a nonce. `validator_count` is the active set
    /// size snapshotted on the message.
    pub fn create_message(
        &self,
        config: &BridgeConfig,
        new: NewMessage,
        validator_count: u32,
        now: u64,
    ) -> Result<BridgeMessage> {
        self.check_new(config, &new)?;

        let mut nonce = self.nonces.entry(new.sender.clone()).or_insert(0);
        let id = BridgeMessage::compute_id(
            &new.sender,
            &new.recipient,
            new.message_type,
            &new.payload,
            *nonce,
            now,
        );

        let message = BridgeMessage {
            id,
            origin: MessageOrigin::Local,
            sender: new.sender,
            recipient: new.recipient,
            message_type: new.message_type,
            payload: new.payload,
            value: new.value,
            gas_budget: new.gas_budget,
            nonce: *nonce,
            status: MessageStatus::Pending,
            created_height: 0,
            created_at: now,
            threshold: config.confirmation_threshold,
            validator_count,
            expires_at: now.saturating_add(config.message_timeout_secs),
            attestation_count: 0,
            rejection_count: 0,
            reclaimed: false,
        };

        let message = self.insert(message)?;
        *nonce += 1;
        Ok(message)
    }

    /// Record a relayed message under its source-chain id. A second
    /// presentation of the same id is rejected.
    pub fn register_relayed(
        &self,
        config: &BridgeConfig,
        relayed: RelayedMessage,
        validator_count: u32,
        now: u64,
    ) -> Result<BridgeMessage> {
        relayed.sender.ensure_valid("sender")?;
        Self::check_common(config, &relayed.recipient, relayed.message_type, relayed.gas_budget)?;

        if relayed.confirmations < config.required_confirmations {
            return Err(BridgeError::InsufficientConfirmations {
                got: relayed.confirmations,
                required: config.required_confirmations,
            });
        }

        let message = BridgeMessage {
            id: relayed.id,
            origin: MessageOrigin::Relayed,
            sender: relayed.sender,
            recipient: relayed.recipient,
            message_type: relayed.message_type,
            payload: relayed.payload,
            value: relayed.value,
            gas_budget: relayed.gas_budget,
            nonce: relayed.nonce,
            status: MessageStatus::Pending,
            created_height: 0,
            created_at: now,
            threshold: config.confirmation_threshold,
            validator_count,
            expires_at: now.saturating_add(config.message_timeout_secs),
            attestation_count: 0,
            rejection_count: 0,
            reclaimed: false,
        };

        self.insert(message)
    }

    fn insert(&self, mut message: BridgeMessage) -> Result<BridgeMessage> {
        match self.messages.entry(message.id) {
            Entry::Occupied(_) => Err(BridgeError::DuplicateMessage(message.id.to_string())),
            Entry::Vacant(slot) => {
                message.created_height = self.sequence.fetch_add(1, Ordering::SeqCst);
                slot.insert(MessageRecord {
                    message: message.clone(),
                    attestations: HashMap::new(),
                    processed: false,
                });
                info!(
                    "Message {} registered ({:?}, {}, threshold {})",
                    message.id, message.origin, message.message_type, message.threshold
                );
                Ok(message)
            }
        }
    }

    pub fn get_message(&self, id: &MessageId) -> Result<BridgeMessage> {
        self.messages
            .get(id)
            .map(|r| r.message.clone())
            .ok_or_else(|| BridgeError::MessageNotFound(id.to_string()))
    }

    pub fn attestations(&self, id: &MessageId) -> Result<Vec<Attestation>> {
        let record = self
            .messages
            .get(id)
            .ok_or_else(|| BridgeError::MessageNotFound(id.to_string()))?;
        let mut attestations: Vec<Attestation> = record.attestations.values().cloned().collect();
        attestations.sort_by(|a, b| (a.timestamp, &a.validator).cmp(&(b.timestamp, &b.validator)));
        Ok(attestations)
    }

    /// Next nonce that `sender` will use
    pub fn nonce_of(&self, sender: &Address) -> u64 {
        self.nonces.get(sender).map(|n| *n).unwrap_or(0)
    }

    /// Run `f` with exclusive access to one message record.
    pub(crate) fn update<R>(
        &self,
        id: &MessageId,
        f: impl FnOnce(&mut MessageRecord) -> Result<R>,
    ) -> Result<R> {
        let mut record = self
            .messages
            .get_mut(id)
            .ok_or_else(|| BridgeError::MessageNotFound(id.to_string()))?;
        let result = f(record.value_mut());
        debug!("Message {} now {}", id, record.message.status);
        result
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn count_by_status(&self) -> HashMap<MessageStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.messages.iter() {
            *counts.entry(entry.value().message.status).or_insert(0) += 1;
        }
        counts
    }
}
