//! Bridge facade composing registry, fees, validators, consensus and custody

use crate::{
    auth::{Capabilities, Role},
    clock::{Clock, SystemClock},
    config::{BridgeConfig, ConfigController, ConfigUpdate},
    custody::{AssetCustodian, Transfer, ValueLedger},
    engine::{AttestOutcome, ConsensusEngine},
    events::{BridgeEvent, EventBus},
    message::{Attestation, BridgeMessage, MessageStatus, MessageType, ValidatorId},
    proof::ProofVerifier,
    registry::{MessageRegistry, NewMessage, RelayedMessage},
    validators::{Validator, ValidatorSet},
    Address, BridgeError, MessageId, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Cross-chain message bridge
///
/// Lock order: validator roster, then a message entry, then config, then
/// custody. No operation takes the roster while holding a message entry, and
/// nothing else is locked while the config is held for writing.
pub struct Bridge {
    config: Arc<ConfigController>,
    capabilities: Arc<dyn Capabilities>,
    validators: Arc<ValidatorSet>,
    registry: Arc<MessageRegistry>,
    custodian: Arc<AssetCustodian>,
    engine: ConsensusEngine,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        capabilities: Arc<dyn Capabilities>,
        ledger: Arc<dyn ValueLedger>,
    ) -> Result<Self> {
        Self::with_clock(config, capabilities, ledger, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: BridgeConfig,
        capabilities: Arc<dyn Capabilities>,
        ledger: Arc<dyn ValueLedger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let config = Arc::new(ConfigController::new(config, capabilities.clone())?);

        let validators = Arc::new(ValidatorSet::new());
        let registry = Arc::new(MessageRegistry::new());
        let custodian = Arc::new(AssetCustodian::new(ledger));
        let events = EventBus::default();
        let engine = ConsensusEngine::new(
            config.clone(),
            registry.clone(),
            validators.clone(),
            custodian.clone(),
            events.clone(),
            clock.clone(),
        );

        let snapshot = config.snapshot();
        info!(
            "Creating bridge: threshold={} timeout={}s max_gas={}",
            snapshot.confirmation_threshold, snapshot.message_timeout_secs, snapshot.max_gas_budget
        );

        Ok(Self {
            config,
            capabilities,
            validators,
            registry,
            custodian,
            engine,
            events,
            clock,
        })
    }

    /// Enable [`Self::submit_proof`] with the given verifier.
    pub fn with_proof_verifier(mut self, verifier: Arc<dyn ProofVerifier>) -> Self {
        self.engine = self.engine.with_verifier(verifier);
        self
    }

    pub fn config(&self) -> Arc<BridgeConfig> {
        self.config.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Lock `request.value` from the sender and create a PENDING message
    /// carrying the value net of the bridging fee.
    pub fn send_message(&self, request: NewMessage) -> Result<BridgeMessage> {
        let config = self.config.snapshot();
        self.registry.check_new(&config, &request)?;

        let gross = request.value;
        if gross < config.min_lock_amount || gross > config.max_lock_amount {
            return Err(BridgeError::AmountOutOfRange {
                amount: gross,
                min: config.min_lock_amount,
                max: config.max_lock_amount,
            });
        }

        let fee = config
            .fee_schedule
            .compute_fee(request.message_type, request.gas_budget, gross)?;
        let sender = request.sender.clone();
        let message_type = request.message_type;

        let net = self.custodian.lock(&sender, gross, fee)?;
        let message = match self.registry.create_message(
            &config,
            NewMessage {
                value: net,
                ..request
            },
            self.validators.active_count() as u32,
            self.clock.now(),
        ) {
            Ok(message) => message,
            Err(e) => {
                if let Err(rollback) = self.custodian.unlock(&sender, gross, net) {
                    error!("Failed to return {} to {}: {}", gross, sender, rollback);
                }
                return Err(e);
            }
        };

        self.custodian.route_fee(message.id, &config.fee_sink, fee);
        self.engine
            .record_fees(|ledger| ledger.record_lock(message_type, gross, fee));

        info!(
            "Message {} created: {} -> {} {} value={} fee={}",
            message.id, message.sender, message.recipient, message.message_type, message.value, fee
        );
        self.events.emit(BridgeEvent::MessageCreated {
            id: message.id,
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            message_type,
            value: message.value,
            fee,
            threshold: message.threshold,
            expires_at: message.expires_at,
        });
        self.custodian.drain_outbox();

        Ok(message)
    }

    /// Present a message observed on the source chain.
    pub fn relay_message(&self, relayer: &Address, relayed: RelayedMessage) -> Result<BridgeMessage> {
        self.capabilities.require(relayer, Role::Relayer)?;

        let config = self.config.snapshot();
        let confirmations = relayed.confirmations;
        let message = self
            .registry
            .register_relayed(
                &config,
                relayed,
                self.validators.active_count() as u32,
                self.clock.now(),
            )?;

        self.engine
            .record_fees(|ledger| ledger.record_relayed(message.message_type));
        info!(
            "Message {} relayed by {} with {} confirmations",
            message.id, relayer, confirmations
        );
        self.events.emit(BridgeEvent::MessageRelayed {
            id: message.id,
            relayer: relayer.clone(),
            confirmations,
        });

        Ok(message)
    }

    pub fn get_message(&self, id: &MessageId) -> Result<BridgeMessage> {
        self.registry.get_message(id)
    }

    pub fn attestations(&self, id: &MessageId) -> Result<Vec<Attestation>> {
        self.registry.attestations(id)
    }

    pub fn nonce_of(&self, sender: &Address) -> u64 {
        self.registry.nonce_of(sender)
    }

    pub fn attest(&self, validator: &ValidatorId, id: &MessageId, approve: bool) -> Result<AttestOutcome> {
        self.capabilities.require(validator, Role::Validator)?;
        self.engine.attest(validator, id, approve)
    }

    pub fn submit_proof(&self, relayer: &Address, id: &MessageId, proof: &[u8]) -> Result<MessageStatus> {
        self.capabilities.require(relayer, Role::Relayer)?;
        self.engine.submit_proof(id, proof)
    }

    /// Allowed while paused.
    pub fn reclaim(&self, caller: &Address, id: &MessageId) -> Result<u128> {
        self.engine.reclaim(caller, id)
    }

    pub fn sweep_expired(&self) -> Vec<MessageId> {
        self.engine.sweep_expired()
    }

    pub fn add_validator(&self, caller: &Address, id: ValidatorId, stake: u128) -> Result<Validator> {
        self.config.ensure_admin(caller)?;

        let mut roster = self.validators.write();
        let min_stake = self.config.snapshot().min_validator_stake;
        let validator = roster.add(id, stake, min_stake, self.clock.now())?;
        drop(roster);

        self.events.emit(BridgeEvent::ValidatorAdded {
            id: validator.id.clone(),
            stake: validator.stake,
        });
        Ok(validator)
    }

    /// Deactivate a validator. Refused when the remaining active set could no
    /// longer reach the current threshold.
    pub fn remove_validator(&self, caller: &Address, id: &ValidatorId) -> Result<Validator> {
        self.config.ensure_admin(caller)?;

        let mut roster = self.validators.write();
        if !roster.is_active(id) {
            return Err(BridgeError::ValidatorNotActive(id.to_string()));
        }

        let threshold = self.config.snapshot().confirmation_threshold;
        let remaining = roster.active_count() - 1;
        if remaining < threshold as usize {
            warn!(
                "Refusing to remove {}: {} validators would remain for threshold {}",
                id, remaining, threshold
            );
            return Err(BridgeError::ValidatorSetBelowThreshold { remaining, threshold });
        }

        let validator = roster.remove(id, self.clock.now())?;
        drop(roster);

        self.events.emit(BridgeEvent::ValidatorRemoved {
            id: validator.id.clone(),
            stake: validator.stake,
        });
        Ok(validator)
    }

    /// Applies to messages created after the call; existing messages keep
    /// their snapshotted threshold and deadline.
    pub fn update_config(&self, caller: &Address, update: ConfigUpdate) -> Result<Arc<BridgeConfig>> {
        let roster = self.validators.read();
        let next = self.config.update(caller, update, roster.active_count())?;
        drop(roster);

        self.events.emit(BridgeEvent::ConfigUpdated {
            threshold: next.confirmation_threshold,
            max_gas_budget: next.max_gas_budget,
            message_timeout_secs: next.message_timeout_secs,
            active: next.active,
        });
        Ok(next)
    }

    /// Halt message creation, relaying and attestation.
    pub fn pause(&self, caller: &Address) -> Result<()> {
        if self.config.set_active(caller, false)? {
            self.events.emit(BridgeEvent::BridgePaused);
        }
        Ok(())
    }

    pub fn unpause(&self, caller: &Address) -> Result<()> {
        if self.config.set_active(caller, true)? {
            self.events.emit(BridgeEvent::BridgeUnpaused);
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        !self.config.snapshot().active
    }

    /// Move destination liquidity from `from` into custody. Returns the new
    /// custody balance.
    pub fn fund_custody(&self, caller: &Address, from: &Address, amount: u128) -> Result<u128> {
        self.config.ensure_admin(caller)?;
        self.custodian.fund(from, amount)
    }

    pub fn quote_fee(&self, message_type: MessageType, gas_budget: u64, value: u128) -> Result<u128> {
        self.config
            .snapshot()
            .fee_schedule
            .compute_fee(message_type, gas_budget, value)
    }

    /// Execute transfers left queued by earlier ledger failures.
    pub fn retry_pending_transfers(&self) -> Vec<Transfer> {
        self.custodian.drain_outbox()
    }

    pub fn pending_transfers(&self) -> Vec<Transfer> {
        self.custodian.pending_transfers()
    }

    pub fn get_validator(&self, id: &ValidatorId) -> Option<Validator> {
        self.validators.get(id)
    }

    pub fn active_validators(&self) -> Vec<Validator> {
        self.validators.active_validators()
    }

    pub fn custody_balance(&self) -> u128 {
        self.custodian.balance()
    }

    /// Custody backing local messages that have not settled yet.
    pub fn locked_balance(&self) -> u128 {
        self.custodian.locked()
    }

    /// Custody available to relayed releases.
    pub fn custody_liquidity(&self) -> u128 {
        self.custodian.liquidity()
    }

    pub fn stats(&self) -> BridgeStats {
        let counts = self.registry.count_by_status();
        let count = |status: MessageStatus| counts.get(&status).copied().unwrap_or(0);
        let fees = self.engine.fee_ledger();

        BridgeStats {
            total_messages: self.registry.len(),
            pending_messages: count(MessageStatus::Pending),
            processing_messages: count(MessageStatus::Processing),
            completed_messages: count(MessageStatus::Completed),
            failed_messages: count(MessageStatus::Failed),
            expired_messages: count(MessageStatus::Expired),
            active_validators: self.validators.active_count(),
            total_bonded: self.validators.total_bonded(),
            custody_balance: self.custodian.balance(),
            locked_balance: self.custodian.locked(),
            custody_liquidity: self.custodian.liquidity(),
            total_volume: fees.total_volume,
            total_fees: fees.total_fees,
            total_released: fees.total_released,
            total_refunded: fees.total_refunded,
            pending_transfers: self.custodian.pending_transfers().len(),
            paused: self.is_paused(),
        }
    }
}

/// Bridge statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    pub total_messages: usize,
    pub pending_messages: usize,
    pub processing_messages: usize,
    pub completed_messages: usize,
    pub failed_messages: usize,
    pub expired_messages: usize,
    pub active_validators: usize,
    pub total_bonded: u128,
    pub custody_balance: u128,
    pub locked_balance: u128,
    pub custody_liquidity: u128,
    pub total_volume: u128,
    pub total_fees: u128,
    pub total_released: u128,
    pub total_refunded: u128,
    pub pending_transfers: usize,
    pub paused: bool,
}
