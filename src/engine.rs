//! Consensus engine: the message state machine driven by validator attestations
//!
//! ```text
//! PENDING -> PROCESSING -> COMPLETED | FAILED | EXPIRED
//! PENDING -> EXPIRED
//! ```
//!
//! Every transition runs inside [`MessageRegistry::update`], holding the
//! message entry. Within that critical section all guards are checked, the
//! custody debit for a finalize (or refund) is taken, and only then are the
//! attestation, counters and status written. Payouts are executed from the
//! custody outbox after the entry is released.

use crate::{
    clock::Clock,
    config::ConfigController,
    custody::{AssetCustodian, TransferKind},
    events::{BridgeEvent, EventBus},
    fees::FeeLedger,
    message::{Attestation, MessageOrigin, MessageStatus, ValidatorId},
    proof::ProofVerifier,
    registry::MessageRegistry,
    validators::ValidatorSet,
    Address, BridgeError, MessageId, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a recorded attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestOutcome {
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub approvals: u32,
    pub rejections: u32,
    /// This attestation crossed the approval threshold
    pub finalized: bool,
    /// This rejection left the threshold unreachable
    pub failed: bool,
}

enum Effect {
    None,
    Finalized {
        recipient: Address,
        amount: u128,
        payload: Vec<u8>,
    },
    Failed {
        sender: Address,
        refunded: u128,
    },
}

enum Step<T> {
    Done(T, Effect),
    Expired,
}

pub struct ConsensusEngine {
    config: Arc<ConfigController>,
    registry: Arc<MessageRegistry>,
    validators: Arc<ValidatorSet>,
    custodian: Arc<AssetCustodian>,
    fee_ledger: Mutex<FeeLedger>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    verifier: Option<Arc<dyn ProofVerifier>>,
}

impl ConsensusEngine {
    pub fn new(
        config: Arc<ConfigController>,
        registry: Arc<MessageRegistry>,
        validators: Arc<ValidatorSet>,
        custodian: Arc<AssetCustodian>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            validators,
            custodian,
            fee_ledger: Mutex::new(FeeLedger::default()),
            events,
            clock,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ProofVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn fee_ledger(&self) -> FeeLedger {
        self.fee_ledger.lock().clone()
    }

    pub(crate) fn record_fees(&self, f: impl FnOnce(&mut FeeLedger)) {
        f(&mut self.fee_ledger.lock());
    }

    /// Record one validator's vote. Reaching the snapshotted threshold of
    /// approvals finalizes the message in the same critical section. A
    /// rejection fails the message only once the validators that have not
    /// rejected can no longer reach the threshold; a local sender is refunded.
    pub fn attest(&self, validator: &ValidatorId, id: &MessageId, approve: bool) -> Result<AttestOutcome> {
        let now = self.clock.now();

        // Held until the vote is recorded so a concurrent removal cannot
        // interleave between the activity check and the write.
        let roster = self.validators.read();
        if !roster.is_active(validator) {
            return Err(BridgeError::ValidatorNotActive(validator.to_string()));
        }

        let step = self.registry.update(id, |record| {
            // Held to the end of the closure so a pause cannot land between
            // this check and the writes below.
            let config = self.config.read();
            if !config.active {
                return Err(BridgeError::BridgePaused);
            }

            let msg = &mut record.message;
            if msg.status.is_terminal() {
                return Err(BridgeError::MessageTerminal {
                    id: id.to_string(),
                    status: msg.status,
                });
            }

            if msg.is_expired_at(now) {
                msg.advance(MessageStatus::Expired)?;
                return Ok(Step::Expired);
            }

            if record.attestations.contains_key(validator) {
                return Err(BridgeError::DuplicateAttestation {
                    id: id.to_string(),
                    validator: validator.to_string(),
                });
            }

            let (approvals, rejections) = if approve {
                (msg.attestation_count + 1, msg.rejection_count)
            } else {
                (msg.attestation_count, msg.rejection_count + 1)
            };
            let finalize = approve && approvals == msg.threshold && !record.processed;
            let fail = !approve && rejections > msg.rejection_allowance() && !record.processed;

            let effect = if finalize {
                self.custodian.settle(
                    *id,
                    msg.origin,
                    TransferKind::Release,
                    &msg.recipient,
                    msg.value,
                )?;
                Effect::Finalized {
                    recipient: msg.recipient.clone(),
                    amount: msg.value,
                    payload: msg.payload.clone(),
                }
            } else if fail {
                let refunded = match msg.origin {
                    MessageOrigin::Local => {
                        self.custodian.settle(
                            *id,
                            MessageOrigin::Local,
                            TransferKind::Refund,
                            &msg.sender,
                            msg.value,
                        )?;
                        msg.value
                    }
                    MessageOrigin::Relayed => 0,
                };
                Effect::Failed {
                    sender: msg.sender.clone(),
                    refunded,
                }
            } else {
                Effect::None
            };

            record.attestations.insert(
                validator.clone(),
                Attestation {
                    message_id: *id,
                    validator: validator.clone(),
                    approve,
                    timestamp: now,
                },
            );
            msg.attestation_count = approvals;
            msg.rejection_count = rejections;

            if msg.status == MessageStatus::Pending {
                msg.advance(MessageStatus::Processing)?;
            }
            match effect {
                Effect::Finalized { .. } => {
                    msg.advance(MessageStatus::Completed)?;
                    record.processed = true;
                }
                Effect::Failed { .. } => {
                    msg.advance(MessageStatus::Failed)?;
                    record.processed = true;
                }
                Effect::None => {}
            }

            let outcome = AttestOutcome {
                message_id: *id,
                status: msg.status,
                approvals,
                rejections,
                finalized: finalize,
                failed: fail,
            };
            Ok(Step::Done(outcome, effect))
        })?;
        drop(roster);

        let (outcome, effect) = match step {
            Step::Expired => {
                self.on_expired(id);
                return Err(BridgeError::MessageExpired(id.to_string()));
            }
            Step::Done(outcome, effect) => (outcome, effect),
        };

        debug!(
            "Validator {} {} message {} ({} approvals, {} rejections)",
            validator,
            if approve { "approved" } else { "rejected" },
            id,
            outcome.approvals,
            outcome.rejections
        );
        self.events.emit(BridgeEvent::MessageAttested {
            id: *id,
            validator: validator.clone(),
            approve,
            approvals: outcome.approvals,
            rejections: outcome.rejections,
        });
        self.apply_effect(id, effect);

        Ok(outcome)
    }

    /// Finalize a message through the configured proof verifier instead of
    /// attestations. Uses the same exactly-once release as [`Self::attest`].
    pub fn submit_proof(&self, id: &MessageId, proof: &[u8]) -> Result<MessageStatus> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or(BridgeError::ProofVerifierMissing)?;

        if !verifier.verify_proof(id, proof) {
            warn!("Proof rejected for message {}", id);
            return Err(BridgeError::ProofRejected(id.to_string()));
        }

        let now = self.clock.now();
        let step = self.registry.update(id, |record| {
            let config = self.config.read();
            if !config.active {
                return Err(BridgeError::BridgePaused);
            }

            let msg = &mut record.message;
            if msg.status.is_terminal() || record.processed {
                return Err(BridgeError::MessageTerminal {
                    id: id.to_string(),
                    status: msg.status,
                });
            }

            if msg.is_expired_at(now) {
                msg.advance(MessageStatus::Expired)?;
                return Ok(Step::Expired);
            }

            self.custodian.settle(
                *id,
                msg.origin,
                TransferKind::Release,
                &msg.recipient,
                msg.value,
            )?;

            if msg.status == MessageStatus::Pending {
                msg.advance(MessageStatus::Processing)?;
            }
            msg.advance(MessageStatus::Completed)?;
            record.processed = true;

            Ok(Step::Done(
                msg.status,
                Effect::Finalized {
                    recipient: msg.recipient.clone(),
                    amount: msg.value,
                    payload: msg.payload.clone(),
                },
            ))
        })?;

        match step {
            Step::Expired => {
                self.on_expired(id);
                Err(BridgeError::MessageExpired(id.to_string()))
            }
            Step::Done(status, effect) => {
                self.apply_effect(id, effect);
                Ok(status)
            }
        }
    }

    /// Move a timed-out PENDING or PROCESSING message to EXPIRED.
    /// Returns whether this call made the transition.
    pub fn expire_if_due(&self, id: &MessageId) -> Result<bool> {
        let now = self.clock.now();
        let expired = self.registry.update(id, |record| {
            let msg = &mut record.message;
            if msg.status.is_terminal() || !msg.is_expired_at(now) {
                return Ok(false);
            }
            msg.advance(MessageStatus::Expired)?;
            Ok(true)
        })?;

        if expired {
            self.on_expired(id);
        }
        Ok(expired)
    }

    /// Expire every message whose deadline has passed.
    pub fn sweep_expired(&self) -> Vec<MessageId> {
        self.expire_all(self.registry.ids())
    }

    fn expire_all(&self, ids: Vec<MessageId>) -> Vec<MessageId> {
        let expired: Vec<MessageId> = ids
            .into_iter()
            .filter(|id| match self.expire_if_due(id) {
                Ok(expired) => expired,
                Err(e) => {
                    warn!("Expiry sweep skipped message {}: {}", id, e);
                    false
                }
            })
            .collect();

        if !expired.is_empty() {
            info!("Expiry sweep moved {} messages to EXPIRED", expired.len());
        }
        expired
    }

    /// Return the net value of an EXPIRED local message to its sender, once.
    pub fn reclaim(&self, caller: &Address, id: &MessageId) -> Result<u128> {
        self.expire_if_due(id)?;

        let (sender, amount) = self.registry.update(id, |record| {
            let msg = &mut record.message;
            if msg.origin != MessageOrigin::Local {
                return Err(BridgeError::NotReclaimable(id.to_string()));
            }

            if &msg.sender != caller {
                return Err(BridgeError::Unauthorized(format!(
                    "only the sender may reclaim message {}",
                    id
                )));
            }

            if msg.status != MessageStatus::Expired {
                return Err(BridgeError::NotExpired {
                    id: id.to_string(),
                    status: msg.status,
                });
            }

            if msg.reclaimed {
                return Err(BridgeError::AlreadyReclaimed(id.to_string()));
            }

            if !self.custodian.settle(
                *id,
                MessageOrigin::Local,
                TransferKind::Reclaim,
                &msg.sender,
                msg.value,
            )? {
                return Err(BridgeError::AlreadyReclaimed(id.to_string()));
            }
            msg.reclaimed = true;
            Ok((msg.sender.clone(), msg.value))
        })?;

        info!("Message {} reclaimed by {} ({})", id, sender, amount);
        self.record_fees(|ledger| ledger.record_refund(amount));
        self.events.emit(BridgeEvent::MessageReclaimed {
            id: *id,
            sender,
            amount,
        });
        self.custodian.drain_outbox();
        Ok(amount)
    }

    fn on_expired(&self, id: &MessageId) {
        info!("Message {} expired", id);
        self.events.emit(BridgeEvent::MessageExpired { id: *id });
    }

    fn apply_effect(&self, id: &MessageId, effect: Effect) {
        match effect {
            Effect::None => return,
            Effect::Finalized {
                recipient,
                amount,
                payload,
            } => {
                info!("Message {} finalized: {} released to {}", id, amount, recipient);
                self.record_fees(|ledger| ledger.record_release(amount));
                self.events.emit(BridgeEvent::MessageFinalized {
                    id: *id,
                    recipient,
                    amount,
                    payload,
                });
            }
            Effect::Failed { sender, refunded } => {
                warn!("Message {} failed: rejected by validators, {} refunded to {}", id, refunded, sender);
                self.record_fees(|ledger| ledger.record_refund(refunded));
                self.events.emit(BridgeEvent::MessageFailed { id: *id, refunded });
            }
        }
        self.custodian.drain_outbox();
    }
}
