//! Bridge message types and lifecycle states

use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Account address on either chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(Vec<u8>);

impl Address {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(s)
            .map(Self)
            .map_err(|e| BridgeError::InvalidAddress(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Empty and all-zero addresses are never valid participants.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn ensure_valid(&self, what: &str) -> Result<()> {
        if self.is_zero() {
            return Err(BridgeError::InvalidAddress(format!("{} is empty", what)));
        }
        Ok(())
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Validators are identified by their account address
pub type ValidatorId = Address;

/// 32-byte blake3 message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub [u8; 32]);

impl MessageId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| BridgeError::InvalidMessageId(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BridgeError::InvalidMessageId(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Bridge message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    /// Fungible asset transfer
    TokenTransfer,
    /// Settlement of an off-chain payment
    PaymentSettlement,
    /// Non-fungible asset transfer
    NftTransfer,
    /// Governance action forwarded to the other chain
    GovernanceAction,
    /// Generic application payload
    DataTransfer,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::TokenTransfer,
        MessageType::PaymentSettlement,
        MessageType::NftTransfer,
        MessageType::GovernanceAction,
        MessageType::DataTransfer,
    ];

    /// Stable byte tag used in id derivation
    pub fn tag(&self) -> u8 {
        match self {
            MessageType::TokenTransfer => 0,
            MessageType::PaymentSettlement => 1,
            MessageType::NftTransfer => 2,
            MessageType::GovernanceAction => 3,
            MessageType::DataTransfer => 4,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::TokenTransfer => write!(f, "TOKEN_TRANSFER"),
            MessageType::PaymentSettlement => write!(f, "PAYMENT_SETTLEMENT"),
            MessageType::NftTransfer => write!(f, "NFT_TRANSFER"),
            MessageType::GovernanceAction => write!(f, "GOVERNANCE_ACTION"),
            MessageType::DataTransfer => write!(f, "DATA_TRANSFER"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| BridgeError::UnsupportedMessageType(s.to_string()))
    }
}

/// Message lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Failed | MessageStatus::Expired
        )
    }

    /// Status only moves forward; terminal states accept nothing.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        match (self, next) {
            (MessageStatus::Pending, MessageStatus::Processing) => true,
            (MessageStatus::Pending, MessageStatus::Expired) => true,
            (MessageStatus::Processing, MessageStatus::Completed)
            | (MessageStatus::Processing, MessageStatus::Failed)
            | (MessageStatus::Processing, MessageStatus::Expired) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Pending => write!(f, "PENDING"),
            MessageStatus::Processing => write!(f, "PROCESSING"),
            MessageStatus::Completed => write!(f, "COMPLETED"),
            MessageStatus::Failed => write!(f, "FAILED"),
            MessageStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Where the value backing a message is held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageOrigin {
    /// Locked into custody on this chain by `send_message`
    Local,
    /// Observed on the other chain and presented by a relayer
    Relayed,
}

/// Bridge message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub id: MessageId,
    pub origin: MessageOrigin,
    pub sender: Address,
    pub recipient: Address,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    /// Net value carried by the message
    pub value: u128,
    pub gas_budget: u64,
    /// Sender nonce used in the id
    pub nonce: u64,
    pub status: MessageStatus,
    /// Registry sequence number at creation
    pub created_height: u64,
    pub created_at: u64,
    /// Finality bar fixed at creation
    pub threshold: u32,
    /// Active validators when the message was created
    pub validator_count: u32,
    /// Deadline fixed at creation; the message is expired from this instant on
    pub expires_at: u64,
    /// Approving attestations
    pub attestation_count: u32,
    pub rejection_count: u32,
    pub reclaimed: bool,
}

impl BridgeMessage {
    /// Message id: blake3 over sender, recipient, type, payload, nonce and time.
    pub fn compute_id(
        sender: &Address,
        recipient: &Address,
        message_type: MessageType,
        payload: &[u8],
        nonce: u64,
        timestamp: u64,
    ) -> MessageId {
        let mut hasher = blake3::Hasher::new();
        for part in [sender.as_bytes(), recipient.as_bytes()] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        hasher.update(&[message_type.tag()]);
        hasher.update(&(payload.len() as u64).to_le_bytes());
        hasher.update(payload);
        hasher.update(&nonce.to_le_bytes());
        hasher.update(&timestamp.to_le_bytes());
        MessageId(*hasher.finalize().as_bytes())
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Rejections the message tolerates before the snapshotted validator set
    /// can no longer reach the threshold.
    pub fn rejection_allowance(&self) -> u32 {
        self.validator_count.saturating_sub(self.threshold)
    }

    pub(crate) fn advance(&mut self, next: MessageStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BridgeError::MessageTerminal {
                id: self.id.to_string(),
                status: self.status,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// One validator's recorded vote on a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub message_id: MessageId,
    pub validator: ValidatorId,
    pub approve: bool,
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_depends_on_nonce() {
        let sender = Address::from("alice");
        let recipient = Address::from("bob");
        let a = BridgeMessage::compute_id(&sender, &recipient, MessageType::DataTransfer, b"hi", 0, 100);
        let b = BridgeMessage::compute_id(&sender, &recipient, MessageType::DataTransfer, b"hi", 1, 100);
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_is_deterministic() {
        let sender = Address::from("alice");
        let recipient = Address::from("bob");
        let a = BridgeMessage::compute_id(&sender, &recipient, MessageType::TokenTransfer, b"x", 3, 7);
        let b = BridgeMessage::compute_id(&sender, &recipient, MessageType::TokenTransfer, b"x", 3, 7);
        assert_eq!(a, b);
        assert_eq!(MessageId::from_hex(&a.to_string()).unwrap(), a);
    }

    #[test]
    fn test_status_transitions() {
        use MessageStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Expired));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        for terminal in [Completed, Failed, Expired] {
            assert!(terminal.is_terminal());
            for next in [Pending, Processing, Completed, Failed, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_message_type_parsing() {
        assert_eq!(
            "PAYMENT_SETTLEMENT".parse::<MessageType>().unwrap(),
            MessageType::PaymentSettlement
        );
        assert!("TELEPORT".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::new(Vec::new()).is_zero());
        assert!(Address::new(vec![0u8; 20]).is_zero());
        assert!(!Address::from("carol").is_zero());
        assert_eq!(Address::from_hex("0x0102").unwrap(), Address::new(vec![1, 2]));
    }
}
