//! Bridge error types

use crate::message::{MessageStatus, MessageType};
use thiserror::Error;

/// Coarse classification of a [`BridgeError`], used by clients to decide
/// whether to retry with other arguments, wait, or reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any mutation
    Validation,
    /// Caller lacks the required role
    Authorization,
    /// Operation not allowed in the current state
    State,
    /// Custody cannot cover a release
    Capacity,
    /// Message expired during the call and is now EXPIRED
    Timeout,
    /// External collaborator failure
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "ValidationError"),
            ErrorKind::Authorization => write!(f, "AuthorizationError"),
            ErrorKind::State => write!(f, "StateError"),
            ErrorKind::Capacity => write!(f, "CapacityError"),
            ErrorKind::Timeout => write!(f, "TimeoutError"),
            ErrorKind::Internal => write!(f, "InternalError"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    // Validation
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid message id: {0}")]
    InvalidMessageId(String),

    #[error("Amount {amount} outside allowed range [{min}, {max}]")]
    AmountOutOfRange { amount: u128, min: u128, max: u128 },

    #[error("Gas budget {gas_budget} exceeds maximum {max}")]
    GasBudgetExceeded { gas_budget: u64, max: u64 },

    #[error("Unsupported message type: {0}")]
    UnsupportedMessageType(String),

    #[error("Fee {fee} exceeds amount {amount}")]
    FeeExceedsAmount { fee: u128, amount: u128 },

    #[error("Arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error("Invalid threshold {threshold}: must be between 1 and {active_validators}")]
    InvalidThreshold { threshold: u32, active_validators: usize },

    #[error("Stake {stake} below minimum {min}")]
    StakeTooLow { stake: u128, min: u128 },

    #[error("Insufficient source confirmations: got {got}, need {required}")]
    InsufficientConfirmations { got: u32, required: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Proof rejected for message {0}")]
    ProofRejected(String),

    #[error("No proof verifier configured")]
    ProofVerifierMissing,

    // Authorization
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // State
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Message {id} is terminal ({status})")]
    MessageTerminal { id: String, status: MessageStatus },

    #[error("Validator {validator} already attested to message {id}")]
    DuplicateAttestation { id: String, validator: String },

    #[error("Message already exists: {0}")]
    DuplicateMessage(String),

    #[error("Validator already active: {0}")]
    ValidatorAlreadyActive(String),

    #[error("Validator not active: {0}")]
    ValidatorNotActive(String),

    #[error("Removing validator would leave {remaining} active, below threshold {threshold}")]
    ValidatorSetBelowThreshold { remaining: usize, threshold: u32 },

    #[error("Message {id} is not expired ({status})")]
    NotExpired { id: String, status: MessageStatus },

    #[error("Message {0} has nothing to reclaim on this chain")]
    NotReclaimable(String),

    #[error("Message {0} already reclaimed")]
    AlreadyReclaimed(String),

    #[error("Bridge is paused")]
    BridgePaused,

    // Capacity
    #[error("Insufficient custody balance: available {available}, requested {requested}")]
    InsufficientCustody { available: u128, requested: u128 },

    // Timeout
    #[error("Message {0} expired")]
    MessageExpired(String),

    #[error("Ledger transfer failed: {0}")]
    LedgerTransfer(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn unsupported(message_type: MessageType) -> Self {
        BridgeError::UnsupportedMessageType(message_type.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        use BridgeError::*;
        match self {
            InvalidAddress(_)
            | InvalidMessageId(_)
            | AmountOutOfRange { .. }
            | GasBudgetExceeded { .. }
            | UnsupportedMessageType(_)
            | FeeExceedsAmount { .. }
            | Overflow(_)
            | InvalidThreshold { .. }
            | StakeTooLow { .. }
            | InsufficientConfirmations { .. }
            | InvalidConfig(_)
            | ProofRejected(_) => ErrorKind::Validation,
            Unauthorized(_) => ErrorKind::Authorization,
            MessageNotFound(_)
            | MessageTerminal { .. }
            | DuplicateAttestation { .. }
            | DuplicateMessage(_)
            | ValidatorAlreadyActive(_)
            | ValidatorNotActive(_)
            | ValidatorSetBelowThreshold { .. }
            | NotExpired { .. }
            | NotReclaimable(_)
            | AlreadyReclaimed(_)
            | ProofVerifierMissing
            | BridgePaused => ErrorKind::State,
            InsufficientCustody { .. } => ErrorKind::Capacity,
            MessageExpired(_) => ErrorKind::Timeout,
            LedgerTransfer(_) | Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same call may succeed later without changing its arguments.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::LedgerTransfer(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::InvalidConfig(err.to_string())
    }
}
