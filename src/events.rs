//! Outbound signals consumed by relayers and monitors

use crate::{
    message::{MessageType, ValidatorId},
    Address, MessageId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    MessageCreated {
        id: MessageId,
        sender: Address,
        recipient: Address,
        message_type: MessageType,
        value: u128,
        fee: u128,
        threshold: u32,
        expires_at: u64,
    },
    MessageRelayed {
        id: MessageId,
        relayer: Address,
        confirmations: u32,
    },
    MessageAttested {
        id: MessageId,
        validator: ValidatorId,
        approve: bool,
        approvals: u32,
        rejections: u32,
    },
    MessageFinalized {
        id: MessageId,
        recipient: Address,
        amount: u128,
        payload: Vec<u8>,
    },
    MessageFailed {
        id: MessageId,
        refunded: u128,
    },
    MessageExpired {
        id: MessageId,
    },
    MessageReclaimed {
        id: MessageId,
        sender: Address,
        amount: u128,
    },
    ValidatorAdded {
        id: ValidatorId,
        stake: u128,
    },
    ValidatorRemoved {
        id: ValidatorId,
        stake: u128,
    },
    ConfigUpdated {
        threshold: u32,
        max_gas_budget: u64,
        message_timeout_secs: u64,
        active: bool,
    },
    BridgePaused,
    BridgeUnpaused,
}

/// Fan-out of [`BridgeEvent`]s. Emitting never blocks; slow subscribers lag.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: BridgeEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(BridgeEvent::BridgePaused);
        bus.emit(BridgeEvent::MessageExpired {
            id: MessageId([9; 32]),
        });

        assert_eq!(rx.recv().await.unwrap(), BridgeEvent::BridgePaused);
        assert_eq!(
            rx.recv().await.unwrap(),
            BridgeEvent::MessageExpired {
                id: MessageId([9; 32])
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(BridgeEvent::BridgeUnpaused);
    }
}
