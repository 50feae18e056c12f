//! Asset custody: value locked pending finalization or reclaim
//!
//! Custody keeps two pools. `locked` holds the net value of local messages and
//! only pays their release, refund or reclaim. `liquidity` is destination
//! liquidity added by [`AssetCustodian::fund`] and only pays relayed
//! messages.
//!
//! Internal balances are committed first; every payment out of custody is
//! queued as a [`Transfer`] and only handed to the external ledger afterwards
//! by [`AssetCustodian::drain_outbox`].

use crate::{message::MessageOrigin, Address, BridgeError, MessageId, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// External value-transfer ledger backing the custody account
pub trait ValueLedger: Send + Sync {
    /// Move `amount` from `from` into the bridge custody account.
    fn debit(&self, from: &Address, amount: u128) -> Result<()>;
    /// Move `amount` out of the bridge custody account to `to`.
    fn credit(&self, to: &Address, amount: u128) -> Result<()>;
}

/// Simple account-balance ledger
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: DashMap<Address, u128>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self, to: &Address, amount: u128) {
        let mut balance = self.balances.entry(to.clone()).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    pub fn balance_of(&self, who: &Address) -> u128 {
        self.balances.get(who).map(|b| *b).unwrap_or(0)
    }
}

impl ValueLedger for InMemoryLedger {
    fn debit(&self, from: &Address, amount: u128) -> Result<()> {
        let mut balance = self.balances.entry(from.clone()).or_insert(0);
        if *balance < amount {
            return Err(BridgeError::LedgerTransfer(format!(
                "{} holds {}, needs {}",
                from, *balance, amount
            )));
        }
        *balance -= amount;
        Ok(())
    }

    fn credit(&self, to: &Address, amount: u128) -> Result<()> {
        self.mint(to, amount);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    /// Bridging fee to the fee sink
    Fee,
    /// Net value to the recipient on finalize
    Release,
    /// Net value back to the sender after a rejection quorum
    Refund,
    /// Net value back to the sender after expiry
    Reclaim,
}

/// A payment out of custody awaiting execution on the external ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub message_id: MessageId,
    pub kind: TransferKind,
    pub to: Address,
    pub amount: u128,
    pub attempts: u32,
}

#[derive(Debug, Default)]
struct CustodyState {
    /// Net value of local messages not yet paid out
    locked: u128,
    /// Funded destination liquidity for relayed messages
    liquidity: u128,
    /// Messages whose net value already left custody
    settled: HashSet<MessageId>,
}

pub struct AssetCustodian {
    state: Mutex<CustodyState>,
    outbox: Mutex<VecDeque<Transfer>>,
    ledger: Arc<dyn ValueLedger>,
}

impl AssetCustodian {
    pub fn new(ledger: Arc<dyn ValueLedger>) -> Self {
        Self {
            state: Mutex::new(CustodyState::default()),
            outbox: Mutex::new(VecDeque::new()),
            ledger,
        }
    }

    /// Total value held across both pools
    pub fn balance(&self) -> u128 {
        let state = self.state.lock();
        state.locked.saturating_add(state.liquidity)
    }

    pub fn locked(&self) -> u128 {
        self.state.lock().locked
    }

    pub fn liquidity(&self) -> u128 {
        self.state.lock().liquidity
    }

    pub fn is_settled(&self, message_id: &MessageId) -> bool {
        self.state.lock().settled.contains(message_id)
    }

    /// Pull `amount` from `sender` into custody. Only the net amount stays in
    /// the locked pool; the fee is routed with [`Self::route_fee`] once the
    /// message exists.
    pub(crate) fn lock(&self, sender: &Address, amount: u128, fee: u128) -> Result<u128> {
        let net = amount
            .checked_sub(fee)
            .ok_or(BridgeError::FeeExceedsAmount { fee, amount })?;

        self.ledger.debit(sender, amount)?;

        let mut state = self.state.lock();
        match state.locked.checked_add(net) {
            Some(locked) => state.locked = locked,
            None => {
                drop(state);
                self.ledger.credit(sender, amount)?;
                return Err(BridgeError::Overflow("locked custody"));
            }
        }

        debug!("Locked {} from {} (net {}, fee {})", amount, sender, net, fee);
        Ok(net)
    }

    /// Undo a [`Self::lock`] whose message could not be recorded.
    pub(crate) fn unlock(&self, sender: &Address, amount: u128, net: u128) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.locked = state.locked.saturating_sub(net);
        }
        warn!("Returning {} to {} after failed message creation", amount, sender);
        self.ledger.credit(sender, amount)
    }

    pub(crate) fn route_fee(&self, message_id: MessageId, fee_sink: &Address, fee: u128) {
        if fee > 0 {
            self.enqueue(Transfer {
                message_id,
                kind: TransferKind::Fee,
                to: fee_sink.clone(),
                amount: fee,
                attempts: 0,
            });
        }
    }

    /// Add destination liquidity used to release relayed messages. Returns
    /// the new liquidity balance.
    pub(crate) fn fund(&self, from: &Address, amount: u128) -> Result<u128> {
        self.ledger.debit(from, amount)?;

        let mut state = self.state.lock();
        match state.liquidity.checked_add(amount) {
            Some(liquidity) => state.liquidity = liquidity,
            None => {
                drop(state);
                self.ledger.credit(from, amount)?;
                return Err(BridgeError::Overflow("custody liquidity"));
            }
        }
        info!("Custody funded with {} by {}", amount, from);
        Ok(state.liquidity)
    }

    /// Debit the net value of a message exactly once from the pool its origin
    /// draws on, and queue the payout. Returns false when the message had
    /// already settled.
    pub(crate) fn settle(
        &self,
        message_id: MessageId,
        origin: MessageOrigin,
        kind: TransferKind,
        to: &Address,
        amount: u128,
    ) -> Result<bool> {
        {
            let mut state = self.state.lock();
            if state.settled.contains(&message_id) {
                warn!("Message {} already settled, skipping {:?}", message_id, kind);
                return Ok(false);
            }

            let pool = match origin {
                MessageOrigin::Local => &mut state.locked,
                MessageOrigin::Relayed => &mut state.liquidity,
            };
            if *pool < amount {
                error!(
                    "Custody shortfall settling {} from {:?} pool: available {}, requested {}",
                    message_id, origin, *pool, amount
                );
                return Err(BridgeError::InsufficientCustody {
                    available: *pool,
                    requested: amount,
                });
            }

            *pool -= amount;
            state.settled.insert(message_id);
        }

        if amount > 0 {
            self.enqueue(Transfer {
                message_id,
                kind,
                to: to.clone(),
                amount,
                attempts: 0,
            });
        }
        Ok(true)
    }

    fn enqueue(&self, transfer: Transfer) {
        self.outbox.lock().push_back(transfer);
    }

    pub fn pending_transfers(&self) -> Vec<Transfer> {
        self.outbox.lock().iter().cloned().collect()
    }

    /// Execute queued transfers against the external ledger. Failed transfers
    /// go back to the queue. Returns the transfers that completed.
    pub fn drain_outbox(&self) -> Vec<Transfer> {
        let batch: Vec<Transfer> = self.outbox.lock().drain(..).collect();
        let mut done = Vec::with_capacity(batch.len());
        let mut failed = Vec::new();

        for mut transfer in batch {
            match self.ledger.credit(&transfer.to, transfer.amount) {
                Ok(()) => {
                    debug!(
                        "{:?} of {} to {} for message {}",
                        transfer.kind, transfer.amount, transfer.to, transfer.message_id
                    );
                    done.push(transfer);
                }
                Err(e) => {
                    transfer.attempts += 1;
                    warn!(
                        "{:?} transfer for message {} failed (attempt {}): {}",
                        transfer.kind, transfer.message_id, transfer.attempts, e
                    );
                    failed.push(transfer);
                }
            }
        }

        if !failed.is_empty() {
            self.outbox.lock().extend(failed);
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custodian() -> (AssetCustodian, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        (AssetCustodian::new(ledger.clone()), ledger)
    }

    #[test]
    fn test_lock_keeps_net_and_queues_fee() {
        let (custodian, ledger) = custodian();
        let alice = Address::from("alice");
        let sink = Address::from("sink");
        ledger.mint(&alice, 1_000);

        let net = custodian.lock(&alice, 1_000, 30).unwrap();
        custodian.route_fee(MessageId([1; 32]), &sink, 30);
        assert_eq!(net, 970);
        assert_eq!(custodian.balance(), 970);
        assert_eq!(ledger.balance_of(&alice), 0);

        let done = custodian.drain_outbox();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].kind, TransferKind::Fee);
        assert_eq!(ledger.balance_of(&sink), 30);
    }

    #[test]
    fn test_lock_without_funds_changes_nothing() {
        let (custodian, _) = custodian();
        let err = custodian.lock(&Address::from("alice"), 1_000, 30).unwrap_err();
        assert!(matches!(err, BridgeError::LedgerTransfer(_)));
        assert_eq!(custodian.balance(), 0);
        assert!(custodian.pending_transfers().is_empty());
    }

    #[test]
    fn test_unlock_restores_sender() {
        let (custodian, ledger) = custodian();
        let alice = Address::from("alice");
        ledger.mint(&alice, 1_000);
        let net = custodian.lock(&alice, 1_000, 30).unwrap();
        custodian.unlock(&alice, 1_000, net).unwrap();
        assert_eq!(custodian.balance(), 0);
        assert_eq!(ledger.balance_of(&alice), 1_000);
    }

    #[test]
    fn test_settle_once() {
        let (custodian, ledger) = custodian();
        let funder = Address::from("funder");
        let bob = Address::from("bob");
        ledger.mint(&funder, 500);
        custodian.fund(&funder, 500).unwrap();

        let id = MessageId([2; 32]);
        assert!(custodian
            .settle(id, MessageOrigin::Relayed, TransferKind::Release, &bob, 200)
            .unwrap());
        assert!(!custodian
            .settle(id, MessageOrigin::Relayed, TransferKind::Release, &bob, 200)
            .unwrap());
        assert_eq!(custodian.liquidity(), 300);

        custodian.drain_outbox();
        assert_eq!(ledger.balance_of(&bob), 200);
    }

    #[test]
    fn test_settle_never_partial() {
        let (custodian, _) = custodian();
        let id = MessageId([3; 32]);
        let err = custodian
            .settle(id, MessageOrigin::Local, TransferKind::Release, &Address::from("bob"), 1)
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::InsufficientCustody {
                available: 0,
                requested: 1
            }
        );
        assert!(!custodian.is_settled(&id));
    }

    #[test]
    fn test_pools_do_not_cover_each_other() {
        let (custodian, ledger) = custodian();
        let alice = Address::from("alice");
        let funder = Address::from("funder");
        ledger.mint(&alice, 1_000);
        ledger.mint(&funder, 400);

        custodian.lock(&alice, 1_000, 0).unwrap();
        let err = custodian
            .settle(MessageId([5; 32]), MessageOrigin::Relayed, TransferKind::Release, &funder, 500)
            .unwrap_err();
        assert_eq!(
            err,
            BridgeError::InsufficientCustody {
                available: 0,
                requested: 500
            }
        );
        assert_eq!(custodian.locked(), 1_000);

        custodian.fund(&funder, 400).unwrap();
        let err = custodian
            .settle(MessageId([6; 32]), MessageOrigin::Local, TransferKind::Reclaim, &alice, 1_200)
            .unwrap_err();
        assert!(matches!(err, BridgeError::InsufficientCustody { available: 1_000, .. }));
        assert_eq!((custodian.locked(), custodian.liquidity()), (1_000, 400));
        assert_eq!(custodian.balance(), 1_400);
    }

    struct FlakyLedger {
        inner: InMemoryLedger,
        fail: std::sync::atomic::AtomicBool,
    }

    impl ValueLedger for FlakyLedger {
        fn debit(&self, from: &Address, amount: u128) -> Result<()> {
            self.inner.debit(from, amount)
        }

        fn credit(&self, to: &Address, amount: u128) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(BridgeError::LedgerTransfer("ledger offline".to_string()));
            }
            self.inner.credit(to, amount)
        }
    }

    #[test]
    fn test_failed_transfers_stay_queued() {
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryLedger::new(),
            fail: std::sync::atomic::AtomicBool::new(true),
        });
        let custodian = AssetCustodian::new(ledger.clone());
        let alice = Address::from("alice");
        ledger.inner.mint(&alice, 100);
        custodian.lock(&alice, 100, 10).unwrap();
        custodian.route_fee(MessageId([4; 32]), &Address::from("sink"), 10);

        assert!(custodian.drain_outbox().is_empty());
        let pending = custodian.pending_transfers();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);

        ledger.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(custodian.drain_outbox().len(), 1);
        assert!(custodian.pending_transfers().is_empty());
        assert_eq!(ledger.inner.balance_of(&Address::from("sink")), 10);
    }
}
