//! In-memory transaction store
//!
//! Owns the keyed map of [`TransactionDetails`] records and the only write
//! paths into it. The store is created by the embedding application and
//! passed by handle into the executor and watcher; there is no ambient
//! global state. Records move monotonically from `Pending` to exactly one
//! terminal status and are retained for history afterwards.

use dashmap::DashMap;
use ethers::types::H256;
use tokio::sync::broadcast;

use crate::error::{EngineError, EngineResult};
use crate::txn::{ReceiptInfo, TransactionDetails, TransactionStatus, TxId};

/// Store change notifications, consumed by the watcher
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A new pending record was added
    Added(TransactionDetails),
    /// A pending record was resubmitted under a new hash
    Replaced(TransactionDetails),
    /// A record reached a terminal status
    Finalized(TransactionDetails),
}

/// Per-status record counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub pending: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub canceled: u64,
}

/// Keyed map of transaction records with monotonic status transitions
pub struct TransactionStore {
    transactions: DashMap<TxId, TransactionDetails>,
    event_tx: broadcast::Sender<StoreEvent>,
}

impl TransactionStore {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(10000);
        Self {
            transactions: DashMap::new(),
            event_tx,
        }
    }

    /// Subscribe to store change events
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.event_tx.subscribe()
    }

    /// Add a new pending record
    pub fn add(&self, details: TransactionDetails) -> EngineResult<()> {
        if self.transactions.contains_key(&details.id) {
            return Err(EngineError::Internal(format!(
                "transaction {} already tracked",
                details.id
            )));
        }

        self.transactions.insert(details.id, details.clone());
        self.emit(StoreEvent::Added(details));
        Ok(())
    }

    /// Move a pending record to a terminal status.
    ///
    /// Reopening a terminal record, or "transitioning" to pending, is
    /// rejected.
    pub fn update_status(
        &self,
        id: TxId,
        status: TransactionStatus,
        receipt: Option<ReceiptInfo>,
    ) -> EngineResult<TransactionDetails> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or(EngineError::TransactionNotFound { id: id.to_string() })?;

        if entry.status.is_terminal() || !status.is_terminal() {
            return Err(EngineError::InvalidStateTransition {
                from: entry.status.to_string(),
                to: status.to_string(),
            });
        }

        entry.status = status;
        entry.finalized_at = Some(chrono::Utc::now());
        entry.receipt = receipt;

        let updated = entry.clone();
        drop(entry);

        self.emit(StoreEvent::Finalized(updated.clone()));
        Ok(updated)
    }

    /// Finalize a record if it is still pending.
    ///
    /// Returns `Ok(None)` when another writer already finalized it; both the
    /// executor's blocking wait and the watcher may race to report the same
    /// receipt, and the first writer wins.
    pub fn finalize_if_pending(
        &self,
        id: TxId,
        status: TransactionStatus,
        receipt: Option<ReceiptInfo>,
    ) -> EngineResult<Option<TransactionDetails>> {
        {
            let entry = self
                .transactions
                .get(&id)
                .ok_or(EngineError::TransactionNotFound { id: id.to_string() })?;
            if entry.status.is_terminal() {
                return Ok(None);
            }
        }

        match self.update_status(id, status, receipt) {
            Ok(updated) => Ok(Some(updated)),
            // Lost the race to another writer between the check and the update
            Err(EngineError::InvalidStateTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Record a resubmission: same record, new hash, still pending
    pub fn replace_hash(&self, id: TxId, new_hash: H256) -> EngineResult<TransactionDetails> {
        let mut entry = self
            .transactions
            .get_mut(&id)
            .ok_or(EngineError::TransactionNotFound { id: id.to_string() })?;

        if entry.status.is_terminal() {
            return Err(EngineError::InvalidStateTransition {
                from: entry.status.to_string(),
                to: TransactionStatus::Pending.to_string(),
            });
        }

        entry.hash = Some(new_hash);
        let updated = entry.clone();
        drop(entry);

        self.emit(StoreEvent::Replaced(updated.clone()));
        Ok(updated)
    }

    /// Get a record by id
    pub fn get(&self, id: TxId) -> Option<TransactionDetails> {
        self.transactions.get(&id).map(|t| t.clone())
    }

    /// All records still awaiting a terminal status
    pub fn pending(&self) -> Vec<TransactionDetails> {
        self.transactions
            .iter()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.clone())
            .collect()
    }

    /// Pending records for one chain
    pub fn pending_for_chain(&self, chain_id: u64) -> Vec<TransactionDetails> {
        self.transactions
            .iter()
            .filter(|t| t.chain_id == chain_id && !t.status.is_terminal())
            .map(|t| t.clone())
            .collect()
    }

    /// Per-status counts
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        for t in self.transactions.iter() {
            match t.status {
                TransactionStatus::Pending => stats.pending += 1,
                TransactionStatus::Confirmed => stats.confirmed += 1,
                TransactionStatus::Failed => stats.failed += 1,
                TransactionStatus::Canceled => stats.canceled += 1,
            }
        }
        stats
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine; the watcher may not be running yet
        let _ = self.event_tx.send(event);
    }
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::TransactionTypeInfo;
    use ethers::types::{Address, U256};

    fn record() -> TransactionDetails {
        TransactionDetails::new(
            1,
            Address::from([0x11; 20]),
            H256::from([0xab; 32]),
            TransactionTypeInfo::Swap {
                input_currency_id: "1-native".to_string(),
                output_currency_id: "1-0xToken".to_string(),
                input_amount: U256::from(100),
                output_amount: U256::from(200),
            },
        )
    }

    #[test]
    fn test_add_and_get() {
        let store = TransactionStore::new();
        let details = record();
        let id = details.id;

        store.add(details).unwrap();
        let stored = store.get(id).unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
        assert_eq!(store.pending().len(), 1);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let store = TransactionStore::new();
        let details = record();
        store.add(details.clone()).unwrap();
        assert!(store.add(details).is_err());
    }

    #[test]
    fn test_terminal_records_never_reopen() {
        let store = TransactionStore::new();
        let details = record();
        let id = details.id;
        store.add(details).unwrap();

        store
            .update_status(id, TransactionStatus::Confirmed, None)
            .unwrap();

        let err = store
            .update_status(id, TransactionStatus::Failed, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));

        let err = store.replace_hash(id, H256::from([0xcd; 32])).unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_transition_to_pending_rejected() {
        let store = TransactionStore::new();
        let details = record();
        let id = details.id;
        store.add(details).unwrap();

        let err = store
            .update_status(id, TransactionStatus::Pending, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_replace_hash_keeps_record_pending() {
        let store = TransactionStore::new();
        let details = record();
        let id = details.id;
        store.add(details).unwrap();

        let new_hash = H256::from([0xcd; 32]);
        let updated = store.replace_hash(id, new_hash).unwrap();
        assert_eq!(updated.hash, Some(new_hash));
        assert_eq!(updated.status, TransactionStatus::Pending);
    }

    #[test]
    fn test_finalize_if_pending_is_first_writer_wins() {
        let store = TransactionStore::new();
        let details = record();
        let id = details.id;
        store.add(details).unwrap();

        let first = store
            .finalize_if_pending(id, TransactionStatus::Confirmed, None)
            .unwrap();
        assert!(first.is_some());

        let second = store
            .finalize_if_pending(id, TransactionStatus::Failed, None)
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.get(id).unwrap().status, TransactionStatus::Confirmed);
    }

    #[test]
    fn test_events_emitted_in_order() {
        tokio_test::block_on(async {
            let store = TransactionStore::new();
            let mut events = store.subscribe();

            let details = record();
            let id = details.id;
            store.add(details).unwrap();
            store.replace_hash(id, H256::from([0xcd; 32])).unwrap();
            store
                .update_status(id, TransactionStatus::Confirmed, None)
                .unwrap();

            assert!(matches!(events.recv().await.unwrap(), StoreEvent::Added(_)));
            assert!(matches!(
                events.recv().await.unwrap(),
                StoreEvent::Replaced(_)
            ));
            match events.recv().await.unwrap() {
                StoreEvent::Finalized(t) => {
                    assert_eq!(t.status, TransactionStatus::Confirmed);
                    assert!(t.finalized_at.is_some());
                }
                other => panic!("unexpected event: {:?}", other),
            }
        });
    }

    #[test]
    fn test_stats_counts_by_status() {
        let store = TransactionStore::new();
        let a = record();
        let b = record();
        let id_a = a.id;
        store.add(a).unwrap();
        store.add(b).unwrap();
        store
            .update_status(id_a, TransactionStatus::Failed, None)
            .unwrap();

        assert_eq!(
            store.stats(),
            StoreStats {
                pending: 1,
                failed: 1,
                ..Default::default()
            }
        );
    }
}
