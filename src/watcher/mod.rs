//! Transaction watcher
//!
//! Long-lived monitor for submitted transactions. On startup it re-attaches
//! to every record still pending in the store (detecting completions that
//! happened while the embedding app was closed), then follows store events,
//! forking one monitor task per (record, hash). Monitors poll for a receipt
//! and finalize the record once the chain's confirmation depth is reached.
//!
//! Monitoring is one-shot per hash: a resubmission under a new hash starts
//! a fresh monitor, and the stale monitor exits on its next poll when it
//! sees the record no longer carries its hash. Every monitor also carries
//! an explicit timeout after which the record is marked failed, so no task
//! outlives the configured bound.

use dashmap::DashMap;
use ethers::types::H256;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::chain::ChainManager;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::notify::{AppNotification, NotificationSink};
use crate::store::{StoreEvent, TransactionStore};
use crate::txn::{ReceiptInfo, TransactionDetails, TransactionStatus, TxId};

/// Watches pending transactions until they reach a terminal status
#[derive(Clone)]
pub struct TransactionWatcher {
    chain_manager: Arc<ChainManager>,
    store: Arc<TransactionStore>,
    notifications: Arc<dyn NotificationSink>,
    config: EngineConfig,
    /// Latest hash being monitored per record
    watching: Arc<DashMap<TxId, H256>>,
}

impl TransactionWatcher {
    pub fn new(
        chain_manager: Arc<ChainManager>,
        store: Arc<TransactionStore>,
        notifications: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            chain_manager,
            store,
            notifications,
            config,
            watching: Arc::new(DashMap::new()),
        }
    }

    /// Main watching loop
    pub async fn run(&self) {
        info!("Transaction watcher started");

        // Re-attach to anything that was pending before we started
        let mut events = self.store.subscribe();
        for details in self.store.pending() {
            self.maybe_spawn_monitor(&details);
        }

        loop {
            match events.recv().await {
                Ok(StoreEvent::Added(details)) | Ok(StoreEvent::Replaced(details)) => {
                    self.maybe_spawn_monitor(&details);
                }
                Ok(StoreEvent::Finalized(details)) => {
                    self.watching.remove(&details.id);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Watcher lagged by {} events, re-scanning pending", skipped);
                    for details in self.store.pending() {
                        self.maybe_spawn_monitor(&details);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("Transaction watcher stopped");
    }

    /// Fork a monitor for this record's current hash, unless one exists.
    ///
    /// One-shot per hash: a record whose hash we already monitor is skipped;
    /// a replaced hash gets a fresh monitor while the stale one exits on its
    /// own.
    fn maybe_spawn_monitor(&self, details: &TransactionDetails) {
        let hash = match details.hash {
            Some(hash) => hash,
            None => return,
        };
        if details.status.is_terminal() {
            return;
        }
        if let Some(existing) = self.watching.get(&details.id) {
            if *existing == hash {
                return;
            }
        }

        self.watching.insert(details.id, hash);
        debug!(
            "Forking monitor for tx {} ({:?}) on chain {}",
            details.id, hash, details.chain_id
        );

        let watcher = self.clone();
        let details = details.clone();
        tokio::spawn(async move {
            watcher.run_monitor(details, hash).await;
        });
    }

    async fn run_monitor(&self, details: TransactionDetails, hash: H256) {
        let chain_id = details.chain_id;
        crate::metrics::record_monitor_started(chain_id);

        if let Err(e) = self.monitor(&details, hash).await {
            error!(
                file = "watcher",
                function = "monitor",
                chain_id,
                tx_hash = ?hash,
                error = %e,
                "Monitor failed"
            );
            self.notifications.push(AppNotification::WatcherError {
                chain_id,
                message: e.to_string(),
            });
        }

        crate::metrics::record_monitor_finished(chain_id);
        // Only clear our own registration; a replacement may own the slot now
        self.watching
            .remove_if(&details.id, |_, watched| *watched == hash);
    }

    async fn monitor(&self, details: &TransactionDetails, hash: H256) -> EngineResult<()> {
        let client = self.chain_manager.get_client(details.chain_id)?;
        let required = self.chain_manager.confirmation_blocks(details.chain_id)?;

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let deadline = Instant::now() + Duration::from_secs(self.config.confirmation_timeout_secs);

        loop {
            // Another writer may have finalized the record, or a
            // resubmission may have superseded our hash
            match self.store.get(details.id) {
                None => return Ok(()),
                Some(current) => {
                    if current.status.is_terminal() {
                        return Ok(());
                    }
                    if current.hash != Some(hash) {
                        debug!(
                            "Monitor for stale hash {:?} of tx {} exiting",
                            hash, details.id
                        );
                        return Ok(());
                    }
                }
            }

            match client.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    if let Some(block_number) = receipt.block_number {
                        let head = client.block_number().await?;
                        let confirmations = head.saturating_sub(block_number.as_u64());

                        if confirmations >= required {
                            let success = receipt.status == Some(1u64.into());
                            return self.finalize(details, hash, block_number.as_u64(), receipt.gas_used, success);
                        }

                        debug!(
                            "Transaction {:?} has {} / {} confirmations on chain {}",
                            hash, confirmations, required, details.chain_id
                        );
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    warn!("Receipt poll failed on chain {}: {}", details.chain_id, e);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                warn!(
                    "Transaction {:?} on chain {} unconfirmed after timeout, marking failed",
                    hash, details.chain_id
                );
                if let Some(updated) =
                    self.store
                        .finalize_if_pending(details.id, TransactionStatus::Failed, None)?
                {
                    crate::metrics::record_tx_failed(details.chain_id);
                    self.push_update(&updated);
                }
                return Ok(());
            }

            sleep(poll).await;
        }
    }

    fn finalize(
        &self,
        details: &TransactionDetails,
        hash: H256,
        block_number: u64,
        gas_used: Option<ethers::types::U256>,
        success: bool,
    ) -> EngineResult<()> {
        let status = if success {
            TransactionStatus::Confirmed
        } else {
            TransactionStatus::Failed
        };
        let receipt = ReceiptInfo {
            block_number,
            gas_used,
            success,
        };

        if let Some(updated) =
            self.store
                .finalize_if_pending(details.id, status, Some(receipt))?
        {
            let latency =
                (chrono::Utc::now() - updated.added_at).num_milliseconds() as f64 / 1000.0;
            if success {
                info!(
                    "Transaction {:?} confirmed on chain {} at block {}",
                    hash, details.chain_id, block_number
                );
                crate::metrics::record_tx_confirmed(details.chain_id, latency);
            } else {
                warn!(
                    "Transaction {:?} reverted on chain {} at block {}",
                    hash, details.chain_id, block_number
                );
                crate::metrics::record_tx_failed(details.chain_id);
            }
            self.push_update(&updated);
        }

        Ok(())
    }

    fn push_update(&self, details: &TransactionDetails) {
        self.notifications.push(AppNotification::TransactionUpdate {
            id: details.id,
            chain_id: details.chain_id,
            status: details.status,
            type_info: details.type_info.clone(),
        });
    }

    /// Number of monitors currently registered
    pub fn active_monitors(&self) -> usize {
        self.watching.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;
    use crate::notify::NotificationSink;
    use crate::txn::TransactionTypeInfo;
    use ethers::types::{Address, TransactionReceipt, U256};
    use std::sync::Mutex;

    struct RecordingSink {
        notifications: Mutex<Vec<AppNotification>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                notifications: Mutex::new(Vec::new()),
            }
        }

        fn all(&self) -> Vec<AppNotification> {
            self.notifications.lock().unwrap().clone()
        }
    }

    impl NotificationSink for RecordingSink {
        fn push(&self, notification: AppNotification) {
            self.notifications.lock().unwrap().push(notification);
        }
    }

    fn engine_config(timeout_secs: u64) -> EngineConfig {
        EngineConfig {
            max_retries: 2,
            retry_delay_ms: 1,
            send_timeout_secs: 5,
            wait_for_confirmation: false,
            confirmation_timeout_secs: timeout_secs,
            poll_interval_ms: 5,
        }
    }

    fn record(hash: H256) -> TransactionDetails {
        TransactionDetails::new(
            1,
            Address::from([0x11; 20]),
            hash,
            TransactionTypeInfo::Wrap {
                unwrapped: false,
                amount: U256::from(5),
            },
        )
    }

    struct Harness {
        watcher: TransactionWatcher,
        store: Arc<TransactionStore>,
        sink: Arc<RecordingSink>,
    }

    fn harness(client: MockChainClient, confirmations: u64, timeout_secs: u64) -> Harness {
        let manager = ChainManager::new();
        manager.insert(Arc::new(client), confirmations);

        let store = Arc::new(TransactionStore::new());
        let sink = Arc::new(RecordingSink::new());
        let watcher = TransactionWatcher::new(
            Arc::new(manager),
            store.clone(),
            sink.clone(),
            engine_config(timeout_secs),
        );

        Harness {
            watcher,
            store,
            sink,
        }
    }

    async fn wait_for_terminal(store: &TransactionStore, id: TxId) -> TransactionDetails {
        for _ in 0..500 {
            if let Some(details) = store.get(id) {
                if details.status.is_terminal() {
                    return details;
                }
            }
            sleep(Duration::from_millis(2)).await;
        }
        panic!("transaction never reached a terminal status");
    }

    fn mined_receipt(hash: H256, success: bool) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            block_number: Some(100u64.into()),
            status: Some((if success { 1u64 } else { 0u64 }).into()),
            gas_used: Some(U256::from(30_000)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_confirms_once_depth_reached() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(1u64);
        client
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(mined_receipt(hash, true))));
        client.expect_block_number().returning(|| Ok(132));

        let h = harness(client, 32, 60);
        let details = record(H256::repeat_byte(0xaa));
        let id = details.id;

        let watcher = h.watcher.clone();
        let handle = tokio::spawn(async move { watcher.run().await });

        h.store.add(details).unwrap();

        let finalized = wait_for_terminal(&h.store, id).await;
        assert_eq!(finalized.status, TransactionStatus::Confirmed);
        assert_eq!(finalized.receipt.as_ref().unwrap().block_number, 100);

        let updates = h.sink.all();
        assert!(updates.iter().any(|n| matches!(
            n,
            AppNotification::TransactionUpdate {
                status: TransactionStatus::Confirmed,
                ..
            }
        )));

        handle.abort();
    }

    #[tokio::test]
    async fn test_reverted_transaction_marked_failed() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(1u64);
        client
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(mined_receipt(hash, false))));
        client.expect_block_number().returning(|| Ok(200));

        let h = harness(client, 1, 60);
        let details = record(H256::repeat_byte(0xab));
        let id = details.id;

        let watcher = h.watcher.clone();
        let handle = tokio::spawn(async move { watcher.run().await });

        h.store.add(details).unwrap();

        let finalized = wait_for_terminal(&h.store, id).await;
        assert_eq!(finalized.status, TransactionStatus::Failed);
        assert!(!finalized.receipt.as_ref().unwrap().success);

        handle.abort();
    }

    #[tokio::test]
    async fn test_replaced_hash_forks_new_monitor_only() {
        let old_hash = H256::repeat_byte(0x01);
        let new_hash = H256::repeat_byte(0x02);

        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(1u64);
        // The original hash never lands; the replacement does
        client.expect_transaction_receipt().returning(move |hash| {
            if hash == new_hash {
                Ok(Some(mined_receipt(hash, true)))
            } else {
                Ok(None)
            }
        });
        client.expect_block_number().returning(|| Ok(200));

        let h = harness(client, 1, 60);
        let details = record(old_hash);
        let id = details.id;

        let watcher = h.watcher.clone();
        let handle = tokio::spawn(async move { watcher.run().await });

        h.store.add(details).unwrap();
        // Give the first monitor a chance to attach, then resubmit
        sleep(Duration::from_millis(10)).await;
        h.store.replace_hash(id, new_hash).unwrap();

        let finalized = wait_for_terminal(&h.store, id).await;
        assert_eq!(finalized.status, TransactionStatus::Confirmed);
        assert_eq!(finalized.hash, Some(new_hash));

        // Stale monitor exited; registration cleared after finalize
        sleep(Duration::from_millis(20)).await;
        assert_eq!(h.watcher.active_monitors(), 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_unconfirmed_transaction_fails_after_timeout() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(1u64);
        client.expect_transaction_receipt().returning(|_| Ok(None));

        // Zero timeout: the first poll that finds nothing gives up
        let h = harness(client, 1, 0);
        let details = record(H256::repeat_byte(0xcc));
        let id = details.id;

        let watcher = h.watcher.clone();
        let handle = tokio::spawn(async move { watcher.run().await });

        h.store.add(details).unwrap();

        let finalized = wait_for_terminal(&h.store, id).await;
        assert_eq!(finalized.status, TransactionStatus::Failed);
        assert!(finalized.receipt.is_none());

        handle.abort();
    }

    #[tokio::test]
    async fn test_reattaches_to_pending_records_on_start() {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(1u64);
        client
            .expect_transaction_receipt()
            .returning(|hash| Ok(Some(mined_receipt(hash, true))));
        client.expect_block_number().returning(|| Ok(200));

        let h = harness(client, 1, 60);
        let details = record(H256::repeat_byte(0xdd));
        let id = details.id;

        // Record added before the watcher starts
        h.store.add(details).unwrap();

        let watcher = h.watcher.clone();
        let handle = tokio::spawn(async move { watcher.run().await });

        let finalized = wait_for_terminal(&h.store, id).await;
        assert_eq!(finalized.status, TransactionStatus::Confirmed);

        handle.abort();
    }
}
