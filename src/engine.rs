//! Engine facade wiring the executor, store, and watcher together
//!
//! Embedding applications build one [`Engine`] per signing account, start
//! the watcher, and execute flows against it. All collaborators can also be
//! assembled by hand for finer control; this facade only encodes the
//! default wiring.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::chain::ChainManager;
use crate::config::{EngineConfig, Settings};
use crate::error::EngineResult;
use crate::executor::{FlowContext, FlowExecutor, FlowOutcome};
use crate::flow::Flow;
use crate::notify::{AppNotification, BroadcastSink, NotificationSink};
use crate::signer::{FlowSigner, LocalSigner};
use crate::store::TransactionStore;
use crate::watcher::TransactionWatcher;

/// Assembled flow engine for one signing account
pub struct Engine {
    chain_manager: Arc<ChainManager>,
    store: Arc<TransactionStore>,
    notifications: Arc<BroadcastSink>,
    executor: Arc<FlowExecutor>,
    watcher: TransactionWatcher,
}

impl Engine {
    /// Build the engine from loaded settings, including the local signer
    pub fn from_settings(settings: &Settings) -> EngineResult<Self> {
        let chain_manager = Arc::new(ChainManager::from_settings(settings)?);
        let signer = Arc::new(LocalSigner::load(&settings.wallet)?);
        Self::new(chain_manager, signer, settings.engine.clone())
    }

    /// Build the engine from explicit collaborators
    pub fn new(
        chain_manager: Arc<ChainManager>,
        signer: Arc<dyn FlowSigner>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let store = Arc::new(TransactionStore::new());
        let notifications = Arc::new(BroadcastSink::new());
        let sink: Arc<dyn NotificationSink> = notifications.clone();

        let executor = Arc::new(FlowExecutor::new(
            chain_manager.clone(),
            signer,
            store.clone(),
            sink.clone(),
            config.clone(),
        ));
        let watcher = TransactionWatcher::new(
            chain_manager.clone(),
            store.clone(),
            sink,
            config,
        );

        info!(
            "Engine initialized for {} chains",
            chain_manager.connected_chains().len()
        );

        Ok(Self {
            chain_manager,
            store,
            notifications,
            executor,
            watcher,
        })
    }

    /// Spawn the watcher loop; the handle aborts it on shutdown
    pub fn start_watcher(&self) -> JoinHandle<()> {
        let watcher = self.watcher.clone();
        tokio::spawn(async move { watcher.run().await })
    }

    /// Execute a flow to completion
    pub async fn execute(&self, flow: &Flow, ctx: &FlowContext) -> EngineResult<FlowOutcome> {
        self.executor.run(flow, ctx).await
    }

    /// Transaction history and pending state
    pub fn store(&self) -> Arc<TransactionStore> {
        self.store.clone()
    }

    /// Subscribe to lifecycle notifications
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<AppNotification> {
        self.notifications.subscribe()
    }

    /// Chains this engine can submit to
    pub fn connected_chains(&self) -> Vec<u64> {
        self.chain_manager.connected_chains()
    }
}
