//! Notification dispatch surface
//!
//! The executor and watcher report lifecycle events through a
//! [`NotificationSink`]; rendering (toasts, badges) belongs to the embedding
//! application.

use tokio::sync::broadcast;

use crate::txn::{TransactionStatus, TransactionTypeInfo, TxId, WrapType};

/// Lifecycle events surfaced to the UI layer
#[derive(Debug, Clone, PartialEq)]
pub enum AppNotification {
    /// A swap or wrap was submitted and is awaiting confirmation
    SwapPending { wrap_type: WrapType },
    /// A watched transaction reached a terminal status
    TransactionUpdate {
        id: TxId,
        chain_id: u64,
        status: TransactionStatus,
        type_info: TransactionTypeInfo,
    },
    /// The watcher could not determine a transaction's status
    WatcherError { chain_id: u64, message: String },
}

impl AppNotification {
    /// Notification name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            AppNotification::SwapPending { .. } => "swap_pending",
            AppNotification::TransactionUpdate { .. } => "transaction_update",
            AppNotification::WatcherError { .. } => "watcher_error",
        }
    }
}

/// Receives notifications from the executor and watcher
pub trait NotificationSink: Send + Sync {
    fn push(&self, notification: AppNotification);
}

/// Fan-out sink backed by a broadcast channel
pub struct BroadcastSink {
    tx: broadcast::Sender<AppNotification>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppNotification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for BroadcastSink {
    fn push(&self, notification: AppNotification) {
        crate::metrics::record_notification(notification.name());
        // No subscribers is fine
        let _ = self.tx.send(notification);
    }
}

/// Sink that drops everything, for embedders without a notification UI
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn push(&self, _notification: AppNotification) {}
}
