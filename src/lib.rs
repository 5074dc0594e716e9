//! txflow - Transaction flow execution engine
//!
//! Runs user-initiated wallet operations (swaps, wraps, liquidity
//! increases) as ordered step plans against EVM chains: allowance
//! revocations and approvals, Permit2 signatures, and the terminal send,
//! strictly in dependency order. Submitted transactions are tracked in an
//! injected store and monitored to a terminal status by the watcher.
//!
//! The UI layer, keystores, trading backend, and RPC nodes are external
//! collaborators behind the [`notify::NotificationSink`],
//! [`signer::FlowSigner`], [`executor::SwapRequestBuilder`], and
//! [`chain::ChainClient`] seams.

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod flow;
pub mod metrics;
pub mod notify;
pub mod signer;
pub mod steps;
pub mod store;
pub mod tx;
pub mod txn;
pub mod watcher;

pub use chain::{ChainClient, ChainManager, RpcClient};
pub use config::Settings;
pub use engine::Engine;
pub use error::{EngineError, EngineResult, FailureKind};
pub use executor::{FlowCallbacks, FlowContext, FlowExecutor, FlowOutcome, TerminalArtifact};
pub use flow::{order_steps, Flow, LiquidityFlow, SwapFlow, SwapTerminal, WrapFlow};
pub use notify::{AppNotification, BroadcastSink, NotificationSink};
pub use signer::{FlowSigner, LocalSigner};
pub use steps::TransactionStep;
pub use store::{StoreEvent, TransactionStore};
pub use txn::{TransactionDetails, TransactionStatus, TransactionTypeInfo, WrapType};
pub use watcher::TransactionWatcher;

/// Initialize tracing output for embedders without their own subscriber
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,txflow=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}
