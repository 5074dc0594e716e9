//! Sequential step executor
//!
//! Consumes the plan produced by the orderer and runs it step by step
//! within one cooperative task. On-chain steps are built, signed, and
//! submitted through the `tx` module; signature steps produce an ephemeral
//! [`SignedPermit`] consumed by the immediately following step and never
//! persisted. Step N's artifact (hash or signature) is always visible
//! before step N+1 begins.
//!
//! Any step failure aborts the remainder of the flow with a typed error;
//! nothing is swallowed mid-flow. Independent flows may run concurrently,
//! each executor invocation owning its own plan and permit state.

use ethers::types::{Signature, TransactionRequest, H256, U256};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info};

use crate::chain::ChainManager;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::flow::{order_steps, Flow};
use crate::notify::{AppNotification, NotificationSink};
use crate::signer::FlowSigner;
use crate::steps::TransactionStep;
use crate::store::TransactionStore;
use crate::txn::{
    ReceiptInfo, TransactionDetails, TransactionStatus, TransactionTypeInfo, TxId, WrapType,
};
use crate::tx::TransactionSender;

/// Permit2 signature produced mid-flow, consumed by the following step
#[derive(Debug, Clone)]
pub struct SignedPermit {
    pub token: ethers::types::Address,
    pub amount: U256,
    pub signature: Signature,
}

/// Builds the terminal swap request once the permit signature exists.
///
/// Mirrors the trading backend contract: for permit-gated swaps the final
/// calldata is only available after signing.
pub type SwapRequestBuilder =
    Box<dyn Fn(&SignedPermit) -> EngineResult<TransactionRequest> + Send + Sync>;

/// Progress hooks invoked as the plan advances
#[derive(Default)]
pub struct FlowCallbacks {
    /// The ordered plan, before anything runs
    pub on_plan: Option<Box<dyn Fn(&[TransactionStep]) + Send + Sync>>,
    /// A step is about to run
    pub on_step: Option<Box<dyn Fn(usize, &TransactionStep) + Send + Sync>>,
    /// A step's transaction was accepted by the network
    pub on_hash: Option<Box<dyn Fn(TxId, H256) + Send + Sync>>,
}

/// Per-invocation execution context
#[derive(Default)]
pub struct FlowContext {
    /// Overrides the engine-wide default when set
    pub wait_for_confirmation: Option<bool>,
    /// Terminal request builder for permit-gated swaps
    pub swap_request_builder: Option<SwapRequestBuilder>,
    pub callbacks: FlowCallbacks,
}

/// What one executed step produced
#[derive(Debug, Clone)]
pub struct StepReport {
    pub kind: &'static str,
    pub tx_id: Option<TxId>,
    pub hash: Option<H256>,
}

/// The terminal step's result
#[derive(Debug, Clone)]
pub enum TerminalArtifact {
    /// An on-chain submission tracked in the store
    Transaction { id: TxId, hash: H256 },
    /// A signed order to be settled off-chain by the caller
    SignedOrder { signature: Signature, deadline: u64 },
}

/// Result of a completed flow
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub flow_kind: &'static str,
    pub terminal: TerminalArtifact,
    pub steps: Vec<StepReport>,
}

enum StepOutcome {
    Submitted { id: TxId, hash: H256 },
    Signed(Signature),
}

/// Runs ordered step lists against a signer and chain clients
pub struct FlowExecutor {
    chain_manager: Arc<ChainManager>,
    sender: Arc<TransactionSender>,
    store: Arc<TransactionStore>,
    notifications: Arc<dyn NotificationSink>,
    signer: Arc<dyn FlowSigner>,
    config: EngineConfig,
}

impl FlowExecutor {
    pub fn new(
        chain_manager: Arc<ChainManager>,
        signer: Arc<dyn FlowSigner>,
        store: Arc<TransactionStore>,
        notifications: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let sender = Arc::new(TransactionSender::new(
            chain_manager.clone(),
            signer.clone(),
            config.clone(),
        ));

        Self {
            chain_manager,
            sender,
            store,
            notifications,
            signer,
            config,
        }
    }

    /// Execute a flow to completion
    pub async fn run(&self, flow: &Flow, ctx: &FlowContext) -> EngineResult<FlowOutcome> {
        crate::metrics::record_flow_started(flow.kind());
        info!(flow_kind = flow.kind(), chain_id = flow.chain_id(), "Starting flow");

        match self.run_inner(flow, ctx).await {
            Ok(outcome) => {
                crate::metrics::record_flow_succeeded(flow.kind());
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    file = "executor",
                    function = "run",
                    flow_kind = flow.kind(),
                    error = %e,
                    "Flow aborted"
                );
                crate::metrics::record_flow_failed(flow.kind(), e.failure_kind());
                Err(e)
            }
        }
    }

    async fn run_inner(&self, flow: &Flow, ctx: &FlowContext) -> EngineResult<FlowOutcome> {
        let steps = order_steps(flow)?;
        if let Some(on_plan) = &ctx.callbacks.on_plan {
            on_plan(&steps);
        }

        let chain_id = flow.chain_id();
        let wait = ctx
            .wait_for_confirmation
            .unwrap_or(self.config.wait_for_confirmation);

        let mut permit: Option<SignedPermit> = None;
        let mut reports = Vec::with_capacity(steps.len());
        let mut terminal_outcome = None;

        for (index, step) in steps.iter().enumerate() {
            if let Some(on_step) = &ctx.callbacks.on_step {
                on_step(index, step);
            }
            debug!(step = step.kind(), index, "Executing step");

            let outcome = match self
                .execute_step(flow, chain_id, step, &mut permit, wait, ctx)
                .await
            {
                Ok(outcome) => {
                    crate::metrics::record_step_executed(step.kind());
                    outcome
                }
                Err(e) => {
                    crate::metrics::record_step_failed(step.kind());
                    return Err(e);
                }
            };

            reports.push(match &outcome {
                StepOutcome::Submitted { id, hash } => StepReport {
                    kind: step.kind(),
                    tx_id: Some(*id),
                    hash: Some(*hash),
                },
                StepOutcome::Signed(_) => StepReport {
                    kind: step.kind(),
                    tx_id: None,
                    hash: None,
                },
            });

            if index + 1 == steps.len() {
                terminal_outcome = Some((step.clone(), outcome));
            }
        }

        let (terminal_step, outcome) = terminal_outcome
            .ok_or_else(|| EngineError::InvalidPlan("flow produced no steps".to_string()))?;

        let terminal = match (terminal_step, outcome) {
            (_, StepOutcome::Submitted { id, hash }) => TerminalArtifact::Transaction { id, hash },
            (TransactionStep::UniswapXSignature { deadline, .. }, StepOutcome::Signed(signature)) => {
                TerminalArtifact::SignedOrder {
                    signature,
                    deadline,
                }
            }
            _ => {
                return Err(EngineError::Internal(
                    "terminal step produced no artifact".to_string(),
                ))
            }
        };

        self.push_pending_notification(flow);

        Ok(FlowOutcome {
            flow_kind: flow.kind(),
            terminal,
            steps: reports,
        })
    }

    async fn execute_step(
        &self,
        flow: &Flow,
        chain_id: u64,
        step: &TransactionStep,
        permit: &mut Option<SignedPermit>,
        wait: bool,
        ctx: &FlowContext,
    ) -> EngineResult<StepOutcome> {
        match step {
            TransactionStep::Permit2Signature {
                token,
                amount,
                typed_data,
                ..
            } => {
                let signature = self.signer.sign_typed_data(typed_data).await?;
                *permit = Some(SignedPermit {
                    token: *token,
                    amount: *amount,
                    signature,
                });
                Ok(StepOutcome::Signed(signature))
            }

            TransactionStep::UniswapXSignature { typed_data, .. } => {
                let signature = self.signer.sign_typed_data(typed_data).await?;
                Ok(StepOutcome::Signed(signature))
            }

            TransactionStep::Swap { tx_request } => {
                // Permit-gated swaps get their final calldata from the
                // trading backend once the signature exists
                let request = match (&ctx.swap_request_builder, permit.as_ref()) {
                    (Some(builder), Some(signed)) => builder(signed)?,
                    _ => tx_request.clone(),
                };
                self.submit_step(flow, chain_id, step, &request, wait, ctx)
                    .await
            }

            TransactionStep::TokenRevocation { tx_request, .. }
            | TransactionStep::TokenApproval { tx_request, .. }
            | TransactionStep::Permit2Transaction { tx_request, .. }
            | TransactionStep::Wrap { tx_request, .. }
            | TransactionStep::IncreasePosition { tx_request } => {
                let request = tx_request.clone();
                self.submit_step(flow, chain_id, step, &request, wait, ctx)
                    .await
            }
        }
    }

    async fn submit_step(
        &self,
        flow: &Flow,
        chain_id: u64,
        step: &TransactionStep,
        request: &TransactionRequest,
        wait: bool,
        ctx: &FlowContext,
    ) -> EngineResult<StepOutcome> {
        let hash = self.sender.submit(chain_id, request).await?;

        let details = TransactionDetails::new(
            chain_id,
            self.signer.address(),
            hash,
            type_info_for(flow, step)?,
        );
        let id = details.id;
        self.store.add(details)?;

        if let Some(on_hash) = &ctx.callbacks.on_hash {
            on_hash(id, hash);
        }

        if wait {
            self.await_confirmation(chain_id, id, hash).await?;
        }

        Ok(StepOutcome::Submitted { id, hash })
    }

    /// Block until the transaction is mined, honoring the engine timeout
    async fn await_confirmation(&self, chain_id: u64, id: TxId, hash: H256) -> EngineResult<()> {
        let client = self.chain_manager.get_client(chain_id)?;
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let deadline = Instant::now() + Duration::from_secs(self.config.confirmation_timeout_secs);

        loop {
            if let Some(receipt) = client.transaction_receipt(hash).await? {
                let success = receipt.status == Some(1u64.into());
                let info = ReceiptInfo {
                    block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or_default(),
                    gas_used: receipt.gas_used,
                    success,
                };
                let status = if success {
                    TransactionStatus::Confirmed
                } else {
                    TransactionStatus::Failed
                };

                if let Some(updated) = self.store.finalize_if_pending(id, status, Some(info))? {
                    let latency =
                        (chrono::Utc::now() - updated.added_at).num_milliseconds() as f64 / 1000.0;
                    if success {
                        crate::metrics::record_tx_confirmed(chain_id, latency);
                    } else {
                        crate::metrics::record_tx_failed(chain_id);
                    }
                }

                return if success {
                    Ok(())
                } else {
                    Err(EngineError::Transaction(format!(
                        "transaction {:?} reverted",
                        hash
                    )))
                };
            }

            if Instant::now() >= deadline {
                // Leave the record pending; the watcher keeps monitoring
                return Err(EngineError::Timeout {
                    operation: "transaction confirmation".to_string(),
                });
            }

            sleep(poll).await;
        }
    }

    /// Exactly one pending notification per swap or wrap flow
    fn push_pending_notification(&self, flow: &Flow) {
        let wrap_type = match flow {
            Flow::Wrap(f) => WrapType::from(f.direction()),
            Flow::Swap(_) => WrapType::NotApplicable,
            // Liquidity flows surface through the watcher's terminal update
            Flow::IncreaseLiquidity(_) => return,
        };

        self.notifications
            .push(AppNotification::SwapPending { wrap_type });
    }
}

/// History record info for an on-chain step
fn type_info_for(flow: &Flow, step: &TransactionStep) -> EngineResult<TransactionTypeInfo> {
    match (flow, step) {
        (_, TransactionStep::TokenApproval {
            token,
            spender,
            amount,
            ..
        }) => Ok(TransactionTypeInfo::Approve {
            token: *token,
            spender: *spender,
            amount: *amount,
        }),
        (_, TransactionStep::TokenRevocation { token, spender, .. }) => {
            Ok(TransactionTypeInfo::Revoke {
                token: *token,
                spender: *spender,
            })
        }
        (_, TransactionStep::Permit2Transaction { token, amount, .. }) => {
            Ok(TransactionTypeInfo::Permit {
                token: *token,
                amount: *amount,
            })
        }
        (_, TransactionStep::Wrap {
            amount, direction, ..
        }) => Ok(TransactionTypeInfo::for_wrap(*direction, *amount)),
        (Flow::Swap(f), TransactionStep::Swap { .. }) => Ok(TransactionTypeInfo::Swap {
            input_currency_id: f.input.currency_id(),
            output_currency_id: f.output.currency_id(),
            input_amount: f.input_amount,
            output_amount: f.output_amount,
        }),
        (Flow::IncreaseLiquidity(f), TransactionStep::IncreasePosition { .. }) => {
            Ok(TransactionTypeInfo::LiquidityIncrease {
                token0_currency_id: f.token0.currency_id(),
                token1_currency_id: f.token1.currency_id(),
            })
        }
        _ => Err(EngineError::Internal(format!(
            "step {} does not belong to flow {}",
            step.kind(),
            flow.kind()
        ))),
    }
}
