//! Flows and the step orderer
//!
//! A flow is a named bundle of optional step slots plus a required terminal
//! action, built once per user-initiated operation from a validated trade or
//! liquidity context. [`order_steps`] consumes a flow by reference and
//! produces the plan: the ordered step list the executor runs.
//!
//! The ordering policy is fixed: revocations before approvals for the same
//! token, approvals before any permit step, a permit signature before any
//! permit-derived transaction, and the terminal action last. Within a
//! category token0 precedes token1. Signature-settled orders additionally
//! wrap the native input before anything else, matching the requests the
//! trading backend produces.

use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, TransactionRequest, U256};

use crate::error::{EngineError, EngineResult};
use crate::steps::{TransactionStep, WrapDirection};
use crate::txn::Currency;

/// An allowance-shaped request slot (revocation or approval)
#[derive(Debug, Clone, PartialEq)]
pub struct AllowanceRequest {
    pub token: Address,
    pub spender: Address,
    pub amount: U256,
    pub tx_request: TransactionRequest,
}

/// Off-chain Permit2 payload to be signed mid-flow
#[derive(Debug, Clone, PartialEq)]
pub struct PermitPayload {
    pub token: Address,
    pub amount: U256,
    pub spender: Address,
    pub typed_data: TypedData,
}

/// How the flow satisfies Permit2, when it needs to
#[derive(Debug, Clone, PartialEq)]
pub enum PermitStrategy {
    /// Typed-data signature consumed by a later step's payload
    Signature(PermitPayload),
    /// Stand-alone on-chain Permit2 submission
    Transaction {
        token: Address,
        amount: U256,
        tx_request: TransactionRequest,
    },
}

/// Wrap request attached to a signature-settled swap
#[derive(Debug, Clone, PartialEq)]
pub struct WrapRequest {
    pub amount: U256,
    pub tx_request: TransactionRequest,
}

/// Signed-order payload for a signature-settled swap
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPayload {
    pub typed_data: TypedData,
    pub deadline: u64,
}

/// Terminal action of a swap flow
#[derive(Debug, Clone, PartialEq)]
pub enum SwapTerminal {
    /// Classic routed swap submitted on-chain. When `requires_permit` is
    /// set the request payload embeds the permit signature produced
    /// earlier in the flow.
    Classic {
        tx_request: TransactionRequest,
        requires_permit: bool,
    },
    /// Signature-settled order: optionally wrap the native input, then
    /// sign the order off-chain. Settlement happens outside this engine.
    UniswapX {
        wrap: Option<WrapRequest>,
        order: OrderPayload,
    },
}

/// One user-initiated swap
#[derive(Debug, Clone, PartialEq)]
pub struct SwapFlow {
    pub chain_id: u64,
    pub input: Currency,
    pub output: Currency,
    pub input_amount: U256,
    pub output_amount: U256,
    pub revocation: Option<AllowanceRequest>,
    pub approval: Option<AllowanceRequest>,
    pub permit: Option<PermitStrategy>,
    pub terminal: SwapTerminal,
}

/// One wrap or unwrap of the native currency
#[derive(Debug, Clone, PartialEq)]
pub struct WrapFlow {
    pub chain_id: u64,
    pub input: Currency,
    pub amount: U256,
    pub tx_request: TransactionRequest,
}

impl WrapFlow {
    /// Native input wraps; wrapped-token input unwraps
    pub fn direction(&self) -> WrapDirection {
        if self.input.is_native() {
            WrapDirection::Wrap
        } else {
            WrapDirection::Unwrap
        }
    }
}

/// One liquidity-position increase over a token pair
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityFlow {
    pub chain_id: u64,
    pub token0: Currency,
    pub token1: Currency,
    pub revoke_token0: Option<AllowanceRequest>,
    pub revoke_token1: Option<AllowanceRequest>,
    pub approval_token0: Option<AllowanceRequest>,
    pub approval_token1: Option<AllowanceRequest>,
    pub permit: Option<PermitStrategy>,
    pub increase: TransactionRequest,
}

/// A user-initiated operation, consumed exactly once by the orderer
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Swap(SwapFlow),
    Wrap(WrapFlow),
    IncreaseLiquidity(LiquidityFlow),
}

impl Flow {
    /// Flow kind for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Flow::Swap(_) => "swap",
            Flow::Wrap(_) => "wrap",
            Flow::IncreaseLiquidity(_) => "liquidity_increase",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Flow::Swap(f) => f.chain_id,
            Flow::Wrap(f) => f.chain_id,
            Flow::IncreaseLiquidity(f) => f.chain_id,
        }
    }
}

/// Linearize a flow into its ordered step list.
///
/// Pure and idempotent: the same flow always yields an element-wise equal
/// plan. Missing optional slots are omitted without error; cross-slot
/// incoherence (a terminal that needs a permit signature no slot provides)
/// is an invalid plan.
pub fn order_steps(flow: &Flow) -> EngineResult<Vec<TransactionStep>> {
    match flow {
        Flow::Swap(f) => order_swap_steps(f),
        Flow::Wrap(f) => Ok(vec![TransactionStep::Wrap {
            amount: f.amount,
            direction: f.direction(),
            tx_request: f.tx_request.clone(),
        }]),
        Flow::IncreaseLiquidity(f) => order_liquidity_steps(f),
    }
}

fn order_swap_steps(flow: &SwapFlow) -> EngineResult<Vec<TransactionStep>> {
    let mut steps = Vec::new();

    // Signature-settled orders wrap the native input before allowances
    if let SwapTerminal::UniswapX { wrap, .. } = &flow.terminal {
        if flow.permit.is_some() {
            return Err(EngineError::InvalidPlan(
                "permit slot is unused for signature-settled orders".to_string(),
            ));
        }
        if let Some(w) = wrap {
            steps.push(TransactionStep::Wrap {
                amount: w.amount,
                direction: WrapDirection::Wrap,
                tx_request: w.tx_request.clone(),
            });
        }
    }

    push_allowance_steps(
        &mut steps,
        [flow.revocation.as_ref()],
        [flow.approval.as_ref()],
    );
    push_permit_steps(&mut steps, flow.permit.as_ref());

    match &flow.terminal {
        SwapTerminal::Classic {
            tx_request,
            requires_permit,
        } => {
            if *requires_permit
                && !matches!(flow.permit, Some(PermitStrategy::Signature(_)))
            {
                return Err(EngineError::InvalidPlan(
                    "swap requires a permit signature but no permit slot is present".to_string(),
                ));
            }
            steps.push(TransactionStep::Swap {
                tx_request: tx_request.clone(),
            });
        }
        SwapTerminal::UniswapX { order, .. } => {
            steps.push(TransactionStep::UniswapXSignature {
                typed_data: order.typed_data.clone(),
                deadline: order.deadline,
            });
        }
    }

    Ok(steps)
}

fn order_liquidity_steps(flow: &LiquidityFlow) -> EngineResult<Vec<TransactionStep>> {
    let mut steps = Vec::new();

    push_allowance_steps(
        &mut steps,
        [flow.revoke_token0.as_ref(), flow.revoke_token1.as_ref()],
        [
            flow.approval_token0.as_ref(),
            flow.approval_token1.as_ref(),
        ],
    );
    push_permit_steps(&mut steps, flow.permit.as_ref());

    steps.push(TransactionStep::IncreasePosition {
        tx_request: flow.increase.clone(),
    });

    Ok(steps)
}

/// All revocations, token0 before token1, then all approvals likewise
fn push_allowance_steps<const N: usize>(
    steps: &mut Vec<TransactionStep>,
    revocations: [Option<&AllowanceRequest>; N],
    approvals: [Option<&AllowanceRequest>; N],
) {
    for revocation in revocations.into_iter().flatten() {
        steps.push(TransactionStep::TokenRevocation {
            token: revocation.token,
            spender: revocation.spender,
            tx_request: revocation.tx_request.clone(),
        });
    }
    for approval in approvals.into_iter().flatten() {
        steps.push(TransactionStep::TokenApproval {
            token: approval.token,
            spender: approval.spender,
            amount: approval.amount,
            tx_request: approval.tx_request.clone(),
        });
    }
}

fn push_permit_steps(steps: &mut Vec<TransactionStep>, permit: Option<&PermitStrategy>) {
    match permit {
        Some(PermitStrategy::Signature(payload)) => {
            steps.push(TransactionStep::Permit2Signature {
                token: payload.token,
                amount: payload.amount,
                spender: payload.spender,
                typed_data: payload.typed_data.clone(),
            });
        }
        Some(PermitStrategy::Transaction {
            token,
            amount,
            tx_request,
        }) => {
            steps.push(TransactionStep::Permit2Transaction {
                token: *token,
                amount: *amount,
                tx_request: tx_request.clone(),
            });
        }
        None => {}
    }
}
