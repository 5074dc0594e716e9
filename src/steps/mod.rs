//! Step definitions for transaction flows
//!
//! A step is one atomic unit of work within a flow: an on-chain send
//! (approval, revocation, wrap, swap, position increase), or an off-chain
//! EIP-712 signature whose output feeds the following step. Steps are
//! immutable once constructed; the planning layer builds them from a
//! validated trade or liquidity context and the orderer linearizes them.

use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, TransactionRequest, U256};

/// Canonical Permit2 contract address (same on all supported chains)
pub const PERMIT2_ADDRESS: &str = "0x000000000022d473030f116ddee9f6b43ac78ba3";

/// Direction of a wrap step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapDirection {
    /// Native currency into the wrapped token
    Wrap,
    /// Wrapped token back into the native currency
    Unwrap,
}

/// One atomic unit of work within a flow
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionStep {
    /// Set an existing token allowance to zero. Required by some tokens
    /// (e.g. USDT) before the allowance can be raised again.
    TokenRevocation {
        token: Address,
        spender: Address,
        tx_request: TransactionRequest,
    },

    /// Raise a token allowance for a spender
    TokenApproval {
        token: Address,
        spender: Address,
        amount: U256,
        tx_request: TransactionRequest,
    },

    /// Off-chain Permit2 signature; the result feeds the next
    /// permit-derived step and is never submitted on its own
    Permit2Signature {
        token: Address,
        amount: U256,
        spender: Address,
        typed_data: TypedData,
    },

    /// On-chain send whose payload embeds a previously produced
    /// Permit2 signature
    Permit2Transaction {
        token: Address,
        amount: U256,
        tx_request: TransactionRequest,
    },

    /// Terminal swap send
    Swap { tx_request: TransactionRequest },

    /// Wrap or unwrap the chain's native currency
    Wrap {
        amount: U256,
        direction: WrapDirection,
        tx_request: TransactionRequest,
    },

    /// Off-chain order signature for a signature-settled swap; terminal,
    /// nothing is submitted to the network by this engine
    UniswapXSignature { typed_data: TypedData, deadline: u64 },

    /// Terminal liquidity-position increase send
    IncreasePosition { tx_request: TransactionRequest },
}

impl TransactionStep {
    /// Step kind for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TransactionStep::TokenRevocation { .. } => "token_revocation",
            TransactionStep::TokenApproval { .. } => "token_approval",
            TransactionStep::Permit2Signature { .. } => "permit2_signature",
            TransactionStep::Permit2Transaction { .. } => "permit2_transaction",
            TransactionStep::Swap { .. } => "swap",
            TransactionStep::Wrap { .. } => "wrap",
            TransactionStep::UniswapXSignature { .. } => "uniswapx_signature",
            TransactionStep::IncreasePosition { .. } => "increase_position",
        }
    }

    /// The raw request for on-chain steps, None for signature steps
    pub fn tx_request(&self) -> Option<&TransactionRequest> {
        match self {
            TransactionStep::TokenRevocation { tx_request, .. }
            | TransactionStep::TokenApproval { tx_request, .. }
            | TransactionStep::Permit2Transaction { tx_request, .. }
            | TransactionStep::Swap { tx_request }
            | TransactionStep::Wrap { tx_request, .. }
            | TransactionStep::IncreasePosition { tx_request } => Some(tx_request),
            TransactionStep::Permit2Signature { .. }
            | TransactionStep::UniswapXSignature { .. } => None,
        }
    }

    /// Whether this step requests a signature instead of submitting
    pub fn is_signature(&self) -> bool {
        matches!(
            self,
            TransactionStep::Permit2Signature { .. } | TransactionStep::UniswapXSignature { .. }
        )
    }

    /// The token an allowance-shaped step operates on
    pub fn token(&self) -> Option<Address> {
        match self {
            TransactionStep::TokenRevocation { token, .. }
            | TransactionStep::TokenApproval { token, .. }
            | TransactionStep::Permit2Signature { token, .. }
            | TransactionStep::Permit2Transaction { token, .. } => Some(*token),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TransactionRequest {
        TransactionRequest::new()
            .to("0x0000000000000000000000000000000000000456"
                .parse::<Address>()
                .unwrap())
            .data(vec![0u8; 4])
    }

    #[test]
    fn test_signature_steps_have_no_request() {
        let step = TransactionStep::UniswapXSignature {
            typed_data: TypedData {
                domain: Default::default(),
                types: Default::default(),
                primary_type: "Order".to_string(),
                message: Default::default(),
            },
            deadline: 1_700_000_000,
        };
        assert!(step.is_signature());
        assert!(step.tx_request().is_none());
        assert_eq!(step.kind(), "uniswapx_signature");
    }

    #[test]
    fn test_on_chain_steps_expose_request() {
        let step = TransactionStep::Swap {
            tx_request: request(),
        };
        assert!(!step.is_signature());
        assert!(step.tx_request().is_some());
        assert!(step.token().is_none());
    }
}
