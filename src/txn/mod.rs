//! Transaction records shared between the executor, store, and watcher

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::steps::WrapDirection;

/// Client-generated transaction identifier, assigned before a hash exists
pub type TxId = Uuid;

/// Lifecycle of a submitted transaction.
///
/// Transitions are monotonic: `Pending` moves to exactly one of the
/// terminal statuses and never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
    Canceled,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

/// A currency reference; `address == None` means the chain's native currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub chain_id: u64,
    pub address: Option<Address>,
    pub symbol: String,
}

impl Currency {
    pub fn native(chain_id: u64, symbol: impl Into<String>) -> Self {
        Self {
            chain_id,
            address: None,
            symbol: symbol.into(),
        }
    }

    pub fn token(chain_id: u64, address: Address, symbol: impl Into<String>) -> Self {
        Self {
            chain_id,
            address: Some(address),
            symbol: symbol.into(),
        }
    }

    pub fn is_native(&self) -> bool {
        self.address.is_none()
    }

    /// Stable identifier, `<chain>-<address>` or `<chain>-native`
    pub fn currency_id(&self) -> String {
        match self.address {
            Some(addr) => format!("{}-{:?}", self.chain_id, addr),
            None => format!("{}-native", self.chain_id),
        }
    }
}

/// Wrap classification carried on notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WrapType {
    Wrap,
    Unwrap,
    NotApplicable,
}

impl From<WrapDirection> for WrapType {
    fn from(direction: WrapDirection) -> Self {
        match direction {
            WrapDirection::Wrap => WrapType::Wrap,
            WrapDirection::Unwrap => WrapType::Unwrap,
        }
    }
}

/// What a transaction was for, used for history and notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransactionTypeInfo {
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    Revoke {
        token: Address,
        spender: Address,
    },
    Permit {
        token: Address,
        amount: U256,
    },
    Swap {
        input_currency_id: String,
        output_currency_id: String,
        input_amount: U256,
        output_amount: U256,
    },
    Wrap {
        /// True when the wrapped token was turned back into native currency
        unwrapped: bool,
        amount: U256,
    },
    LiquidityIncrease {
        token0_currency_id: String,
        token1_currency_id: String,
    },
}

impl TransactionTypeInfo {
    /// Build the record info for a wrap step
    pub fn for_wrap(direction: WrapDirection, amount: U256) -> Self {
        TransactionTypeInfo::Wrap {
            unwrapped: direction == WrapDirection::Unwrap,
            amount,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransactionTypeInfo::Approve { .. } => "approve",
            TransactionTypeInfo::Revoke { .. } => "revoke",
            TransactionTypeInfo::Permit { .. } => "permit",
            TransactionTypeInfo::Swap { .. } => "swap",
            TransactionTypeInfo::Wrap { .. } => "wrap",
            TransactionTypeInfo::LiquidityIncrease { .. } => "liquidity_increase",
        }
    }
}

/// Receipt metadata recorded once a transaction finalizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptInfo {
    pub block_number: u64,
    pub gas_used: Option<U256>,
    pub success: bool,
}

/// Mutable record for one submitted transaction.
///
/// Created when a step is submitted, updated by the watcher as
/// confirmations arrive, retained for history after reaching a terminal
/// status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub id: TxId,
    pub chain_id: u64,
    pub from: Address,
    pub hash: Option<H256>,
    pub status: TransactionStatus,
    pub type_info: TransactionTypeInfo,
    pub added_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub receipt: Option<ReceiptInfo>,
}

impl TransactionDetails {
    /// New pending record for a just-submitted transaction
    pub fn new(chain_id: u64, from: Address, hash: H256, type_info: TransactionTypeInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            chain_id,
            from,
            hash: Some(hash),
            status: TransactionStatus::Pending,
            type_info,
            added_at: Utc::now(),
            finalized_at: None,
            receipt: None,
        }
    }
}
