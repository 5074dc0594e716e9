//! Signer seam
//!
//! Flows never touch key material directly; they sign through
//! [`FlowSigner`]. The in-process [`LocalSigner`] wraps an ethers wallet
//! loaded from the environment. Platform keystores implement the same trait
//! outside this crate.

use crate::config::WalletConfig;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Signature};
use tracing::info;

/// Default environment variable holding the signing key
const DEFAULT_KEY_ENV: &str = "TXFLOW_PRIVATE_KEY";

/// Signing capability required by the executor
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlowSigner: Send + Sync {
    /// The account transactions are sent from
    fn address(&self) -> Address;

    /// Sign a prepared transaction
    async fn sign_transaction(&self, tx: &TypedTransaction) -> EngineResult<Signature>;

    /// Sign an EIP-712 payload (permits, order signatures)
    async fn sign_typed_data(&self, payload: &TypedData) -> EngineResult<Signature>;
}

/// Wallet-backed signer loaded from the environment
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    /// Load the signing key named by the wallet configuration
    pub fn load(config: &WalletConfig) -> EngineResult<Self> {
        let env_name = config
            .private_key_env
            .as_deref()
            .unwrap_or(DEFAULT_KEY_ENV);

        let key = std::env::var(env_name).map_err(|_| {
            EngineError::Signer(format!(
                "No wallet configured. Set {} or configure keystore",
                env_name
            ))
        })?;

        Self::from_key(&key)
    }

    /// Build a signer from a raw hex private key
    pub fn from_key(key: &str) -> EngineResult<Self> {
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| EngineError::Signer(format!("Invalid private key: {}", e)))?;

        info!("Signer initialized with wallet: {:?}", wallet.address());
        Ok(Self { wallet })
    }
}

#[async_trait]
impl FlowSigner for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_transaction(&self, tx: &TypedTransaction) -> EngineResult<Signature> {
        // EIP-155 binding comes from the request's own chain id
        let chain_id = tx
            .chain_id()
            .map(|c| c.as_u64())
            .unwrap_or_else(|| self.wallet.chain_id());
        let wallet = self.wallet.clone().with_chain_id(chain_id);

        wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| EngineError::Signer(e.to_string()))
    }

    async fn sign_typed_data(&self, payload: &TypedData) -> EngineResult<Signature> {
        self.wallet
            .sign_typed_data(payload)
            .await
            .map_err(|e| EngineError::Signer(e.to_string()))
    }
}
