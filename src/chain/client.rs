//! Chain client seam and the RPC-backed implementation
//!
//! The engine only ever talks to a chain through [`ChainClient`]; the
//! ethers-backed [`RpcClient`] adds multi-RPC rotation so a single flaky
//! endpoint does not stall an in-flight flow or the watcher.

use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Gas price types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Minimal provider contract the executor and watcher depend on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain ID this client is connected to
    fn chain_id(&self) -> u64;

    /// Current head block number
    async fn block_number(&self) -> EngineResult<u64>;

    /// On-chain nonce for an address
    async fn transaction_count(&self, address: Address) -> EngineResult<u64>;

    /// Broadcast a signed transaction, returning its hash
    async fn send_raw_transaction(&self, raw: Bytes) -> EngineResult<H256>;

    /// Receipt for a transaction, None while still unmined
    async fn transaction_receipt(&self, hash: H256) -> EngineResult<Option<TransactionReceipt>>;

    /// Estimate gas for a transaction
    async fn estimate_gas(&self, tx: &TypedTransaction) -> EngineResult<U256>;

    /// Current gas price under the chain's strategy
    async fn gas_price(&self) -> EngineResult<GasPrice>;
}

/// Multi-provider RPC client with automatic failover
pub struct RpcClient {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl RpcClient {
    /// Create a new client from chain configuration
    pub fn new(config: ChainConfig) -> EngineResult<Self> {
        let mut providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if providers.is_empty() {
            return Err(EngineError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn connection_error(&self, message: impl ToString) -> EngineError {
        EngineError::ChainConnection {
            chain_id: self.config.chain_id,
            message: message.to_string(),
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> EngineResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| EngineError::GasEstimation(e.to_string()))?
            .ok_or_else(|| EngineError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| EngineError::GasEstimation("No base fee in block".to_string()))?;

        // Priority fee estimation (can be improved with fee history)
        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei default

        // Max fee = 2 * base_fee + priority_fee (buffer for block variability)
        let max_fee = base_fee * 2 + priority_fee;

        // Cap at configured max
        let max_gwei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_gwei);

        Ok((max_fee, priority_fee))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn block_number(&self) -> EngineResult<u64> {
        for _ in 0..self.providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    async fn transaction_count(&self, address: Address) -> EngineResult<u64> {
        let nonce = self
            .http()
            .get_transaction_count(address, None)
            .await
            .map_err(|e| EngineError::Nonce {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })?;

        Ok(nonce.as_u64())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> EngineResult<H256> {
        let pending = self
            .http()
            .send_raw_transaction(raw)
            .await
            .map_err(|e| EngineError::Transaction(e.to_string()))?;

        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: H256) -> EngineResult<Option<TransactionReceipt>> {
        for _ in 0..self.providers.len() {
            match self.http().get_transaction_receipt(hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        "Failed to get receipt from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to get receipt"))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> EngineResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| EngineError::GasEstimation(e.to_string()))
    }

    async fn gas_price(&self) -> EngineResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| EngineError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
            GasPriceStrategy::Arbitrum => {
                // Arbitrum uses L1 + L2 gas model
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| EngineError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
        }
    }
}
