//! Chain module - multi-chain client registry
//!
//! This module provides:
//! - The [`ChainClient`] seam the executor and watcher depend on
//! - An ethers-backed implementation with multi-RPC failover
//! - Per-chain confirmation depth bookkeeping

pub mod client;

pub use client::{ChainClient, GasPrice, RpcClient};

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Per-chain client plus confirmation policy
struct ChainEntry {
    client: Arc<dyn ChainClient>,
    confirmation_blocks: u64,
}

/// Registry of clients for all configured chains
pub struct ChainManager {
    chains: DashMap<u64, ChainEntry>,
}

impl ChainManager {
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
        }
    }

    /// Build clients for every enabled chain in the settings
    pub fn from_settings(settings: &Settings) -> EngineResult<Self> {
        let manager = Self::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                chain_config.name, chain_config.chain_id
            );

            let client = RpcClient::new(chain_config.clone())?;
            manager.insert(
                Arc::new(client),
                confirmation_depth(chain_config.confirmation_blocks, chain_config.chain_id),
            );

            info!("Chain {} initialized successfully", name);
        }

        Ok(manager)
    }

    /// Register a client, replacing any previous one for its chain
    pub fn insert(&self, client: Arc<dyn ChainClient>, confirmation_blocks: u64) {
        self.chains.insert(
            client.chain_id(),
            ChainEntry {
                client,
                confirmation_blocks,
            },
        );
    }

    /// Get the client for a specific chain
    pub fn get_client(&self, chain_id: u64) -> EngineResult<Arc<dyn ChainClient>> {
        self.chains
            .get(&chain_id)
            .map(|e| e.client.clone())
            .ok_or(EngineError::ChainNotFound { chain_id })
    }

    /// Confirmation depth required on a chain
    pub fn confirmation_blocks(&self, chain_id: u64) -> EngineResult<u64> {
        self.chains
            .get(&chain_id)
            .map(|e| e.confirmation_blocks)
            .ok_or(EngineError::ChainNotFound { chain_id })
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        self.chains.iter().map(|e| *e.key()).collect()
    }
}

impl Default for ChainManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Configured depth, or the per-chain recommendation when left at zero
fn confirmation_depth(configured: u64, chain_id: u64) -> u64 {
    if configured > 0 {
        configured
    } else {
        recommended_confirmations(chain_id)
    }
}

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Ethereum mainnet
        1 => 32,
        // Ethereum testnets
        11155111 | 5 => 12,
        // Polygon mainnet
        137 => 128,
        // Polygon testnets
        80001 | 80002 => 32,
        // Arbitrum
        42161 | 421614 => 64,
        // Optimism
        10 | 11155420 => 64,
        // Base
        8453 | 84532 => 64,
        // Avalanche (instant finality)
        43114 | 43113 => 1,
        // Default conservative
        _ => 64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;

    #[test]
    fn test_unknown_chain_is_an_error() {
        let manager = ChainManager::new();
        assert!(matches!(
            manager.get_client(1),
            Err(EngineError::ChainNotFound { chain_id: 1 })
        ));
    }

    #[test]
    fn test_registry_roundtrip() {
        let manager = ChainManager::new();
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(10u64);

        manager.insert(Arc::new(client), 64);
        assert!(manager.get_client(10).is_ok());
        assert_eq!(manager.confirmation_blocks(10).unwrap(), 64);
        assert_eq!(manager.connected_chains(), vec![10]);
    }

    #[test]
    fn test_confirmation_depth_fallback() {
        assert_eq!(confirmation_depth(0, 1), 32);
        assert_eq!(confirmation_depth(5, 1), 5);
        assert_eq!(recommended_confirmations(43114), 1);
        assert_eq!(recommended_confirmations(999_999), 64);
    }
}
