//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local nonce tracking to avoid conflicts between sequential steps
//! - Gap detection against on-chain state
//! - Releasing nonces when a submission fails terminally

use crate::chain::ChainClient;
use crate::error::{EngineError, EngineResult};

use dashmap::DashMap;
use ethers::types::{Address, H256};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-chain nonce state
struct ChainNonceState {
    /// Current local nonce (next to use)
    current: u64,
    /// Pending transactions: nonce -> tx_hash
    pending: HashMap<u64, H256>,
    /// Last confirmed nonce
    confirmed: u64,
}

/// Manages nonces across multiple chains for one signing account
pub struct NonceManager {
    /// Account address
    account: Address,
    /// Per-chain nonce state
    chain_state: DashMap<u64, Mutex<ChainNonceState>>,
}

impl NonceManager {
    /// Create a new nonce manager
    pub fn new(account: Address) -> Self {
        Self {
            account,
            chain_state: DashMap::new(),
        }
    }

    /// Initialize nonce state for a chain from on-chain data, if absent
    pub async fn ensure_chain(&self, client: &dyn ChainClient) -> EngineResult<()> {
        let chain_id = client.chain_id();
        if self.chain_state.contains_key(&chain_id) {
            return Ok(());
        }

        let on_chain_nonce = client.transaction_count(self.account).await?;

        let state = ChainNonceState {
            current: on_chain_nonce,
            pending: HashMap::new(),
            confirmed: on_chain_nonce.saturating_sub(1),
        };

        self.chain_state.insert(chain_id, Mutex::new(state));
        debug!("Initialized nonce for chain {}: {}", chain_id, on_chain_nonce);

        Ok(())
    }

    /// Allocate the next nonce for a chain
    pub async fn get_nonce(&self, chain_id: u64) -> EngineResult<u64> {
        let state = self.chain_state.get(&chain_id).ok_or(EngineError::Nonce {
            chain_id,
            message: "Chain not initialized".to_string(),
        })?;

        let mut state = state.lock().await;
        let nonce = state.current;
        state.current += 1;

        debug!("Allocated nonce {} for chain {}", nonce, chain_id);
        Ok(nonce)
    }

    /// Mark a nonce as pending with its transaction hash
    pub async fn mark_pending(&self, chain_id: u64, nonce: u64, tx_hash: H256) -> EngineResult<()> {
        let state = self.chain_state.get(&chain_id).ok_or(EngineError::Nonce {
            chain_id,
            message: "Chain not initialized".to_string(),
        })?;

        let mut state = state.lock().await;
        state.pending.insert(nonce, tx_hash);
        Ok(())
    }

    /// Confirm a nonce (transaction mined)
    pub async fn confirm_nonce(&self, chain_id: u64, nonce: u64) -> EngineResult<()> {
        let state = self.chain_state.get(&chain_id).ok_or(EngineError::Nonce {
            chain_id,
            message: "Chain not initialized".to_string(),
        })?;

        let mut state = state.lock().await;
        state.pending.remove(&nonce);
        if nonce > state.confirmed {
            state.confirmed = nonce;
        }
        Ok(())
    }

    /// Release a nonce (transaction failed, can be reused)
    pub async fn release_nonce(&self, chain_id: u64, nonce: u64) -> EngineResult<()> {
        let state = self.chain_state.get(&chain_id).ok_or(EngineError::Nonce {
            chain_id,
            message: "Chain not initialized".to_string(),
        })?;

        let mut state = state.lock().await;
        state.pending.remove(&nonce);

        // If this was the most recently allocated nonce, hand it back
        if nonce + 1 == state.current {
            state.current = nonce;
        }
        Ok(())
    }

    /// Sync local state with the chain
    pub async fn sync(&self, client: &dyn ChainClient) -> EngineResult<()> {
        let chain_id = client.chain_id();
        let on_chain_nonce = client.transaction_count(self.account).await?;

        let state = self.chain_state.get(&chain_id).ok_or(EngineError::Nonce {
            chain_id,
            message: "Chain not initialized".to_string(),
        })?;

        let mut state = state.lock().await;

        // Detect gaps
        if on_chain_nonce > state.confirmed + 1 {
            warn!(
                "Nonce gap detected on chain {}: expected {}, got {}",
                chain_id,
                state.confirmed + 1,
                on_chain_nonce
            );
        }

        // Clear pending transactions that have been confirmed
        state.pending.retain(|nonce, _| *nonce >= on_chain_nonce);

        state.confirmed = on_chain_nonce.saturating_sub(1);

        // Ensure current is at least on_chain_nonce
        if state.current < on_chain_nonce {
            state.current = on_chain_nonce;
        }

        Ok(())
    }

    /// Pending submissions on a chain
    pub async fn pending_count(&self, chain_id: u64) -> usize {
        match self.chain_state.get(&chain_id) {
            Some(state) => state.lock().await.pending.len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;

    fn client_with_nonce(chain_id: u64, nonce: u64) -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(chain_id);
        client
            .expect_transaction_count()
            .returning(move |_| Ok(nonce));
        client
    }

    #[tokio::test]
    async fn test_sequential_allocation() {
        let manager = NonceManager::new(Address::from([0x11; 20]));
        let client = client_with_nonce(1, 5);

        manager.ensure_chain(&client).await.unwrap();
        assert_eq!(manager.get_nonce(1).await.unwrap(), 5);
        assert_eq!(manager.get_nonce(1).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_release_hands_back_last_nonce() {
        let manager = NonceManager::new(Address::from([0x11; 20]));
        let client = client_with_nonce(1, 5);
        manager.ensure_chain(&client).await.unwrap();

        let nonce = manager.get_nonce(1).await.unwrap();
        manager.release_nonce(1, nonce).await.unwrap();
        assert_eq!(manager.get_nonce(1).await.unwrap(), nonce);
    }

    #[tokio::test]
    async fn test_sync_clears_confirmed_pending() {
        let manager = NonceManager::new(Address::from([0x11; 20]));
        let client = client_with_nonce(1, 3);
        manager.ensure_chain(&client).await.unwrap();

        manager.mark_pending(1, 3, H256::zero()).await.unwrap();
        manager.mark_pending(1, 4, H256::zero()).await.unwrap();
        assert_eq!(manager.pending_count(1).await, 2);

        // Chain advanced to nonce 4: nonce 3 is confirmed
        let advanced = client_with_nonce(1, 4);
        manager.sync(&advanced).await.unwrap();
        assert_eq!(manager.pending_count(1).await, 1);
    }

    #[tokio::test]
    async fn test_uninitialized_chain_errors() {
        let manager = NonceManager::new(Address::from([0x11; 20]));
        assert!(matches!(
            manager.get_nonce(1).await,
            Err(EngineError::Nonce { chain_id: 1, .. })
        ));
    }
}
