//! Transaction sender with retry logic
//!
//! Turns a step's raw request into a signed, submitted transaction: nonce
//! allocation, gas estimation, signing through the [`FlowSigner`] seam, and
//! bounded retries for transient RPC failures. Non-retryable errors abort
//! immediately and hand the allocated nonce back.

use super::gas::GasEstimator;
use super::nonce::NonceManager;
use crate::chain::{ChainClient, ChainManager, GasPrice};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::signer::FlowSigner;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Eip1559TransactionRequest, NameOrAddress, TransactionRequest, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Signs and submits step transactions for one account
pub struct TransactionSender {
    /// Chain manager
    chain_manager: Arc<ChainManager>,
    /// Nonce manager
    nonce_manager: Arc<NonceManager>,
    /// Gas estimator
    gas_estimator: GasEstimator,
    /// Signing seam
    signer: Arc<dyn FlowSigner>,
    /// Configuration
    config: EngineConfig,
}

impl TransactionSender {
    /// Create a new transaction sender
    pub fn new(
        chain_manager: Arc<ChainManager>,
        signer: Arc<dyn FlowSigner>,
        config: EngineConfig,
    ) -> Self {
        let nonce_manager = Arc::new(NonceManager::new(signer.address()));

        Self {
            chain_manager,
            nonce_manager,
            gas_estimator: GasEstimator::new(),
            signer,
            config,
        }
    }

    /// Submit a step's transaction request, returning its hash
    pub async fn submit(&self, chain_id: u64, request: &TransactionRequest) -> EngineResult<H256> {
        let client = self.chain_manager.get_client(chain_id)?;

        self.nonce_manager.ensure_chain(client.as_ref()).await?;
        let nonce = self.nonce_manager.get_nonce(chain_id).await?;

        match self
            .submit_with_nonce(chain_id, client.as_ref(), request, nonce)
            .await
        {
            Ok(tx_hash) => {
                self.nonce_manager
                    .mark_pending(chain_id, nonce, tx_hash)
                    .await?;
                crate::metrics::record_tx_submitted(chain_id);
                Ok(tx_hash)
            }
            Err(e) => {
                // Hand the nonce back so the next submission does not gap
                self.nonce_manager.release_nonce(chain_id, nonce).await?;
                Err(e)
            }
        }
    }

    async fn submit_with_nonce(
        &self,
        chain_id: u64,
        client: &dyn ChainClient,
        request: &TransactionRequest,
        nonce: u64,
    ) -> EngineResult<H256> {
        let mut base = request.clone();
        base.from = Some(self.signer.address());
        base.nonce = Some(U256::from(nonce));
        base.chain_id = Some(chain_id.into());

        let gas_limit = match base.gas {
            Some(gas) => gas,
            None => {
                let probe: TypedTransaction = base.clone().into();
                self.gas_estimator
                    .estimate_gas_limit(client, &probe)
                    .await?
            }
        };
        let gas_price = self.gas_estimator.gas_price(client).await?;

        let tx = build_typed_transaction(&base, gas_limit, &gas_price);

        self.send_with_retry(chain_id, client, tx).await
    }

    /// Send transaction with retry logic
    async fn send_with_retry(
        &self,
        chain_id: u64,
        client: &dyn ChainClient,
        tx: TypedTransaction,
    ) -> EngineResult<H256> {
        let mut attempts = 0;
        let max_attempts = self.config.max_retries.max(1);
        let mut last_error = None;

        while attempts < max_attempts {
            attempts += 1;

            // A signer that refuses will refuse again; abort immediately
            let signature = self.signer.sign_transaction(&tx).await?;
            let raw = tx.rlp_signed(&signature);

            let send_timeout = Duration::from_secs(self.config.send_timeout_secs);
            let result = timeout(send_timeout, client.send_raw_transaction(raw)).await;

            match result {
                Ok(Ok(tx_hash)) => {
                    info!(
                        "Transaction sent: {:?} (attempt {}/{})",
                        tx_hash, attempts, max_attempts
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    let e = classify_send_error(chain_id, e);

                    if let EngineError::Nonce { .. } = &e {
                        warn!("Nonce out of sync on chain {}, resyncing", chain_id);
                        self.nonce_manager.sync(client).await?;
                        return Err(e);
                    }

                    if !e.is_retryable() {
                        return Err(e);
                    }

                    warn!("Retryable error submitting tx: {}", e);
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!("Transaction send timeout (attempt {})", attempts);
                    last_error = Some(EngineError::Timeout {
                        operation: "send transaction".to_string(),
                    });
                }
            }

            // Wait before retry
            if attempts < max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or(EngineError::Transaction("Unknown error".to_string())))
    }

    /// The account this sender submits from
    pub fn account(&self) -> ethers::types::Address {
        self.signer.address()
    }
}

/// Map well-known RPC error strings to typed errors
fn classify_send_error(chain_id: u64, error: EngineError) -> EngineError {
    if let EngineError::Transaction(message) = &error {
        if message.contains("nonce too low") {
            return EngineError::Nonce {
                chain_id,
                message: "Nonce too low".to_string(),
            };
        }
        if message.contains("insufficient funds") {
            return EngineError::InsufficientBalance {
                chain_id,
                have: "unknown".to_string(),
                need: "unknown".to_string(),
            };
        }
        if message.contains("rate limit") || message.contains("too many requests") {
            return EngineError::RateLimited { chain_id };
        }
        if message.contains("replacement transaction underpriced") {
            warn!("Transaction underpriced on chain {}", chain_id);
        }
    }
    error
}

/// Build the final transaction for the chain's gas model
fn build_typed_transaction(
    request: &TransactionRequest,
    gas_limit: U256,
    gas_price: &GasPrice,
) -> TypedTransaction {
    match gas_price {
        GasPrice::Legacy(price) => {
            let tx = request.clone().gas(gas_limit).gas_price(*price);
            TypedTransaction::Legacy(tx)
        }
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            let mut tx = Eip1559TransactionRequest::new();
            if let Some(NameOrAddress::Address(addr)) = &request.to {
                tx = tx.to(*addr);
            }
            if let Some(data) = &request.data {
                tx = tx.data(data.clone());
            }
            if let Some(value) = request.value {
                tx = tx.value(value);
            }
            if let Some(nonce) = request.nonce {
                tx = tx.nonce(nonce);
            }
            if let Some(chain_id) = request.chain_id {
                tx = tx.chain_id(chain_id);
            }
            tx.from = request.from;
            tx = tx
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas);
            TypedTransaction::Eip1559(tx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;
    use crate::signer::MockFlowSigner;
    use ethers::types::{Address, Signature};
    use mockall::Sequence;

    fn engine_config() -> EngineConfig {
        EngineConfig {
            max_retries: 3,
            retry_delay_ms: 1,
            send_timeout_secs: 5,
            wait_for_confirmation: false,
            confirmation_timeout_secs: 60,
            poll_interval_ms: 10,
        }
    }

    fn mock_signer() -> MockFlowSigner {
        let mut signer = MockFlowSigner::new();
        signer
            .expect_address()
            .return_const(Address::from([0x11; 20]));
        signer.expect_sign_transaction().returning(|_| {
            Ok(Signature {
                r: U256::one(),
                s: U256::one(),
                v: 27,
            })
        });
        signer
    }

    fn base_client() -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(1u64);
        client.expect_transaction_count().returning(|_| Ok(7));
        client
            .expect_estimate_gas()
            .returning(|_| Ok(U256::from(50_000)));
        client
            .expect_gas_price()
            .returning(|| Ok(GasPrice::Legacy(U256::from(1_000_000_000u64))));
        client
    }

    fn sender_with(client: MockChainClient) -> TransactionSender {
        let manager = ChainManager::new();
        manager.insert(Arc::new(client), 1);
        TransactionSender::new(Arc::new(manager), Arc::new(mock_signer()), engine_config())
    }

    fn request() -> TransactionRequest {
        TransactionRequest::new()
            .to(Address::from([0x45; 20]))
            .data(vec![0xde, 0xad])
    }

    #[tokio::test]
    async fn test_submit_success_marks_nonce_pending() {
        let mut client = base_client();
        client
            .expect_send_raw_transaction()
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0xaa)));

        let sender = sender_with(client);
        let hash = sender.submit(1, &request()).await.unwrap();
        assert_eq!(hash, H256::repeat_byte(0xaa));
        assert_eq!(sender.nonce_manager.pending_count(1).await, 1);
    }

    #[tokio::test]
    async fn test_retry_on_transient_error_then_success() {
        let mut client = base_client();
        let mut seq = Sequence::new();
        client
            .expect_send_raw_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(EngineError::ChainConnection {
                    chain_id: 1,
                    message: "connection reset".to_string(),
                })
            });
        client
            .expect_send_raw_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(H256::repeat_byte(0xbb)));

        let sender = sender_with(client);
        let hash = sender.submit(1, &request()).await.unwrap();
        assert_eq!(hash, H256::repeat_byte(0xbb));
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts_and_releases_nonce() {
        let mut client = base_client();
        client
            .expect_send_raw_transaction()
            .times(1)
            .returning(|_| Err(EngineError::Transaction("execution reverted".to_string())));

        let sender = sender_with(client);
        let err = sender.submit(1, &request()).await.unwrap_err();
        assert!(matches!(err, EngineError::Transaction(_)));
        assert_eq!(sender.nonce_manager.pending_count(1).await, 0);
        // Released nonce is reused by the next submission
        assert_eq!(sender.nonce_manager.get_nonce(1).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_insufficient_funds_is_classified() {
        let mut client = base_client();
        client.expect_send_raw_transaction().times(1).returning(|_| {
            Err(EngineError::Transaction(
                "insufficient funds for gas * price + value".to_string(),
            ))
        });

        let sender = sender_with(client);
        let err = sender.submit(1, &request()).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_eip1559_build_carries_request_fields() {
        let base = TransactionRequest::new()
            .to(Address::from([0x45; 20]))
            .data(vec![0x01])
            .value(5u64)
            .nonce(9u64)
            .chain_id(1u64);
        let tx = build_typed_transaction(
            &base,
            U256::from(60_000),
            &GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(100),
                max_priority_fee_per_gas: U256::from(2),
            },
        );

        match tx {
            TypedTransaction::Eip1559(inner) => {
                assert_eq!(inner.nonce, Some(U256::from(9)));
                assert_eq!(inner.gas, Some(U256::from(60_000)));
                assert_eq!(inner.max_fee_per_gas, Some(U256::from(100)));
            }
            other => panic!("expected EIP-1559 transaction, got {:?}", other),
        }
    }
}
