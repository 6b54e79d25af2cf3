//! # Block Producer
//!
//! Builds a candidate block from pending mempool transactions: select the
//! highest-fee transactions that still apply against current state,
//! execute them against a scratch copy of that state, build the block
//! around whatever survived, and sign it. Optimistic execution — a
//! transaction that fails application (stale nonce, insufficient balance)
//! is dropped from the candidate rather than aborting the whole batch.

use crate::crypto::NodeKeypair;
use crate::model::{Address, Block, Transaction};
use crate::repository::Repository;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    pub tx_id: [u8; 32],
    pub included: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProducedBlock {
    pub block: Block,
    pub results: Vec<TxResult>,
}

#[derive(Debug, Error)]
pub enum BlockProductionError {
    #[error("mempool is empty and empty blocks are not enabled")]
    EmptyMempoolNotAllowed,
    #[error("chain tip is not available yet")]
    TipUnavailable,
}

#[derive(Debug, Clone, Copy)]
pub struct ProducerConfig {
    pub max_txs: usize,
    /// Whether the producer may emit a block with zero transactions. Real
    /// deployments normally want this on (a steady block cadence is part
    /// of liveness); it exists as a flag so a test or a low-traffic devnet
    /// can assert on `EmptyMempoolNotAllowed` instead.
    pub allow_empty_blocks: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_txs: 500,
            allow_empty_blocks: true,
        }
    }
}

pub struct BlockProducer {
    mempool: crate::mempool::Mempool,
    repository: Arc<dyn Repository>,
    keypair: NodeKeypair,
    proposer: Address,
    config: ProducerConfig,
}

impl BlockProducer {
    pub fn new(
        mempool: crate::mempool::Mempool,
        repository: Arc<dyn Repository>,
        keypair: NodeKeypair,
        config: ProducerConfig,
    ) -> Self {
        let proposer = Address::from_bytes(keypair.public_key_bytes());
        Self {
            mempool,
            repository,
            keypair,
            proposer,
            config,
        }
    }

    /// Builds and signs a candidate block on top of the repository's
    /// current tip. Does not apply it — that happens once consensus
    /// reaches quorum, via [`Repository::apply_block`].
    pub fn produce_block(&self, timestamp: u64) -> Result<ProducedBlock, BlockProductionError> {
        let (tip_height, tip_hash) = match self.repository.chain_tip() {
            Some(tip) => tip,
            None => (u64::MAX, [0u8; 32]), // genesis: no tip yet, height wraps to 0 below
        };
        let next_height = tip_height.wrapping_add(1);
        let parent_hash = if tip_height == u64::MAX {
            [0u8; 32]
        } else {
            tip_hash
        };

        let candidates = self.mempool.select(self.config.max_txs);
        if candidates.is_empty() && !self.config.allow_empty_blocks {
            return Err(BlockProductionError::EmptyMempoolNotAllowed);
        }

        let (included, results) = self.execute_optimistically(&candidates);

        let block = Block::new_signed(
            &self.keypair,
            next_height,
            parent_hash,
            self.proposer,
            included,
            [0u8; 32],
            timestamp,
        );

        Ok(ProducedBlock { block, results })
    }

    /// Applies each candidate against a running copy of account state,
    /// keeping only the ones that succeed. State mutation here is
    /// throwaway bookkeeping to decide inclusion order — the authoritative
    /// state transition happens later in the repository when the block is
    /// actually committed.
    fn execute_optimistically(&self, candidates: &[Transaction]) -> (Vec<Transaction>, Vec<TxResult>) {
        use std::collections::HashMap;
        let mut scratch: HashMap<Address, (u64, u64)> = HashMap::new(); // (balance, nonce)
        let mut included = Vec::new();
        let mut results = Vec::new();

        for tx in candidates {
            let sender_state = scratch
                .entry(tx.sender)
                .or_insert_with(|| {
                    let account = self.repository.get_account(&tx.sender);
                    (account.balance, account.nonce)
                });
            let (balance, nonce) = *sender_state;
            let total = tx.amount.saturating_add(tx.fee);

            if nonce != tx.nonce {
                results.push(TxResult {
                    tx_id: tx.id(),
                    included: false,
                    reason: Some(format!("expected nonce {nonce}, got {}", tx.nonce)),
                });
                continue;
            }
            if balance < total {
                results.push(TxResult {
                    tx_id: tx.id(),
                    included: false,
                    reason: Some("insufficient balance".to_string()),
                });
                continue;
            }

            scratch.insert(tx.sender, (balance - total, nonce + 1));
            let recipient_balance = scratch
                .entry(tx.recipient)
                .or_insert_with(|| {
                    let account = self.repository.get_account(&tx.recipient);
                    (account.balance, account.nonce)
                });
            recipient_balance.0 = recipient_balance.0.saturating_add(tx.amount);

            included.push(tx.clone());
            results.push(TxResult {
                tx_id: tx.id(),
                included: true,
                reason: None,
            });
        }

        (included, results)
    }

    /// Commits a produced block through the repository and drops its
    /// transactions from the mempool.
    pub async fn commit_block(&self, produced: &ProducedBlock) -> Result<(), crate::repository::RepositoryError> {
        self.repository.apply_block(&produced.block).await?;
        let ids: Vec<[u8; 32]> = produced.block.transactions.iter().map(|t| t.id()).collect();
        self.mempool.remove_batch(&ids);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::{Mempool, MempoolConfig};
    use crate::repository::InMemoryRepository;

    fn setup() -> (BlockProducer, Arc<InMemoryRepository>, NodeKeypair) {
        let kp = NodeKeypair::generate();
        let repo = Arc::new(InMemoryRepository::new(crate::event_bus::EventBus::new()));
        let mempool = Mempool::new(MempoolConfig::default());
        let producer = BlockProducer::new(mempool, repo.clone(), kp.clone(), ProducerConfig::default());
        (producer, repo, kp)
    }

    #[tokio::test]
    async fn produces_empty_block_when_allowed() {
        let (producer, _repo, _kp) = setup();
        let produced = producer.produce_block(1).unwrap();
        assert!(produced.block.transactions.is_empty());
        assert_eq!(produced.block.header.height, 0);
    }

    #[tokio::test]
    async fn rejects_empty_mempool_when_disallowed() {
        let kp = NodeKeypair::generate();
        let repo = Arc::new(InMemoryRepository::new(crate::event_bus::EventBus::new()));
        let mempool = Mempool::new(MempoolConfig::default());
        let producer = BlockProducer::new(
            mempool,
            repo,
            kp,
            ProducerConfig {
                max_txs: 10,
                allow_empty_blocks: false,
            },
        );
        assert!(matches!(
            producer.produce_block(1),
            Err(BlockProductionError::EmptyMempoolNotAllowed)
        ));
    }

    #[tokio::test]
    async fn includes_affordable_transaction() {
        let (producer, repo, kp) = setup();
        let sender = Address::from_bytes(kp.public_key_bytes());
        repo.seed_account(sender, 1000);
        let tx = Transaction::new_signed(&kp, sender, Address::from_bytes([9u8; 32]), 100, 1, 0);
        producer.mempool.insert(tx).unwrap();

        let produced = producer.produce_block(1).unwrap();
        assert_eq!(produced.block.transactions.len(), 1);
        assert!(produced.results[0].included);
    }

    #[tokio::test]
    async fn drops_transaction_with_insufficient_balance() {
        let (producer, _repo, kp) = setup();
        let sender = Address::from_bytes(kp.public_key_bytes());
        let tx = Transaction::new_signed(&kp, sender, Address::from_bytes([9u8; 32]), 100, 1, 0);
        producer.mempool.insert(tx).unwrap();

        let produced = producer.produce_block(1).unwrap();
        assert!(produced.block.transactions.is_empty());
        assert!(!produced.results[0].included);
    }

    #[tokio::test]
    async fn commit_persists_block_and_clears_mempool() {
        let (producer, repo, kp) = setup();
        let sender = Address::from_bytes(kp.public_key_bytes());
        repo.seed_account(sender, 1000);
        let tx = Transaction::new_signed(&kp, sender, Address::from_bytes([9u8; 32]), 100, 1, 0);
        producer.mempool.insert(tx).unwrap();

        let produced = producer.produce_block(1).unwrap();
        producer.commit_block(&produced).await.unwrap();

        assert_eq!(repo.chain_tip().unwrap().0, 0);
        assert_eq!(producer.mempool.size(), 0);
    }

    #[tokio::test]
    async fn sequential_blocks_chain_correctly() {
        let (producer, repo, _kp) = setup();
        let b1 = producer.produce_block(1).unwrap();
        producer.commit_block(&b1).await.unwrap();
        let b2 = producer.produce_block(2).unwrap();
        assert_eq!(b2.block.header.height, 1);
        assert_eq!(b2.block.header.parent_hash, repo.chain_tip().unwrap().1);
    }
}
