//! # Block Syncer
//!
//! Pulls missing blocks from peers and feeds them into the repository so a
//! node that falls behind (or just joined) can catch up to the network's
//! chain tip without going through consensus for blocks it merely needs to
//! replay.

use crate::model::Block;
use crate::repository::{Repository, RepositoryError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub batch_size: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("block at height {0} does not chain from the previous block in the batch")]
    ChainGap(u64),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub blocks_applied: u64,
    pub final_height: u64,
}

pub struct BlockSyncer {
    repository: Arc<dyn Repository>,
    config: SyncConfig,
}

impl BlockSyncer {
    pub fn new(repository: Arc<dyn Repository>, config: SyncConfig) -> Self {
        Self { repository, config }
    }

    pub fn local_height(&self) -> Option<u64> {
        self.repository.chain_tip().map(|(h, _)| h)
    }

    pub fn needs_sync(&self, remote_height: u64) -> bool {
        match self.local_height() {
            Some(local) => remote_height > local,
            None => true,
        }
    }

    /// Splits the gap between `local_height` and `remote_height` into
    /// `(start, end)` batches, `end` exclusive, each no larger than
    /// `batch_size`.
    pub fn compute_sync_plan(&self, local_height: Option<u64>, remote_height: u64) -> Vec<(u64, u64)> {
        let start = local_height.map(|h| h + 1).unwrap_or(0);
        if start > remote_height {
            return Vec::new();
        }
        let mut plan = Vec::new();
        let mut cursor = start;
        let end = remote_height + 1;
        while cursor < end {
            let batch_end = (cursor + self.config.batch_size).min(end);
            plan.push((cursor, batch_end));
            cursor = batch_end;
        }
        plan
    }

    /// Validates then applies a contiguous sequence of blocks. Rejects the
    /// whole batch on the first block that fails to chain from its
    /// predecessor — already-applied blocks before it remain applied, since
    /// the repository itself has no batch rollback.
    pub async fn apply_blocks(&self, blocks: &[Block]) -> Result<SyncResult, SyncError> {
        let mut applied = 0u64;
        let mut last_hash = self.repository.chain_tip().map(|(_, h)| h);

        for block in blocks {
            if let Some(expected_parent) = last_hash {
                if block.header.parent_hash != expected_parent {
                    return Err(SyncError::ChainGap(block.header.height));
                }
            }
            self.repository.apply_block(block).await?;
            last_hash = Some(block.hash());
            applied += 1;
        }

        Ok(SyncResult {
            blocks_applied: applied,
            final_height: self.repository.chain_tip().map(|(h, _)| h).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NodeKeypair;
    use crate::model::Address;
    use crate::repository::InMemoryRepository;

    fn chain(n: u64) -> Vec<Block> {
        let kp = NodeKeypair::generate();
        let proposer = Address::from_bytes(kp.public_key_bytes());
        let mut blocks = Vec::new();
        let mut parent = [0u8; 32];
        for h in 0..n {
            let block = Block::new_signed(&kp, h, parent, proposer, vec![], [0u8; 32], h + 1);
            parent = block.hash();
            blocks.push(block);
        }
        blocks
    }

    #[tokio::test]
    async fn applies_a_contiguous_chain() {
        let repo = Arc::new(InMemoryRepository::new(crate::event_bus::EventBus::new()));
        let syncer = BlockSyncer::new(repo.clone(), SyncConfig::default());
        let result = syncer.apply_blocks(&chain(5)).await.unwrap();
        assert_eq!(result.blocks_applied, 5);
        assert_eq!(result.final_height, 4);
    }

    #[tokio::test]
    async fn rejects_batch_with_a_gap() {
        let repo = Arc::new(InMemoryRepository::new(crate::event_bus::EventBus::new()));
        let syncer = BlockSyncer::new(repo, SyncConfig::default());
        let mut blocks = chain(3);
        blocks[2].header.parent_hash = [0xffu8; 32];
        assert!(matches!(
            syncer.apply_blocks(&blocks).await,
            Err(SyncError::ChainGap(2))
        ));
    }

    #[test]
    fn needs_sync_compares_against_local_height() {
        let repo = Arc::new(InMemoryRepository::new(crate::event_bus::EventBus::new()));
        let syncer = BlockSyncer::new(repo, SyncConfig::default());
        assert!(syncer.needs_sync(0));
    }

    #[test]
    fn sync_plan_batches_large_gaps() {
        let repo = Arc::new(InMemoryRepository::new(crate::event_bus::EventBus::new()));
        let syncer = BlockSyncer::new(repo, SyncConfig { batch_size: 10 });
        let plan = syncer.compute_sync_plan(None, 25);
        assert_eq!(plan, vec![(0, 10), (10, 20), (20, 26)]);
    }

    #[test]
    fn sync_plan_empty_when_already_caught_up() {
        let repo = Arc::new(InMemoryRepository::new(crate::event_bus::EventBus::new()));
        let syncer = BlockSyncer::new(repo, SyncConfig::default());
        assert!(syncer.compute_sync_plan(Some(10), 5).is_empty());
    }
}
