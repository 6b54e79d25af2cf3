//! # Repository (external collaborator)
//!
//! Persists committed blocks and the account state they produce. This
//! crate ships an in-memory reference implementation only — a production
//! deployment swaps in a real store behind the same trait without
//! touching the consensus, producer, or driver code that depends on it.

use crate::crypto::NodePublicKey;
use crate::model::{Account, Address, Block, Event, Transaction};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("block height {got} does not follow current tip height {expected}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("block parent hash does not match the current tip")]
    ParentMismatch,
    #[error("transaction {0:x?} has an invalid signature")]
    InvalidTransaction([u8; 32]),
    #[error("transaction {0:x?} has insufficient balance or a stale nonce")]
    TransactionRejected([u8; 32]),
    #[error("account {0} is frozen")]
    AccountFrozen(String),
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Validates and applies `block`: every transaction is replayed against
    /// current state in order, and either the whole block applies or none
    /// of it does — a rejected transaction fails the entire block rather
    /// than being silently skipped, since by the time a block reaches the
    /// repository it has already passed through consensus and should be
    /// unconditionally valid.
    async fn apply_block(&self, block: &Block) -> Result<(), RepositoryError>;

    fn chain_tip(&self) -> Option<(u64, [u8; 32])>;

    fn get_block(&self, height: u64) -> Option<Block>;

    fn get_account(&self, address: &Address) -> Account;
}

struct State {
    blocks: HashMap<u64, Block>,
    accounts: HashMap<Address, Account>,
    tip: Option<(u64, [u8; 32])>,
}

pub struct InMemoryRepository {
    state: RwLock<State>,
    events: crate::event_bus::EventBus,
}

impl InMemoryRepository {
    pub fn new(events: crate::event_bus::EventBus) -> Self {
        Self {
            state: RwLock::new(State {
                blocks: HashMap::new(),
                accounts: HashMap::new(),
                tip: None,
            }),
            events,
        }
    }

    /// Seeds an account balance directly, bypassing transaction replay.
    /// Used to build a genesis state or to prefund `--dev` accounts.
    pub fn seed_account(&self, address: Address, balance: u64) {
        self.state
            .write()
            .accounts
            .insert(address, Account::new(balance));
    }

    fn apply_transaction(accounts: &mut HashMap<Address, Account>, tx: &Transaction) -> Result<(), RepositoryError> {
        let sender_key = NodePublicKey::from_bytes(*tx.sender.as_bytes());
        if tx.verify(&sender_key).is_err() {
            return Err(RepositoryError::InvalidTransaction(tx.id()));
        }
        let sender_account = accounts.entry(tx.sender).or_insert_with(Account::empty);
        if sender_account.frozen {
            return Err(RepositoryError::AccountFrozen(tx.sender.to_hex()));
        }
        let total = tx.amount.saturating_add(tx.fee);
        if sender_account.nonce != tx.nonce || sender_account.balance < total {
            return Err(RepositoryError::TransactionRejected(tx.id()));
        }
        sender_account.balance -= total;
        sender_account.nonce += 1;

        let recipient_account = accounts.entry(tx.recipient).or_insert_with(Account::empty);
        recipient_account.balance = recipient_account.balance.saturating_add(tx.amount);
        Ok(())
    }

    fn try_apply(&self, block: &Block) -> Result<(), RepositoryError> {
        let mut state = self.state.write();

        let expected_height = state.tip.map(|(h, _)| h + 1).unwrap_or(0);
        if block.header.height != expected_height {
            return Err(RepositoryError::HeightMismatch {
                expected: expected_height,
                got: block.header.height,
            });
        }
        if let Some((_, tip_hash)) = state.tip {
            if block.header.parent_hash != tip_hash {
                return Err(RepositoryError::ParentMismatch);
            }
        }

        let mut scratch = state.accounts.clone();
        for tx in &block.transactions {
            Self::apply_transaction(&mut scratch, tx)?;
        }
        state.accounts = scratch;

        let hash = block.hash();
        state.blocks.insert(block.header.height, block.clone());
        state.tip = Some((block.header.height, hash));
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn apply_block(&self, block: &Block) -> Result<(), RepositoryError> {
        if let Err(err) = self.try_apply(block) {
            let _ = self.events.notify(Event::BlockCommitFailed {
                round: block.header.height,
                reason: err.to_string(),
            });
            return Err(err);
        }
        let _ = self.events.notify(Event::BlockCommitted { block: block.clone() });
        Ok(())
    }

    fn chain_tip(&self) -> Option<(u64, [u8; 32])> {
        self.state.read().tip
    }

    fn get_block(&self, height: u64) -> Option<Block> {
        self.state.read().blocks.get(&height).cloned()
    }

    fn get_account(&self, address: &Address) -> Account {
        self.state
            .read()
            .accounts
            .get(address)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NodeKeypair;

    fn block_with(kp: &NodeKeypair, height: u64, parent: [u8; 32], txs: Vec<Transaction>) -> Block {
        let proposer = Address::from_bytes(kp.public_key_bytes());
        Block::new_signed(kp, height, parent, proposer, txs, [0u8; 32], height)
    }

    #[tokio::test]
    async fn genesis_block_applies() {
        let repo = InMemoryRepository::new(crate::event_bus::EventBus::new());
        let kp = NodeKeypair::generate();
        let block = block_with(&kp, 0, [0u8; 32], vec![]);
        repo.apply_block(&block).await.unwrap();
        assert_eq!(repo.chain_tip(), Some((0, block.hash())));
    }

    #[tokio::test]
    async fn wrong_height_rejected() {
        let repo = InMemoryRepository::new(crate::event_bus::EventBus::new());
        let kp = NodeKeypair::generate();
        let block = block_with(&kp, 5, [0u8; 32], vec![]);
        assert_eq!(
            repo.apply_block(&block).await,
            Err(RepositoryError::HeightMismatch { expected: 0, got: 5 })
        );
    }

    #[tokio::test]
    async fn parent_mismatch_rejected() {
        let repo = InMemoryRepository::new(crate::event_bus::EventBus::new());
        let kp = NodeKeypair::generate();
        let genesis = block_with(&kp, 0, [0u8; 32], vec![]);
        repo.apply_block(&genesis).await.unwrap();
        let bad = block_with(&kp, 1, [7u8; 32], vec![]);
        assert_eq!(repo.apply_block(&bad).await, Err(RepositoryError::ParentMismatch));
    }

    #[tokio::test]
    async fn transfer_moves_balance() {
        let repo = InMemoryRepository::new(crate::event_bus::EventBus::new());
        let kp = NodeKeypair::generate();
        let sender = Address::from_bytes(kp.public_key_bytes());
        let recipient = Address::from_bytes([5u8; 32]);
        repo.seed_account(sender, 1000);

        let genesis = block_with(&kp, 0, [0u8; 32], vec![]);
        repo.apply_block(&genesis).await.unwrap();

        let tx = Transaction::new_signed(&kp, sender, recipient, 100, 1, 0);
        let b1 = block_with(&kp, 1, genesis.hash(), vec![tx]);
        repo.apply_block(&b1).await.unwrap();

        assert_eq!(repo.get_account(&sender).balance, 899);
        assert_eq!(repo.get_account(&recipient).balance, 100);
    }

    #[tokio::test]
    async fn insufficient_balance_rejects_whole_block() {
        let repo = InMemoryRepository::new(crate::event_bus::EventBus::new());
        let kp = NodeKeypair::generate();
        let sender = Address::from_bytes(kp.public_key_bytes());
        let genesis = block_with(&kp, 0, [0u8; 32], vec![]);
        repo.apply_block(&genesis).await.unwrap();

        let tx = Transaction::new_signed(&kp, sender, Address::from_bytes([5u8; 32]), 100, 1, 0);
        let b1 = block_with(&kp, 1, genesis.hash(), vec![tx]);
        assert!(repo.apply_block(&b1).await.is_err());
        assert_eq!(repo.chain_tip(), Some((0, genesis.hash())));
    }

    #[tokio::test]
    async fn frozen_account_cannot_send() {
        let repo = InMemoryRepository::new(crate::event_bus::EventBus::new());
        let kp = NodeKeypair::generate();
        let sender = Address::from_bytes(kp.public_key_bytes());
        repo.seed_account(sender, 1000);
        repo.state.write().accounts.get_mut(&sender).unwrap().frozen = true;

        let genesis = block_with(&kp, 0, [0u8; 32], vec![]);
        repo.apply_block(&genesis).await.unwrap();
        let tx = Transaction::new_signed(&kp, sender, Address::from_bytes([5u8; 32]), 10, 1, 0);
        let b1 = block_with(&kp, 1, genesis.hash(), vec![tx]);
        assert!(repo.apply_block(&b1).await.is_err());
    }
}
