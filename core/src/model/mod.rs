//! Core data model: accounts, transactions, blocks, consensus artifacts,
//! domain events, and the wire message envelope the gossip switch moves.

pub mod account;
pub mod block;
pub mod event;
pub mod message;
pub mod proposal;
pub mod transaction;

pub use account::{Account, Address};
pub use block::{Block, BlockError, BlockHeader};
pub use event::{Event, EventType};
pub use message::{MessageKind, SwitchMessage};
pub use proposal::{Proposal, Vote, VotePhase};
pub use transaction::{Transaction, TransactionError};
