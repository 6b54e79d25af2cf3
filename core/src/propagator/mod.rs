//! Propagators translate between domain objects (transactions, blocks) and
//! the gossip switch's opaque wire envelope, validating each message
//! exactly once regardless of whether it originated locally or arrived
//! from a peer.

pub mod block_propagator;
pub mod tx_propagator;

pub use block_propagator::{BlockPropagator, BlockPropagatorError};
pub use tx_propagator::{TxPropagator, TxPropagatorError};
