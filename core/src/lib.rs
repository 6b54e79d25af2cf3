// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Covenant Core
//!
//! The agreement engine behind a permissioned BFT node: an event bus, a
//! mempool, a gossip switch, propagators that bridge the two, a pluggable
//! consensus port, a block producer, a round driver, and the repository
//! and transport seams a binary wires in to actually run a network.
//!
//! ## Architecture
//!
//! - **event_bus** — in-process publish/subscribe hub every other
//!   component reports through, instead of calling each other directly.
//! - **mempool** — priority-ordered pending transaction pool.
//! - **switch** — gossip dedup layer between the propagators and the
//!   transport.
//! - **propagator** — validates transactions and blocks exactly once,
//!   whether they originated locally or arrived from a peer.
//! - **consensus** — the pluggable agreement policy: solo, dBFT, or FBFT.
//! - **producer** — builds and signs candidate blocks from mempool
//!   contents.
//! - **driver** — drives consensus rounds to completion.
//! - **sync** — catches a lagging node up to the network's chain tip.
//! - **repository** / **transport** — external collaborator seams; this
//!   crate ships in-memory and loopback reference implementations only.
//! - **node** — the aggregate that wires all of the above together.
//! - **crypto** — Ed25519 signing and BLAKE3/SHA-256 hashing.
//! - **config** — node configuration: defaults, file, environment, CLI.
//!
//! ## Design Philosophy
//!
//! 1. Correctness over performance, but still fast.
//! 2. No unsafe code.
//! 3. Every public API is documented.
//! 4. If it touches consensus or money movement, it has tests. Plural.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod driver;
pub mod event_bus;
pub mod mempool;
pub mod model;
pub mod node;
pub mod producer;
pub mod propagator;
pub mod repository;
pub mod switch;
pub mod sync;
pub mod transport;
