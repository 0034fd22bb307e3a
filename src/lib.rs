//! # verkle-state-trie
//!
//! A 256-ary Verkle trie engine for Ethereum-style account state.
//!
//! ## Shape
//!
//! - [`crypto`] (C1) — the `CryptoBackend` boundary: vector commitments,
//!   incremental sparse updates, and the group-to-field map, backed by
//!   Bandersnatch/`banderwagon`.
//! - [`stem`] (C2) — derives the 31-byte stem shared by every key under an
//!   `(address, index)` pair, with address- and stem-level caches.
//! - [`keys`] (C3) — maps account header fields, storage slots, and EVM
//!   code chunks onto 32-byte trie keys.
//! - [`node`] (C4) — the five-variant node enum plus the lazy `Stored`
//!   placeholder.
//! - [`visitor`] (C5) — get/put/remove/flatten as recursive functions over
//!   the node enum, threading a batch-enrolment map through mutations.
//! - [`batch`] (C6) — the level-synchronous batched commitment engine.
//! - [`trie`] (C7) — `SimpleTrie`/`BatchedTrie`, the public facade.
//! - [`persistence`] (C8) — the `NodeLoader`/`NodeUpdater` ports and the
//!   in-memory adapter.
//!
//! A trie instance is single-threaded, single-writer (no `Send`/`Sync`
//! bound on [`node::NodeRef`]); sharing a trie across threads is outside
//! this crate's scope.

pub mod batch;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod keys;
pub mod node;
pub mod persistence;
pub mod stem;
pub mod trie;
pub mod visitor;

pub use config::TrieConfig;
pub use crypto::{BandersnatchBackend, CryptoBackend};
pub use errors::{Result, TrieError};
pub use persistence::{InMemoryStore, NodeFactory, NodeLoader, NodeUpdater};
pub use stem::StemHasher;
pub use trie::{BatchedTrie, SimpleTrie};
