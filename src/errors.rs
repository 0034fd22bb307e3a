//! Error types for the Verkle trie engine.
//!
//! Every error kind in §7 is recoverable in the sense that it surfaces to the
//! caller rather than panicking; `InvariantViolation` and `MissingNode` are
//! fatal to the *trie instance* (it should not be mutated further) but are
//! still ordinary `Result::Err` values, never panics.

use thiserror::Error;

use crate::node::Location;

/// All error conditions the engine can report.
#[derive(Debug, Error)]
pub enum TrieError {
    /// The cryptographic backend (C1) reported failure.
    #[error("cryptographic backend failure: {underlying}")]
    Crypto { underlying: String },

    /// The node factory returned `None` for a location a sibling pointed to.
    /// Fatal: the trie is truncated or corrupted.
    #[error("missing node at location {location:?}, expected by a sibling reference")]
    MissingNode { location: Location },

    /// A structural invariant from §3.3 failed. Fatal; the trie is unusable
    /// thereafter.
    #[error("invariant violation: {detail}")]
    InvariantViolation { detail: String },

    /// A key supplied to `get`/`put`/`remove` was not exactly 32 bytes.
    #[error("invalid key: expected 32 bytes, got {actual}")]
    InvalidKey { actual: usize },
}

impl TrieError {
    pub fn crypto(underlying: impl std::fmt::Display) -> Self {
        TrieError::Crypto {
            underlying: underlying.to_string(),
        }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        TrieError::InvariantViolation {
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrieError>;
