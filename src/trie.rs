//! C7: the trie facade.
//!
//! `SimpleTrie` recomputes the root hash eagerly after every mutation,
//! running the batch engine over a throwaway, single-entry-deep map each
//! time. `BatchedTrie` instead owns a persistent [`BatchMap`] and only
//! flushes it when `get_root_hash`/`commit` is actually called, so a burst
//! of writes between two root computations costs one level-synchronous pass
//! rather than one pass per write. Both wrap the same core and share every
//! byte of mutation/read logic.

use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::{BatchMap, BatchProcessor};
use crate::crypto::{CryptoBackend, Scalar, ZERO_SCALAR};
use crate::errors::{Result, TrieError};
use crate::node::{Location, Node, NodeRef, Value};
use crate::persistence::{encode_node, NodeFactory, NodeLoader, NodeUpdater};
use crate::{config::TrieConfig, visitor};

struct Core {
    root: NodeRef,
    crypto: Rc<dyn CryptoBackend>,
    loader: Arc<dyn NodeLoader>,
    processor: BatchProcessor,
    config: TrieConfig,
}

impl Core {
    fn new(crypto: Rc<dyn CryptoBackend>, loader: Arc<dyn NodeLoader>, config: TrieConfig) -> Self {
        let root = Node::new_internal(Location::root());
        Self {
            root,
            processor: BatchProcessor::new(config.max_batch_size),
            crypto,
            loader,
            config,
        }
    }

    fn from_root(
        root: NodeRef,
        crypto: Rc<dyn CryptoBackend>,
        loader: Arc<dyn NodeLoader>,
        config: TrieConfig,
    ) -> Self {
        Self {
            root,
            processor: BatchProcessor::new(config.max_batch_size),
            crypto,
            loader,
            config,
        }
    }

    fn check_key(key: &[u8]) -> Result<()> {
        if key.len() != 32 {
            return Err(TrieError::InvalidKey { actual: key.len() });
        }
        Ok(())
    }

    fn get(&self, key: &[u8; 32]) -> Result<Option<Value>> {
        visitor::get(&self.root, key, &self.loader)
    }

    fn put(&mut self, key: &[u8; 32], value: Value, batch: &mut BatchMap) -> Result<Option<Value>> {
        let (new_root, previous) =
            visitor::put(&self.root, key, value, &Location::root(), 0, &self.loader, batch)?;
        self.root = new_root;
        Ok(previous)
    }

    fn remove(&mut self, key: &[u8; 32], batch: &mut BatchMap) -> Result<Option<Value>> {
        let (new_root, previous) = visitor::remove(&self.root, key, 0, &self.loader, batch)?;
        self.root = new_root;
        Ok(previous)
    }

    fn flush(&self, batch: &mut BatchMap) -> Result<Scalar> {
        let hash = self
            .processor
            .compute_root_hash(&self.root, batch, self.crypto.as_ref())
            .map_err(|e| {
                warn!(error = %e, "root hash computation failed");
                e
            })?;
        debug!(root = ?hash, "root hash computed");
        Ok(hash)
    }

    fn commit(&self, batch: &mut BatchMap, updater: &dyn NodeUpdater) -> Result<Scalar> {
        let hash = self.flush(batch)?;
        persist_subtree(&self.root, self.crypto.as_ref(), updater)?;
        Ok(hash)
    }

    fn flatten(&self) -> Result<Vec<([u8; 32], Value)>> {
        visitor::flatten(&self.root, &self.loader)
    }
}

/// Walk every clean, dirty-free node reachable from `node_ref` and persist
/// it via `updater`, skipping unmaterialised `Stored` placeholders (nothing
/// changed under them since they were loaded). A Stem's leaf children are
/// embedded in the Stem's own record (§6.1) and so are never visited or
/// stored separately; only Internal children are recursed into.
fn persist_subtree(node_ref: &NodeRef, crypto: &dyn CryptoBackend, updater: &dyn NodeUpdater) -> Result<()> {
    let (location, hash, encoded, internal_children) = {
        let node = node_ref.borrow();
        match &*node {
            Node::NullBranch | Node::NullLeaf { .. } | Node::Stored { .. } | Node::Leaf { .. } => {
                return Ok(())
            }
            // Materialised (e.g. by a `get`) but never enrolled into a
            // batch since being loaded: already on disk byte-for-byte,
            // nothing to re-encode, and its commitment was never
            // recomputed so `encode_node` would have nothing to compress.
            Node::Stem { dirty: false, persisted: true, .. }
            | Node::Internal { dirty: false, persisted: true, .. } => return Ok(()),
            Node::Stem { location, hash, .. } => {
                (location.clone(), hash.unwrap_or(ZERO_SCALAR), encode_node(&node, crypto)?, None)
            }
            Node::Internal { location, hash, children, .. } => (
                location.clone(),
                hash.unwrap_or(ZERO_SCALAR),
                encode_node(&node, crypto)?,
                Some(children.clone()),
            ),
        }
    };
    updater.store(&location, hash, encoded)?;
    node_ref.borrow_mut().mark_persisted();
    if let Some(children) = internal_children {
        for child in children.iter() {
            persist_subtree(child, crypto, updater)?;
        }
    }
    Ok(())
}

/// Eager-hashing trie: every `put`/`remove` triggers an immediate,
/// single-shot root recomputation. Simplest to reason about; costs a full
/// batch flush per mutation.
pub struct SimpleTrie {
    core: Core,
}

impl SimpleTrie {
    pub fn new(crypto: Rc<dyn CryptoBackend>, loader: Arc<dyn NodeLoader>) -> Self {
        Self::with_config(crypto, loader, TrieConfig::default())
    }

    pub fn with_config(crypto: Rc<dyn CryptoBackend>, loader: Arc<dyn NodeLoader>, config: TrieConfig) -> Self {
        Self { core: Core::new(crypto, loader, config) }
    }

    pub fn from_root(
        root: NodeRef,
        crypto: Rc<dyn CryptoBackend>,
        loader: Arc<dyn NodeLoader>,
        config: TrieConfig,
    ) -> Self {
        Self { core: Core::from_root(root, crypto, loader, config) }
    }

    pub fn get(&self, key: &[u8; 32]) -> Result<Option<Value>> {
        Core::check_key(key)?;
        self.core.get(key)
    }

    pub fn put(&mut self, key: &[u8; 32], value: Value) -> Result<Option<Value>> {
        Core::check_key(key)?;
        let mut batch = BatchMap::new();
        let previous = self.core.put(key, value, &mut batch)?;
        self.core.flush(&mut batch)?;
        Ok(previous)
    }

    pub fn remove(&mut self, key: &[u8; 32]) -> Result<Option<Value>> {
        Core::check_key(key)?;
        let mut batch = BatchMap::new();
        let removed = self.core.remove(key, &mut batch)?;
        self.core.flush(&mut batch)?;
        Ok(removed)
    }

    pub fn get_root_hash(&self) -> Result<Scalar> {
        let mut batch = BatchMap::new();
        self.core.flush(&mut batch)
    }

    pub fn commit(&self, updater: &dyn NodeUpdater) -> Result<Scalar> {
        let mut batch = BatchMap::new();
        self.core.commit(&mut batch, updater)
    }

    pub fn flatten(&self) -> Result<Vec<([u8; 32], Value)>> {
        self.core.flatten()
    }

    pub fn root(&self) -> NodeRef {
        self.core.root.clone()
    }
}

/// Deferred-hashing trie: mutations only enrol dirty nodes into a
/// persistent [`BatchMap`]; the expensive commitment work happens once, on
/// `get_root_hash`/`commit`, however many writes accumulated in between.
pub struct BatchedTrie {
    core: Core,
    batch: BatchMap,
}

impl BatchedTrie {
    pub fn new(crypto: Rc<dyn CryptoBackend>, loader: Arc<dyn NodeLoader>) -> Self {
        Self::with_config(crypto, loader, TrieConfig::default())
    }

    pub fn with_config(crypto: Rc<dyn CryptoBackend>, loader: Arc<dyn NodeLoader>, config: TrieConfig) -> Self {
        Self {
            core: Core::new(crypto, loader, config),
            batch: BatchMap::new(),
        }
    }

    pub fn from_root(
        root: NodeRef,
        crypto: Rc<dyn CryptoBackend>,
        loader: Arc<dyn NodeLoader>,
        config: TrieConfig,
    ) -> Self {
        Self {
            core: Core::from_root(root, crypto, loader, config),
            batch: BatchMap::new(),
        }
    }

    pub fn get(&self, key: &[u8; 32]) -> Result<Option<Value>> {
        Core::check_key(key)?;
        self.core.get(key)
    }

    pub fn put(&mut self, key: &[u8; 32], value: Value) -> Result<Option<Value>> {
        Core::check_key(key)?;
        self.core.put(key, value, &mut self.batch)
    }

    pub fn remove(&mut self, key: &[u8; 32]) -> Result<Option<Value>> {
        Core::check_key(key)?;
        self.core.remove(key, &mut self.batch)
    }

    pub fn get_root_hash(&mut self) -> Result<Scalar> {
        self.core.flush(&mut self.batch)
    }

    pub fn commit(&mut self, updater: &dyn NodeUpdater) -> Result<Scalar> {
        self.core.commit(&mut self.batch, updater)
    }

    pub fn flatten(&self) -> Result<Vec<([u8; 32], Value)>> {
        self.core.flatten()
    }

    pub fn root(&self) -> NodeRef {
        self.core.root.clone()
    }

    /// Number of nodes currently pending in the batch, awaiting the next
    /// `get_root_hash`/`commit`. Exposed for tests and operators, not used
    /// internally.
    pub fn pending_count(&self) -> usize {
        self.batch.len()
    }
}

/// Rebuild a trie from a persisted root, reusing `factory`'s loader. The
/// returned root is a lazy `Stored` placeholder until traversed.
pub fn load_root(factory: &NodeFactory, root_hash: Option<Scalar>) -> Result<NodeRef> {
    match factory.retrieve(&Location::root(), root_hash)? {
        Some(node) => Ok(node),
        None => Ok(Node::new_internal(Location::root())),
    }
}
