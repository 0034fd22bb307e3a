//! C4: the node model.
//!
//! A tagged enum of five concrete variants plus a lazy `Stored` placeholder,
//! exactly as the design notes prescribe in place of a classic OOP node
//! hierarchy. Nodes are held behind `Rc<RefCell<_>>` so a single physical
//! node can be reachable both from its parent's child slot and from the
//! batch map (C6) without duplicating the 256-wide children array; this
//! mirrors the single-writer, single-threaded model of §5 (no `Send`/`Sync`
//! bound is needed or provided).

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::crypto::{Commitment, Scalar};
use crate::persistence::NodeLoader;

/// Path from the root to a node, one byte per level (§3.1). The empty
/// location identifies the root.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location(pub Vec<u8>);

impl Location {
    pub fn root() -> Self {
        Location(Vec::new())
    }

    pub fn child(&self, byte: u8) -> Self {
        let mut v = self.0.clone();
        v.push(byte);
        Location(v)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Location(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

pub type Value = Vec<u8>;
pub type Stem = [u8; 31];
pub type NodeRef = Rc<RefCell<Node>>;

/// Fixed-width array of 256 children, one per possible next path byte.
pub type Children = Vec<NodeRef>;

pub fn null_branch_children() -> Children {
    (0..256).map(|_| Rc::new(RefCell::new(Node::NullBranch))).collect()
}

pub fn null_leaf_children() -> Children {
    (0..256)
        .map(|_| Rc::new(RefCell::new(Node::NullLeaf { previous: None })))
        .collect()
}

/// One of the five structural variants, or a lazy `Stored` wrapper.
pub enum Node {
    /// An absent Internal/Stem slot. Contributes the zero scalar to its
    /// parent's commitment (invariant 3).
    NullBranch,

    /// An absent Leaf slot within a Stem's 256 value slots. Contributes the
    /// zero scalar. Retains the value that occupied the slot before a
    /// removal, for the benefit of callers that need the old value during a
    /// single logical mutation (§3.3 invariant 7).
    NullLeaf { previous: Option<Value> },

    /// A concrete key/value pair living under a Stem.
    Leaf {
        location: Location,
        value: Value,
        previous: Option<Value>,
        dirty: bool,
        persisted: bool,
    },

    /// A 256-ary branch that owns a 31-byte stem shared by every Leaf
    /// beneath it, plus the two halves of its commitment (low/high value
    /// limbs, invariant 6).
    Stem {
        location: Location,
        stem: Stem,
        children: Children,
        left_commitment: Option<Commitment>,
        right_commitment: Option<Commitment>,
        left_hash: Option<Scalar>,
        right_hash: Option<Scalar>,
        commitment: Option<Commitment>,
        hash: Option<Scalar>,
        previous_hash: Option<Scalar>,
        dirty: bool,
        persisted: bool,
    },

    /// A 256-ary branch whose children are themselves Internal or Stem
    /// nodes.
    Internal {
        location: Location,
        children: Children,
        commitment: Option<Commitment>,
        hash: Option<Scalar>,
        previous_hash: Option<Scalar>,
        dirty: bool,
        persisted: bool,
    },

    /// A not-yet-materialised node: bytes exist at `location` in the
    /// backing store but have not been decoded. Resolved on demand via
    /// `loader` (C8) the first time a traversal reaches it.
    Stored {
        location: Location,
        hash: Option<Scalar>,
        loader: Arc<dyn NodeLoader>,
    },
}

impl Node {
    pub fn new_stem(location: Location, stem: Stem) -> NodeRef {
        Rc::new(RefCell::new(Node::Stem {
            location,
            stem,
            children: null_leaf_children(),
            left_commitment: None,
            right_commitment: None,
            left_hash: None,
            right_hash: None,
            commitment: None,
            hash: None,
            previous_hash: None,
            dirty: true,
            persisted: false,
        }))
    }

    pub fn new_internal(location: Location) -> NodeRef {
        Rc::new(RefCell::new(Node::Internal {
            location,
            children: null_branch_children(),
            commitment: None,
            hash: None,
            previous_hash: None,
            dirty: true,
            persisted: false,
        }))
    }

    pub fn new_leaf(location: Location, value: Value, previous: Option<Value>) -> NodeRef {
        Rc::new(RefCell::new(Node::Leaf {
            location,
            value,
            previous,
            dirty: true,
            persisted: false,
        }))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::NullBranch | Node::NullLeaf { .. })
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Node::NullBranch | Node::NullLeaf { .. } => None,
            Node::Leaf { location, .. }
            | Node::Stem { location, .. }
            | Node::Internal { location, .. }
            | Node::Stored { location, .. } => Some(location),
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Node::Leaf { dirty, .. } | Node::Stem { dirty, .. } | Node::Internal { dirty, .. } => {
                *dirty
            }
            _ => false,
        }
    }

    pub fn mark_dirty(&mut self) {
        match self {
            Node::Leaf { dirty, .. } | Node::Stem { dirty, .. } | Node::Internal { dirty, .. } => {
                *dirty = true;
            }
            _ => {}
        }
    }

    pub fn mark_clean(&mut self) {
        match self {
            Node::Leaf { dirty, .. } | Node::Stem { dirty, .. } | Node::Internal { dirty, .. } => {
                *dirty = false;
            }
            _ => {}
        }
    }

    pub fn mark_persisted(&mut self) {
        match self {
            Node::Leaf { persisted, .. }
            | Node::Stem { persisted, .. }
            | Node::Internal { persisted, .. } => {
                *persisted = true;
            }
            _ => {}
        }
    }

    pub fn children(&self) -> Option<&Children> {
        match self {
            Node::Stem { children, .. } | Node::Internal { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Children> {
        match self {
            Node::Stem { children, .. } | Node::Internal { children, .. } => Some(children),
            _ => None,
        }
    }

    pub fn hash(&self) -> Option<Scalar> {
        match self {
            Node::NullBranch => Some(crate::crypto::ZERO_SCALAR),
            Node::Stem { hash, .. } | Node::Internal { hash, .. } | Node::Stored { hash, .. } => {
                *hash
            }
            _ => None,
        }
    }

    pub fn set_hash(&mut self, value: Scalar) {
        match self {
            Node::Stem { hash, .. } | Node::Internal { hash, .. } | Node::Stored { hash, .. } => {
                *hash = Some(value);
            }
            _ => {}
        }
    }

    /// Rewrite this node's own location (and, for Stem nodes, every
    /// concrete Leaf child's location) after the node has been pushed one
    /// level deeper by a diverging insert.
    pub fn set_location(&mut self, new_location: Location) {
        match self {
            Node::Leaf { location, .. }
            | Node::Stored { location, .. } => {
                *location = new_location;
            }
            Node::Internal { location, .. } => {
                *location = new_location;
            }
            Node::Stem {
                location, children, ..
            } => {
                *location = new_location.clone();
                for (i, child) in children.iter().enumerate() {
                    let mut child_mut = child.borrow_mut();
                    if let Node::Leaf { location: child_loc, .. }
                    | Node::Stored { location: child_loc, .. } = &mut *child_mut
                    {
                        *child_loc = new_location.child(i as u8);
                    }
                }
            }
            Node::NullBranch | Node::NullLeaf { .. } => {}
        }
    }
}
