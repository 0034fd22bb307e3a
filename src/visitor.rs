//! C5: the mutation protocol — get/put/remove/flatten.
//!
//! The original design's OOP visitor dispatch is re-expressed as plain
//! recursive functions matching on the `Node` tag, per the design notes: a
//! tagged enum plus free functions is the idiomatic Rust shape for this,
//! not a `dyn Visitor` double-dispatch hierarchy. Every node a traversal
//! passes through that is still `Stored` gets materialised in place first,
//! so callers always see concrete variants. `put`/`remove` carry a
//! `BatchMap` reference and enroll every structurally touched node into it;
//! hashing itself is a separate concern (C6).

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::batch::BatchMap;
use crate::errors::{Result, TrieError};
use crate::node::{Location, Node, NodeRef, Stem, Value};
use crate::persistence::{decode_node, NodeLoader};

/// Resolve a `Stored` node in place, overwriting the `Rc<RefCell<_>>`'s
/// contents so the parent's child slot (and any other holder of the same
/// `NodeRef`, e.g. the batch map) observes the materialised node without
/// re-linking.
pub fn materialize(node_ref: &NodeRef, loader: &Arc<dyn NodeLoader>) -> Result<()> {
    let needs_materialize = matches!(&*node_ref.borrow(), Node::Stored { .. });
    if !needs_materialize {
        return Ok(());
    }
    let (location, known_hash) = match &*node_ref.borrow() {
        Node::Stored { location, hash, .. } => (location.clone(), *hash),
        _ => unreachable!(),
    };
    let bytes = loader
        .load(&location)?
        .ok_or_else(|| TrieError::MissingNode { location: location.clone() })?;
    let decoded = decode_node(location, &bytes, known_hash, Arc::clone(loader))?;
    *node_ref.borrow_mut() = decoded;
    Ok(())
}

/// `get(key)`: returns the value stored at `key`, or `None` if absent.
pub fn get(root: &NodeRef, key: &[u8; 32], loader: &Arc<dyn NodeLoader>) -> Result<Option<Value>> {
    get_at(root, key, 0, loader)
}

fn get_at(
    node_ref: &NodeRef,
    key: &[u8; 32],
    depth: usize,
    loader: &Arc<dyn NodeLoader>,
) -> Result<Option<Value>> {
    materialize(node_ref, loader)?;
    let child = {
        let node = node_ref.borrow();
        match &*node {
            Node::NullBranch | Node::NullLeaf { .. } => return Ok(None),
            Node::Internal { children, .. } => Some(children[key[depth] as usize].clone()),
            Node::Stem { stem, children, .. } => {
                if stem != &key[..31] {
                    return Ok(None);
                }
                Some(children[key[31] as usize].clone())
            }
            Node::Leaf { value, .. } => return Ok(Some(value.clone())),
            Node::Stored { .. } => unreachable!("materialized above"),
        }
    };
    match child {
        Some(child_ref) => {
            let next_depth = match &*node_ref.borrow() {
                Node::Internal { .. } => depth + 1,
                Node::Stem { .. } => depth, // stem dispatch already consumed the suffix byte
                _ => depth,
            };
            get_at(&child_ref, key, next_depth, loader)
        }
        None => Ok(None),
    }
}

fn enroll(batch: &mut BatchMap, node_ref: &NodeRef) {
    if let Some(location) = node_ref.borrow().location() {
        batch.insert(location.clone(), node_ref.clone());
    }
}

/// `put(key, value)`: inserts or overwrites `key`. Returns the (possibly
/// new) node that should occupy this slot in the parent, and the previous
/// value if one existed. Every Internal/Stem node the walk passes through
/// or creates is enrolled into `batch`.
pub fn put(
    node_ref: &NodeRef,
    key: &[u8; 32],
    value: Value,
    location: &Location,
    depth: usize,
    loader: &Arc<dyn NodeLoader>,
    batch: &mut BatchMap,
) -> Result<(NodeRef, Option<Value>)> {
    materialize(node_ref, loader)?;
    let kind = {
        let node = node_ref.borrow();
        match &*node {
            Node::NullBranch => Kind::NullBranch,
            Node::Stem { .. } => Kind::Stem,
            Node::Internal { .. } => Kind::Internal,
            Node::Stored { .. } => unreachable!("materialized above"),
            _ => return Err(TrieError::invariant("put() reached a leaf-level node directly")),
        }
    };

    match kind {
        Kind::NullBranch => {
            let stem: Stem = key[..31].try_into().unwrap();
            let new_stem_node = Node::new_stem(location.clone(), stem);
            let leaf_slot = {
                let borrowed = new_stem_node.borrow();
                match &*borrowed {
                    Node::Stem { children, .. } => children[key[31] as usize].clone(),
                    _ => unreachable!(),
                }
            };
            let previous = match &*leaf_slot.borrow() {
                Node::NullLeaf { previous } => previous.clone(),
                _ => None,
            };
            *leaf_slot.borrow_mut() = Node::Leaf {
                location: location.child(key[31]),
                value,
                previous,
                dirty: true,
                persisted: false,
            };
            enroll(batch, &new_stem_node);
            Ok((new_stem_node, None))
        }
        Kind::Stem => put_into_stem(node_ref, key, value, location, depth, loader, batch),
        Kind::Internal => put_into_internal(node_ref, key, value, location, depth, loader, batch),
    }
}

enum Kind {
    NullBranch,
    Stem,
    Internal,
}

fn put_into_stem(
    node_ref: &NodeRef,
    key: &[u8; 32],
    value: Value,
    location: &Location,
    depth: usize,
    loader: &Arc<dyn NodeLoader>,
    batch: &mut BatchMap,
) -> Result<(NodeRef, Option<Value>)> {
    let existing_stem: Stem = {
        match &*node_ref.borrow() {
            Node::Stem { stem, .. } => *stem,
            _ => unreachable!(),
        }
    };

    if existing_stem == key[..31] {
        // Same stem: update the single leaf slot in place.
        let leaf_slot = {
            match &*node_ref.borrow() {
                Node::Stem { children, .. } => children[key[31] as usize].clone(),
                _ => unreachable!(),
            }
        };
        materialize(&leaf_slot, loader)?;
        let previous = {
            let mut borrowed = leaf_slot.borrow_mut();
            match &mut *borrowed {
                Node::Leaf { value: existing, previous, dirty, .. } => {
                    let old = Some(existing.clone());
                    *existing = value.clone();
                    *dirty = true;
                    previous.clone().or(old)
                }
                Node::NullLeaf { previous } => {
                    let old = previous.clone();
                    *borrowed = Node::Leaf {
                        location: location.child(key[31]),
                        value: value.clone(),
                        previous: old.clone(),
                        dirty: true,
                        persisted: false,
                    };
                    old
                }
                _ => return Err(TrieError::invariant("stem child was not a leaf slot")),
            }
        };
        node_ref.borrow_mut().mark_dirty();
        enroll(batch, node_ref);
        Ok((node_ref.clone(), previous))
    } else {
        // Diverging stem: split into an Internal node at the first byte
        // the two stems differ on.
        let diverge_at = existing_stem
            .iter()
            .zip(key[..31].iter())
            .position(|(a, b)| a != b)
            .unwrap_or(31);

        let internal_location = location.clone();
        let internal = Node::new_internal(internal_location.clone());

        let pushed_location = internal_location.child(existing_stem[diverge_at]);
        node_ref.borrow_mut().set_location(pushed_location.clone());
        node_ref.borrow_mut().mark_dirty();

        let new_stem: Stem = key[..31].try_into().unwrap();
        let new_location = internal_location.child(new_stem[diverge_at]);
        let new_stem_node = Node::new_stem(new_location.clone(), new_stem);
        let leaf_slot = {
            let borrowed = new_stem_node.borrow();
            match &*borrowed {
                Node::Stem { children, .. } => children[key[31] as usize].clone(),
                _ => unreachable!(),
            }
        };
        *leaf_slot.borrow_mut() = Node::Leaf {
            location: new_location.child(key[31]),
            value,
            previous: None,
            dirty: true,
            persisted: false,
        };

        if let Node::Internal { children, .. } = &mut *internal.borrow_mut() {
            children[existing_stem[diverge_at] as usize] = node_ref.clone();
            children[new_stem[diverge_at] as usize] = new_stem_node.clone();
        }

        enroll(batch, node_ref);
        enroll(batch, &new_stem_node);
        enroll(batch, &internal);

        let _ = depth;
        Ok((internal, None))
    }
}

fn put_into_internal(
    node_ref: &NodeRef,
    key: &[u8; 32],
    value: Value,
    location: &Location,
    depth: usize,
    loader: &Arc<dyn NodeLoader>,
    batch: &mut BatchMap,
) -> Result<(NodeRef, Option<Value>)> {
    let child = {
        match &*node_ref.borrow() {
            Node::Internal { children, .. } => children[key[depth] as usize].clone(),
            _ => unreachable!(),
        }
    };
    let child_location = location.child(key[depth]);
    let (new_child, previous) = put(&child, key, value, &child_location, depth + 1, loader, batch)?;

    if let Node::Internal { children, .. } = &mut *node_ref.borrow_mut() {
        children[key[depth] as usize] = new_child;
    }
    node_ref.borrow_mut().mark_dirty();
    enroll(batch, node_ref);
    Ok((node_ref.clone(), previous))
}

/// `remove(key)`: deletes `key` if present. Returns the node that should
/// occupy this slot in the parent (mirroring `put`'s `(NodeRef,
/// Option<Value>)` shape) and the previous value if one existed, so a
/// caller can splice in whatever structure the removal collapsed to (§4.5.3):
///
/// - a Stem whose children are all `NullLeaf` after the removal is replaced
///   by a `NullBranch`;
/// - an Internal left with exactly one non-null child that is a Stem is
///   *flattened*: replaced by that Stem, its location shortened by one byte
///   to the Internal's own (the root Internal, whose location is already
///   empty, is never flattened — invariant 8).
///
/// A null enrolled under a non-empty location evicts any existing batch
/// entry so a removed subtree is never hashed.
pub fn remove(
    node_ref: &NodeRef,
    key: &[u8; 32],
    depth: usize,
    loader: &Arc<dyn NodeLoader>,
    batch: &mut BatchMap,
) -> Result<(NodeRef, Option<Value>)> {
    materialize(node_ref, loader)?;
    let kind = {
        let node = node_ref.borrow();
        match &*node {
            Node::NullBranch | Node::NullLeaf { .. } => return Ok((node_ref.clone(), None)),
            Node::Internal { .. } => Kind::Internal,
            Node::Stem { .. } => Kind::Stem,
            Node::Leaf { .. } => return Err(TrieError::invariant("remove() reached a bare leaf directly")),
            Node::Stored { .. } => unreachable!("materialized above"),
        }
    };

    match kind {
        Kind::Stem => remove_from_stem(node_ref, key, loader, batch),
        Kind::Internal => remove_from_internal(node_ref, key, depth, loader, batch),
        Kind::NullBranch => unreachable!("handled above"),
    }
}

fn remove_from_stem(
    node_ref: &NodeRef,
    key: &[u8; 32],
    loader: &Arc<dyn NodeLoader>,
    batch: &mut BatchMap,
) -> Result<(NodeRef, Option<Value>)> {
    let stem_matches = match &*node_ref.borrow() {
        Node::Stem { stem, .. } => stem == &key[..31],
        _ => unreachable!(),
    };
    if !stem_matches {
        return Ok((node_ref.clone(), None));
    }

    let leaf_ref = match &*node_ref.borrow() {
        Node::Stem { children, .. } => children[key[31] as usize].clone(),
        _ => unreachable!(),
    };
    materialize(&leaf_ref, loader)?;

    let old = {
        let mut borrowed = leaf_ref.borrow_mut();
        match &*borrowed {
            Node::Leaf { value, .. } => {
                let old = value.clone();
                *borrowed = Node::NullLeaf { previous: Some(old.clone()) };
                Some(old)
            }
            Node::NullLeaf { .. } => None,
            _ => return Err(TrieError::invariant("stem child was not a leaf slot")),
        }
    };

    let old = match old {
        Some(old) => old,
        None => return Ok((node_ref.clone(), None)),
    };

    let all_null = match &*node_ref.borrow() {
        Node::Stem { children, .. } => children.iter().all(|c| matches!(&*c.borrow(), Node::NullLeaf { .. })),
        _ => unreachable!(),
    };

    if all_null {
        if let Some(location) = node_ref.borrow().location() {
            crate::batch::BatchProcessor::evict(batch, location);
        }
        Ok((Rc::new(RefCell::new(Node::NullBranch)), Some(old)))
    } else {
        node_ref.borrow_mut().mark_dirty();
        enroll(batch, node_ref);
        Ok((node_ref.clone(), Some(old)))
    }
}

fn remove_from_internal(
    node_ref: &NodeRef,
    key: &[u8; 32],
    depth: usize,
    loader: &Arc<dyn NodeLoader>,
    batch: &mut BatchMap,
) -> Result<(NodeRef, Option<Value>)> {
    let child_ref = match &*node_ref.borrow() {
        Node::Internal { children, .. } => children[key[depth] as usize].clone(),
        _ => unreachable!(),
    };
    let (new_child, removed) = remove(&child_ref, key, depth + 1, loader, batch)?;
    if removed.is_none() {
        return Ok((node_ref.clone(), None));
    }

    if let Node::Internal { children, .. } = &mut *node_ref.borrow_mut() {
        children[key[depth] as usize] = new_child;
    }
    node_ref.borrow_mut().mark_dirty();
    enroll(batch, node_ref);

    // §4.5.3 flatten rule: an Internal left with exactly one non-null child
    // that is a Stem is replaced by it; the root Internal (empty location)
    // is exempt (invariant 8).
    let internal_location = node_ref.borrow().location().cloned();
    let is_root = internal_location.as_ref().map(|l| l.is_root()).unwrap_or(true);
    if !is_root {
        let non_null: Vec<NodeRef> = match &*node_ref.borrow() {
            Node::Internal { children, .. } => children
                .iter()
                .filter(|c| !matches!(&*c.borrow(), Node::NullBranch))
                .cloned()
                .collect(),
            _ => unreachable!(),
        };
        if non_null.len() == 1 {
            // The sole survivor may still be an unmaterialised `Stored`
            // placeholder (untouched by this removal) — its real variant
            // has to be known before deciding whether to flatten.
            materialize(&non_null[0], loader)?;
            if matches!(&*non_null[0].borrow(), Node::Stem { .. }) {
                let only_child = non_null[0].clone();
                if let Some(old_location) = only_child.borrow().location().cloned() {
                    crate::batch::BatchProcessor::evict(batch, &old_location);
                }
                let internal_location = internal_location.expect("checked non-root above");
                only_child.borrow_mut().set_location(internal_location);
                only_child.borrow_mut().mark_dirty();
                enroll(batch, &only_child);
                return Ok((only_child, removed));
            }
        }
    }

    Ok((node_ref.clone(), removed))
}

/// `flatten(node)`: collects every concrete `(key, value)` pair reachable
/// beneath `node_ref`, in key order. Used by persistence-round-trip tests
/// and by callers that need to enumerate a subtree rather than traversing
/// key by key. Unrelated to the §4.5.3 "flatten rule" applied inside
/// `remove_from_internal` above, which collapses an Internal with a single
/// Stem child into that Stem — this function never mutates structure.
pub fn flatten(node_ref: &NodeRef, loader: &Arc<dyn NodeLoader>) -> Result<Vec<([u8; 32], Value)>> {
    let mut out = Vec::new();
    flatten_into(node_ref, &mut out, loader)?;
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

enum Level {
    Stem(Stem, crate::node::Children),
    Internal(crate::node::Children),
}

fn flatten_into(
    node_ref: &NodeRef,
    out: &mut Vec<([u8; 32], Value)>,
    loader: &Arc<dyn NodeLoader>,
) -> Result<()> {
    materialize(node_ref, loader)?;
    let level = {
        let node = node_ref.borrow();
        match &*node {
            Node::NullBranch | Node::NullLeaf { .. } => return Ok(()),
            Node::Stem { stem, children, .. } => Level::Stem(*stem, children.clone()),
            Node::Internal { children, .. } => Level::Internal(children.clone()),
            Node::Leaf { .. } => {
                return Err(TrieError::invariant("flatten() reached a bare leaf directly"))
            }
            Node::Stored { .. } => unreachable!("materialized above"),
        }
    };

    match level {
        Level::Stem(stem, leaf_children) => {
            for (suffix, child) in leaf_children.iter().enumerate() {
                materialize(child, loader)?;
                if let Node::Leaf { value, .. } = &*child.borrow() {
                    let mut key = [0u8; 32];
                    key[..31].copy_from_slice(&stem);
                    key[31] = suffix as u8;
                    out.push((key, value.clone()));
                }
            }
            Ok(())
        }
        Level::Internal(branch_children) => {
            for child in branch_children.iter() {
                flatten_into(child, out, loader)?;
            }
            Ok(())
        }
    }
}
