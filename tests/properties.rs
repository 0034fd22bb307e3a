//! Round-trip, idempotence, and structural-invariant properties, expressed
//! with `proptest` for "holds for all inputs" claims.

use std::rc::Rc;
use std::sync::Arc;

use proptest::prelude::*;

use verkle_state_trie::trie::SimpleTrie;
use verkle_state_trie::{BandersnatchBackend, CryptoBackend, InMemoryStore};

fn new_trie() -> SimpleTrie {
    let crypto: Rc<dyn CryptoBackend> = Rc::new(BandersnatchBackend::new());
    let store = Arc::new(InMemoryStore::new());
    SimpleTrie::new(crypto, store)
}

fn arb_key() -> impl Strategy<Value = [u8; 32]> {
    proptest::collection::vec(any::<u8>(), 32).prop_map(|v| v.try_into().unwrap())
}

fn arb_value() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..64)
}

proptest! {
    #[test]
    fn put_then_get_returns_the_value(key in arb_key(), value in arb_value()) {
        let mut trie = new_trie();
        trie.put(&key, value.clone()).unwrap();
        prop_assert_eq!(trie.get(&key).unwrap(), Some(value));
    }

    #[test]
    fn second_put_overwrites_and_returns_first_value(
        key in arb_key(), v1 in arb_value(), v2 in arb_value(),
    ) {
        let mut trie = new_trie();
        let first = trie.put(&key, v1.clone()).unwrap();
        let second = trie.put(&key, v2.clone()).unwrap();
        prop_assert_eq!(first, None);
        prop_assert_eq!(second, Some(v1));
        prop_assert_eq!(trie.get(&key).unwrap(), Some(v2));
    }

    #[test]
    fn remove_after_put_leaves_nothing(key in arb_key(), value in arb_value()) {
        let mut trie = new_trie();
        trie.put(&key, value).unwrap();
        trie.remove(&key).unwrap();
        prop_assert_eq!(trie.get(&key).unwrap(), None);
    }

    #[test]
    fn root_hash_is_independent_of_insertion_order(
        keys in proptest::collection::vec(arb_key(), 1..6),
        values in proptest::collection::vec(arb_value(), 1..6),
    ) {
        let n = keys.len().min(values.len());
        let pairs: Vec<([u8; 32], Vec<u8>)> = keys[..n].iter().cloned().zip(values[..n].iter().cloned()).collect();

        let mut forward = new_trie();
        for (k, v) in &pairs {
            forward.put(k, v.clone()).unwrap();
        }
        let forward_root = forward.get_root_hash().unwrap();

        let mut reversed = new_trie();
        for (k, v) in pairs.iter().rev() {
            reversed.put(k, v.clone()).unwrap();
        }
        let reversed_root = reversed.get_root_hash().unwrap();

        prop_assert_eq!(forward_root, reversed_root);
    }

    #[test]
    fn commit_then_reload_yields_same_root(
        keys in proptest::collection::vec(arb_key(), 1..6),
        values in proptest::collection::vec(arb_value(), 1..6),
    ) {
        let n = keys.len().min(values.len());
        let crypto: Rc<dyn CryptoBackend> = Rc::new(BandersnatchBackend::new());
        let store = Arc::new(InMemoryStore::new());

        let mut trie = SimpleTrie::new(Rc::clone(&crypto), store.clone());
        for i in 0..n {
            trie.put(&keys[i], values[i].clone()).unwrap();
        }
        let root_hash = trie.commit(store.as_ref()).unwrap();

        let factory = verkle_state_trie::NodeFactory::new(store.clone());
        let reloaded_root = verkle_state_trie::trie::load_root(&factory, Some(root_hash)).unwrap();
        let reloaded = SimpleTrie::from_root(reloaded_root, crypto, store, Default::default());
        prop_assert_eq!(reloaded.get_root_hash().unwrap(), root_hash);
    }

    #[test]
    fn removing_every_key_zeroes_the_root(keys in proptest::collection::hash_set(arb_key(), 1..6)) {
        let mut trie = new_trie();
        let keys: Vec<_> = keys.into_iter().collect();
        for k in &keys {
            trie.put(k, vec![1u8]).unwrap();
        }
        for k in &keys {
            trie.remove(k).unwrap();
        }
        prop_assert_eq!(trie.get_root_hash().unwrap(), [0u8; 32]);
    }
}
