//! Rendezvous (highest-random-weight) hashing.
//!
//! Each node's weight for a key is `sha256(name ++ key)` read as a 256-bit
//! big-endian integer. The owner of a key is the node with the greatest
//! weight. Adding or removing a node only moves the keys that node wins or
//! loses; every other key keeps its owner.

use std::fmt;

use sha2::{Digest, Sha256};

use flotilla_core::Peer;

/// Anything with a stable name can be ranked.
pub trait Node {
    fn name(&self) -> &str;
}

impl Node for Peer {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Node for str {
    fn name(&self) -> &str {
        self
    }
}

impl Node for String {
    fn name(&self) -> &str {
        self
    }
}

impl Node for &str {
    fn name(&self) -> &str {
        self
    }
}

/// A node's weight for one key. Byte-wise ordering of the digest is the
/// numeric ordering of the big-endian integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Weight([u8; 32]);

impl Weight {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Weight({self})")
    }
}

pub fn weight(name: &str, key: &[u8]) -> Weight {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(key);
    Weight(hasher.finalize().into())
}

/// Weight of every node for `key`, in input order.
pub fn compute<'a, N: Node>(key: &[u8], nodes: &'a [N]) -> Vec<(Weight, &'a N)> {
    nodes.iter().map(|n| (weight(n.name(), key), n)).collect()
}

/// The node responsible for `key`. An exact tie keeps the earlier node.
pub fn max<'a, N: Node>(key: &[u8], nodes: &'a [N]) -> Option<&'a N> {
    let mut best: Option<(Weight, &'a N)> = None;
    for (w, n) in compute(key, nodes) {
        match best {
            Some((top, _)) if w <= top => {}
            _ => best = Some((w, n)),
        }
    }
    best.map(|(_, n)| n)
}

/// Up to `n` nodes, most responsible first. `max_n(1, ..)[0] == max(..)`.
pub fn max_n<'a, N: Node>(n: usize, key: &[u8], nodes: &'a [N]) -> Vec<&'a N> {
    let mut ranked = compute(key, nodes);
    // Stable: tied nodes keep input order, matching `max`.
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked.into_iter().take(n.min(nodes.len())).map(|(_, node)| node).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node-{i:02}")).collect()
    }

    #[test]
    fn weight_is_reproducible() {
        let a = weight("node-a", b"service/api");
        let b = weight("node-a", b"service/api");
        assert_eq!(a, b);
        assert_ne!(a, weight("node-b", b"service/api"));
        // sha256("node-a" ++ "service/api"), pinned.
        let expected = {
            let mut h = Sha256::new();
            h.update(b"node-aservice/api");
            hex::encode(h.finalize())
        };
        assert_eq!(a.to_string(), expected);
    }

    #[test]
    fn max_is_idempotent() {
        let nodes = fleet(8);
        let first = max(b"key-1", &nodes).unwrap();
        for _ in 0..10 {
            assert_eq!(max(b"key-1", &nodes).unwrap(), first);
        }
    }

    #[test]
    fn max_ignores_input_order() {
        let nodes = fleet(8);
        let mut reversed = nodes.clone();
        reversed.reverse();
        for key in ["a", "b", "c", "deploy/42"] {
            assert_eq!(
                max(key.as_bytes(), &nodes),
                max(key.as_bytes(), &reversed)
            );
        }
    }

    #[test]
    fn max_of_empty_is_none() {
        let nodes: Vec<String> = Vec::new();
        assert!(max(b"key", &nodes).is_none());
        assert!(max_n(3, b"key", &nodes).is_empty());
    }

    #[test]
    fn max_n_one_matches_max() {
        let nodes = fleet(6);
        for i in 0..50 {
            let key = format!("key-{i}");
            let top = max(key.as_bytes(), &nodes).unwrap();
            assert_eq!(max_n(1, key.as_bytes(), &nodes), vec![top]);
        }
    }

    #[test]
    fn max_n_clamps_and_orders_by_weight() {
        let nodes = fleet(5);
        let ranked = max_n(10, b"key", &nodes);
        assert_eq!(ranked.len(), 5);

        let weights: Vec<Weight> = ranked.iter().map(|n| weight(n, b"key")).collect();
        assert!(weights.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(ranked[0], max(b"key", &nodes).unwrap());
    }

    #[test]
    fn removing_a_node_only_moves_its_keys() {
        let nodes = fleet(10);
        let removed = "node-03".to_string();
        let remaining: Vec<String> = nodes.iter().filter(|n| **n != removed).cloned().collect();

        for i in 0..500 {
            let key = format!("key-{i}");
            let before = max(key.as_bytes(), &nodes).unwrap();
            let after = max(key.as_bytes(), &remaining).unwrap();
            if *before != removed {
                assert_eq!(before, after, "key {key} moved without its owner leaving");
            }
        }
    }

    #[test]
    fn keys_spread_across_nodes() {
        let nodes = fleet(4);
        let mut owned = std::collections::HashMap::new();
        for i in 0..400 {
            let key = format!("key-{i}");
            *owned.entry(max(key.as_bytes(), &nodes).unwrap().clone()).or_insert(0) += 1;
        }
        assert_eq!(owned.len(), 4);
        assert!(owned.values().all(|&count| count > 50));
    }
}
