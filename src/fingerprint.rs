//! Fingerprint tree
//!
//! Per-root memory of the previous render: which template sat in each
//! slot, and what was underneath it. The diff engine reads the old tree
//! and hands back a new one to keep for the next pass.
//!
//! Fingerprints and content digests are FNV-1a 64-bit.
//!
//! Author: Moroya Sakamoto

use std::collections::BTreeMap;

/// Template identity (FNV-1a of the static fragments)
pub type Fingerprint = u64;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

#[inline]
fn fnv1a(h: &mut u64, bytes: &[u8]) {
    for &b in bytes {
        *h ^= b as u64;
        *h = h.wrapping_mul(FNV_PRIME);
    }
}

/// Length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
#[inline]
fn fnv1a_str(h: &mut u64, s: &str) {
    fnv1a(h, &(s.len() as u64).to_le_bytes());
    fnv1a(h, s.as_bytes());
}

/// Fingerprint of a static fragment list.
///
/// The fragment count is hashed too, so the slot count is part of the
/// identity.
pub fn fingerprint_statics(statics: &[String]) -> Fingerprint {
    let mut h = FNV_OFFSET;
    fnv1a(&mut h, &(statics.len() as u64).to_le_bytes());
    for s in statics {
        fnv1a_str(&mut h, s);
    }
    h
}

/// Digest of a literal slot value
pub fn digest_text(text: &str) -> u64 {
    let mut h = FNV_OFFSET;
    fnv1a_str(&mut h, text);
    h
}

/// Digest of a comprehension's statics and rows
pub fn digest_rows(statics: &[String], rows: &[Vec<String>]) -> u64 {
    let mut h = fingerprint_statics(statics);
    fnv1a(&mut h, &(rows.len() as u64).to_le_bytes());
    for row in rows {
        fnv1a(&mut h, &(row.len() as u64).to_le_bytes());
        for value in row {
            fnv1a_str(&mut h, value);
        }
    }
    h
}

/// What the previous render left behind at one position
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FingerprintTree {
    /// Nothing rendered yet
    #[default]
    Empty,
    /// A template node and the state of its present slots
    Node {
        fingerprint: Fingerprint,
        children: BTreeMap<usize, FingerprintTree>,
    },
    /// A comprehension; statics already known to the client
    Comprehension { digest: u64, stream: bool },
    /// A literal slot
    Leaf { digest: u64 },
}

impl FingerprintTree {
    /// Fresh node with no children
    pub fn node(fingerprint: Fingerprint) -> Self {
        FingerprintTree::Node {
            fingerprint,
            children: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FingerprintTree::Empty)
    }

    pub fn is_comprehension(&self) -> bool {
        matches!(self, FingerprintTree::Comprehension { .. })
    }

    /// Template fingerprint, if this is a node
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        match self {
            FingerprintTree::Node { fingerprint, .. } => Some(*fingerprint),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<usize, FingerprintTree>> {
        match self {
            FingerprintTree::Node { children, .. } => Some(children),
            _ => None,
        }
    }

    /// State of slot `index`, if it rendered something last time
    pub fn child(&self, index: usize) -> Option<&FingerprintTree> {
        self.children().and_then(|c| c.get(&index))
    }

    /// Follow a path of slot indices from this node
    pub fn descend(&self, path: &[usize]) -> Option<&FingerprintTree> {
        path.iter().try_fold(self, |tree, &index| tree.child(index))
    }

    /// Total tracked entries, this one included (Empty counts as zero)
    pub fn node_count(&self) -> usize {
        match self {
            FingerprintTree::Empty => 0,
            FingerprintTree::Node { children, .. } => {
                1 + children.values().map(Self::node_count).sum::<usize>()
            }
            FingerprintTree::Comprehension { .. } | FingerprintTree::Leaf { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statics(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| String::from(*s)).collect()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint_statics(&statics(&["<p>", "</p>"]));
        let b = fingerprint_statics(&statics(&["<p>", "</p>"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_length_prefixed() {
        let a = fingerprint_statics(&statics(&["ab", "c"]));
        let b = fingerprint_statics(&statics(&["a", "bc"]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_counts_fragments() {
        let a = fingerprint_statics(&statics(&["x"]));
        let b = fingerprint_statics(&statics(&["x", ""]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_text_differs() {
        assert_ne!(digest_text("hi"), digest_text("bye"));
        assert_eq!(digest_text(""), digest_text(""));
    }

    #[test]
    fn test_digest_rows_sensitive_to_rows() {
        let s = statics(&["<li>", "</li>"]);
        let one = digest_rows(&s, &[vec![String::from("a")]]);
        let two = digest_rows(&s, &[vec![String::from("a")], vec![String::from("b")]]);
        let none = digest_rows(&s, &[]);
        assert_ne!(one, two);
        assert_ne!(one, none);
        assert_ne!(none, fingerprint_statics(&statics(&["<li>", "</li>", ""])));
    }

    #[test]
    fn test_default_is_empty() {
        let t = FingerprintTree::default();
        assert!(t.is_empty());
        assert_eq!(t.node_count(), 0);
        assert!(t.fingerprint().is_none());
        assert!(t.child(0).is_none());
    }

    #[test]
    fn test_descend_nested() {
        let mut inner = BTreeMap::new();
        inner.insert(1, FingerprintTree::Leaf { digest: 9 });
        let mut outer = BTreeMap::new();
        outer.insert(
            0,
            FingerprintTree::Node {
                fingerprint: 2,
                children: inner,
            },
        );
        outer.insert(
            3,
            FingerprintTree::Comprehension {
                digest: 4,
                stream: false,
            },
        );
        let tree = FingerprintTree::Node {
            fingerprint: 1,
            children: outer,
        };

        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.descend(&[0]).and_then(|t| t.fingerprint()), Some(2));
        assert_eq!(
            tree.descend(&[0, 1]),
            Some(&FingerprintTree::Leaf { digest: 9 })
        );
        assert!(tree.descend(&[3]).unwrap().is_comprehension());
        assert!(tree.descend(&[0, 2]).is_none());
        assert_eq!(tree.descend(&[]), Some(&tree));
    }

    #[test]
    fn test_node_constructor() {
        let t = FingerprintTree::node(42);
        assert_eq!(t.fingerprint(), Some(42));
        assert!(t.children().unwrap().is_empty());
        assert_eq!(t.node_count(), 1);
    }
}
