// SPDX-License-Identifier: AGPL-3.0-or-later
//! Independent branch-pair enumeration.
//!
//! A pair of non-root nodes is independent when neither lies on the path
//! from the other to the root. Convergence is only meaningful across such
//! pairs; nested branches share substitution history.
//!
//! Ancestor sets are materialized as a bitset (one pre-order pass, each
//! node inheriting its father's set plus itself), then every unordered
//! pair `u < v` is filtered through the independence predicate. The
//! output order — outer `u` ascending, inner `v` ascending — is the
//! external output order for the whole pipeline.

use crate::error::{Error, Result};
use crate::phylo::tree::TreeModel;
use std::collections::HashSet;

/// One enumerated branch pair, `u < v`, both non-root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchPair {
    /// Lower node id.
    pub u: usize,
    /// Higher node id.
    pub v: usize,
    /// Whether per-site output was requested for this pair.
    pub selected: bool,
}

/// Ancestor bitset over all nodes: `is_ancestor(a, v)` iff `a` lies on the
/// root path of `v` (inclusive of `v` itself).
#[derive(Debug)]
pub struct AncestorIndex {
    words: Vec<u64>,
    stride: usize,
}

impl AncestorIndex {
    /// Build the index with one pre-order pass from the root.
    #[must_use]
    pub fn new(tree: &TreeModel) -> Self {
        let nnode = tree.nnode();
        let stride = nnode.div_ceil(64);
        let mut words = vec![0u64; nnode * stride];

        let mut stack = vec![tree.root()];
        while let Some(v) = stack.pop() {
            if let Some(father) = tree.father(v) {
                let (dst, src) = if v * stride > father * stride {
                    let (lo, hi) = words.split_at_mut(v * stride);
                    (&mut hi[..stride], &lo[father * stride..(father + 1) * stride])
                } else {
                    let (lo, hi) = words.split_at_mut(father * stride);
                    (&mut lo[v * stride..(v + 1) * stride], &hi[..stride])
                };
                dst.copy_from_slice(src);
            }
            words[v * stride + v / 64] |= 1u64 << (v % 64);
            stack.extend_from_slice(&tree.nodes()[v].children);
        }

        Self { words, stride }
    }

    /// Whether `a` is an ancestor of `v` (nodes are their own ancestors).
    #[must_use]
    pub fn is_ancestor(&self, a: usize, v: usize) -> bool {
        self.words[v * self.stride + a / 64] & (1u64 << (a % 64)) != 0
    }

    /// Independence predicate: distinct, and neither ancestral to the other.
    #[must_use]
    pub fn independent(&self, u: usize, v: usize) -> bool {
        u != v && !self.is_ancestor(u, v) && !self.is_ancestor(v, u)
    }
}

/// Enumerate every independent pair of non-root nodes, in `u < v` order
/// with the outer loop over `u` ascending.
///
/// `selected` pairs are matched on numeric ids after canonicalization to
/// `u < v`; each requested pair must reference valid, distinct, non-root,
/// independent nodes.
///
/// # Errors
///
/// Returns [`Error::InvalidBranchPairSelection`] carrying the offending
/// pair when a request is out of range, names the root, repeats a node,
/// or is not independent.
pub fn enumerate(tree: &TreeModel, selected: &[(usize, usize)]) -> Result<Vec<BranchPair>> {
    let nnode = tree.nnode();
    let root = tree.root();
    let index = AncestorIndex::new(tree);

    let mut requested: HashSet<(usize, usize)> = HashSet::with_capacity(selected.len());
    for &(a, b) in selected {
        let pair = (a.min(b), a.max(b));
        let reject = |reason: String| Error::InvalidBranchPairSelection { pair, reason };
        if a == b {
            return Err(reject("a branch pair needs two distinct nodes".into()));
        }
        if pair.1 >= nnode {
            return Err(reject(format!("node {} outside [0, {nnode})", pair.1)));
        }
        if pair.0 == root || pair.1 == root {
            return Err(reject("the root has no branch above it".into()));
        }
        if !index.independent(pair.0, pair.1) {
            let (anc, desc) = if index.is_ancestor(pair.0, pair.1) {
                (pair.0, pair.1)
            } else {
                (pair.1, pair.0)
            };
            return Err(reject(format!("node {anc} is an ancestor of node {desc}")));
        }
        requested.insert(pair);
    }

    // u64 sizing so trees with hundreds of leaves cannot overflow the
    // pair-count arithmetic on any platform.
    let upper = (nnode as u64 * (nnode as u64 - 1)) / 2;
    let mut pairs = Vec::with_capacity(usize::try_from(upper).map_err(|_| {
        Error::ResourceExhaustion(format!("{upper} candidate pairs exceed address space"))
    })?);

    for u in 0..nnode {
        if u == root {
            continue;
        }
        for v in (u + 1)..nnode {
            if v == root || !index.independent(u, v) {
                continue;
            }
            pairs.push(BranchPair {
                u,
                v,
                selected: requested.contains(&(u, v)),
            });
        }
    }
    Ok(pairs)
}
