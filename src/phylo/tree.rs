// SPDX-License-Identifier: AGPL-3.0-or-later
//! Rooted phylogenetic tree model (array-based) with JSON round-trip.
//!
//! Node ids are dense: leaves occupy `[0, nleaf)`, internal nodes
//! `[nleaf, nnode)`. Exactly one node has no father (the root, branch
//! length 0). Construction validates the full set of structural
//! invariants so downstream code can index without re-checking.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A node in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Dense id, equal to this node's index in [`TreeModel::nodes`].
    pub id: usize,
    /// Parent id; `None` iff this is the root.
    pub father: Option<usize>,
    /// Ordered child ids. Empty iff leaf.
    pub children: Vec<usize>,
    /// Branch length above this node (0 at the root).
    pub branch: f64,
    /// Species name; present iff leaf.
    pub name: Option<String>,
}

/// A validated rooted tree.
#[derive(Debug, Clone)]
pub struct TreeModel {
    nodes: Vec<Node>,
    root: usize,
    nleaf: usize,
}

impl TreeModel {
    /// Build a tree from a node array, validating structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when ids are not dense, the root is
    /// not unique, parent/child links are inconsistent, leaf/internal id
    /// ranges are violated, a leaf lacks a name, or a branch length is
    /// non-finite or negative.
    pub fn new(nodes: Vec<Node>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::InvalidInput("tree has no nodes".into()));
        }
        let nnode = nodes.len();

        let mut root = None;
        for (idx, node) in nodes.iter().enumerate() {
            if node.id != idx {
                return Err(Error::InvalidInput(format!(
                    "node at index {idx} carries id {}",
                    node.id
                )));
            }
            if !node.branch.is_finite() || node.branch < 0.0 {
                return Err(Error::InvalidInput(format!(
                    "node {idx} has branch length {}",
                    node.branch
                )));
            }
            match node.father {
                None => {
                    if root.replace(idx).is_some() {
                        return Err(Error::InvalidInput("more than one root".into()));
                    }
                    if node.branch != 0.0 {
                        return Err(Error::InvalidInput(format!(
                            "root branch length must be 0, got {}",
                            node.branch
                        )));
                    }
                }
                Some(father) => {
                    if father >= nnode {
                        return Err(Error::InvalidInput(format!(
                            "node {idx} has out-of-range father {father}"
                        )));
                    }
                    let seen = nodes[father].children.iter().filter(|&&c| c == idx).count();
                    if seen != 1 {
                        return Err(Error::InvalidInput(format!(
                            "node {idx} appears {seen} times among the children of {father}"
                        )));
                    }
                }
            }
            for &child in &node.children {
                if child >= nnode || nodes[child].father != Some(idx) {
                    return Err(Error::InvalidInput(format!(
                        "child link {idx} -> {child} has no matching father link"
                    )));
                }
            }
            if node.children.is_empty() && node.name.is_none() {
                return Err(Error::InvalidInput(format!("leaf {idx} has no name")));
            }
            if !node.children.is_empty() && node.name.is_some() {
                return Err(Error::InvalidInput(format!(
                    "internal node {idx} carries a leaf name"
                )));
            }
        }
        let Some(root) = root else {
            return Err(Error::InvalidInput("tree has no root".into()));
        };

        let nleaf = nodes.iter().filter(|n| n.children.is_empty()).count();
        for node in &nodes {
            let is_leaf = node.children.is_empty();
            if is_leaf && node.id >= nleaf {
                return Err(Error::InvalidInput(format!(
                    "leaf {} outside dense range [0, {nleaf})",
                    node.id
                )));
            }
            if !is_leaf && node.id < nleaf {
                return Err(Error::InvalidInput(format!(
                    "internal node {} inside leaf range [0, {nleaf})",
                    node.id
                )));
            }
        }

        // Reachability: every node must sit below the root.
        let mut seen = vec![false; nnode];
        let mut stack = vec![root];
        while let Some(v) = stack.pop() {
            if seen[v] {
                return Err(Error::InvalidInput(format!("cycle through node {v}")));
            }
            seen[v] = true;
            stack.extend_from_slice(&nodes[v].children);
        }
        if let Some(unreached) = seen.iter().position(|&s| !s) {
            return Err(Error::InvalidInput(format!(
                "node {unreached} is not reachable from the root"
            )));
        }

        Ok(Self { nodes, root, nleaf })
    }

    /// All nodes, indexed by id.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node count.
    #[must_use]
    pub fn nnode(&self) -> usize {
        self.nodes.len()
    }

    /// Leaf count.
    #[must_use]
    pub const fn nleaf(&self) -> usize {
        self.nleaf
    }

    /// Root id.
    #[must_use]
    pub const fn root(&self) -> usize {
        self.root
    }

    /// Father of `id`, `None` at the root.
    #[must_use]
    pub fn father(&self, id: usize) -> Option<usize> {
        self.nodes[id].father
    }

    /// Nested JSON form of this tree.
    #[must_use]
    pub fn to_json(&self) -> TreeJson {
        self.node_json(self.root)
    }

    fn node_json(&self, id: usize) -> TreeJson {
        let node = &self.nodes[id];
        let name = if id == self.root {
            "Root".to_string()
        } else {
            node.name.clone().unwrap_or_else(|| "Internal".to_string())
        };
        TreeJson {
            children: node.children.iter().map(|&c| self.node_json(c)).collect(),
            id,
            length: node.branch,
            name,
        }
    }

    /// Rebuild a tree from its nested JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the JSON violates a structural
    /// invariant (non-dense ids, duplicate ids, bad ranges).
    pub fn from_json(json: &TreeJson) -> Result<Self> {
        let mut count = 0usize;
        count_nodes(json, &mut count);
        let mut slots: Vec<Option<Node>> = vec![None; count];
        collect_nodes(json, None, &mut slots)?;
        let nodes = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.ok_or_else(|| Error::InvalidInput(format!("missing node id {idx}")))
            })
            .collect::<Result<Vec<Node>>>()?;
        Self::new(nodes)
    }
}

fn count_nodes(json: &TreeJson, count: &mut usize) {
    *count += 1;
    for child in &json.children {
        count_nodes(child, count);
    }
}

fn collect_nodes(
    json: &TreeJson,
    father: Option<usize>,
    slots: &mut Vec<Option<Node>>,
) -> Result<()> {
    if json.id >= slots.len() {
        return Err(Error::InvalidInput(format!(
            "tree JSON id {} out of dense range [0, {})",
            json.id,
            slots.len()
        )));
    }
    let is_leaf = json.children.is_empty();
    let node = Node {
        id: json.id,
        father,
        children: json.children.iter().map(|c| c.id).collect(),
        branch: json.length,
        name: if is_leaf { Some(json.name.clone()) } else { None },
    };
    if slots[json.id].replace(node).is_some() {
        return Err(Error::InvalidInput(format!(
            "duplicate node id {} in tree JSON",
            json.id
        )));
    }
    for child in &json.children {
        collect_nodes(child, Some(json.id), slots)?;
    }
    Ok(())
}

/// Nested JSON tree description: `children`, `id`, `length`, `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeJson {
    /// Child subtrees; omitted for leaves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeJson>,
    /// Dense node id.
    pub id: usize,
    /// Branch length above this node.
    pub length: f64,
    /// Species name for leaves, `"Internal"` / `"Root"` otherwise.
    pub name: String,
}
