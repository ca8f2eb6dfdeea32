// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upstream input bundle.
//!
//! The phases that precede this tool — alignment parsing, branch-length
//! and rate estimation, ancestral-state reconstruction — hand over their
//! results as a directory bundle:
//!
//! - `tree.json` — the rooted tree, same nested schema the sink emits
//! - `meta.json` — `numSites`, `n`, per-node `offsets`, and optionally
//!   per-site `postNumSub` / `siteClass` arrays
//! - `conP.bin` — the flat posterior buffer, little-endian f64
//!
//! Loading validates the tensor against the tree (offset count, buffer
//! length, entry ranges) so the compute path can trust its indices.

use crate::error::{Error, Result};
use crate::phylo::tree::TreeJson;
use crate::phylo::{PosteriorTensor, TreeModel};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// `meta.json` schema.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
    /// Number of alignment sites.
    pub num_sites: usize,
    /// State-space size.
    pub n: usize,
    /// Per-node offsets into `conP.bin`, in elements (`nnode + 1` entries).
    pub offsets: Vec<u64>,
    /// Posterior number of substitutions per site (optional).
    #[serde(default)]
    pub post_num_sub: Vec<f64>,
    /// Rate class per site (optional).
    #[serde(default)]
    pub site_class: Vec<i32>,
}

/// A fully validated input bundle.
#[derive(Debug)]
pub struct InputBundle {
    /// The rooted tree.
    pub tree: TreeModel,
    /// The posterior tensor.
    pub tensor: PosteriorTensor,
    /// Per-site posterior substitution counts (zeros when absent).
    pub post_num_sub: Vec<f64>,
    /// Per-site rate classes (zeros when absent).
    pub site_class: Vec<i32>,
}

/// Load and validate a bundle directory.
///
/// # Errors
///
/// Returns [`Error::Io`] when a file is missing or unreadable and
/// [`Error::InvalidInput`] when the pieces disagree (offset count vs.
/// tree size, buffer length, per-site array lengths).
pub fn load(dir: &Path) -> Result<InputBundle> {
    let tree_path = dir.join("tree.json");
    let tree_text = std::fs::read_to_string(&tree_path).map_err(|e| Error::Io {
        path: tree_path.clone(),
        source: e,
    })?;
    let tree_json: TreeJson = serde_json::from_str(&tree_text)
        .map_err(|e| Error::InvalidInput(format!("tree.json: {e}")))?;
    let tree = TreeModel::from_json(&tree_json)?;

    let meta_path = dir.join("meta.json");
    let meta_text = std::fs::read_to_string(&meta_path).map_err(|e| Error::Io {
        path: meta_path.clone(),
        source: e,
    })?;
    let meta: BundleMeta = serde_json::from_str(&meta_text)
        .map_err(|e| Error::InvalidInput(format!("meta.json: {e}")))?;

    if meta.offsets.len() != tree.nnode() + 1 {
        return Err(Error::InvalidInput(format!(
            "meta.json carries {} offsets for a {}-node tree",
            meta.offsets.len(),
            tree.nnode()
        )));
    }

    let conp_path = dir.join("conP.bin");
    let bytes = std::fs::read(&conp_path).map_err(|e| Error::Io {
        path: conp_path.clone(),
        source: e,
    })?;
    if bytes.len() % 8 != 0 {
        return Err(Error::InvalidInput(format!(
            "conP.bin holds {} bytes, not a whole number of f64s",
            bytes.len()
        )));
    }
    let con_p: Vec<f64> = bytes
        .chunks_exact(8)
        .map(|chunk| {
            // chunks_exact(8) guarantees this slice is exactly 8 bytes.
            let mut arr = [0u8; 8];
            arr.copy_from_slice(chunk);
            f64::from_le_bytes(arr)
        })
        .collect();
    drop(bytes);

    let tensor = PosteriorTensor::new(con_p, meta.offsets, meta.num_sites, meta.n)?;

    let post_num_sub = if meta.post_num_sub.is_empty() {
        vec![0.0; meta.num_sites]
    } else if meta.post_num_sub.len() == meta.num_sites {
        meta.post_num_sub
    } else {
        return Err(Error::InvalidInput(format!(
            "postNumSub holds {} entries for {} sites",
            meta.post_num_sub.len(),
            meta.num_sites
        )));
    };
    let site_class = if meta.site_class.is_empty() {
        vec![0; meta.num_sites]
    } else if meta.site_class.len() == meta.num_sites {
        meta.site_class
    } else {
        return Err(Error::InvalidInput(format!(
            "siteClass holds {} entries for {} sites",
            meta.site_class.len(),
            meta.num_sites
        )));
    };

    Ok(InputBundle {
        tree,
        tensor,
        post_num_sub,
        site_class,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::phylo::posterior::testutil::random_tensor;
    use crate::phylo::tree::testutil::three_leaf_tree;

    #[test]
    fn round_trips_a_written_bundle() {
        let tree = three_leaf_tree();
        let tensor = random_tensor(tree.nnode(), 4, 20, 3);
        let dir = tempfile::TempDir::new().unwrap();
        testutil::write_bundle(dir.path(), &tree, &tensor);

        let bundle = load(dir.path()).unwrap();
        assert_eq!(bundle.tree.nnode(), tree.nnode());
        assert_eq!(bundle.tensor.num_sites(), 4);
        assert_eq!(bundle.tensor.n(), 20);
        assert_eq!(bundle.tensor.con_p().len(), tensor.con_p().len());
        for (a, b) in bundle.tensor.con_p().iter().zip(tensor.con_p()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(bundle.post_num_sub.len(), 4);
        assert_eq!(bundle.site_class.len(), 4);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            load(dir.path()).unwrap_err(),
            Error::Io { .. }
        ));
    }

    #[test]
    fn offset_count_must_match_tree() {
        let tree = three_leaf_tree();
        // One node fewer than the tree.
        let tensor = random_tensor(tree.nnode() - 1, 2, 4, 9);
        let dir = tempfile::TempDir::new().unwrap();
        testutil::write_bundle(dir.path(), &tree, &tensor);
        assert!(matches!(
            load(dir.path()).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[test]
    fn truncated_buffer_is_invalid() {
        let tree = three_leaf_tree();
        let tensor = random_tensor(tree.nnode(), 2, 4, 9);
        let dir = tempfile::TempDir::new().unwrap();
        testutil::write_bundle(dir.path(), &tree, &tensor);
        let path = dir.path().join("conP.bin");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 8);
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            load(dir.path()).unwrap_err(),
            Error::InvalidInput(_)
        ));
    }
}
