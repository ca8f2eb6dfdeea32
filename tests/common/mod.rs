// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use grand_convergence::phylo::tree::Node;
use grand_convergence::phylo::{PosteriorTensor, TreeModel};

/// Three-leaf tree: leaves 0..2, internal 3, root 4. Topology ((0,1)3, 2)4.
pub fn three_leaf_tree() -> TreeModel {
    TreeModel::new(vec![
        Node {
            id: 0,
            father: Some(3),
            children: vec![],
            branch: 0.1,
            name: Some("alpha".into()),
        },
        Node {
            id: 1,
            father: Some(3),
            children: vec![],
            branch: 0.2,
            name: Some("beta".into()),
        },
        Node {
            id: 2,
            father: Some(4),
            children: vec![],
            branch: 0.3,
            name: Some("gamma".into()),
        },
        Node {
            id: 3,
            father: Some(4),
            children: vec![0, 1],
            branch: 0.15,
            name: None,
        },
        Node {
            id: 4,
            father: None,
            children: vec![3, 2],
            branch: 0.0,
            name: None,
        },
    ])
    .expect("three-leaf tree is valid")
}

/// Caterpillar tree with `nleaf` leaves (2*nleaf - 1 nodes).
pub fn caterpillar_tree(nleaf: usize) -> TreeModel {
    assert!(nleaf >= 2);
    let nnode = 2 * nleaf - 1;
    let mut nodes = Vec::with_capacity(nnode);
    for leaf in 0..nleaf {
        let father = if leaf <= 1 { nleaf } else { nleaf + leaf - 1 };
        nodes.push(Node {
            id: leaf,
            father: Some(father),
            children: vec![],
            branch: 0.05 + 0.01 * leaf as f64,
            name: Some(format!("taxon{leaf}")),
        });
    }
    for internal in nleaf..nnode {
        let is_root = internal == nnode - 1;
        let children = if internal == nleaf {
            vec![0, 1]
        } else {
            vec![internal - 1, internal - nleaf + 1]
        };
        nodes.push(Node {
            id: internal,
            father: if is_root { None } else { Some(internal + 1) },
            children,
            branch: if is_root { 0.0 } else { 0.02 },
            name: None,
        });
    }
    TreeModel::new(nodes).expect("caterpillar tree is valid")
}

/// Tensor repeating one n×n matrix at every (node, site).
pub fn uniform_tensor(nnode: usize, num_sites: usize, n: usize, matrix: &[f64]) -> PosteriorTensor {
    assert_eq!(matrix.len(), n * n);
    let per_node = num_sites * n * n;
    let mut con_p = Vec::with_capacity(nnode * per_node);
    for _ in 0..nnode * num_sites {
        con_p.extend_from_slice(matrix);
    }
    let offsets = (0..=nnode).map(|v| (v * per_node) as u64).collect();
    PosteriorTensor::new(con_p, offsets, num_sites, n).expect("tensor is valid")
}

/// Deterministic pseudo-random tensor; each matrix carries unit mass.
pub fn random_tensor(nnode: usize, num_sites: usize, n: usize, seed: u64) -> PosteriorTensor {
    let per_node = num_sites * n * n;
    let mut state = seed;
    let mut con_p = Vec::with_capacity(nnode * per_node);
    for _ in 0..nnode * num_sites {
        let mut matrix = Vec::with_capacity(n * n);
        let mut total = 0.0_f64;
        for _ in 0..n * n {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let u = (state >> 11) as f64 / (1u64 << 53) as f64;
            total += u;
            matrix.push(u);
        }
        for p in &mut matrix {
            *p /= total;
        }
        con_p.extend_from_slice(&matrix);
    }
    let offsets = (0..=nnode).map(|v| (v * per_node) as u64).collect();
    PosteriorTensor::new(con_p, offsets, num_sites, n).expect("tensor is valid")
}

/// n×n identity matrix.
pub fn identity(n: usize) -> Vec<f64> {
    let mut m = vec![0.0; n * n];
    for j in 0..n {
        m[j * n + j] = 1.0;
    }
    m
}
