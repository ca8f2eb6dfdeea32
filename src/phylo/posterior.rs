// SPDX-License-Identifier: AGPL-3.0-or-later
//! Posterior substitution-probability tensor.
//!
//! A flat, read-only f64 buffer with per-node offsets. For node `v` and
//! site `s`, `con_p[offsets[v] + s*n*n + j*n + k]` is the posterior
//! probability that, along the branch above `v`, ancestral state `j` is
//! replaced by descendant state `k`, integrated over rate categories and
//! ancestral priors. Entries are non-negative; row sums need not be 1
//! (the matrix mixes prior and transition mass).
//!
//! All offset arithmetic happens in u64 before any index is formed.

use crate::error::{Error, Result};

/// Flat posterior tensor indexed by (node, site, from-state, to-state).
#[derive(Debug, Clone)]
pub struct PosteriorTensor {
    con_p: Vec<f64>,
    offsets: Vec<u64>,
    num_sites: usize,
    n: usize,
}

impl PosteriorTensor {
    /// Largest state-space size the compute backends accept.
    pub const MAX_STATES: usize = 64;

    /// Build a tensor, validating offsets and entries.
    ///
    /// `offsets` must have `nnode + 1` entries, start at 0, and advance by
    /// exactly `num_sites * n * n` per node; the last offset must equal the
    /// buffer length. Every entry must be finite and non-negative.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on any violation.
    pub fn new(con_p: Vec<f64>, offsets: Vec<u64>, num_sites: usize, n: usize) -> Result<Self> {
        if n == 0 || n > Self::MAX_STATES {
            return Err(Error::InvalidInput(format!(
                "state-space size {n} outside [1, {}]",
                Self::MAX_STATES
            )));
        }
        if num_sites == 0 {
            return Err(Error::InvalidInput("tensor has no sites".into()));
        }
        if offsets.len() < 2 {
            return Err(Error::InvalidInput(
                "offset array must cover at least one node".into(),
            ));
        }
        if offsets[0] != 0 {
            return Err(Error::InvalidInput(format!(
                "first offset must be 0, got {}",
                offsets[0]
            )));
        }
        let per_node = num_sites as u64 * n as u64 * n as u64;
        for (node, window) in offsets.windows(2).enumerate() {
            let delta = window[1].wrapping_sub(window[0]);
            if window[1] < window[0] || delta != per_node {
                return Err(Error::InvalidInput(format!(
                    "offset stride at node {node} is {delta}, expected {per_node}"
                )));
            }
        }
        let total = *offsets.last().unwrap_or(&0);
        if total != con_p.len() as u64 {
            return Err(Error::InvalidInput(format!(
                "buffer holds {} entries, offsets cover {total}",
                con_p.len()
            )));
        }
        if let Some(idx) = con_p.iter().position(|p| !p.is_finite() || *p < 0.0) {
            return Err(Error::InvalidInput(format!(
                "non-finite or negative probability {} at flat index {idx}",
                con_p[idx]
            )));
        }
        Ok(Self {
            con_p,
            offsets,
            num_sites,
            n,
        })
    }

    /// Number of nodes covered by this tensor.
    #[must_use]
    pub fn nnode(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of alignment sites.
    #[must_use]
    pub const fn num_sites(&self) -> usize {
        self.num_sites
    }

    /// State-space size (20 for amino acids, 4/61 for nucleotides/codons).
    #[must_use]
    pub const fn n(&self) -> usize {
        self.n
    }

    /// The raw flat buffer.
    #[must_use]
    pub fn con_p(&self) -> &[f64] {
        &self.con_p
    }

    /// Per-node offsets (`nnode + 1` entries, in elements).
    #[must_use]
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Bounds-checked read-only n×n matrix view for `(node, site)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when `node` or `site` is out of range.
    pub fn slice(&self, node: usize, site: usize) -> Result<&[f64]> {
        if node >= self.nnode() {
            return Err(Error::InvalidInput(format!(
                "node {node} outside [0, {})",
                self.nnode()
            )));
        }
        if site >= self.num_sites {
            return Err(Error::InvalidInput(format!(
                "site {site} outside [0, {})",
                self.num_sites
            )));
        }
        let nn = self.n as u64 * self.n as u64;
        let start = self.offsets[node] + site as u64 * nn;
        let end = start + nn;
        // Validated construction guarantees end <= con_p.len() <= usize::MAX.
        Ok(&self.con_p[start as usize..end as usize])
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::PosteriorTensor;

    /// Tensor where every (node, site) matrix is a copy of `matrix` (n×n).
    pub fn uniform_tensor(
        nnode: usize,
        num_sites: usize,
        n: usize,
        matrix: &[f64],
    ) -> PosteriorTensor {
        assert_eq!(matrix.len(), n * n);
        let per_node = num_sites * n * n;
        let mut con_p = Vec::with_capacity(nnode * per_node);
        for _ in 0..nnode * num_sites {
            con_p.extend_from_slice(matrix);
        }
        let offsets = (0..=nnode).map(|v| (v * per_node) as u64).collect();
        PosteriorTensor::new(con_p, offsets, num_sites, n).expect("test tensor is valid")
    }

    /// Deterministic pseudo-random tensor with whole-matrix mass <= 1.
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
            // Normalize so the whole matrix carries unit posterior mass.
            for p in &mut matrix {
                *p /= total;
            }
            con_p.extend_from_slice(&matrix);
        }
        let offsets = (0..=nnode).map(|v| (v * per_node) as u64).collect();
        PosteriorTensor::new(con_p, offsets, num_sites, n).expect("test tensor is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: usize) -> Vec<f64> {
        let mut m = vec![0.0; n * n];
        for j in 0..n {
            m[j * n + j] = 1.0;
        }
        m
    }

    #[test]
    fn slice_indexes_node_and_site() {
        let n = 4;
        let nnode = 3;
        let num_sites = 2;
        let mut con_p = vec![0.0; nnode * num_sites * n * n];
        // Tag each (node, site) block with a distinct first entry.
        for node in 0..nnode {
            for site in 0..num_sites {
                con_p[(node * num_sites + site) * n * n] = (node * 10 + site) as f64;
            }
        }
        let offsets = (0..=nnode)
            .map(|v| (v * num_sites * n * n) as u64)
            .collect();
        let tensor = PosteriorTensor::new(con_p, offsets, num_sites, n).unwrap();
        assert_eq!(tensor.slice(2, 1).unwrap()[0], 21.0);
        assert_eq!(tensor.slice(0, 0).unwrap()[0], 0.0);
        assert_eq!(tensor.slice(1, 0).unwrap().len(), n * n);
    }

    #[test]
    fn rejects_out_of_range_access() {
        let tensor = testutil::uniform_tensor(2, 3, 4, &identity(4));
        assert!(tensor.slice(2, 0).is_err());
        assert!(tensor.slice(0, 3).is_err());
        assert!(tensor.slice(1, 2).is_ok());
    }

    #[test]
    fn rejects_bad_offset_stride() {
        let n = 4;
        let con_p = vec![0.0; 2 * n * n];
        let offsets = vec![0, (n * n) as u64, (2 * n * n - 1) as u64];
        assert!(PosteriorTensor::new(con_p, offsets, 1, n).is_err());
    }

    #[test]
    fn rejects_nonzero_first_offset() {
        let n = 4;
        let con_p = vec![0.0; n * n];
        assert!(PosteriorTensor::new(con_p, vec![1, (n * n + 1) as u64], 1, n).is_err());
    }

    #[test]
    fn rejects_negative_and_non_finite_entries() {
        let n = 4;
        let mut con_p = vec![0.0; n * n];
        con_p[5] = -0.25;
        let offsets = vec![0, (n * n) as u64];
        assert!(PosteriorTensor::new(con_p.clone(), offsets.clone(), 1, n).is_err());
        con_p[5] = f64::NAN;
        assert!(PosteriorTensor::new(con_p, offsets, 1, n).is_err());
    }

    #[test]
    fn rejects_oversized_state_space() {
        let con_p = vec![0.0; 65 * 65];
        let offsets = vec![0, (65 * 65) as u64];
        assert!(PosteriorTensor::new(con_p, offsets, 1, 65).is_err());
    }

    #[test]
    fn random_tensor_has_unit_mass() {
        let tensor = testutil::random_tensor(2, 3, 20, 7);
        let m = tensor.slice(1, 2).unwrap();
        let total: f64 = m.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(m.iter().all(|&p| p >= 0.0));
    }
}
