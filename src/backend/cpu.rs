// SPDX-License-Identifier: AGPL-3.0-or-later
//! CPU backend: fork-join parallel loop over branch pairs.
//!
//! Each pair is one work item; its sites are walked serially in order so
//! the per-pair aggregate is the plain left-to-right sum of per-site
//! values (bit-identical run over run). Output cells are partitioned by
//! pair and written exactly once — no locks.

use super::{BackendKind, ComputeBackend, KernelInputs, KernelOutputs};
use crate::error::{Error, Result};
use crate::kernel;
use rayon::prelude::*;

/// Fork-join CPU execution with a dedicated thread pool.
pub struct CpuBackend {
    pool: Option<rayon::ThreadPool>,
    workers: usize,
    name: String,
}

impl CpuBackend {
    /// The CPU is always present.
    #[must_use]
    pub const fn probe() -> bool {
        true
    }

    /// Build the worker pool; `nthreads == 0` uses one worker per core.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendRuntime`] when the pool cannot be built.
    pub fn init(nthreads: usize) -> Result<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if nthreads > 0 {
            builder = builder.num_threads(nthreads);
        }
        let pool = builder.build().map_err(|e| Error::BackendRuntime {
            backend: BackendKind::Cpu.name(),
            message: format!("thread pool: {e}"),
        })?;
        let workers = pool.current_num_threads();
        Ok(Self {
            pool: Some(pool),
            workers,
            name: format!("host ({workers} threads)"),
        })
    }

    /// Number of pool workers.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }
}

impl ComputeBackend for CpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn workset_budget(&self) -> u64 {
        u64::MAX
    }

    fn workset_required(&self, _inputs: &KernelInputs<'_>) -> u64 {
        0
    }

    fn run(&mut self, inputs: &KernelInputs<'_>, out: &mut KernelOutputs) -> Result<()> {
        let Some(pool) = self.pool.as_ref() else {
            return Err(Error::BackendRuntime {
                backend: BackendKind::Cpu.name(),
                message: "backend already shut down".into(),
            });
        };
        let tensor = inputs.tensor;
        let n = tensor.n();
        let num_sites = tensor.num_sites();
        let slots = inputs.selection_slots();

        let per_pair: Vec<(f64, f64, Option<Vec<f64>>)> = pool.install(|| {
            inputs
                .pairs
                .par_iter()
                .map(|pair| {
                    let mut conv_sum = 0.0_f64;
                    let mut div_sum = 0.0_f64;
                    let mut rows = pair
                        .selected
                        .then(|| Vec::with_capacity(num_sites * 2));
                    for site in 0..num_sites {
                        let p1 = tensor.slice(pair.u, site).map_err(|e| {
                            Error::BackendRuntime {
                                backend: BackendKind::Cpu.name(),
                                message: format!(
                                    "pair ({}, {}) site {site}: {e}",
                                    pair.u, pair.v
                                ),
                            }
                        })?;
                        let p2 = tensor.slice(pair.v, site).map_err(|e| {
                            Error::BackendRuntime {
                                backend: BackendKind::Cpu.name(),
                                message: format!(
                                    "pair ({}, {}) site {site}: {e}",
                                    pair.u, pair.v
                                ),
                            }
                        })?;
                        let s = kernel::site_probs(p1, p2, n);
                        conv_sum += s.conv;
                        div_sum += s.div;
                        if let Some(rows) = rows.as_mut() {
                            rows.push(s.conv);
                            rows.push(s.div);
                        }
                    }
                    Ok((conv_sum, div_sum, rows))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        for (i, (conv, div, rows)) in per_pair.into_iter().enumerate() {
            out.p_convergent[i] = conv;
            out.p_divergent[i] = div;
            if let Some(rows) = rows {
                let slot = (slots[i] - 1) as usize;
                let start = slot * num_sites * 2;
                out.site_table[start..start + num_sites * 2].copy_from_slice(&rows);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.pool = None;
    }
}
