// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-backend execution: CPU parallel loop, CUDA, Metal.
//!
//! Each backend implements the [`ComputeBackend`] capability trait
//! (`probe` is a per-module associated check; `init` builds the backend;
//! `run` executes the full pair × site grid; `shutdown` releases device
//! state). The [`Dispatcher`] owns one active backend and handles
//! selection, working-set admission, and CPU fallback.
//!
//! Precision contract: the CPU and CUDA paths compute in f64 end-to-end;
//! the Metal path converts inputs to f32 on the host, runs the kernel in
//! f32, and converts outputs back. The caller always holds f64 buffers.
//!
//! Selection policy: when the configuration asks for a GPU, CUDA is
//! probed first, then Metal; an unavailable or failing GPU falls back to
//! the CPU with a warning unless the GPU was mandatory. Every decision is
//! logged.

pub mod cpu;
#[cfg(feature = "cuda")]
pub mod cuda;
#[cfg(feature = "gpu")]
pub mod metal;

use crate::error::{Error, Result};
use crate::phylo::{BranchPair, PosteriorTensor};
use std::fmt;

/// Concrete execution target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Host CPU, fork-join parallel loop.
    Cpu,
    /// NVIDIA GPU via cudarc (f64).
    Cuda,
    /// Apple GPU via wgpu (f32).
    Metal,
}

impl BackendKind {
    /// Static backend name for logs and error context.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Cuda => "CUDA",
            Self::Metal => "Metal",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-only kernel inputs: the tensor and the enumerated pairs.
#[derive(Debug, Clone, Copy)]
pub struct KernelInputs<'a> {
    /// Posterior tensor shared by all workers.
    pub tensor: &'a PosteriorTensor,
    /// Enumerated branch pairs, in output order.
    pub pairs: &'a [BranchPair],
}

impl KernelInputs<'_> {
    /// Number of selected pairs (pairs with per-site output).
    #[must_use]
    pub fn num_selected(&self) -> usize {
        self.pairs.iter().filter(|p| p.selected).count()
    }

    /// Per-pair selection slots: `slot + 1` for the i-th selected pair in
    /// enumeration order, `0` for unselected. Shared by every backend so
    /// the per-site table layout is identical across them.
    #[must_use]
    pub fn selection_slots(&self) -> Vec<u32> {
        let mut next = 0u32;
        self.pairs
            .iter()
            .map(|p| {
                if p.selected {
                    next += 1;
                    next
                } else {
                    0
                }
            })
            .collect()
    }
}

/// Caller-owned, pre-sized kernel outputs.
#[derive(Debug, Clone)]
pub struct KernelOutputs {
    /// Per-pair summed convergence probabilities.
    pub p_convergent: Vec<f64>,
    /// Per-pair summed divergence probabilities.
    pub p_divergent: Vec<f64>,
    /// Dense per-site table for selected pairs, selected-major:
    /// `site_table[(slot * num_sites + site) * 2 + {0: conv, 1: div}]`.
    pub site_table: Vec<f64>,
}

impl KernelOutputs {
    /// Allocate outputs sized for the given inputs.
    #[must_use]
    pub fn sized_for(inputs: &KernelInputs<'_>) -> Self {
        let num_pairs = inputs.pairs.len();
        let table = inputs.num_selected() * inputs.tensor.num_sites() * 2;
        Self {
            p_convergent: vec![0.0; num_pairs],
            p_divergent: vec![0.0; num_pairs],
            site_table: vec![0.0; table],
        }
    }
}

/// Capability trait implemented by every execution backend.
///
/// `run` must write each output cell exactly once, never mutate its
/// inputs, and leave device memory either released or parked for reuse.
/// `shutdown` must be idempotent; backends also release their resources
/// on drop so panics cannot leak device state.
pub trait ComputeBackend {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Human-readable device name reported by `init`.
    fn device_name(&self) -> &str;

    /// Device working-set budget in bytes (`u64::MAX` on the CPU).
    fn workset_budget(&self) -> u64;

    /// Bytes of device memory this workload needs on this backend.
    fn workset_required(&self, inputs: &KernelInputs<'_>) -> u64;

    /// Execute the full `pairs × sites` grid. Blocks until complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendRuntime`] carrying the backend name and the
    /// offending `(pair, site)` context on device or kernel failure.
    fn run(&mut self, inputs: &KernelInputs<'_>, out: &mut KernelOutputs) -> Result<()>;

    /// Release every resource acquired during `init`. Idempotent.
    fn shutdown(&mut self);
}

/// Execution configuration for backend selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecConfig {
    /// Try GPU backends before the CPU.
    pub use_gpu: bool,
    /// Fail (exit code 3) instead of falling back when no GPU works.
    pub require_gpu: bool,
    /// CPU worker count; 0 means one per available core.
    pub nthreads: usize,
}

/// Owns the active backend; replaces it on fallback, releases it on drop.
pub struct Dispatcher {
    backend: Box<dyn ComputeBackend>,
}

impl Dispatcher {
    /// Select a backend for `inputs` under `cfg`, logging the decision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] when `require_gpu` is set and
    /// no GPU backend initializes or admits the workload, and propagates
    /// CPU pool construction failures.
    pub fn select(cfg: &ExecConfig, inputs: &KernelInputs<'_>) -> Result<Self> {
        if cfg.use_gpu {
            if let Some(dispatcher) = Self::try_gpu(inputs, cfg) {
                return Ok(dispatcher);
            }
            if cfg.require_gpu {
                return Err(Error::BackendUnavailable(
                    "GPU was mandatory but no GPU backend is usable".into(),
                ));
            }
            eprintln!("[backend] warning: no usable GPU backend, falling back to CPU");
        }
        let backend = cpu::CpuBackend::init(cfg.nthreads)?;
        println!(
            "[backend] using CPU ({}, {} workers)",
            backend.device_name(),
            backend.workers()
        );
        Ok(Self {
            backend: Box::new(backend),
        })
    }

    /// Probe and initialize GPU backends in order (CUDA, then Metal),
    /// admitting only devices whose working-set budget covers the inputs.
    fn try_gpu(inputs: &KernelInputs<'_>, _cfg: &ExecConfig) -> Option<Self> {
        #[cfg(feature = "cuda")]
        if cuda::CudaBackend::probe() {
            match cuda::CudaBackend::init() {
                Ok(backend) => {
                    if let Some(d) = Self::admit(Box::new(backend), inputs) {
                        return Some(d);
                    }
                }
                Err(err) => eprintln!("[backend] warning: CUDA init failed: {err}"),
            }
        }
        #[cfg(feature = "gpu")]
        if metal::MetalBackend::probe() {
            match metal::MetalBackend::init() {
                Ok(backend) => {
                    if let Some(d) = Self::admit(Box::new(backend), inputs) {
                        return Some(d);
                    }
                }
                Err(err) => eprintln!("[backend] warning: Metal init failed: {err}"),
            }
        }
        #[cfg(not(any(feature = "cuda", feature = "gpu")))]
        let _ = inputs;
        None
    }

    #[cfg(any(feature = "cuda", feature = "gpu"))]
    fn admit(mut backend: Box<dyn ComputeBackend>, inputs: &KernelInputs<'_>) -> Option<Self> {
        let required = backend.workset_required(inputs);
        let budget = backend.workset_budget();
        if required > budget {
            eprintln!(
                "[backend] warning: {} workload needs {required} B, device budget is {budget} B",
                backend.kind()
            );
            backend.shutdown();
            return None;
        }
        println!(
            "[backend] using {} ({}, {} MB working set)",
            backend.kind(),
            backend.device_name(),
            budget / (1024 * 1024)
        );
        Some(Self { backend })
    }

    /// The active backend kind.
    #[must_use]
    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The active device name.
    #[must_use]
    pub fn device_name(&self) -> &str {
        self.backend.device_name()
    }

    /// Execute the kernel, cleaning up the backend on fatal errors.
    ///
    /// # Errors
    ///
    /// Propagates backend failures after releasing device resources.
    pub fn run(&mut self, inputs: &KernelInputs<'_>, out: &mut KernelOutputs) -> Result<()> {
        if out.p_convergent.len() != inputs.pairs.len()
            || out.p_divergent.len() != inputs.pairs.len()
            || out.site_table.len() != inputs.num_selected() * inputs.tensor.num_sites() * 2
        {
            return Err(Error::InvalidInput(
                "kernel outputs are not sized for these inputs".into(),
            ));
        }
        match self.backend.run(inputs, out) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.backend.shutdown();
                Err(err)
            }
        }
    }

    /// Release the active backend's resources.
    pub fn shutdown(&mut self) {
        self.backend.shutdown();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.backend.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phylo::pairs::enumerate;
    use crate::phylo::posterior::testutil::random_tensor;
    use crate::phylo::tree::testutil::three_leaf_tree;

    #[test]
    fn selection_slots_follow_enumeration_order() {
        let tree = three_leaf_tree();
        let tensor = random_tensor(tree.nnode(), 3, 4, 11);
        let pairs = enumerate(&tree, &[(1, 2), (2, 3)]).unwrap();
        let inputs = KernelInputs {
            tensor: &tensor,
            pairs: &pairs,
        };
        assert_eq!(inputs.num_selected(), 2);
        // Enumeration order: (0,1), (0,2), (1,2), (2,3).
        assert_eq!(inputs.selection_slots(), vec![0, 0, 1, 2]);
    }

    #[test]
    fn outputs_sized_for_inputs() {
        let tree = three_leaf_tree();
        let tensor = random_tensor(tree.nnode(), 5, 4, 3);
        let pairs = enumerate(&tree, &[(0, 1)]).unwrap();
        let inputs = KernelInputs {
            tensor: &tensor,
            pairs: &pairs,
        };
        let out = KernelOutputs::sized_for(&inputs);
        assert_eq!(out.p_convergent.len(), 4);
        assert_eq!(out.site_table.len(), 5 * 2);
    }

    #[test]
    fn cpu_selection_always_succeeds() {
        let tree = three_leaf_tree();
        let tensor = random_tensor(tree.nnode(), 2, 4, 5);
        let pairs = enumerate(&tree, &[]).unwrap();
        let inputs = KernelInputs {
            tensor: &tensor,
            pairs: &pairs,
        };
        let cfg = ExecConfig {
            use_gpu: false,
            require_gpu: false,
            nthreads: 2,
        };
        let dispatcher = Dispatcher::select(&cfg, &inputs).unwrap();
        assert_eq!(dispatcher.kind(), BackendKind::Cpu);
    }

    #[test]
    fn run_rejects_mis_sized_outputs() {
        let tree = three_leaf_tree();
        let tensor = random_tensor(tree.nnode(), 2, 4, 5);
        let pairs = enumerate(&tree, &[]).unwrap();
        let inputs = KernelInputs {
            tensor: &tensor,
            pairs: &pairs,
        };
        let mut dispatcher = Dispatcher::select(&ExecConfig::default(), &inputs).unwrap();
        let mut out = KernelOutputs {
            p_convergent: vec![0.0; 1],
            p_divergent: vec![0.0; 1],
            site_table: vec![],
        };
        assert!(dispatcher.run(&inputs, &mut out).is_err());
    }
}
