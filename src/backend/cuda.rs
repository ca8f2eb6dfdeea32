// SPDX-License-Identifier: AGPL-3.0-or-later
//! NVIDIA backend via cudarc: f64 end-to-end.
//!
//! The embedded CUDA source is compiled with NVRTC at `init` and loaded
//! into a module on device 0. Launch shape follows the reference
//! configuration: grid `(num_pairs, ceil(num_sites / 256))`, block
//! `(256, 1, 1)`, one thread per (pair, site); per-block partial sums
//! come back to the host, which folds them in index order.
//!
//! Device buffers — the tensor, offsets, packed pairs, and both output
//! buffers — are cached grow-only across calls: a workload of equal or
//! smaller size reuses the resident allocations, only growth
//! reallocates. The kernel rewrites every cell of the active prefix on
//! each launch, so stale capacity beyond it is never read.

use super::{BackendKind, ComputeBackend, KernelInputs, KernelOutputs};
use crate::error::{Error, Result};
use cudarc::driver::{
    CudaDevice, CudaFunction, CudaSlice, DeviceRepr, LaunchAsync, LaunchConfig, ValidAsZeroBits,
};
use cudarc::nvrtc::compile_ptx;
use std::sync::Arc;

const CONVERGENCE_CU: &str = include_str!("kernels/convergence_f64.cu");
const MODULE_NAME: &str = "grand_convergence";
const KERNEL_NAME: &str = "convergence_pairs_f64";
const BLOCK: u32 = 256;

fn runtime(message: String) -> Error {
    Error::BackendRuntime {
        backend: BackendKind::Cuda.name(),
        message,
    }
}

/// f64 kernel execution on CUDA device 0.
pub struct CudaBackend {
    device: Option<Arc<CudaDevice>>,
    func: Option<CudaFunction>,
    con_p: Option<CudaSlice<f64>>,
    offsets: Option<CudaSlice<u64>>,
    pairs: Option<CudaSlice<u32>>,
    partials: Option<CudaSlice<f64>>,
    site_rows: Option<CudaSlice<f64>>,
    name: String,
    budget: u64,
}

impl CudaBackend {
    /// Whether any CUDA device is visible. Allocates nothing persistent.
    #[must_use]
    pub fn probe() -> bool {
        CudaDevice::count().map_or(false, |c| c > 0)
    }

    /// Acquire device 0, compile the kernel with NVRTC, load the module.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendRuntime`] on driver, NVRTC, or module
    /// loading failure.
    pub fn init() -> Result<Self> {
        let device = CudaDevice::new(0).map_err(|e| runtime(format!("device open: {e}")))?;
        let name = device
            .name()
            .map_err(|e| runtime(format!("device name: {e}")))?;
        let ptx =
            compile_ptx(CONVERGENCE_CU).map_err(|e| runtime(format!("NVRTC compile: {e}")))?;
        device
            .load_ptx(ptx, MODULE_NAME, &[KERNEL_NAME])
            .map_err(|e| runtime(format!("module load: {e}")))?;
        let func = device
            .get_func(MODULE_NAME, KERNEL_NAME)
            .ok_or_else(|| runtime(format!("kernel `{KERNEL_NAME}` missing from module")))?;
        let budget = cudarc::driver::result::mem_get_info()
            .map(|(free, _total)| free as u64)
            .unwrap_or(u64::MAX);
        Ok(Self {
            device: Some(device),
            func: Some(func),
            con_p: None,
            offsets: None,
            pairs: None,
            partials: None,
            site_rows: None,
            name,
            budget,
        })
    }

    /// Grow-only slice cache: reuse when the resident allocation covers
    /// `len`, else reallocate at the new length.
    fn ensure<'a, T: DeviceRepr + ValidAsZeroBits>(
        slot: &'a mut Option<CudaSlice<T>>,
        device: &Arc<CudaDevice>,
        len: usize,
        label: &str,
    ) -> Result<&'a mut CudaSlice<T>> {
        let len = len.max(1);
        if slot.as_ref().map_or(true, |s| s.len() < len) {
            let fresh = device
                .alloc_zeros(len)
                .map_err(|e| runtime(format!("{label} alloc: {e}")))?;
            *slot = Some(fresh);
        }
        slot.as_mut()
            .ok_or_else(|| runtime(format!("{label} cache not populated")))
    }

    /// Upload a host slice into the grow-only cache behind `slot`,
    /// writing through a prefix view of the resident allocation.
    fn upload<T: DeviceRepr + ValidAsZeroBits>(
        slot: &mut Option<CudaSlice<T>>,
        device: &Arc<CudaDevice>,
        src: &[T],
        label: &str,
    ) -> Result<()> {
        let buf = Self::ensure(slot, device, src.len(), label)?;
        let mut prefix = buf.slice_mut(0..src.len());
        device
            .htod_sync_copy_into(src, &mut prefix)
            .map_err(|e| runtime(format!("{label} upload: {e}")))
    }
}

impl ComputeBackend for CudaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn device_name(&self) -> &str {
        &self.name
    }

    fn workset_budget(&self) -> u64 {
        self.budget
    }

    fn workset_required(&self, inputs: &KernelInputs<'_>) -> u64 {
        let tensor = inputs.tensor;
        let blocks = (tensor.num_sites() as u64).div_ceil(u64::from(BLOCK));
        let num_pairs = inputs.pairs.len() as u64;
        let selected = inputs.num_selected() as u64;
        tensor.con_p().len() as u64 * 8
            + (tensor.nnode() as u64 + 1) * 8
            + num_pairs * 3 * 4
            + num_pairs * blocks * 2 * 8
            + selected * tensor.num_sites() as u64 * 2 * 8
    }

    fn run(&mut self, inputs: &KernelInputs<'_>, out: &mut KernelOutputs) -> Result<()> {
        let device = self
            .device
            .clone()
            .ok_or_else(|| runtime("backend already shut down".into()))?;
        let func = self
            .func
            .clone()
            .ok_or_else(|| runtime("backend already shut down".into()))?;
        let tensor = inputs.tensor;
        let num_pairs = inputs.pairs.len();
        let num_sites = tensor.num_sites();
        let blocks_per_pair = (num_sites as u32).div_ceil(BLOCK);
        let num_selected = inputs.num_selected();

        Self::upload(&mut self.con_p, &device, tensor.con_p(), "con_p")?;
        Self::upload(&mut self.offsets, &device, tensor.offsets(), "offsets")?;

        let slots = inputs.selection_slots();
        let mut packed: Vec<u32> = Vec::with_capacity(num_pairs * 3);
        for (pair, &slot) in inputs.pairs.iter().zip(&slots) {
            packed.push(pair.u as u32);
            packed.push(pair.v as u32);
            packed.push(slot);
        }
        Self::upload(&mut self.pairs, &device, &packed, "pairs")?;
        drop(packed);

        let partial_cells = num_pairs * blocks_per_pair as usize * 2;
        Self::ensure(&mut self.partials, &device, partial_cells, "partials")?;
        let row_cells = num_selected * num_sites * 2;
        Self::ensure(&mut self.site_rows, &device, row_cells, "site rows")?;

        let cfg = LaunchConfig {
            grid_dim: (num_pairs as u32, blocks_per_pair, 1),
            block_dim: (BLOCK, 1, 1),
            shared_mem_bytes: 0,
        };
        {
            let (Some(con_p), Some(offsets), Some(pairs_buf)) = (
                self.con_p.as_ref(),
                self.offsets.as_ref(),
                self.pairs.as_ref(),
            ) else {
                return Err(runtime("device buffer cache not populated".into()));
            };
            let (Some(partials), Some(site_rows)) =
                (self.partials.as_mut(), self.site_rows.as_mut())
            else {
                return Err(runtime("device buffer cache not populated".into()));
            };
            // SAFETY: buffer extents cover the launch shape computed above
            // and the kernel guards pair/site against num_pairs/num_sites.
            unsafe {
                func.launch(
                    cfg,
                    (
                        con_p,
                        offsets,
                        pairs_buf,
                        num_pairs as u32,
                        num_sites as u32,
                        tensor.n() as u32,
                        blocks_per_pair,
                        partials,
                        site_rows,
                    ),
                )
                .map_err(|e| runtime(format!("kernel launch: {e}")))?;
            }
        }

        // Readback covers the resident capacity; only the active prefix
        // (rewritten by this launch) is folded.
        let partials_host: Vec<f64> = {
            let buf = self
                .partials
                .as_ref()
                .ok_or_else(|| runtime("partials cache not populated".into()))?;
            device
                .dtoh_sync_copy(buf)
                .map_err(|e| runtime(format!("partials readback: {e}")))?
        };
        for pair in 0..num_pairs {
            let mut conv = 0.0_f64;
            let mut div = 0.0_f64;
            for block in 0..blocks_per_pair as usize {
                let cell = (pair * blocks_per_pair as usize + block) * 2;
                conv += partials_host[cell];
                div += partials_host[cell + 1];
            }
            out.p_convergent[pair] = conv;
            out.p_divergent[pair] = div;
        }
        if num_selected > 0 {
            let rows: Vec<f64> = {
                let buf = self
                    .site_rows
                    .as_ref()
                    .ok_or_else(|| runtime("site rows cache not populated".into()))?;
                device
                    .dtoh_sync_copy(buf)
                    .map_err(|e| runtime(format!("site rows readback: {e}")))?
            };
            out.site_table.copy_from_slice(&rows[..row_cells]);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.con_p = None;
        self.offsets = None;
        self.pairs = None;
        self.partials = None;
        self.site_rows = None;
        self.func = None;
        self.device = None;
    }
}

impl Drop for CudaBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
