// SPDX-License-Identifier: AGPL-3.0-or-later
//! Apple-GPU backend over wgpu (on macOS wgpu dispatches through Metal).
//!
//! The kernel runs in f32: inputs are converted f64 → f32 on the host,
//! staged to device storage buffers, and results converted back. Host
//! staging vectors are dropped as soon as the device copy is queued.
//! Callers accept relative error on the order of 1e-6 on this path.
//!
//! Each thread serially processes a 16-site strip of one pair
//! (workgroup `(32, 8, 1)`), coarsening the grid to amortize dispatch
//! overhead; the host folds strip partials in index order so repeated
//! runs are bit-identical.
//!
//! Device buffers are cached grow-only across calls: a workload of equal
//! or smaller size reuses the previous allocations.

use super::{BackendKind, ComputeBackend, KernelInputs, KernelOutputs};
use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};

const CONVERGENCE_WGSL: &str = include_str!("shaders/convergence_f32.wgsl");
const SITES_PER_THREAD: usize = 16;
const WORKGROUP: (u32, u32) = (32, 8);

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Params {
    num_pairs: u32,
    num_sites: u32,
    n: u32,
    strips: u32,
}

/// A cached device buffer with its current byte capacity.
struct CachedBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
}

/// wgpu device state acquired by `init` and released by `shutdown`/drop.
struct DeviceState {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    con_p: Option<CachedBuffer>,
    offsets: Option<CachedBuffer>,
    pairs: Option<CachedBuffer>,
    partials: Option<CachedBuffer>,
    site_rows: Option<CachedBuffer>,
}

/// f32 shader execution on the best available wgpu adapter.
pub struct MetalBackend {
    state: Option<DeviceState>,
    adapter_name: String,
    budget: u64,
}

fn requested_backends() -> wgpu::Backends {
    match std::env::var("GRAND_CONVERGENCE_WGPU_BACKEND").as_deref() {
        Ok("vulkan") => wgpu::Backends::VULKAN,
        Ok("metal") => wgpu::Backends::METAL,
        Ok("dx12") => wgpu::Backends::DX12,
        _ => wgpu::Backends::all(),
    }
}

impl MetalBackend {
    /// Whether a non-CPU adapter is visible. Allocates nothing persistent.
    #[must_use]
    pub fn probe() -> bool {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: requested_backends(),
            ..Default::default()
        });
        instance
            .enumerate_adapters(requested_backends())
            .iter()
            .any(|a| a.get_info().device_type != wgpu::DeviceType::Cpu)
    }

    /// Acquire the device, create the queue, and compile the kernel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendUnavailable`] when no adapter is found and
    /// [`Error::BackendRuntime`] when device creation fails.
    pub fn init() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: requested_backends(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| Error::BackendUnavailable("no GPU adapter found".into()))?;

        let info = adapter.get_info();
        let limits = adapter.limits();
        let binding_limit = u64::from(limits.max_storage_buffer_binding_size)
            .min(512 * 1024 * 1024);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("grand-convergence f32 device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits {
                    max_storage_buffer_binding_size: binding_limit as u32,
                    max_buffer_size: limits.max_buffer_size.min(1024 * 1024 * 1024),
                    ..wgpu::Limits::default()
                },
            },
            None,
        ))
        .map_err(|e| Error::BackendRuntime {
            backend: BackendKind::Metal.name(),
            message: format!("device creation: {e}"),
        })?;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("convergence_f32"),
            source: wgpu::ShaderSource::Wgsl(CONVERGENCE_WGSL.into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("convergence_f32"),
            layout: None,
            module: &module,
            entry_point: "main",
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            state: Some(DeviceState {
                device,
                queue,
                pipeline,
                con_p: None,
                offsets: None,
                pairs: None,
                partials: None,
                site_rows: None,
            }),
            adapter_name: info.name,
            budget: binding_limit,
        })
    }
}

impl DeviceState {
    /// Grow-only buffer cache: reuse when capacity suffices, else
    /// reallocate at the new size.
    fn ensure<'a>(
        slot: &'a mut Option<CachedBuffer>,
        device: &wgpu::Device,
        bytes: u64,
        usage: wgpu::BufferUsages,
        label: &str,
    ) -> &'a wgpu::Buffer {
        let bytes = bytes.max(4);
        match slot {
            Some(cached) if cached.capacity >= bytes => &cached.buffer,
            _ => {
                let cached = slot.insert(CachedBuffer {
                    buffer: device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(label),
                        size: bytes,
                        usage,
                        mapped_at_creation: false,
                    }),
                    capacity: bytes,
                });
                &cached.buffer
            }
        }
    }

    fn read_f32(&self, source: &wgpu::Buffer, count: usize) -> Result<Vec<f32>> {
        let bytes = (count * 4) as u64;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, bytes);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| Error::BackendRuntime {
                backend: BackendKind::Metal.name(),
                message: format!("map callback channel: {e}"),
            })?
            .map_err(|e| Error::BackendRuntime {
                backend: BackendKind::Metal.name(),
                message: format!("buffer mapping: {e}"),
            })?;

        let data = slice.get_mapped_range();
        let out: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(out)
    }
}

impl ComputeBackend for MetalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Metal
    }

    fn device_name(&self) -> &str {
        &self.adapter_name
    }

    fn workset_budget(&self) -> u64 {
        self.budget
    }

    fn workset_required(&self, inputs: &KernelInputs<'_>) -> u64 {
        let tensor = inputs.tensor;
        let elements = tensor.con_p().len() as u64;
        // The f32 path indexes the flat buffer through u32 offsets.
        if elements > u64::from(u32::MAX) {
            return u64::MAX;
        }
        let strips = tensor.num_sites().div_ceil(SITES_PER_THREAD) as u64;
        let num_pairs = inputs.pairs.len() as u64;
        let selected = inputs.num_selected() as u64;
        elements * 4
            + (tensor.nnode() as u64 + 1) * 4
            + num_pairs * 3 * 4
            + num_pairs * strips * 2 * 4
            + selected * tensor.num_sites() as u64 * 2 * 4
    }

    #[allow(clippy::too_many_lines)]
    fn run(&mut self, inputs: &KernelInputs<'_>, out: &mut KernelOutputs) -> Result<()> {
        let Some(state) = self.state.as_mut() else {
            return Err(Error::BackendRuntime {
                backend: BackendKind::Metal.name(),
                message: "backend already shut down".into(),
            });
        };
        let tensor = inputs.tensor;
        let num_pairs = inputs.pairs.len();
        let num_sites = tensor.num_sites();
        let n = tensor.n();
        let strips = num_sites.div_ceil(SITES_PER_THREAD);
        let num_selected = inputs.num_selected();

        // Stage inputs in f32 / u32; each host vector is dropped as soon
        // as its device copy is queued.
        let storage_rw = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let storage_out = storage_rw | wgpu::BufferUsages::COPY_SRC;

        {
            let staged: Vec<f32> = tensor.con_p().iter().map(|&p| p as f32).collect();
            let buf = DeviceState::ensure(
                &mut state.con_p,
                &state.device,
                (staged.len() * 4) as u64,
                storage_rw,
                "con_p f32",
            );
            state.queue.write_buffer(buf, 0, bytemuck::cast_slice(&staged));
        }
        {
            let staged: Vec<u32> = tensor
                .offsets()
                .iter()
                .map(|&o| {
                    u32::try_from(o).map_err(|_| Error::BackendRuntime {
                        backend: BackendKind::Metal.name(),
                        message: format!("offset {o} exceeds the f32 path's u32 indexing"),
                    })
                })
                .collect::<Result<_>>()?;
            let buf = DeviceState::ensure(
                &mut state.offsets,
                &state.device,
                (staged.len() * 4) as u64,
                storage_rw,
                "offsets u32",
            );
            state.queue.write_buffer(buf, 0, bytemuck::cast_slice(&staged));
        }
        {
            let slots = inputs.selection_slots();
            let mut staged: Vec<u32> = Vec::with_capacity(num_pairs * 3);
            for (pair, &slot) in inputs.pairs.iter().zip(&slots) {
                staged.push(pair.u as u32);
                staged.push(pair.v as u32);
                staged.push(slot);
            }
            let buf = DeviceState::ensure(
                &mut state.pairs,
                &state.device,
                (staged.len() * 4) as u64,
                storage_rw,
                "pairs u32",
            );
            state.queue.write_buffer(buf, 0, bytemuck::cast_slice(&staged));
        }
        DeviceState::ensure(
            &mut state.partials,
            &state.device,
            (num_pairs * strips * 2 * 4) as u64,
            storage_out,
            "strip partials",
        );
        DeviceState::ensure(
            &mut state.site_rows,
            &state.device,
            (num_selected * num_sites * 2 * 4) as u64,
            storage_out,
            "site rows",
        );

        let params = Params {
            num_pairs: num_pairs as u32,
            num_sites: num_sites as u32,
            n: n as u32,
            strips: strips as u32,
        };
        use wgpu::util::DeviceExt;
        let params_buf = state
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        fn bound(slot: &Option<CachedBuffer>) -> Result<&wgpu::Buffer> {
            slot.as_ref()
                .map(|c| &c.buffer)
                .ok_or_else(|| Error::BackendRuntime {
                    backend: BackendKind::Metal.name(),
                    message: "device buffer cache not populated".into(),
                })
        }
        let bgl = state.pipeline.get_bind_group_layout(0);
        let bg = state.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &bgl,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bound(&state.con_p)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: bound(&state.offsets)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: bound(&state.pairs)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: bound(&state.partials)?.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: bound(&state.site_rows)?.as_entire_binding(),
                },
            ],
        });

        let mut encoder = state
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("convergence"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("convergence"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&state.pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(
                (num_pairs as u32).div_ceil(WORKGROUP.0),
                (strips as u32).div_ceil(WORKGROUP.1),
                1,
            );
        }
        state.queue.submit(Some(encoder.finish()));
        state.device.poll(wgpu::Maintain::Wait);

        // Fold strip partials in index order; convert back to f64.
        let partials = state.read_f32(bound(&state.partials)?, num_pairs * strips * 2)?;
        for pair in 0..num_pairs {
            let mut conv = 0.0_f64;
            let mut div = 0.0_f64;
            for strip in 0..strips {
                let cell = (pair * strips + strip) * 2;
                conv += f64::from(partials[cell]);
                div += f64::from(partials[cell + 1]);
            }
            out.p_convergent[pair] = conv;
            out.p_divergent[pair] = div;
        }
        if num_selected > 0 {
            let rows = state.read_f32(bound(&state.site_rows)?, num_selected * num_sites * 2)?;
            for (dst, &src) in out.site_table.iter_mut().zip(&rows) {
                *dst = f64::from(src);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.state = None;
    }
}

impl Drop for MetalBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
