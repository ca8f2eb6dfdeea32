// SPDX-License-Identifier: AGPL-3.0-or-later
//! Validation: Metal (wgpu f32) kernel against the CPU f64 reference.
//!
//! Requires a GPU adapter; exits with code 2 (skipped) when none is
//! visible. The f32 path is held to 1e-6 relative error.

use grand_convergence::backend::cpu::CpuBackend;
use grand_convergence::backend::metal::MetalBackend;
use grand_convergence::backend::{ComputeBackend, KernelInputs, KernelOutputs};
use grand_convergence::phylo::pairs::enumerate;
use grand_convergence::phylo::tree::{Node, TreeModel};
use grand_convergence::phylo::PosteriorTensor;
use grand_convergence::tolerances;
use grand_convergence::validation::{exit_skipped, Validator};

fn caterpillar_tree(nleaf: usize) -> TreeModel {
    let nnode = 2 * nleaf - 1;
    let mut nodes = Vec::with_capacity(nnode);
    for leaf in 0..nleaf {
        let father = if leaf <= 1 { nleaf } else { nleaf + leaf - 1 };
        nodes.push(Node {
            id: leaf,
            father: Some(father),
            children: vec![],
            branch: 0.05,
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

fn random_tensor(nnode: usize, num_sites: usize, n: usize, seed: u64) -> PosteriorTensor {
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

fn main() {
    if !MetalBackend::probe() {
        exit_skipped("no GPU adapter visible");
    }

    let mut v = Validator::new("Metal f32 Kernel vs CPU f64 Reference");

    let tree = caterpillar_tree(12);
    let tensor = random_tensor(tree.nnode(), 33, 20, 4242);
    let pairs = enumerate(&tree, &[(0, 1), (2, 3)]).expect("enumeration succeeds");
    println!("  {} pairs x {} sites, n = 20\n", pairs.len(), 33);

    let inputs = KernelInputs {
        tensor: &tensor,
        pairs: &pairs,
    };

    let mut cpu_out = KernelOutputs::sized_for(&inputs);
    let mut cpu = CpuBackend::init(0).expect("CPU backend");
    cpu.run(&inputs, &mut cpu_out).expect("CPU run");
    cpu.shutdown();

    let mut gpu = match MetalBackend::init() {
        Ok(gpu) => gpu,
        Err(err) => exit_skipped(&format!("GPU init failed: {err}")),
    };
    println!("  device: {}\n", gpu.device_name());
    let mut gpu_out = KernelOutputs::sized_for(&inputs);
    gpu.run(&inputs, &mut gpu_out).expect("GPU run");
    // Second run over the same workload reuses resident buffers.
    let mut gpu_out2 = KernelOutputs::sized_for(&inputs);
    gpu.run(&inputs, &mut gpu_out2).expect("GPU rerun");
    gpu.shutdown();

    let mut max_rel = 0.0_f64;
    for i in 0..pairs.len() {
        for (a, b) in [
            (cpu_out.p_convergent[i], gpu_out.p_convergent[i]),
            (cpu_out.p_divergent[i], gpu_out.p_divergent[i]),
        ] {
            let scale = a.abs().max(1e-30);
            max_rel = max_rel.max((a - b).abs() / scale);
        }
    }
    v.check(
        "max relative error vs CPU",
        max_rel.min(1.0),
        0.0,
        tolerances::METAL_VS_CPU_F32,
    );

    let mut rerun_identical = true;
    for i in 0..pairs.len() {
        rerun_identical &=
            gpu_out.p_convergent[i].to_bits() == gpu_out2.p_convergent[i].to_bits();
        rerun_identical &=
            gpu_out.p_divergent[i].to_bits() == gpu_out2.p_divergent[i].to_bits();
    }
    v.check_true("rerun is bit-identical", rerun_identical);

    let site_cells = cpu_out.site_table.len();
    let mut max_site_rel = 0.0_f64;
    for cell in 0..site_cells {
        let a = cpu_out.site_table[cell];
        let b = gpu_out.site_table[cell];
        let scale = a.abs().max(1e-30);
        max_site_rel = max_site_rel.max((a - b).abs() / scale);
    }
    v.check(
        "max per-site relative error",
        max_site_rel.min(1.0),
        0.0,
        tolerances::METAL_VS_CPU_F32 * 10.0,
    );

    v.finish();
}
