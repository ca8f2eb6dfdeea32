// SPDX-License-Identifier: AGPL-3.0-or-later
//! Validation: convergence kernel closed-form scenarios.
//!
//! Oracles:
//! - identity matrices → probC = probD = 0 (no off-diagonal mass)
//! - uniform P2 (1/20) against unit P1 → probC = 361, probD = 6859
//! - single shared transition → probC = 1, probD = 0
//! - aggregation over sites is the plain sum of per-site values

use grand_convergence::backend::{BackendKind, ComputeBackend, KernelInputs, KernelOutputs};
use grand_convergence::backend::cpu::CpuBackend;
use grand_convergence::kernel::site_probs;
use grand_convergence::phylo::pairs::enumerate;
use grand_convergence::phylo::tree::{Node, TreeModel};
use grand_convergence::phylo::PosteriorTensor;
use grand_convergence::tolerances;
use grand_convergence::validation::Validator;

fn three_leaf_tree() -> TreeModel {
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

fn tensor_of(nnode: usize, matrix: &[f64], n: usize) -> PosteriorTensor {
    let mut con_p = Vec::with_capacity(nnode * n * n);
    for _ in 0..nnode {
        con_p.extend_from_slice(matrix);
    }
    let offsets = (0..=nnode).map(|v| (v * n * n) as u64).collect();
    PosteriorTensor::new(con_p, offsets, 1, n).expect("oracle tensor is valid")
}

fn main() {
    let mut v = Validator::new("Convergence Kernel Closed-Form Scenarios");
    let n = 20usize;

    // ── Identity matrices ───────────────────────────────────────────
    v.section("── Identity matrices (no off-diagonal mass) ──");
    let mut eye = vec![0.0; n * n];
    for j in 0..n {
        eye[j * n + j] = 1.0;
    }
    let s = site_probs(&eye, &eye, n);
    v.check("probC", s.conv, 0.0, tolerances::ANALYTICAL_F64);
    v.check("probD", s.div, 0.0, tolerances::ANALYTICAL_F64);

    // ── Uniform column mass against unit P1 ─────────────────────────
    v.section("── Uniform P2 (1/20), unit P1 ──");
    let p2 = vec![1.0 / n as f64; n * n];
    let p1 = vec![1.0; n * n];
    let s = site_probs(&p1, &p2, n);
    v.check("probC", s.conv, 361.0, tolerances::ANALYTICAL_F64 * 1e3);
    v.check("probD", s.div, 6859.0, tolerances::ANALYTICAL_F64 * 1e3);

    // ── Single shared transition ────────────────────────────────────
    v.section("── All mass on 0 -> 1 on both branches ──");
    let mut m = vec![0.0; n * n];
    m[1] = 1.0;
    let s = site_probs(&m, &m, n);
    v.check("probC", s.conv, 1.0, tolerances::ANALYTICAL_F64);
    v.check("probD", s.div, 0.0, tolerances::ANALYTICAL_F64);

    // ── Full tree pass over the identity tensor ─────────────────────
    v.section("── Three-leaf tree, identity tensor ──");
    let tree = three_leaf_tree();
    let tensor = tensor_of(tree.nnode(), &eye, n);
    let pairs = enumerate(&tree, &[]).expect("enumeration succeeds");
    v.check_count("branch pairs", pairs.len(), 4);
    let inputs = KernelInputs {
        tensor: &tensor,
        pairs: &pairs,
    };
    let mut out = KernelOutputs::sized_for(&inputs);
    let mut backend = CpuBackend::init(1).expect("CPU backend");
    v.check_true("CPU backend reports kind", backend.kind() == BackendKind::Cpu);
    backend.run(&inputs, &mut out).expect("kernel run");
    let max_c = out.p_convergent.iter().fold(0.0_f64, |a, &b| a.max(b.abs()));
    let max_d = out.p_divergent.iter().fold(0.0_f64, |a, &b| a.max(b.abs()));
    v.check("max |pConvergent|", max_c, 0.0, tolerances::ANALYTICAL_F64);
    v.check("max |pDivergent|", max_d, 0.0, tolerances::ANALYTICAL_F64);
    backend.shutdown();

    v.finish();
}
