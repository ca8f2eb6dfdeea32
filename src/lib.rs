// SPDX-License-Identifier: AGPL-3.0-or-later
#![warn(missing_docs, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::similar_names
)]
//! Grand-Convergence — posterior convergent/divergent substitution analysis.
//!
//! For every independent pair of branches in a phylogenetic tree and every
//! site in an aligned sequence, computes the posterior expected probabilities
//! of convergent and divergent amino-acid substitutions, aggregates them per
//! pair, fits a non-parametric Theil-Sen null regression of convergence
//! against divergence, and emits the Data-Explorer artifacts consumed by the
//! interactive plots.
//!
//! # Data plane
//! - [`phylo::tree`] — rooted tree model with JSON round-trip
//! - [`phylo::posterior`] — flat posterior substitution-probability tensor
//! - [`phylo::pairs`] — independent branch-pair enumeration
//!
//! # Compute
//! - [`kernel`] — per-(pair, site) convergence/divergence reduction
//! - [`backend`] — CPU / CUDA / Metal execution behind one dispatcher
//! - [`regression`] — memory-bounded Theil-Sen slope + median intercept
//!
//! # Output
//! - [`explorer`] — tree JSON, scatter data file, per-site tables, HTML shell
//!
//! # Entry points
//! - [`pipeline`] — enumerate → dispatch → regress → emit
//! - [`io::control`] — control-file options
//! - [`io::bundle`] — upstream input contract (tree + tensor + site metadata)
//!
//! GPU execution is feature-gated: `gpu` enables the wgpu/Metal f32 path,
//! `cuda` enables the native NVIDIA f64 path. The CPU path is always built.

pub mod backend;
pub mod error;
pub mod explorer;
pub mod io;
pub mod kernel;
pub mod phylo;
pub mod pipeline;
pub mod regression;
pub mod tolerances;
pub mod validation;
