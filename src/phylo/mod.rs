// SPDX-License-Identifier: AGPL-3.0-or-later
//! Phylogenetic data plane: tree model, posterior tensor, branch pairs.

pub mod pairs;
pub mod posterior;
pub mod tree;

pub use pairs::BranchPair;
pub use posterior::PosteriorTensor;
pub use tree::TreeModel;
