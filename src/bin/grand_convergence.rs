// SPDX-License-Identifier: AGPL-3.0-or-later
//! Grand-Convergence entry point.
//!
//! Consumes a control file (default `convergence.ctl`) and runs the full
//! pipeline. Exit codes: 0 success, 1 input validation, 2 I/O, 3 backend
//! failure, 4 numeric degeneracy.

use grand_convergence::io::control;
use grand_convergence::pipeline;
use std::path::PathBuf;

fn main() {
    let control_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("convergence.ctl"), PathBuf::from);

    let outcome = control::load(&control_path).and_then(|cfg| pipeline::run(&cfg));
    if let Err(err) = outcome {
        eprintln!("grand-convergence: {err}");
        std::process::exit(err.exit_code());
    }
}
