// SPDX-License-Identifier: AGPL-3.0-or-later
//! Validation: Theil-Sen regression against hand-computed medians and
//! the documented degenerate inputs.

use grand_convergence::error::Error;
use grand_convergence::regression::theil_sen;
use grand_convergence::tolerances;
use grand_convergence::validation::Validator;

fn main() {
    let mut v = Validator::new("Theil-Sen Regression Oracles");

    // ── Five-point median ───────────────────────────────────────────
    v.section("── x = [1..5], y = [1,2,4,4,5] ──");
    let x = [1.0, 2.0, 3.0, 4.0, 5.0];
    let y = [1.0, 2.0, 4.0, 4.0, 5.0];
    match theil_sen(&x, &y) {
        Ok(r) => {
            v.check("slope", r.slope, 1.0, tolerances::REGRESSION_F64);
            v.check("intercept", r.intercept, 0.0, tolerances::REGRESSION_F64);
        }
        Err(err) => {
            v.check_true(&format!("fit succeeds (got {err})"), false);
            v.check_true("intercept", false);
        }
    }

    // ── Exact line ──────────────────────────────────────────────────
    v.section("── Exact line y = 2.5x + 3 over 40 points ──");
    let x: Vec<f64> = (0..40).map(f64::from).collect();
    let yl: Vec<f64> = x.iter().map(|&xi| 2.5_f64.mul_add(xi, 3.0)).collect();
    match theil_sen(&x, &yl) {
        Ok(r) => {
            v.check("slope", r.slope, 2.5, tolerances::REGRESSION_F64);
            v.check("intercept", r.intercept, 3.0, tolerances::REGRESSION_F64);
        }
        Err(err) => {
            v.check_true(&format!("fit succeeds (got {err})"), false);
            v.check_true("intercept", false);
        }
    }

    // ── Degeneracies ────────────────────────────────────────────────
    v.section("── Degenerate inputs report cleanly ──");
    v.check_true(
        "single point is NumericDegeneracy",
        matches!(
            theil_sen(&[1.0], &[2.0]),
            Err(Error::NumericDegeneracy(_))
        ),
    );
    v.check_true(
        "identical points are NumericDegeneracy",
        matches!(
            theil_sen(&[3.0; 6], &[5.0; 6]),
            Err(Error::NumericDegeneracy(_))
        ),
    );

    v.finish();
}
