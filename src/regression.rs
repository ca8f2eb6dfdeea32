// SPDX-License-Identifier: AGPL-3.0-or-later
//! Robust errors-in-variables regression: Theil-Sen slope plus median
//! intercept, fitted to the per-pair divergence (x) and convergence (y)
//! aggregates to estimate the non-parametric null expectation.
//!
//! The slope is the median of pairwise sample slopes after three skip
//! rules inherited from the reference behavior:
//!
//! - both deltas zero → the pair carries no information, skip;
//! - `slope == -1` (exact) → the degenerate perpendicular line, skip;
//! - `slope == 0` (exact) → skip.
//!
//! Vertical pairs (`x` delta zero, `y` delta nonzero) produce ±∞ slopes
//! and are retained; they sort to the ends and cannot become the median
//! of well-conditioned data. The median index is offset by the count of
//! slopes strictly below −1 (`cutoff`), replicating the reference
//! indexing; an index that falls outside the collected vector is
//! reported as [`Error::NumericDegeneracy`] rather than reinterpreted.
//!
//! Never allocates an O(N²) slope matrix: pass 1 counts survivors, pass 2
//! fills an exact-size buffer. All sizes are computed in u64.

use crate::error::{Error, Result};

/// Fitted null relationship `y ≈ slope · x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regression {
    /// Theil-Sen slope.
    pub slope: f64,
    /// Median-of-residuals intercept.
    pub intercept: f64,
}

/// Fit the Theil-Sen slope and median intercept.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `x` and `y` differ in length, and
/// [`Error::NumericDegeneracy`] when no usable slope survives the skip
/// rules or the offset median index leaves the slope vector.
pub fn theil_sen(x: &[f64], y: &[f64]) -> Result<Regression> {
    if x.len() != y.len() {
        return Err(Error::InvalidInput(format!(
            "x holds {} points, y holds {}",
            x.len(),
            y.len()
        )));
    }

    // Pass 1: count surviving slopes in u64 so the exact-size allocation
    // below cannot overflow on large trees.
    let mut count: u64 = 0;
    for_each_slope(x, y, |_| count += 1);
    if count == 0 {
        return Err(Error::NumericDegeneracy(
            "no usable pairwise slopes".into(),
        ));
    }
    let capacity = usize::try_from(count).map_err(|_| {
        Error::ResourceExhaustion(format!("{count} slopes exceed address space"))
    })?;

    // Pass 2: fill the exact-size buffer.
    let mut slopes = Vec::with_capacity(capacity);
    for_each_slope(x, y, |m| slopes.push(m));
    debug_assert_eq!(slopes.len(), capacity);
    slopes.sort_by(f64::total_cmp);

    // Index of the last slope strictly below -1, or -1 if none.
    let below = slopes.partition_point(|m| *m < -1.0) as i64;
    let cutoff = below - 1;

    let count = count as i64;
    let slope = if count % 2 == 0 {
        let lo = count / 2 + cutoff;
        let hi = lo + 1;
        let (Some(a), Some(b)) = (slope_at(&slopes, lo), slope_at(&slopes, hi)) else {
            return Err(Error::NumericDegeneracy(format!(
                "median indices {lo}, {hi} leave the {count}-slope vector"
            )));
        };
        0.5 * (a + b)
    } else {
        let idx = (count + 1) / 2 + cutoff;
        let Some(m) = slope_at(&slopes, idx) else {
            return Err(Error::NumericDegeneracy(format!(
                "median index {idx} leaves the {count}-slope vector"
            )));
        };
        m
    };

    // Intercept: median of y - slope * x.
    let mut residuals: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(&xi, &yi)| slope.mul_add(-xi, yi))
        .collect();
    if residuals.is_empty() {
        return Err(Error::NumericDegeneracy("no residuals to median".into()));
    }
    residuals.sort_by(f64::total_cmp);
    let n = residuals.len();
    let intercept = if n % 2 == 0 {
        0.5 * (residuals[n / 2 - 1] + residuals[n / 2])
    } else {
        residuals[n / 2]
    };

    Ok(Regression { slope, intercept })
}

fn slope_at(slopes: &[f64], idx: i64) -> Option<f64> {
    usize::try_from(idx).ok().and_then(|i| slopes.get(i)).copied()
}

/// Walk every ordered pair `(i, j)` with `i < j`, applying the skip rules
/// and handing surviving slopes to `visit` in a fixed order.
#[allow(clippy::float_cmp)]
fn for_each_slope(x: &[f64], y: &[f64], mut visit: impl FnMut(f64)) {
    let n = x.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let xdelta = x[i] - x[j];
            let ydelta = y[i] - y[j];
            if xdelta == 0.0 && ydelta == 0.0 {
                continue;
            }
            let slope = ydelta / xdelta;
            // Exact-equality skips preserve the reference behavior
            // bit-for-bit; both are unreachable off degenerate inputs.
            if slope == -1.0 || slope == 0.0 {
                continue;
            }
            visit(slope);
        }
    }
}
