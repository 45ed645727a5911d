//! Weighted least squares solver.
//!
//! Linear curve families (and LOWESS evaluated between observations) reduce to
//! small regression problems of the form:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Implementation choices:
//! - Rows are scaled by `sqrt(w_i)` and solved as an ordinary least squares problem.
//! - SVD handles tall design matrices. (Nalgebra's `QR::solve` is intended for
//!   square systems and will panic for non-square matrices.)
//! - A rank-deficient design (e.g. all x identical) is reported as `None` rather
//!   than silently returning the minimum-norm solution.

use nalgebra::{DMatrix, DVector};

const RANK_TOL: f64 = 1e-10;

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the design matrix is rank deficient or the solution is not finite.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() < x.ncols() || x.nrows() != y.len() {
        return None;
    }
    let scale = x.amax().max(1.0);
    let svd = x.clone().svd(true, true);
    if svd.rank(RANK_TOL * scale) < x.ncols() {
        return None;
    }

    let beta = svd.solve(y, RANK_TOL * scale).ok()?;
    beta.iter().all(|v| v.is_finite()).then_some(beta)
}

/// Weighted variant of [`solve_least_squares`].
///
/// Weights must be non-negative; rows with zero weight drop out of the fit.
pub fn solve_weighted_least_squares(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    w: &[f64],
) -> Option<DVector<f64>> {
    if w.len() != x.nrows() || w.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
        return None;
    }
    let mut xs = x.clone();
    let mut ys = y.clone();
    for (i, &wi) in w.iter().enumerate() {
        let s = wi.sqrt();
        for j in 0..xs.ncols() {
            xs[(i, j)] *= s;
        }
        ys[i] *= s;
    }
    solve_least_squares(&xs, &ys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn identical_x_is_rank_deficient() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 4.0, 1.0, 4.0, 1.0, 4.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        assert!(solve_least_squares(&x, &y).is_none());
    }

    #[test]
    fn zero_weights_drop_rows() {
        // The outlier at x=3 carries no weight.
        let x = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = DVector::from_row_slice(&[1.0, 2.0, 3.0, 100.0]);
        let beta = solve_weighted_least_squares(&x, &y, &[1.0, 1.0, 1.0, 0.0]).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-10);
        assert!((beta[1] - 1.0).abs() < 1e-10);
    }
}
