//! Polynomial least-squares fitting
//!
//! Local polynomial regressions used to estimate smooth derivatives
//! (per-sample fits and Savitzky-Golay filters). Solved through nalgebra's
//! SVD so rank-deficient windows still return the minimum-norm fit.

use nalgebra::{DMatrix, DVector};

use crate::{CycloError, Result};

const SVD_EPS: f64 = 1e-12;

/// Vandermonde matrix with columns `x^0, x^1, ..., x^order`
fn vandermonde(xs: &[f64], order: usize) -> DMatrix<f64> {
    DMatrix::from_fn(xs.len(), order + 1, |row, col| xs[row].powi(col as i32))
}

/// Least-squares polynomial fit
///
/// # Returns
/// Coefficients in ascending powers (`c[0] + c[1] x + ...`)
pub fn polyfit(xs: &[f64], ys: &[f64], order: usize) -> Result<Vec<f64>> {
    if xs.len() != ys.len() {
        return Err(CycloError::InvalidArgument(format!(
            "polyfit needs as many abscissas as values ({} != {})",
            xs.len(),
            ys.len()
        )));
    }
    if xs.is_empty() {
        return Err(CycloError::InvalidArgument(
            "polyfit needs at least one point".to_string(),
        ));
    }

    let design = vandermonde(xs, order);
    let rhs = DVector::from_column_slice(ys);
    let coefficients = design
        .svd(true, true)
        .solve(&rhs, SVD_EPS)
        .map_err(|e| CycloError::Numeric(format!("polynomial fit failed: {}", e)))?;

    Ok(coefficients.iter().copied().collect())
}

/// First derivative of the polynomial `coefficients` (ascending) at `x`
pub fn polyfit_derivative_at(coefficients: &[f64], x: f64) -> f64 {
    coefficients
        .iter()
        .enumerate()
        .skip(1)
        .map(|(power, &c)| power as f64 * c * x.powi(power as i32 - 1))
        .sum()
}

/// Savitzky-Golay first-derivative filter taps for a centred window
///
/// Tap `j` multiplies the sample at offset `j - half_width`.
pub fn derivative_filter(half_width: usize, order: usize) -> Result<Vec<f64>> {
    let xs: Vec<f64> = (-(half_width as isize)..=half_width as isize)
        .map(|x| x as f64)
        .collect();
    let pinv = vandermonde(&xs, order)
        .pseudo_inverse(SVD_EPS)
        .map_err(|e| CycloError::Numeric(format!("Savitzky-Golay design failed: {}", e)))?;

    if order == 0 {
        return Ok(vec![0.0; xs.len()]);
    }
    Ok(pinv.row(1).iter().copied().collect())
}
