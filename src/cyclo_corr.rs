//! Cyclostationary time correlation
//!
//! `R_xy(t, τ)` is estimated as the synchronous average, over the cyclic
//! period, of the lag product `x[t - τ/2] · y[t + τ - τ/2]`. Rows are indexed
//! by the phase `t mod period`, columns by lag.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::diagnostics::{report_clamped, Diagnostics, NoProgress, Progress, Warning};
use crate::sync_average::SyncAverage;
use crate::{invalid, Result};

const CONTEXT: &str = "cyclo_corr";

/// Time-varying correlation, `period x lags.len()`
#[derive(Debug, Clone)]
pub struct CycloCorrelation {
    values: DMatrix<f64>,
    lags: Vec<usize>,
    warnings: Vec<Warning>,
}

impl CycloCorrelation {
    /// Correlation matrix; row `t` is the phase, column `j` is `lags()[j]`
    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn lags(&self) -> &[usize] {
        &self.lags
    }

    pub fn period(&self) -> usize {
        self.values.nrows()
    }

    /// Correlation over one period at lag index `index`
    pub fn at_lag(&self, index: usize) -> Option<Vec<f64>> {
        (index < self.lags.len()).then(|| self.values.column(index).iter().copied().collect())
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

/// Estimate the cyclic time correlation of `x` and `y`
///
/// # Errors
/// `InvalidArgument` when `x` and `y` differ in length, the period is zero,
/// or a lag leaves less than one full period of products.
///
/// # Example
/// ```
/// use cyclostat_core::cyclo_time_correlation;
///
/// let x: Vec<f64> = (0..120).map(|i| if i % 12 < 6 { 1.0 } else { -1.0 }).collect();
/// let r = cyclo_time_correlation(&x, &x, 12, &[0, 2]).unwrap();
/// assert_eq!(r.values().shape(), (12, 2));
/// assert!(r.values().column(0).iter().all(|v| (*v - 1.0).abs() < 1e-12));
/// ```
pub fn cyclo_time_correlation(
    x: &[f64],
    y: &[f64],
    period: usize,
    lags: &[usize],
) -> Result<CycloCorrelation> {
    cyclo_time_correlation_with_progress(x, y, period, lags, &mut NoProgress)
}

/// [`cyclo_time_correlation`] reporting the fraction of finished lags
///
/// Lags are processed in parallel batches of one lag per worker thread and
/// progress is reported under the `"lags"` phase after each batch.
pub fn cyclo_time_correlation_with_progress(
    x: &[f64],
    y: &[f64],
    period: usize,
    lags: &[usize],
    progress: &mut dyn Progress,
) -> Result<CycloCorrelation> {
    if x.len() != y.len() {
        return invalid(format!(
            "x and y must have the same length ({} != {})",
            x.len(),
            y.len()
        ));
    }
    if period == 0 {
        return invalid("period must be positive");
    }
    if let Some(lag) = lags
        .iter()
        .find(|&&lag| x.len().checked_sub(lag).map_or(true, |n| n < period))
    {
        return invalid(format!(
            "lag {} leaves less than one period of {} samples in a signal of {}",
            lag,
            period,
            x.len()
        ));
    }

    let batch = rayon::current_num_threads().max(1);
    let mut columns = Vec::with_capacity(lags.len());
    report_clamped(progress, 0.0, "lags");
    for chunk in lags.chunks(batch) {
        let done = chunk
            .par_iter()
            .map(|&lag| lag_column(x, y, period, lag))
            .collect::<Result<Vec<(Vec<f64>, Vec<Warning>)>>>()?;
        columns.extend(done);
        report_clamped(progress, columns.len() as f64 / lags.len() as f64, "lags");
    }

    let mut diagnostics = Diagnostics::new(CONTEXT);
    let mut values = DMatrix::zeros(period, lags.len());
    for (j, (column, warnings)) in columns.into_iter().enumerate() {
        diagnostics.extend(warnings);
        for (t, value) in column.into_iter().enumerate() {
            values[(t, j)] = value;
        }
    }
    tracing::debug!(period, lags = lags.len(), "cyclic time correlation");

    Ok(CycloCorrelation {
        values,
        lags: lags.to_vec(),
        warnings: diagnostics.into_warnings(),
    })
}

/// Synchronous average of the lag product, rotated so index `t` is phase `t`
fn lag_column(x: &[f64], y: &[f64], period: usize, lag: usize) -> Result<(Vec<f64>, Vec<Warning>)> {
    let back = lag / 2;
    let ahead = lag - back;
    let count = x.len() - lag;
    let usable = count - count % period;

    let products: Vec<f64> = (back..back + usable)
        .map(|t| x[t - back] * y[t + ahead])
        .collect();
    let average = SyncAverage::from_samples(&products, period as f64, false)?;

    // The first product sits at time `back`
    let mut column = vec![0.0; period];
    for (i, value) in average.average().iter().enumerate() {
        column[(back + i) % period] = *value;
    }
    Ok((column, average.warnings().to_vec()))
}
