//! Synchronous averaging
//!
//! The synchronous average of a signal with (cyclic) period `B` is the mean
//! of its consecutive blocks of `B` samples. Components locked to the period
//! survive while everything else averages out. The residual is the signal
//! minus the average repeated over its whole length.
//!
//! Non-integer periods are handled by resampling the signal with cubic
//! interpolation so that one period spans exactly `ceil(B)` samples.

use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::diagnostics::{Diagnostics, Warning, WarningKind};
use crate::interpolation::{grid_len, resample};
use crate::{invalid, Result};

const CONTEXT: &str = "sync_average";

/// Synchronous average of a single signal
#[derive(Debug, Clone)]
pub struct SyncAverage {
    average: Vec<f64>,
    num_blocks: usize,
    residual: Option<Vec<f64>>,
    resampled: bool,
    warnings: Vec<Warning>,
}

/// Synchronous averages of a batch of signals (one per matrix row)
#[derive(Debug, Clone)]
pub struct SyncAverageRows {
    average: DMatrix<f64>,
    num_blocks: usize,
    residual: Option<DMatrix<f64>>,
    resampled: bool,
    warnings: Vec<Warning>,
}

/// Row-wise result shared by the vector and matrix entry points
struct BlockMeans {
    averages: Vec<Vec<f64>>,
    residuals: Option<Vec<Vec<f64>>>,
    num_blocks: usize,
    resampled: bool,
}

impl SyncAverage {
    /// Compute the synchronous average of `samples`
    ///
    /// # Arguments
    /// * `samples` - Signal to average
    /// * `block_size` - Period in samples; need not be an integer
    /// * `want_residual` - Also compute the signal minus the repeated average
    ///
    /// # Errors
    /// `InvalidArgument` if `block_size` is not positive or exceeds the
    /// signal length.
    ///
    /// # Example
    /// ```
    /// use cyclostat_core::SyncAverage;
    ///
    /// let signal: Vec<f64> = (0..12).map(|i| (i % 4) as f64).collect();
    /// let sav = SyncAverage::from_samples(&signal, 4.0, false).unwrap();
    /// assert_eq!(sav.num_blocks(), 3);
    /// assert_eq!(sav.average(), &[0.0, 1.0, 2.0, 3.0]);
    /// ```
    pub fn from_samples(samples: &[f64], block_size: f64, want_residual: bool) -> Result<Self> {
        let mut diagnostics = Diagnostics::new(CONTEXT);
        let mut means = block_means(
            vec![samples.to_vec()],
            block_size,
            want_residual,
            &mut diagnostics,
        )?;

        Ok(Self {
            average: means.averages.swap_remove(0),
            num_blocks: means.num_blocks,
            residual: means.residuals.map(|mut r| r.swap_remove(0)),
            resampled: means.resampled,
            warnings: diagnostics.into_warnings(),
        })
    }

    /// Compute the synchronous average of every row of `data`
    pub fn from_rows(
        data: &DMatrix<f64>,
        block_size: f64,
        want_residual: bool,
    ) -> Result<SyncAverageRows> {
        if data.nrows() == 0 {
            return invalid("data must contain at least one signal");
        }
        let rows: Vec<Vec<f64>> = data
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();

        let mut diagnostics = Diagnostics::new(CONTEXT);
        let means = block_means(rows, block_size, want_residual, &mut diagnostics)?;

        Ok(SyncAverageRows {
            average: rows_to_matrix(&means.averages),
            num_blocks: means.num_blocks,
            residual: means.residuals.as_deref().map(rows_to_matrix),
            resampled: means.resampled,
            warnings: diagnostics.into_warnings(),
        })
    }

    /// The averaged period (`ceil(block_size)` samples)
    pub fn average(&self) -> &[f64] {
        &self.average
    }

    /// Number of blocks that went into the average
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Signal minus the repeated average, if requested
    ///
    /// When the signal was resampled this lives on the resampled grid.
    pub fn residual(&self) -> Option<&[f64]> {
        self.residual.as_deref()
    }

    /// Whether the signal had to be resampled for a non-integer block size
    pub fn is_resampled(&self) -> bool {
        self.resampled
    }

    /// Advisory conditions raised while averaging
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

impl SyncAverageRows {
    /// One averaged period per row
    pub fn average(&self) -> &DMatrix<f64> {
        &self.average
    }

    /// Number of blocks that went into each average
    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Residual per row, if requested
    pub fn residual(&self) -> Option<&DMatrix<f64>> {
        self.residual.as_ref()
    }

    /// Whether the signals had to be resampled
    pub fn is_resampled(&self) -> bool {
        self.resampled
    }

    /// Advisory conditions raised while averaging
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

fn block_means(
    rows: Vec<Vec<f64>>,
    block_size: f64,
    want_residual: bool,
    diagnostics: &mut Diagnostics,
) -> Result<BlockMeans> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);

    if !block_size.is_finite() || block_size <= 0.0 || block_size > ncols as f64 {
        return invalid(format!(
            "block size must be positive and not exceed signal length (block size {}, length {})",
            block_size, ncols
        ));
    }

    if nrows >= ncols {
        diagnostics.warn(
            WarningKind::Transposed,
            format!(
                "{} signals of {} samples: one row must hold one signal, is the data transposed?",
                nrows, ncols
            ),
        );
    }

    if block_size.fract() == 0.0 {
        return Ok(integer_block_means(
            &rows,
            block_size as usize,
            want_residual,
            diagnostics,
        ));
    }

    let (resampled, block) = resample_to_integer_period(&rows, block_size, diagnostics);
    if block > resampled.first().map_or(0, Vec::len) {
        return invalid(format!(
            "signal of {} samples is too short for a block of {}",
            ncols, block_size
        ));
    }

    let mut means = integer_block_means(&resampled, block, want_residual, diagnostics);
    means.resampled = true;
    Ok(means)
}

/// Stretch every row so that a period of `block_size` samples becomes
/// exactly `ceil(block_size)` samples
fn resample_to_integer_period(
    rows: &[Vec<f64>],
    block_size: f64,
    diagnostics: &mut Diagnostics,
) -> (Vec<Vec<f64>>, usize) {
    let block = block_size.ceil();
    let step = block_size / block;
    let ncols = rows.first().map_or(0, Vec::len);
    let new_len = grid_len(ncols, step);

    diagnostics.warn(
        WarningKind::NonIntegerPeriod,
        format!(
            "block size {} is not an integer, resampling {} samples to {} with step {:.6}",
            block_size, ncols, new_len, step
        ),
    );

    let resampled = rows
        .par_iter()
        .map(|row| resample(row, 0.0, step, new_len))
        .collect();

    (resampled, block as usize)
}

fn integer_block_means(
    rows: &[Vec<f64>],
    block: usize,
    want_residual: bool,
    diagnostics: &mut Diagnostics,
) -> BlockMeans {
    let ncols = rows.first().map_or(0, Vec::len);
    let num_blocks = ncols / block;

    let dropped = ncols % block;
    if dropped != 0 {
        diagnostics.warn(
            WarningKind::Truncated,
            format!(
                "{} samples do not hold an integer number of blocks of {}, the last {} are ignored",
                ncols, block, dropped
            ),
        );
    }
    if num_blocks == 1 {
        diagnostics.warn(
            WarningKind::SingleBlock,
            "only one block: the result is a copy of the first period, not an average",
        );
    }
    tracing::debug!(num_blocks, block, "synchronous average");

    let averages: Vec<Vec<f64>> = rows
        .par_iter()
        .map(|row| {
            let mut average = vec![0.0; block];
            for chunk in row.chunks_exact(block).take(num_blocks) {
                for (acc, &x) in average.iter_mut().zip(chunk) {
                    *acc += x;
                }
            }
            let scale = 1.0 / num_blocks as f64;
            average.iter_mut().for_each(|a| *a *= scale);
            average
        })
        .collect();

    let residuals = want_residual.then(|| {
        rows.par_iter()
            .zip(averages.par_iter())
            .map(|(row, average)| {
                row.iter()
                    .enumerate()
                    .map(|(i, &x)| x - average[i % block])
                    .collect::<Vec<f64>>()
            })
            .collect()
    });

    BlockMeans {
        averages,
        residuals,
        num_blocks,
        resampled: false,
    }
}

fn rows_to_matrix(rows: &[Vec<f64>]) -> DMatrix<f64> {
    let ncols = rows.first().map_or(0, Vec::len);
    DMatrix::from_fn(rows.len(), ncols, |r, c| rows[r][c])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn periodic(period: usize, cycles: usize) -> Vec<f64> {
        (0..period * cycles)
            .map(|i| {
                let x = 2.0 * PI * (i % period) as f64 / period as f64;
                x.sin() + 0.3 * (2.0 * x).cos()
            })
            .collect()
    }

    fn kinds(warnings: &[Warning]) -> Vec<WarningKind> {
        warnings.iter().map(|w| w.kind).collect()
    }

    #[test]
    fn test_periodic_signal_returns_one_period() {
        let signal = periodic(16, 5);
        let sav = SyncAverage::from_samples(&signal, 16.0, false).unwrap();

        assert_eq!(sav.num_blocks(), 5);
        assert!(sav.warnings().is_empty());
        for (a, s) in sav.average().iter().zip(&signal[..16]) {
            assert_relative_eq!(*a, *s, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_truncation_and_residual() {
        let signal: Vec<f64> = (0..11).map(|i| i as f64).collect();
        let sav = SyncAverage::from_samples(&signal, 4.0, true).unwrap();

        assert_eq!(sav.num_blocks(), 2);
        assert_eq!(kinds(sav.warnings()), vec![WarningKind::Truncated]);
        assert_eq!(sav.average(), &[2.0, 3.0, 4.0, 5.0]);

        let residual = sav.residual().unwrap();
        assert_eq!(residual.len(), 11);
        for (i, r) in residual.iter().enumerate() {
            assert_relative_eq!(*r, signal[i] - sav.average()[i % 4], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_single_block_warns() {
        let signal = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sav = SyncAverage::from_samples(&signal, 5.0, false).unwrap();

        assert_eq!(sav.num_blocks(), 1);
        assert_eq!(kinds(sav.warnings()), vec![WarningKind::SingleBlock]);
        assert_eq!(sav.average(), signal.as_slice());
    }

    #[test]
    fn test_non_integer_block_resamples() {
        let signal: Vec<f64> = (0..210).map(|i| (2.0 * PI * i as f64 / 10.5).sin()).collect();
        let sav = SyncAverage::from_samples(&signal, 10.5, false).unwrap();

        assert!(sav.is_resampled());
        assert_eq!(sav.average().len(), 11);
        assert!(kinds(sav.warnings()).contains(&WarningKind::NonIntegerPeriod));

        // One period of the sine sampled on 11 points
        for (k, a) in sav.average().iter().enumerate() {
            let expected = (2.0 * PI * k as f64 / 11.0).sin();
            assert_relative_eq!(*a, expected, epsilon = 0.05);
        }
    }

    #[test]
    fn test_invalid_block_sizes() {
        let signal = vec![0.0; 8];
        assert!(SyncAverage::from_samples(&signal, 0.0, false).is_err());
        assert!(SyncAverage::from_samples(&signal, -2.0, false).is_err());
        assert!(SyncAverage::from_samples(&signal, 9.0, false).is_err());
        assert!(SyncAverage::from_samples(&signal, f64::NAN, false).is_err());
    }

    #[test]
    fn test_rows_average_independently() {
        let a = periodic(8, 4);
        let b: Vec<f64> = a.iter().map(|x| 2.0 * x + 1.0).collect();
        let data = DMatrix::from_fn(2, a.len(), |r, c| if r == 0 { a[c] } else { b[c] });

        let sav = SyncAverage::from_rows(&data, 8.0, true).unwrap();
        assert_eq!(sav.average().shape(), (2, 8));
        assert_eq!(sav.num_blocks(), 4);
        for c in 0..8 {
            assert_relative_eq!(sav.average()[(0, c)], a[c], epsilon = 1e-12);
            assert_relative_eq!(sav.average()[(1, c)], b[c], epsilon = 1e-12);
        }

        let residual = sav.residual().unwrap();
        assert_eq!(residual.shape(), (2, 32));
        assert!(residual.iter().all(|r| r.abs() < 1e-12));
    }

    #[test]
    fn test_transposed_data_warns() {
        let data = DMatrix::<f64>::zeros(6, 4);
        let sav = SyncAverage::from_rows(&data, 2.0, false).unwrap();
        assert!(kinds(sav.warnings()).contains(&WarningKind::Transposed));
    }

    #[test]
    fn test_single_sample_counts_as_transposed() {
        let sav = SyncAverage::from_samples(&[2.5], 1.0, false).unwrap();
        assert_eq!(sav.average(), &[2.5]);
        assert!(kinds(sav.warnings()).contains(&WarningKind::Transposed));

        let wide = SyncAverage::from_samples(&[1.0, 2.0], 1.0, false).unwrap();
        assert!(!kinds(wide.warnings()).contains(&WarningKind::Transposed));
    }
}
