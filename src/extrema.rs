//! Global minima and maxima of quasi-periodic signals
//!
//! Extrema are found at the zero crossings of a smoothed derivative of the
//! normalized signal. Spurious detections (a second extremum a few samples
//! after a real one) can be removed by splitting the spacings between
//! consecutive extrema into a short and a long cluster. Positions can
//! optionally be moved to the start of the next monotone stretch, following
//! F. Zakaria's gait analysis work.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostics, Warning, WarningKind};
use crate::utils::lstsq::derivative_filter;
use crate::utils::{polyfit, polyfit_derivative_at};
use crate::{invalid, Result};

const CONTEXT: &str = "extrema";

/// Normalized level a maximum must exceed
const MAX_LEVEL: f64 = 0.3;
/// Normalized level a minimum must stay below
const MIN_LEVEL: f64 = 0.7;
/// Extrema closer than this after enhancement are merged
const MERGE_DISTANCE: usize = 4;

/// Derivative estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivativeMethod {
    /// Forward difference
    Diff,
    /// One least-squares polynomial per sample over `2 * half_width + 1` samples
    Poly { half_width: usize, order: usize },
    /// Savitzky-Golay derivative filter
    SavitzkyGolay { half_width: usize, order: usize },
}

impl Default for DerivativeMethod {
    fn default() -> Self {
        DerivativeMethod::SavitzkyGolay {
            half_width: 10,
            order: 2,
        }
    }
}

impl DerivativeMethod {
    /// Parse `diff`, `poly` or `savgol`; window parameters default to `(10, 2)`
    pub fn from_name(name: &str, params: Option<(usize, usize)>) -> Result<Self> {
        let (half_width, order) = params.unwrap_or((10, 2));
        match name {
            "diff" => Ok(DerivativeMethod::Diff),
            "poly" => Ok(DerivativeMethod::Poly { half_width, order }),
            "savgol" => Ok(DerivativeMethod::SavitzkyGolay { half_width, order }),
            other => invalid(format!("unknown derivative method '{}'", other)),
        }
    }
}

/// Position refinement applied after detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Enhancement {
    /// Slide right until the next `span` derivative samples no longer
    /// contradict the extremum type
    Zakaria { span: usize },
}

impl Default for Enhancement {
    fn default() -> Self {
        Enhancement::Zakaria { span: 30 }
    }
}

/// Extrema detection options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtremaOptions {
    pub derivative: DerivativeMethod,
    /// Drop extrema closing an abnormally short spacing
    pub remove_false: bool,
    pub enhance_minima: Option<Enhancement>,
    pub enhance_maxima: Option<Enhancement>,
}

impl Default for ExtremaOptions {
    fn default() -> Self {
        Self {
            derivative: DerivativeMethod::default(),
            remove_false: true,
            enhance_minima: None,
            enhance_maxima: None,
        }
    }
}

/// Sample indices of the detected minima and maxima, ascending
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Extrema {
    pub minima: Vec<usize>,
    pub maxima: Vec<usize>,
}

/// Extrema of every row of a matrix
#[derive(Debug, Clone)]
pub struct ExtremaBatch {
    rows: Vec<Extrema>,
    warnings: Vec<Warning>,
}

impl ExtremaBatch {
    pub fn rows(&self) -> &[Extrema] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Extrema> {
        self.rows
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Minimum,
    Maximum,
}

/// Locate the global minima and maxima of `signal`
///
/// # Errors
/// `InvalidArgument` when the signal has fewer than 3 samples, is flat over
/// its central 80 %, or is shorter than the Savitzky-Golay window.
pub fn global_min_max(signal: &[f64], options: &ExtremaOptions) -> Result<Extrema> {
    let n = signal.len();
    if n < 3 {
        return invalid(format!("signal needs at least 3 samples, got {}", n));
    }

    let normalized = normalize(signal)?;
    let derivative = derivative(&normalized, options.derivative)?;

    let mut minima = Vec::new();
    let mut maxima = Vec::new();
    for t in 0..n - 1 {
        if derivative[t] >= 0.0 && derivative[t + 1] < 0.0 && normalized[t] > MAX_LEVEL {
            maxima.push(t + 1);
        }
        if derivative[t] < 0.0 && derivative[t + 1] >= 0.0 && normalized[t] < MIN_LEVEL {
            minima.push(t + 1);
        }
    }
    tracing::debug!(minima = minima.len(), maxima = maxima.len(), "raw extrema");

    if options.remove_false {
        minima = remove_false_detections(minima);
        maxima = remove_false_detections(maxima);
    }
    if let Some(Enhancement::Zakaria { span }) = options.enhance_minima {
        minima = zakaria(&minima, &derivative, span, Kind::Minimum);
    }
    if let Some(Enhancement::Zakaria { span }) = options.enhance_maxima {
        maxima = zakaria(&maxima, &derivative, span, Kind::Maximum);
    }

    Ok(Extrema { minima, maxima })
}

/// Locate extrema in every row of `data` (one signal per row), in parallel
pub fn global_min_max_rows(data: &DMatrix<f64>, options: &ExtremaOptions) -> Result<ExtremaBatch> {
    let mut diagnostics = Diagnostics::new(CONTEXT);
    if data.nrows() > data.ncols() {
        diagnostics.warn(
            WarningKind::Transposed,
            format!(
                "{} signals of {} samples, the data may be transposed",
                data.nrows(),
                data.ncols()
            ),
        );
    }

    let rows = (0..data.nrows())
        .into_par_iter()
        .map(|r| {
            let row: Vec<f64> = data.row(r).iter().copied().collect();
            global_min_max(&row, options)
        })
        .collect::<Result<Vec<Extrema>>>()?;

    Ok(ExtremaBatch {
        rows,
        warnings: diagnostics.into_warnings(),
    })
}

/// Scale to [0, 1] using the range of the central 80 % of the samples
fn normalize(signal: &[f64]) -> Result<Vec<f64>> {
    let n = signal.len();
    let lo = n / 10;
    let hi = ((9 * n) / 10).max(lo + 1);
    let central = &signal[lo..hi];

    let vmin = central.iter().copied().fold(f64::INFINITY, f64::min);
    let vmax = central.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = vmax - vmin;
    if !(range > 0.0) || !range.is_finite() {
        return invalid("signal is flat over its central part, extrema are undefined");
    }
    Ok(signal.iter().map(|x| (x - vmin) / range).collect())
}

fn derivative(data: &[f64], method: DerivativeMethod) -> Result<Vec<f64>> {
    match method {
        DerivativeMethod::Diff => {
            let mut d: Vec<f64> = data.windows(2).map(|w| w[1] - w[0]).collect();
            d.push(0.0);
            Ok(d)
        }
        DerivativeMethod::Poly { half_width, order } => local_polynomial(data, half_width, order),
        DerivativeMethod::SavitzkyGolay { half_width, order } => {
            savitzky_golay(data, half_width, order)
        }
    }
}

/// Derivative at each sample from its own (edge-truncated) window fit
fn local_polynomial(data: &[f64], half_width: usize, order: usize) -> Result<Vec<f64>> {
    let n = data.len();
    (0..n)
        .into_par_iter()
        .map(|i| {
            let lo = i.saturating_sub(half_width);
            let hi = (i + half_width).min(n - 1);
            let xs: Vec<f64> = (lo..=hi).map(|j| j as f64 - i as f64).collect();
            let order = order.min(xs.len() - 1);
            let coefficients = polyfit(&xs, &data[lo..=hi], order)?;
            Ok(coefficients.get(1).copied().unwrap_or(0.0))
        })
        .collect()
}

fn savitzky_golay(data: &[f64], half_width: usize, order: usize) -> Result<Vec<f64>> {
    let n = data.len();
    let window = 2 * half_width + 1;
    if window > n {
        return invalid(format!(
            "Savitzky-Golay window of {} samples exceeds the signal length {}",
            window, n
        ));
    }
    if order >= window {
        return invalid(format!(
            "polynomial order {} must be below the window length {}",
            order, window
        ));
    }

    let taps = derivative_filter(half_width, order)?;
    let mut d = vec![0.0; n];
    for i in half_width..n - half_width {
        d[i] = taps
            .iter()
            .zip(&data[i - half_width..=i + half_width])
            .map(|(t, x)| t * x)
            .sum();
    }

    // Edges: differentiate the polynomial fitted to the first and last windows
    let xs: Vec<f64> = (0..window).map(|x| x as f64).collect();
    let head = polyfit(&xs, &data[..window], order)?;
    for (i, value) in d.iter_mut().enumerate().take(half_width) {
        *value = polyfit_derivative_at(&head, i as f64);
    }
    let offset = n - window;
    let tail = polyfit(&xs, &data[offset..], order)?;
    for (i, value) in d.iter_mut().enumerate().skip(n - half_width) {
        *value = polyfit_derivative_at(&tail, (i - offset) as f64);
    }
    Ok(d)
}

/// Keep the extrema closing a long gap when the gaps form two distinct clusters
fn remove_false_detections(positions: Vec<usize>) -> Vec<usize> {
    if positions.len() < 2 {
        return positions;
    }
    let gaps: Vec<f64> = positions.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    let min_size = (gaps.len() as f64 / 10.0).ceil() as usize;
    let (short, long) = two_clusters(&gaps, 3, min_size);

    if short < 0.5 * long {
        let centre = (short + long) / 2.0;
        gaps.iter()
            .enumerate()
            .filter(|(_, g)| **g >= centre)
            .map(|(i, _)| positions[i + 1])
            .collect()
    } else {
        positions
    }
}

/// Two-centre k-means on scalars, dropping clusters of `min_size` or fewer
/// elements and restarting from the survivors
fn two_clusters(values: &[f64], iterations: usize, min_size: usize) -> (f64, f64) {
    let bounds = |set: &[f64]| {
        (
            set.iter().copied().fold(f64::INFINITY, f64::min),
            set.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        )
    };
    let mean = |set: &[f64]| set.iter().sum::<f64>() / set.len() as f64;

    let mut set = values.to_vec();
    let (mut c1, mut c2) = bounds(&set);
    let mut done = 0;
    while done < iterations {
        let centre = (c1 + c2) / 2.0;
        let low: Vec<f64> = set.iter().copied().filter(|v| *v < centre).collect();
        let high: Vec<f64> = set.iter().copied().filter(|v| *v > centre).collect();

        if low.len() > min_size && high.len() > min_size {
            c1 = mean(&low);
            c2 = mean(&high);
            done += 1;
        } else {
            set = if low.len() <= min_size { high } else { low };
            if set.is_empty() {
                break;
            }
            (c1, c2) = bounds(&set);
        }
    }
    (c1, c2)
}

fn zakaria(positions: &[usize], derivative: &[f64], span: usize, kind: Kind) -> Vec<usize> {
    let n = derivative.len();
    let contradicts = |d: f64| match kind {
        Kind::Minimum => d < 0.0,
        Kind::Maximum => d > 0.0,
    };

    let moved: Vec<usize> = positions
        .iter()
        .map(|&start| {
            let mut pos = start;
            while pos + span < n - 1 && derivative[pos..pos + span].iter().any(|d| contradicts(*d)) {
                pos += 1;
            }
            pos
        })
        .collect();

    moved
        .iter()
        .enumerate()
        .filter(|(i, p)| moved.get(i + 1).map_or(true, |next| next.saturating_sub(**p) > MERGE_DISTANCE))
        .map(|(_, p)| *p)
        .collect()
}
