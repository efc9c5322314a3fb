//! Python bindings for cyclostat-core
//!
//! This module provides Python bindings using PyO3 for the cyclostat-core
//! cyclostationary analysis library. Arrays cross the boundary as numpy
//! float64 arrays; batch functions take one signal per row.

use numpy::{IntoPyArray, PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use ::cyclostat_core::{
    cyclo_time_correlation_with_progress, CepstrumParams, CorrelationScale, DMatrix,
    DerivativeMethod, Enhancement, ExtremaOptions, NoProgress, PeakMethod, Progress, Reference,
    RowShift, Signal as RustSignal,
    SyncAverage as RustSyncAverage, SyncMethod, SyncOptions,
    Synchronization as RustSynchronization, Synchronizer, Warning,
};

fn to_py_err(e: ::cyclostat_core::CycloError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn warning_strings(warnings: &[Warning]) -> Vec<String> {
    warnings.iter().map(|w| w.to_string()).collect()
}

fn matrix_to_py<'py>(py: Python<'py>, m: &DMatrix<f64>) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let nested: Vec<Vec<f64>> = m
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect();
    if nested.is_empty() {
        return Ok(PyArray2::zeros_bound(py, [0, m.ncols()], false));
    }
    PyArray2::from_vec2_bound(py, &nested).map_err(|e| PyValueError::new_err(e.to_string()))
}

fn matrix_from_py(data: &PyReadonlyArray2<f64>) -> DMatrix<f64> {
    let view = data.as_array();
    let (nrows, ncols) = view.dim();
    DMatrix::from_fn(nrows, ncols, |r, c| view[[r, c]])
}

fn vector_from_py(data: &PyReadonlyArray1<f64>) -> Vec<f64> {
    data.as_array().iter().copied().collect()
}

/// Forwards progress to a Python callable `callback(fraction, phase)`
///
/// The first exception raised by the callback silences it for the rest of
/// the run and is re-raised once the analysis returns.
struct PyProgress<'py> {
    callback: Bound<'py, PyAny>,
    error: Option<PyErr>,
}

impl<'py> PyProgress<'py> {
    fn new(callback: Bound<'py, PyAny>) -> Self {
        Self {
            callback,
            error: None,
        }
    }

    fn finish<T>(self, result: PyResult<T>) -> PyResult<T> {
        match self.error {
            Some(err) => Err(err),
            None => result,
        }
    }
}

impl Progress for PyProgress<'_> {
    fn report(&mut self, fraction: f64, phase: &str) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = self.callback.call1((fraction, phase)) {
            tracing::warn!(phase, error = %err, "progress callback raised, ignoring further updates");
            self.error = Some(err);
        }
    }
}

/// Python wrapper for Signal
#[pyclass(name = "Signal")]
pub struct PySignal {
    inner: RustSignal,
}

#[pymethods]
impl PySignal {
    /// Create a Signal from raw samples
    ///
    /// Parameters
    /// ----------
    /// samples : numpy.ndarray
    ///     Samples as a 1D float64 array
    /// sample_rate : float
    ///     Sample rate in Hz
    #[new]
    fn new(samples: PyReadonlyArray1<f64>, sample_rate: f64) -> Self {
        PySignal {
            inner: RustSignal::from_samples_owned(vector_from_py(&samples), sample_rate),
        }
    }

    /// Load a Signal from an audio file, mixing channels to mono
    ///
    /// Supports WAV, MP3, FLAC, and OGG formats.
    #[staticmethod]
    fn from_file(path: &str) -> PyResult<Self> {
        RustSignal::from_file(path)
            .map(|s| PySignal { inner: s })
            .map_err(to_py_err)
    }

    /// Load one Signal per channel of an audio file
    #[staticmethod]
    fn from_file_channels(path: &str) -> PyResult<Vec<Self>> {
        RustSignal::from_file_channels(path)
            .map(|channels| channels.into_iter().map(|s| PySignal { inner: s }).collect())
            .map_err(to_py_err)
    }

    #[getter]
    fn sample_rate(&self) -> f64 {
        self.inner.sample_rate()
    }

    #[getter]
    fn duration(&self) -> f64 {
        self.inner.duration()
    }

    #[getter]
    fn num_samples(&self) -> usize {
        self.inner.num_samples()
    }

    /// Get the samples as a numpy array
    fn samples<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.samples().to_vec().into_pyarray_bound(py)
    }

    /// Copy with NaN and infinite samples replaced by the minimum finite value
    fn cleaned(&self) -> Self {
        PySignal {
            inner: self.inner.cleaned(),
        }
    }

    /// Synchronous average
    ///
    /// Parameters
    /// ----------
    /// block_size : float
    ///     Cyclic period in samples; non-integer values resample the signal
    /// want_residual : bool
    ///     Also compute the signal minus the repeated average
    #[pyo3(signature = (block_size, want_residual=false))]
    fn sync_average(&self, block_size: f64, want_residual: bool) -> PyResult<PySyncAverage> {
        self.inner
            .sync_average(block_size, want_residual)
            .map(|inner| PySyncAverage { inner })
            .map_err(to_py_err)
    }

    /// Circularly shifted copy (fractional shifts use the FFT)
    fn circ_shift(&self, shift: f64) -> Self {
        PySignal {
            inner: self.inner.circ_shift(shift),
        }
    }
}

/// Python wrapper for SyncAverage
#[pyclass(name = "SyncAverage")]
pub struct PySyncAverage {
    inner: RustSyncAverage,
}

#[pymethods]
impl PySyncAverage {
    /// Averaged period as a numpy array
    fn average<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.average().to_vec().into_pyarray_bound(py)
    }

    /// Residual as a numpy array, or None if it was not requested
    fn residual<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyArray1<f64>>> {
        self.inner.residual().map(|r| r.to_vec().into_pyarray_bound(py))
    }

    #[getter]
    fn num_blocks(&self) -> usize {
        self.inner.num_blocks()
    }

    #[getter]
    fn resampled(&self) -> bool {
        self.inner.is_resampled()
    }

    #[getter]
    fn warnings(&self) -> Vec<String> {
        warning_strings(self.inner.warnings())
    }
}

/// Python wrapper for Synchronization
#[pyclass(name = "Synchronization")]
pub struct PySynchronization {
    inner: RustSynchronization,
}

#[pymethods]
impl PySynchronization {
    /// Aligned cycles as a 2D array [cycle, sample], or None
    fn ensemble<'py>(&self, py: Python<'py>) -> PyResult<Option<Bound<'py, PyArray2<f64>>>> {
        self.inner
            .ensemble()
            .map(|m| matrix_to_py(py, m))
            .transpose()
    }

    /// Estimated offset of every cycle
    fn deltas<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.deltas().to_vec().into_pyarray_bound(py)
    }

    /// Offsets relative to the first cycle
    fn relative_deltas<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.relative_deltas().into_pyarray_bound(py)
    }

    /// Estimated start sample of every cycle
    fn cycle_starts<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<f64>> {
        self.inner.cycle_starts().into_pyarray_bound(py)
    }

    #[getter]
    fn period(&self) -> usize {
        self.inner.period()
    }

    #[getter]
    fn warnings(&self) -> Vec<String> {
        warning_strings(self.inner.warnings())
    }
}

/// Synchronous average of a 1D signal
///
/// Returns
/// -------
/// (average, num_blocks, residual or None)
#[pyfunction]
#[pyo3(signature = (samples, block_size, want_residual=false))]
fn sync_av<'py>(
    py: Python<'py>,
    samples: PyReadonlyArray1<f64>,
    block_size: f64,
    want_residual: bool,
) -> PyResult<(Bound<'py, PyArray1<f64>>, usize, Option<Bound<'py, PyArray1<f64>>>)> {
    let sav = RustSyncAverage::from_samples(&vector_from_py(&samples), block_size, want_residual)
        .map_err(to_py_err)?;
    Ok((
        sav.average().to_vec().into_pyarray_bound(py),
        sav.num_blocks(),
        sav.residual().map(|r| r.to_vec().into_pyarray_bound(py)),
    ))
}

/// Synchronous average of every row of a 2D array
#[pyfunction]
#[pyo3(signature = (data, block_size, want_residual=false))]
fn sync_av_rows<'py>(
    py: Python<'py>,
    data: PyReadonlyArray2<f64>,
    block_size: f64,
    want_residual: bool,
) -> PyResult<(Bound<'py, PyArray2<f64>>, usize, Option<Bound<'py, PyArray2<f64>>>)> {
    let sav = RustSyncAverage::from_rows(&matrix_from_py(&data), block_size, want_residual)
        .map_err(to_py_err)?;
    let residual = sav.residual().map(|r| matrix_to_py(py, r)).transpose()?;
    Ok((matrix_to_py(py, sav.average())?, sav.num_blocks(), residual))
}

/// Align the cycles of a signal
///
/// Parameters
/// ----------
/// samples : numpy.ndarray
///     Signal to synchronize
/// period : int or numpy.ndarray
///     Nominal period in samples, or an explicit reference cycle
/// method : str
///     maxCorr, baryCorr, maxCorrInterp, threshold, risingThreshold,
///     maxAmplitude or cepstrum
/// params : list of float, optional
///     [threshold] or [threshold, min_slope] for the threshold methods
/// scale : str
///     Correlation scaling: none, biased, unbiased or circular
/// progress : callable, optional
///     Called as progress(fraction, phase)
#[pyfunction]
#[pyo3(signature = (
    samples,
    period,
    method="maxCorrInterp",
    params=None,
    scale="none",
    want_ensemble=true,
    compensate_drift=false,
    interp_factor=10,
    progress=None
))]
#[allow(clippy::too_many_arguments)]
fn synchronize<'py>(
    py: Python<'py>,
    samples: PyReadonlyArray1<f64>,
    period: &Bound<'py, PyAny>,
    method: &str,
    params: Option<Vec<f64>>,
    scale: &str,
    want_ensemble: bool,
    compensate_drift: bool,
    interp_factor: usize,
    progress: Option<Bound<'py, PyAny>>,
) -> PyResult<PySynchronization> {
    let reference = match period.extract::<usize>() {
        Ok(p) => Reference::Period(p),
        Err(_) => {
            let waveform: PyReadonlyArray1<f64> = period.extract()?;
            Reference::Waveform(vector_from_py(&waveform))
        }
    };
    let options = SyncOptions {
        method: SyncMethod::from_name(method, params.as_deref()).map_err(to_py_err)?,
        scale: CorrelationScale::from_name(scale).map_err(to_py_err)?,
        want_ensemble,
        compensate_drift,
        interp_factor,
        cepstrum: CepstrumParams::default(),
    };
    let signal = vector_from_py(&samples);
    let synchronizer = Synchronizer::new(options);

    let inner = match progress {
        Some(callback) => {
            let mut sink = PyProgress::new(callback);
            let result = synchronizer.run(&signal, &reference, &mut sink).map_err(to_py_err);
            sink.finish(result)
        }
        None => py
            .allow_threads(|| synchronizer.run(&signal, &reference, &mut NoProgress))
            .map_err(to_py_err),
    }?;
    Ok(PySynchronization { inner })
}

/// Circularly shift a 1D signal by a possibly fractional number of samples
#[pyfunction]
#[pyo3(signature = (samples, shift, force_fourier=false))]
fn circ_shift<'py>(
    py: Python<'py>,
    samples: PyReadonlyArray1<f64>,
    shift: f64,
    force_fourier: bool,
) -> Bound<'py, PyArray1<f64>> {
    ::cyclostat_core::circ_shift_with(&vector_from_py(&samples), shift, force_fourier)
        .into_pyarray_bound(py)
}

/// Circularly shift every row of a 2D array (one shift, or one per row)
#[pyfunction]
#[pyo3(signature = (data, shift, force_fourier=false))]
fn circ_shift_rows<'py>(
    py: Python<'py>,
    data: PyReadonlyArray2<f64>,
    shift: &Bound<'py, PyAny>,
    force_fourier: bool,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let shift = match shift.extract::<f64>() {
        Ok(s) => RowShift::Uniform(s),
        Err(_) => RowShift::PerRow(shift.extract::<Vec<f64>>()?),
    };
    let shifted = ::cyclostat_core::circ_shift_rows(&matrix_from_py(&data), &shift, force_fourier)
        .map_err(to_py_err)?;
    matrix_to_py(py, &shifted)
}

/// Detect peaks; returns (positions, amplitudes)
#[pyfunction]
#[pyo3(signature = (samples, method="kStdThreshold", k=None, k2=None, max_peaks=None))]
fn detect_peaks<'py>(
    py: Python<'py>,
    samples: PyReadonlyArray1<f64>,
    method: &str,
    k: Option<f64>,
    k2: Option<f64>,
    max_peaks: Option<usize>,
) -> PyResult<(Bound<'py, PyArray1<f64>>, Bound<'py, PyArray1<f64>>)> {
    let method = PeakMethod::from_name(method, k, k2).map_err(to_py_err)?;
    let peaks = ::cyclostat_core::detect_peaks(&vector_from_py(&samples), method, max_peaks)
        .map_err(to_py_err)?;
    Ok((
        peaks.positions.into_pyarray_bound(py),
        peaks.amplitudes.into_pyarray_bound(py),
    ))
}

/// Global minima and maxima; returns (minima, maxima) index lists
///
/// Parameters
/// ----------
/// method : str
///     Derivative estimator: diff, poly or savgol
/// half_width, order : int, optional
///     Regression window half width and polynomial order (10 and 2)
/// remove_false : bool
///     Drop extrema closing an abnormally short spacing
/// zakaria_minima, zakaria_maxima : int, optional
///     Span of the Zakaria position enhancement (30 is typical)
#[pyfunction]
#[pyo3(signature = (
    samples,
    method="savgol",
    half_width=None,
    order=None,
    remove_false=true,
    zakaria_minima=None,
    zakaria_maxima=None
))]
fn global_min_max(
    samples: PyReadonlyArray1<f64>,
    method: &str,
    half_width: Option<usize>,
    order: Option<usize>,
    remove_false: bool,
    zakaria_minima: Option<usize>,
    zakaria_maxima: Option<usize>,
) -> PyResult<(Vec<usize>, Vec<usize>)> {
    let params = Some((half_width.unwrap_or(10), order.unwrap_or(2)));
    let options = ExtremaOptions {
        derivative: DerivativeMethod::from_name(method, params).map_err(to_py_err)?,
        remove_false,
        enhance_minima: zakaria_minima.map(|span| Enhancement::Zakaria { span }),
        enhance_maxima: zakaria_maxima.map(|span| Enhancement::Zakaria { span }),
    };
    let extrema = ::cyclostat_core::global_min_max(&vector_from_py(&samples), &options)
        .map_err(to_py_err)?;
    Ok((extrema.minima, extrema.maxima))
}

/// Cyclic time correlation R_xy(t, tau) as a [period, len(lags)] array
///
/// Parameters
/// ----------
/// progress : callable, optional
///     Called as progress(fraction, "lags") as lags complete
#[pyfunction]
#[pyo3(signature = (x, y, period, lags, progress=None))]
fn cyclo_time_correlation<'py>(
    py: Python<'py>,
    x: PyReadonlyArray1<f64>,
    y: PyReadonlyArray1<f64>,
    period: usize,
    lags: Vec<usize>,
    progress: Option<Bound<'py, PyAny>>,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    let (x, y) = (vector_from_py(&x), vector_from_py(&y));
    let r = match progress {
        Some(callback) => {
            let mut sink = PyProgress::new(callback);
            let result = cyclo_time_correlation_with_progress(&x, &y, period, &lags, &mut sink)
                .map_err(to_py_err);
            sink.finish(result)
        }
        None => py
            .allow_threads(|| {
                cyclo_time_correlation_with_progress(&x, &y, period, &lags, &mut NoProgress)
            })
            .map_err(to_py_err),
    }?;
    matrix_to_py(py, r.values())
}

/// cyclostat - synchronous averaging and cycle synchronization in Python
///
/// Main classes:
/// - Signal: samples with sample rate, loadable from audio files
/// - SyncAverage: synchronous average and residual
/// - Synchronization: per-cycle offsets and aligned ensemble
///
/// Functions: sync_av, sync_av_rows, synchronize, circ_shift,
/// circ_shift_rows, detect_peaks, global_min_max, cyclo_time_correlation
#[pymodule]
fn cyclostat(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PySignal>()?;
    m.add_class::<PySyncAverage>()?;
    m.add_class::<PySynchronization>()?;
    m.add_function(wrap_pyfunction!(sync_av, m)?)?;
    m.add_function(wrap_pyfunction!(sync_av_rows, m)?)?;
    m.add_function(wrap_pyfunction!(synchronize, m)?)?;
    m.add_function(wrap_pyfunction!(circ_shift, m)?)?;
    m.add_function(wrap_pyfunction!(circ_shift_rows, m)?)?;
    m.add_function(wrap_pyfunction!(detect_peaks, m)?)?;
    m.add_function(wrap_pyfunction!(global_min_max, m)?)?;
    m.add_function(wrap_pyfunction!(cyclo_time_correlation, m)?)?;
    Ok(())
}
