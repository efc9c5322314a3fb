//! Cycle synchronization
//!
//! A nominal period (or a reference cycle) is slid over the signal one
//! period at a time. For every window the timing offset of the cycle against
//! the reference is estimated, either from the cross-correlation, from an
//! amplitude trigger, or from the cepstrum. The offsets can then be used to
//! cut the signal into an ensemble of aligned cycles, shifting each cycle by
//! the fractional part of its offset.
//!
//! Offsets (`deltas`) follow one sign convention for every method: the
//! `i`-th cycle starts at `i * period - (delta[i] - delta[0])`, so a cycle
//! arriving `d` samples late gets a relative delta of `-d`.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::circshift::shift_real;
use crate::diagnostics::{report_clamped, Diagnostics, NoProgress, Progress, Warning, WarningKind};
use crate::interpolation::cubic_interpolate;
use crate::peaks::{detect_peaks, PeakMethod};
use crate::utils::Fft;
use crate::{invalid, Result};

const CONTEXT: &str = "synchronize";

/// What the cycles are aligned against
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// Nominal period in samples; the first period of the signal is the reference
    Period(usize),
    /// Explicit reference cycle; its length is the period
    Waveform(Vec<f64>),
}

/// Offset estimation method
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum SyncMethod {
    /// Lag of the cross-correlation maximum
    MaxCorr,
    /// Amplitude-weighted centroid of the cross-correlation
    BaryCorr,
    /// Cross-correlation maximum after cubic upsampling
    #[default]
    MaxCorrInterp,
    /// First sample reaching `level`
    Threshold { level: f64 },
    /// First sample at or above `level` on an edge rising faster than `min_slope`
    RisingThreshold { level: f64, min_slope: f64 },
    /// Position of the largest sample
    MaxAmplitude,
    /// Echo quefrency closest to the period in the real cepstrum
    Cepstrum,
}

impl SyncMethod {
    /// Build a method from its name and optional parameters
    ///
    /// Accepted names: `maxCorr` (`maxCxy`), `baryCorr` (`baryCxy`),
    /// `maxCorrInterp` (`maxCxyint`), `threshold`, `risingThreshold`
    /// (`rthreshold`), `maxAmplitude` (`max`), `cepstrum` (`ceps`).
    /// `threshold` needs `[level]`, `risingThreshold` needs
    /// `[level, min_slope]`.
    pub fn from_name(name: &str, params: Option<&[f64]>) -> Result<Self> {
        match name {
            "maxCorr" | "maxCxy" => Ok(SyncMethod::MaxCorr),
            "baryCorr" | "baryCxy" => Ok(SyncMethod::BaryCorr),
            "maxCorrInterp" | "maxCxyint" => Ok(SyncMethod::MaxCorrInterp),
            "maxAmplitude" | "max" => Ok(SyncMethod::MaxAmplitude),
            "cepstrum" | "ceps" => Ok(SyncMethod::Cepstrum),
            "threshold" => match params {
                Some([level, ..]) => Ok(SyncMethod::Threshold { level: *level }),
                _ => invalid("the threshold method needs a threshold parameter"),
            },
            "risingThreshold" | "rthreshold" => match params {
                Some([level, min_slope, ..]) => Ok(SyncMethod::RisingThreshold {
                    level: *level,
                    min_slope: *min_slope,
                }),
                _ => invalid("the rising threshold method needs a threshold and a minimum slope"),
            },
            other => invalid(format!("unknown synchronization method '{}'", other)),
        }
    }

    fn uses_correlation(self) -> bool {
        matches!(
            self,
            SyncMethod::MaxCorr | SyncMethod::BaryCorr | SyncMethod::MaxCorrInterp
        )
    }
}

/// Normalization of the cross-correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrelationScale {
    /// Raw sums
    #[default]
    None,
    /// Divided by the period
    Biased,
    /// Divided by the number of overlapping samples at each lag
    Unbiased,
    /// Reference against the window repeated twice (`period` wrap-around lags)
    Circular,
}

impl CorrelationScale {
    /// Parse `none`, `biased`, `unbiased` or `circ`/`circular`
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "none" => Ok(CorrelationScale::None),
            "biased" => Ok(CorrelationScale::Biased),
            "unbiased" => Ok(CorrelationScale::Unbiased),
            "circ" | "circular" => Ok(CorrelationScale::Circular),
            other => invalid(format!("unknown correlation scaling '{}'", other)),
        }
    }
}

/// Tuning of the cepstrum method
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CepstrumParams {
    /// Quefrencies up to `zero_fraction * period` are cleared before peak picking
    pub zero_fraction: f64,
    /// Minimum spacing between cepstral peaks (samples)
    pub min_peak_distance: f64,
    /// Number of strongest cepstral peaks considered
    pub max_peaks: usize,
    /// Sub-sample refinement factor of the peak positions
    pub interp_factor: usize,
}

impl Default for CepstrumParams {
    fn default() -> Self {
        Self {
            zero_fraction: 0.5,
            min_peak_distance: 10.0,
            max_peaks: 10,
            interp_factor: 10,
        }
    }
}

/// Options of a synchronization run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    pub method: SyncMethod,
    pub scale: CorrelationScale,
    /// Build the ensemble of aligned cycles
    pub want_ensemble: bool,
    /// Move each analysis window by the drift measured so far
    pub compensate_drift: bool,
    /// Upsampling factor of `MaxCorrInterp`
    pub interp_factor: usize,
    pub cepstrum: CepstrumParams,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            method: SyncMethod::default(),
            scale: CorrelationScale::default(),
            want_ensemble: true,
            compensate_drift: false,
            interp_factor: 10,
            cepstrum: CepstrumParams::default(),
        }
    }
}

impl SyncOptions {
    pub fn with_method(mut self, method: SyncMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_scale(mut self, scale: CorrelationScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_ensemble(mut self, want_ensemble: bool) -> Self {
        self.want_ensemble = want_ensemble;
        self
    }

    pub fn with_drift_compensation(mut self, compensate_drift: bool) -> Self {
        self.compensate_drift = compensate_drift;
        self
    }
}

/// Result of a synchronization run
#[derive(Debug, Clone)]
pub struct Synchronization {
    ensemble: Option<DMatrix<f64>>,
    deltas: Vec<f64>,
    period: usize,
    warnings: Vec<Warning>,
}

impl Synchronization {
    /// Aligned cycles, one per row (`deltas.len() x period`)
    pub fn ensemble(&self) -> Option<&DMatrix<f64>> {
        self.ensemble.as_ref()
    }

    /// Estimated offset of every cycle (samples, possibly fractional)
    pub fn deltas(&self) -> &[f64] {
        &self.deltas
    }

    /// Offsets relative to the first cycle
    pub fn relative_deltas(&self) -> Vec<f64> {
        let first = self.deltas.first().copied().unwrap_or(0.0);
        self.deltas.iter().map(|d| d - first).collect()
    }

    /// Estimated start sample of every cycle
    pub fn cycle_starts(&self) -> Vec<f64> {
        self.relative_deltas()
            .iter()
            .enumerate()
            .map(|(i, d)| (i * self.period) as f64 - d)
            .collect()
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn num_cycles(&self) -> usize {
        self.deltas.len()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }
}

/// Cycle synchronizer
#[derive(Debug, Clone, Default)]
pub struct Synchronizer {
    options: SyncOptions,
}

impl Synchronizer {
    pub fn new(options: SyncOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Estimate per-cycle offsets of `signal` and optionally align its cycles
    ///
    /// # Errors
    /// `InvalidArgument` for an empty signal, a zero or too long period, an
    /// empty or too long reference waveform, non-finite threshold parameters
    /// or a zero interpolation factor.
    pub fn run(
        &self,
        signal: &[f64],
        reference: &Reference,
        progress: &mut dyn Progress,
    ) -> Result<Synchronization> {
        self.validate()?;
        let reference = reference_cycle(signal, reference)?;
        let period = reference.len();

        let mut diagnostics = Diagnostics::new(CONTEXT);
        let mut fft = Fft::new();

        let deltas = self.estimate_deltas(signal, &reference, &mut fft, &mut diagnostics, progress)?;
        tracing::debug!(
            cycles = deltas.len(),
            period,
            method = ?self.options.method,
            "estimated cycle offsets"
        );

        let ensemble = if self.options.want_ensemble {
            Some(build_ensemble(signal, period, &deltas, &mut fft, &mut diagnostics, progress))
        } else {
            None
        };

        Ok(Synchronization {
            ensemble,
            deltas,
            period,
            warnings: diagnostics.into_warnings(),
        })
    }

    fn validate(&self) -> Result<()> {
        match self.options.method {
            SyncMethod::Threshold { level } if !level.is_finite() => {
                invalid("threshold must be finite")
            }
            SyncMethod::RisingThreshold { level, min_slope }
                if !level.is_finite() || !min_slope.is_finite() =>
            {
                invalid("threshold and minimum slope must be finite")
            }
            SyncMethod::MaxCorrInterp if self.options.interp_factor == 0 => {
                invalid("interpolation factor must be at least 1")
            }
            SyncMethod::Cepstrum if self.options.cepstrum.interp_factor == 0 => {
                invalid("cepstrum interpolation factor must be at least 1")
            }
            _ => Ok(()),
        }
    }

    fn estimate_deltas(
        &self,
        signal: &[f64],
        reference: &[f64],
        fft: &mut Fft,
        diagnostics: &mut Diagnostics,
        progress: &mut dyn Progress,
    ) -> Result<Vec<f64>> {
        let period = reference.len();
        let len = signal.len();
        let norm = correlation_norm(self.options.scale, period);

        let mut deltas = Vec::with_capacity(len / period);
        let mut base = 0usize;
        let mut offset = 0.0;

        report_clamped(progress, 0.0, "estimate");
        while base + period <= len {
            let correction = if self.options.method.uses_correlation() {
                let correlation = self.correlate(fft, reference, &signal[base..base + period], &norm);
                Some(self.correlation_lag(&correlation, period))
            } else {
                self.amplitude_lag(signal, base, reference, fft, diagnostics)?
            };

            // A trigger that never fired records zero, not the running drift
            let delta = correction.map_or(0.0, |c| c + offset);
            deltas.push(delta);

            if self.options.compensate_drift {
                let drift = delta - offset;
                if drift.abs() > 1.0 {
                    let step = drift.trunc();
                    let moved = base as f64 - step;
                    if moved >= 0.0 {
                        base = moved as usize;
                        offset += step;
                    }
                }
            }

            base += period;
            report_clamped(progress, base as f64 / len as f64, "estimate");
        }

        Ok(deltas)
    }

    fn correlate(&self, fft: &mut Fft, reference: &[f64], window: &[f64], norm: &[f64]) -> Vec<f64> {
        match self.options.scale {
            CorrelationScale::Circular => {
                // Lag -period repeats lag 0, keep lags -period+1..=0
                let tiled: Vec<f64> = window.iter().chain(window.iter()).copied().collect();
                let mut valid = fft.cross_correlation_valid(reference, &tiled);
                valid.remove(0);
                valid
            }
            _ => fft
                .cross_correlation_full(reference, window)
                .iter()
                .zip(norm)
                .map(|(c, n)| c / n)
                .collect(),
        }
    }

    /// Offset from a correlation sequence whose index `period - 1` is lag 0
    fn correlation_lag(&self, correlation: &[f64], period: usize) -> f64 {
        let p = period as f64;
        match self.options.method {
            SyncMethod::BaryCorr => {
                let (weighted, total) = correlation
                    .iter()
                    .enumerate()
                    .fold((0.0, 0.0), |(weighted, total), (k, c)| {
                        (weighted + c.abs() * (k + 1) as f64, total + c.abs())
                    });
                if total > 0.0 {
                    (weighted / total).round() - p
                } else {
                    0.0
                }
            }
            SyncMethod::MaxCorrInterp => {
                let factor = self.options.interp_factor;
                let count = (correlation.len().saturating_sub(1) * factor).max(1);
                let upsampled: Vec<f64> = (0..count)
                    .map(|i| cubic_interpolate(correlation, i as f64 / factor as f64))
                    .collect();
                argmax(&upsampled) as f64 / factor as f64 - p
            }
            _ => argmax(correlation) as f64 - p,
        }
    }

    /// Offset from the samples themselves; `None` when a trigger never fires
    fn amplitude_lag(
        &self,
        signal: &[f64],
        base: usize,
        reference: &[f64],
        fft: &mut Fft,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<f64>> {
        let period = reference.len();
        let window = &signal[base..base + period];

        let lag = match self.options.method {
            SyncMethod::Threshold { level } => window
                .iter()
                .position(|&x| x >= level)
                .map(|i| -(i as f64)),
            SyncMethod::RisingThreshold { level, min_slope } => (0..period)
                .take_while(|i| base + i + 2 < signal.len())
                .find(|&i| {
                    let t = base + i;
                    signal[t + 2] - signal[t] > min_slope / 2.0 && signal[t + 1] >= level
                })
                .map(|i| -(i as f64)),
            SyncMethod::MaxAmplitude => Some(-(argmax(window) as f64)),
            SyncMethod::Cepstrum => Some(self.cepstrum_lag(reference, window, fft, diagnostics)?),
            SyncMethod::MaxCorr | SyncMethod::BaryCorr | SyncMethod::MaxCorrInterp => None,
        };
        Ok(lag)
    }

    fn cepstrum_lag(
        &self,
        reference: &[f64],
        window: &[f64],
        fft: &mut Fft,
        diagnostics: &mut Diagnostics,
    ) -> Result<f64> {
        let params = &self.options.cepstrum;
        let period = reference.len();

        let mut extended = Vec::with_capacity(4 * period);
        extended.extend_from_slice(reference);
        extended.extend_from_slice(window);
        extended.resize(4 * period, 0.0);

        let squared: Vec<f64> = fft
            .autocorrelation_full(&extended)
            .iter()
            .map(|r| r * r)
            .collect();
        let mut cepstrum = fft.real_cepstrum(&squared);
        cepstrum.truncate(cepstrum.len() / 2);

        let cleared = ((period as f64 * params.zero_fraction).floor() as usize + 1).min(cepstrum.len());
        cepstrum[..cleared].iter_mut().for_each(|c| *c = 0.0);

        let method = PeakMethod::DiffInterp {
            min_distance: params.min_peak_distance,
            interp_factor: params.interp_factor,
        };
        let peaks = detect_peaks(&cepstrum, method, Some(params.max_peaks))?;

        match peaks.nearest_to(period as f64) {
            Some(quefrency) => Ok(period as f64 - quefrency - 1.0),
            None => {
                diagnostics.warn(
                    WarningKind::NoPeakFound,
                    "no cepstral peak found, keeping the previous offset",
                );
                Ok(0.0)
            }
        }
    }
}

/// Synchronize with default progress handling (none)
///
/// # Example
/// ```
/// use cyclostat_core::{synchronize, Reference, SyncMethod, SyncOptions};
///
/// let period = 20;
/// let signal: Vec<f64> = (0..200)
///     .map(|i| if i % period == 3 { 1.0 } else { 0.0 })
///     .collect();
/// let options = SyncOptions::default().with_method(SyncMethod::MaxCorr);
/// let sync = synchronize(&signal, &Reference::Period(period), &options).unwrap();
///
/// assert_eq!(sync.num_cycles(), 10);
/// assert!(sync.relative_deltas().iter().all(|d| *d == 0.0));
/// ```
pub fn synchronize(
    signal: &[f64],
    reference: &Reference,
    options: &SyncOptions,
) -> Result<Synchronization> {
    Synchronizer::new(options.clone()).run(signal, reference, &mut NoProgress)
}

fn reference_cycle(signal: &[f64], reference: &Reference) -> Result<Vec<f64>> {
    if signal.is_empty() {
        return invalid("signal is empty");
    }
    match reference {
        Reference::Period(0) => invalid("period must be positive"),
        Reference::Period(p) if *p > signal.len() => invalid(format!(
            "period {} exceeds the signal length {}",
            p,
            signal.len()
        )),
        Reference::Period(p) => Ok(signal[..*p].to_vec()),
        Reference::Waveform(w) if w.is_empty() => invalid("reference waveform is empty"),
        Reference::Waveform(w) if w.len() > signal.len() => invalid(format!(
            "reference of {} samples is longer than the signal ({})",
            w.len(),
            signal.len()
        )),
        Reference::Waveform(w) => Ok(w.clone()),
    }
}

/// Per-lag divisor of the full correlation (`2 * period - 1` lags)
fn correlation_norm(scale: CorrelationScale, period: usize) -> Vec<f64> {
    let lags = 2 * period - 1;
    match scale {
        CorrelationScale::None | CorrelationScale::Circular => vec![1.0; lags],
        CorrelationScale::Biased => vec![period as f64; lags],
        CorrelationScale::Unbiased => (0..lags)
            .map(|k| period as f64 - (k as f64 - (period as f64 - 1.0)).abs())
            .collect(),
    }
}

fn build_ensemble(
    signal: &[f64],
    period: usize,
    deltas: &[f64],
    fft: &mut Fft,
    diagnostics: &mut Diagnostics,
    progress: &mut dyn Progress,
) -> DMatrix<f64> {
    let mut ensemble = DMatrix::zeros(deltas.len(), period);
    let first = deltas.first().copied().unwrap_or(0.0);
    let mut skipped = 0usize;

    report_clamped(progress, 0.0, "reconstruct");
    for (index, delta) in deltas.iter().enumerate() {
        let relative = delta - first;
        let whole = relative.trunc();
        let start = (index * period) as f64 - whole;

        if start < 0.0 || start as usize + period > signal.len() {
            skipped += 1;
        } else {
            let start = start as usize;
            let cycle = &signal[start..start + period];
            let fraction = relative - whole;
            let aligned = if fraction != 0.0 {
                shift_real(fft, cycle, fraction, false)
            } else {
                cycle.to_vec()
            };
            for (col, value) in aligned.into_iter().enumerate() {
                ensemble[(index, col)] = value;
            }
        }
        report_clamped(progress, (index + 1) as f64 / deltas.len() as f64, "reconstruct");
    }

    if skipped > 0 {
        diagnostics.warn(
            WarningKind::WindowOutOfRange,
            format!("{} cycles fall outside the signal and were left at zero", skipped),
        );
    }
    ensemble
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    /// Impulse train whose cycles drift by `slip` samples per period
    fn drifting_impulses(period: usize, first: usize, slip: usize, cycles: usize) -> Vec<f64> {
        let len = cycles * (period + slip);
        let mut signal = vec![0.0; len];
        for i in 0..cycles {
            signal[first + i * (period + slip)] = 1.0;
        }
        signal
    }

    fn gaussian_train(period: usize, cycles: usize, drift: f64) -> Vec<f64> {
        (0..period * cycles)
            .map(|n| {
                (0..cycles)
                    .map(|i| {
                        let centre = (i * period) as f64 + period as f64 / 2.0 + drift * i as f64;
                        (-(n as f64 - centre).powi(2) / 32.0).exp()
                    })
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_clean_sine_has_constant_offsets() {
        let period = 32;
        let signal: Vec<f64> = (0..period * 10)
            .map(|i| (2.0 * PI * i as f64 / period as f64).sin())
            .collect();
        let options = SyncOptions::default().with_method(SyncMethod::MaxCorr);
        let sync = synchronize(&signal, &Reference::Period(period), &options).unwrap();

        assert_eq!(sync.num_cycles(), 10);
        assert!(sync.relative_deltas().iter().all(|d| *d == 0.0));

        let ensemble = sync.ensemble().unwrap();
        assert_eq!(ensemble.shape(), (10, period));
        for row in 0..10 {
            for col in 0..period {
                assert_abs_diff_eq!(ensemble[(row, col)], signal[col], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_max_corr_tracks_late_cycles() {
        let signal = drifting_impulses(50, 10, 2, 10);
        let options = SyncOptions::default().with_method(SyncMethod::MaxCorr);
        let sync = synchronize(&signal, &Reference::Period(50), &options).unwrap();

        assert_eq!(sync.deltas()[0], -1.0);
        for (i, d) in sync.relative_deltas().iter().enumerate() {
            assert_eq!(*d, -2.0 * i as f64);
        }
        let ensemble = sync.ensemble().unwrap();
        for row in 0..sync.num_cycles() {
            assert_eq!(ensemble[(row, 10)], 1.0);
        }
    }

    #[test]
    fn test_drift_compensation_follows_long_drift() {
        // Without compensation the impulse leaves the window after 20 cycles
        let signal = drifting_impulses(50, 10, 2, 40);
        let options = SyncOptions::default()
            .with_method(SyncMethod::MaxCorr)
            .with_drift_compensation(true);
        let sync = synchronize(&signal, &Reference::Period(50), &options).unwrap();

        assert_eq!(sync.num_cycles(), 40);
        for (i, d) in sync.relative_deltas().iter().enumerate() {
            assert_eq!(*d, -2.0 * i as f64);
        }
        let starts = sync.cycle_starts();
        assert_eq!(starts[39], 39.0 * 52.0);

        let ensemble = sync.ensemble().unwrap();
        for row in 0..40 {
            assert_eq!(ensemble[(row, 10)], 1.0);
        }
        assert!(sync.warnings().is_empty());
    }

    #[test]
    fn test_threshold_and_max_amplitude_agree() {
        let signal = drifting_impulses(50, 10, 2, 10);
        for method in [SyncMethod::Threshold { level: 0.5 }, SyncMethod::MaxAmplitude] {
            let options = SyncOptions::default().with_method(method).with_ensemble(false);
            let sync = synchronize(&signal, &Reference::Period(50), &options).unwrap();

            assert!(sync.ensemble().is_none());
            assert_eq!(sync.deltas()[0], -10.0);
            for (i, d) in sync.relative_deltas().iter().enumerate() {
                assert_eq!(*d, -2.0 * i as f64);
            }
        }
    }

    #[test]
    fn test_threshold_never_reached_records_zero() {
        let signal = vec![0.1; 100];
        let options = SyncOptions::default().with_method(SyncMethod::Threshold { level: 1.0 });
        let sync = synchronize(&signal, &Reference::Period(25), &options).unwrap();
        assert_eq!(sync.deltas(), &[0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rising_threshold_needs_a_rising_edge() {
        // Starts above the level and falls, then rises through it at 30
        let mut signal = vec![0.0; 60];
        signal[..6].copy_from_slice(&[2.0, 2.0, 2.0, 1.5, 1.0, 0.5]);
        signal[29] = 0.2;
        signal[30] = 1.0;
        signal[31] = 2.0;
        let options = SyncOptions::default()
            .with_method(SyncMethod::RisingThreshold {
                level: 0.9,
                min_slope: 1.0,
            })
            .with_ensemble(false);
        let sync = synchronize(&signal, &Reference::Period(60), &options).unwrap();
        assert_eq!(sync.deltas(), &[-29.0]);
    }

    #[test]
    fn test_bary_corr_centred_on_zero_lag() {
        let signal = drifting_impulses(50, 10, 0, 6);
        let options = SyncOptions::default().with_method(SyncMethod::BaryCorr);
        let sync = synchronize(&signal, &Reference::Period(50), &options).unwrap();
        assert!(sync.deltas().iter().all(|d| *d == 0.0));
    }

    #[test]
    fn test_max_corr_interp_fractional_drift() {
        let period = 64;
        let signal = gaussian_train(period, 10, 0.3);
        let sync = synchronize(&signal, &Reference::Period(period), &SyncOptions::default()).unwrap();

        for (i, d) in sync.relative_deltas().iter().enumerate() {
            assert_abs_diff_eq!(*d, -0.3 * i as f64, epsilon = 0.15);
        }

        let ensemble = sync.ensemble().unwrap();
        for row in 0..sync.num_cycles() {
            for col in 0..period {
                assert_abs_diff_eq!(ensemble[(row, col)], signal[col], epsilon = 0.05);
            }
        }
    }

    #[test]
    fn test_every_scale_tracks_late_cycles() {
        let signal = drifting_impulses(50, 10, 2, 10);
        for scale in [
            CorrelationScale::None,
            CorrelationScale::Biased,
            CorrelationScale::Unbiased,
            CorrelationScale::Circular,
        ] {
            let options = SyncOptions::default()
                .with_method(SyncMethod::MaxCorr)
                .with_scale(scale);
            let sync = synchronize(&signal, &Reference::Period(50), &options).unwrap();

            assert_eq!(sync.deltas()[0], -1.0, "{:?}", scale);
            for (i, d) in sync.relative_deltas().iter().enumerate() {
                assert_eq!(*d, -2.0 * i as f64, "{:?} cycle {}", scale, i);
            }
        }
    }

    #[test]
    fn test_drift_compensation_with_every_scale() {
        let signal = drifting_impulses(50, 10, 2, 40);
        for scale in [
            CorrelationScale::None,
            CorrelationScale::Biased,
            CorrelationScale::Unbiased,
            CorrelationScale::Circular,
        ] {
            let options = SyncOptions::default()
                .with_method(SyncMethod::MaxCorr)
                .with_scale(scale)
                .with_drift_compensation(true);
            let sync = synchronize(&signal, &Reference::Period(50), &options).unwrap();

            assert_eq!(sync.num_cycles(), 40, "{:?}", scale);
            for (i, d) in sync.relative_deltas().iter().enumerate() {
                assert_eq!(*d, -2.0 * i as f64, "{:?} cycle {}", scale, i);
            }
            let ensemble = sync.ensemble().unwrap();
            for row in 0..40 {
                assert_eq!(ensemble[(row, 10)], 1.0, "{:?} row {}", scale, row);
            }
            assert!(sync.warnings().is_empty());
        }
    }

    #[test]
    fn test_circular_correlation_has_one_lag_per_sample() {
        let mut window = vec![0.0; 8];
        window[2] = 1.0;
        let synchronizer = Synchronizer::new(SyncOptions::default().with_scale(CorrelationScale::Circular));
        let mut fft = Fft::new();
        let correlation = synchronizer.correlate(&mut fft, &window, &window, &[]);

        // Lag 0 sits at index period - 1 and appears only once
        assert_eq!(correlation.len(), 8);
        assert_eq!(argmax(&correlation), 7);
        assert_eq!(correlation.iter().filter(|c| **c > 0.5).count(), 1);
    }

    #[test]
    fn test_correlation_norm() {
        assert_eq!(correlation_norm(CorrelationScale::None, 3), vec![1.0; 5]);
        assert_eq!(correlation_norm(CorrelationScale::Circular, 3), vec![1.0; 5]);
        assert_eq!(correlation_norm(CorrelationScale::Biased, 3), vec![3.0; 5]);
        assert_eq!(
            correlation_norm(CorrelationScale::Unbiased, 3),
            vec![1.0, 2.0, 3.0, 2.0, 1.0]
        );
        assert_eq!(correlation_norm(CorrelationScale::Unbiased, 1), vec![1.0]);
    }

    #[test]
    fn test_drift_correction_before_signal_start_is_skipped() {
        // Every cycle arrives 4 samples earlier than the reference
        let signal = drifting_impulses(50, 6, 0, 4);
        let mut reference = vec![0.0; 50];
        reference[10] = 1.0;
        let options = SyncOptions::default()
            .with_method(SyncMethod::MaxCorr)
            .with_drift_compensation(true);
        let sync = synchronize(&signal, &Reference::Waveform(reference), &options).unwrap();

        // The first window cannot move back, the second moves to 47 and
        // every later estimate is carried by the accumulated offset
        assert_eq!(sync.deltas(), &[3.0, 3.0, 3.0, 3.0]);
        let ensemble = sync.ensemble().unwrap();
        for row in 0..4 {
            assert_eq!(ensemble[(row, 6)], 1.0);
        }
        assert!(sync.warnings().is_empty());
    }

    #[test]
    fn test_cepstrum_detects_delay() {
        let period = 50;
        let pulse = |n: f64| {
            if n < 0.0 {
                0.0
            } else {
                (-n / 4.0).exp() * (2.0 * PI * n / 8.0).cos()
            }
        };
        // Second cycle arrives 3 samples late
        let signal: Vec<f64> = (0..2 * period)
            .map(|i| {
                let n = i as f64;
                pulse(n - 5.0) * if i < period { 1.0 } else { 0.0 } + pulse(n - 58.0)
            })
            .collect();
        let options = SyncOptions::default()
            .with_method(SyncMethod::Cepstrum)
            .with_ensemble(false);
        let sync = synchronize(&signal, &Reference::Period(period), &options).unwrap();

        assert_eq!(sync.num_cycles(), 2);
        assert_abs_diff_eq!(sync.deltas()[0], -1.0, epsilon = 0.5);
        assert_abs_diff_eq!(sync.relative_deltas()[1], -3.0, epsilon = 0.5);
    }

    #[test]
    fn test_out_of_range_cycle_is_zero() {
        let mut signal = vec![0.0; 100];
        signal[5] = 1.0;
        signal[80] = 1.0;
        let options = SyncOptions::default().with_method(SyncMethod::Threshold { level: 0.5 });
        let sync = synchronize(&signal, &Reference::Period(50), &options).unwrap();

        assert_eq!(sync.relative_deltas(), vec![0.0, -25.0]);
        let ensemble = sync.ensemble().unwrap();
        assert!(ensemble.row(1).iter().all(|v| *v == 0.0));
        assert_eq!(sync.warnings().len(), 1);
        assert_eq!(sync.warnings()[0].kind, WarningKind::WindowOutOfRange);
    }

    #[test]
    fn test_explicit_reference_waveform() {
        let signal = drifting_impulses(50, 10, 0, 4);
        let mut reference = vec![0.0; 50];
        reference[10] = 1.0;
        let options = SyncOptions::default().with_method(SyncMethod::MaxCorr);
        let sync = synchronize(&signal, &Reference::Waveform(reference), &options).unwrap();
        assert_eq!(sync.period(), 50);
        assert!(sync.deltas().iter().all(|d| *d == -1.0));
    }

    #[test]
    fn test_invalid_arguments() {
        let signal = vec![0.0; 100];
        let options = SyncOptions::default();
        assert!(synchronize(&signal, &Reference::Period(0), &options).is_err());
        assert!(synchronize(&signal, &Reference::Period(101), &options).is_err());
        assert!(synchronize(&signal, &Reference::Waveform(Vec::new()), &options).is_err());
        assert!(synchronize(&[], &Reference::Period(1), &options).is_err());

        assert!(SyncMethod::from_name("bogus", None).is_err());
        assert!(SyncMethod::from_name("threshold", None).is_err());
        assert!(SyncMethod::from_name("rthreshold", Some(&[1.0])).is_err());
        assert_eq!(
            SyncMethod::from_name("rthreshold", Some(&[1.0, 0.5])).unwrap(),
            SyncMethod::RisingThreshold {
                level: 1.0,
                min_slope: 0.5
            }
        );
        assert_eq!(SyncMethod::from_name("maxCxyint", None).unwrap(), SyncMethod::MaxCorrInterp);
        assert!(CorrelationScale::from_name("weird").is_err());

        let nan_threshold = SyncOptions::default().with_method(SyncMethod::Threshold { level: f64::NAN });
        assert!(synchronize(&signal, &Reference::Period(10), &nan_threshold).is_err());
    }

    #[test]
    fn test_progress_phases() {
        let signal = drifting_impulses(50, 10, 0, 4);
        let mut phases: Vec<(f64, String)> = Vec::new();
        let mut sink = |fraction: f64, phase: &str| phases.push((fraction, phase.to_string()));
        Synchronizer::new(SyncOptions::default().with_method(SyncMethod::MaxCorr))
            .run(&signal, &Reference::Period(50), &mut sink)
            .unwrap();

        assert_eq!(phases.first().map(|p| p.1.as_str()), Some("estimate"));
        assert_eq!(phases.last().map(|p| p.1.as_str()), Some("reconstruct"));
        assert!(phases.iter().all(|(f, _)| (0.0..=1.0).contains(f)));
        assert_eq!(phases.last().map(|p| p.0), Some(1.0));
    }

    #[test]
    fn test_options_from_json() {
        let options: SyncOptions = serde_json::from_str(
            r#"{"method": {"Threshold": {"level": 0.5}}, "compensate_drift": true}"#,
        )
        .unwrap();
        assert_eq!(options.method, SyncMethod::Threshold { level: 0.5 });
        assert!(options.compensate_drift);
        assert!(options.want_ensemble);
        assert_eq!(options.interp_factor, 10);

        let defaults: SyncOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(defaults.method, SyncMethod::MaxCorrInterp);
        assert_eq!(defaults.scale, CorrelationScale::None);
    }
}
