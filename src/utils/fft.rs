//! FFT wrapper for correlation and cepstral analysis
//!
//! This module provides a convenient wrapper around rustfft for the
//! cyclostationary analysis routines: plain transforms, linear
//! cross-correlation and the real cepstrum.

use num_complex::Complex;
use rustfft::FftPlanner;

/// FFT direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

/// FFT processor with cached plans
pub struct Fft {
    planner: FftPlanner<f64>,
}

impl Fft {
    /// Create a new FFT processor
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Compute FFT of real-valued input
    ///
    /// # Arguments
    /// * `input` - Real-valued input samples
    /// * `output_size` - Size of the FFT (will be zero-padded if larger than input)
    ///
    /// # Returns
    /// Complex-valued FFT result of length `output_size`
    pub fn real_fft(&mut self, input: &[f64], output_size: usize) -> Vec<Complex<f64>> {
        let fft_size = output_size.max(input.len());
        let fft = self.planner.plan_fft_forward(fft_size);

        let mut buffer: Vec<Complex<f64>> = input
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(fft_size)
            .collect();

        fft.process(&mut buffer);
        buffer
    }

    /// Transform a complex buffer in place, unnormalized in both directions
    pub fn process(&mut self, buffer: &mut [Complex<f64>], direction: FftDirection) {
        if buffer.is_empty() {
            return;
        }
        let plan = match direction {
            FftDirection::Forward => self.planner.plan_fft_forward(buffer.len()),
            FftDirection::Inverse => self.planner.plan_fft_inverse(buffer.len()),
        };
        plan.process(buffer);
    }

    /// Compute inverse FFT
    ///
    /// # Arguments
    /// * `input` - Complex-valued FFT coefficients
    ///
    /// # Returns
    /// Complex-valued result scaled by `1/N` (take real part for real output)
    pub fn inverse_fft(&mut self, input: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let fft_size = input.len();
        if fft_size == 0 {
            return Vec::new();
        }
        let fft = self.planner.plan_fft_inverse(fft_size);

        let mut buffer = input.to_vec();
        fft.process(&mut buffer);

        // Normalize by dividing by N
        let scale = 1.0 / fft_size as f64;
        for c in &mut buffer {
            *c *= scale;
        }

        buffer
    }

    /// Linear cross-correlation over every overlap ("full" mode)
    ///
    /// Output index `k` holds `sum_n a[n + k - (v.len() - 1)] * v[n]`, so the
    /// zero-lag value sits at `v.len() - 1` and the output has
    /// `a.len() + v.len() - 1` values.
    pub fn cross_correlation_full(&mut self, a: &[f64], v: &[f64]) -> Vec<f64> {
        if a.is_empty() || v.is_empty() {
            return Vec::new();
        }

        let out_len = a.len() + v.len() - 1;
        // Large enough that the circular result has no wrap-around overlap
        let fft_size = out_len.next_power_of_two();

        let spectrum_a = self.real_fft(a, fft_size);
        let spectrum_v = self.real_fft(v, fft_size);

        let cross: Vec<Complex<f64>> = spectrum_a
            .iter()
            .zip(spectrum_v.iter())
            .map(|(x, y)| x * y.conj())
            .collect();

        let circular = self.inverse_fft(&cross);

        let zero_lag = v.len() as isize - 1;
        (0..out_len)
            .map(|k| {
                let lag = k as isize - zero_lag;
                circular[lag.rem_euclid(fft_size as isize) as usize].re
            })
            .collect()
    }

    /// Cross-correlation restricted to lags where `a` and `v` fully overlap
    ///
    /// With `v` the longer input this yields `v.len() - a.len() + 1` values,
    /// ordered the same way as [`Fft::cross_correlation_full`].
    pub fn cross_correlation_valid(&mut self, a: &[f64], v: &[f64]) -> Vec<f64> {
        let (short, long) = if a.len() <= v.len() { (a, v) } else { (v, a) };
        if short.is_empty() {
            return Vec::new();
        }
        let full = self.cross_correlation_full(a, v);
        let start = short.len() - 1;
        let count = long.len() - short.len() + 1;
        full[start..start + count].to_vec()
    }

    /// Full linear autocorrelation (`2n - 1` values, zero lag in the middle)
    pub fn autocorrelation_full(&mut self, input: &[f64]) -> Vec<f64> {
        self.cross_correlation_full(input, input)
    }

    /// Real cepstrum: inverse transform of the log magnitude spectrum
    ///
    /// Zero-magnitude bins are floored at the smallest positive double so the
    /// logarithm stays finite.
    pub fn real_cepstrum(&mut self, input: &[f64]) -> Vec<f64> {
        let n = input.len();
        if n == 0 {
            return Vec::new();
        }

        let spectrum = self.real_fft(input, n);
        let log_magnitude: Vec<Complex<f64>> = spectrum
            .iter()
            .map(|c| Complex::new(c.norm().max(f64::MIN_POSITIVE).ln(), 0.0))
            .collect();

        self.inverse_fft(&log_magnitude)
            .iter()
            .map(|c| c.re)
            .collect()
    }
}

impl Default for Fft {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalized frequency of each bin in standard FFT order
///
/// For 10 bins this is `[0, 1, 2, 3, 4, 5, -4, -3, -2, -1] / 10`; for 9 bins
/// `[0, 1, 2, 3, 4, -4, -3, -2, -1] / 9`.
pub fn fft_frequencies(n: usize) -> Vec<f64> {
    let half = n / 2;
    (0..n)
        .map(|k| {
            let signed = if k <= half {
                k as isize
            } else {
                k as isize - n as isize
            };
            signed as f64 / n as f64
        })
        .collect()
}
