//! Integer and fractional circular shifts
//!
//! `shifted[i] = x[(i - shift) mod N]`. Integer shifts rotate samples
//! exactly; fractional shifts (or forced Fourier shifts) multiply the
//! spectrum by the linear phase `exp(-2 i pi f shift)`.

use nalgebra::DMatrix;
use num_complex::Complex;
use rayon::prelude::*;

use crate::utils::{fft_frequencies, Fft, FftDirection};
use crate::{invalid, Result};

/// Shift applied to each row of a matrix
#[derive(Debug, Clone, PartialEq)]
pub enum RowShift {
    /// Same shift for every row
    Uniform(f64),
    /// One shift per row
    PerRow(Vec<f64>),
}

impl From<f64> for RowShift {
    fn from(shift: f64) -> Self {
        RowShift::Uniform(shift)
    }
}

impl From<Vec<f64>> for RowShift {
    fn from(shifts: Vec<f64>) -> Self {
        RowShift::PerRow(shifts)
    }
}

/// Circularly shift a real signal by `shift` samples
///
/// Integer shifts are exact rotations; other shifts go through the FFT.
///
/// # Example
/// ```
/// use cyclostat_core::circ_shift;
///
/// let shifted = circ_shift(&[1.0, 2.0, 3.0, 4.0], 1.0);
/// assert_eq!(shifted, vec![4.0, 1.0, 2.0, 3.0]);
/// ```
pub fn circ_shift(samples: &[f64], shift: f64) -> Vec<f64> {
    circ_shift_with(samples, shift, false)
}

/// Circularly shift a real signal, optionally forcing the Fourier path
pub fn circ_shift_with(samples: &[f64], shift: f64, force_fourier: bool) -> Vec<f64> {
    let mut fft = Fft::new();
    shift_real(&mut fft, samples, shift, force_fourier)
}

/// Circularly shift a complex signal
pub fn circ_shift_complex(
    samples: &[Complex<f64>],
    shift: f64,
    force_fourier: bool,
) -> Vec<Complex<f64>> {
    if samples.is_empty() {
        return Vec::new();
    }
    if is_integer_shift(shift, force_fourier) {
        return rotate(samples, shift);
    }
    let mut fft = Fft::new();
    fourier_shift(&mut fft, samples.to_vec(), shift)
}

/// Circularly shift each row of a matrix (one signal per row)
///
/// # Errors
/// `InvalidArgument` when a per-row shift vector does not have one entry per
/// row, or when a shift is not finite.
pub fn circ_shift_rows(
    data: &DMatrix<f64>,
    shift: &RowShift,
    force_fourier: bool,
) -> Result<DMatrix<f64>> {
    let nrows = data.nrows();
    let shifts: Vec<f64> = match shift {
        RowShift::Uniform(s) => vec![*s; nrows],
        RowShift::PerRow(v) => {
            if v.len() != nrows {
                return invalid(format!(
                    "shift vector has {} entries but the data has {} rows",
                    v.len(),
                    nrows
                ));
            }
            v.clone()
        }
    };
    if let Some(bad) = shifts.iter().find(|s| !s.is_finite()) {
        return invalid(format!("shift must be finite, got {}", bad));
    }

    let rows: Vec<Vec<f64>> = (0..nrows)
        .into_par_iter()
        .map(|r| {
            let row: Vec<f64> = data.row(r).iter().copied().collect();
            let mut fft = Fft::new();
            shift_real(&mut fft, &row, shifts[r], force_fourier)
        })
        .collect();

    Ok(DMatrix::from_fn(nrows, data.ncols(), |r, c| rows[r][c]))
}

/// Real-signal shift reusing an existing FFT planner
pub(crate) fn shift_real(fft: &mut Fft, samples: &[f64], shift: f64, force_fourier: bool) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    if is_integer_shift(shift, force_fourier) {
        return rotate(samples, shift);
    }

    let buffer: Vec<Complex<f64>> = samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
    // Imaginary residue is FFT round-off (and the unpaired Nyquist bin)
    fourier_shift(fft, buffer, shift)
        .into_iter()
        .map(|c| c.re)
        .collect()
}

fn is_integer_shift(shift: f64, force_fourier: bool) -> bool {
    !force_fourier && shift.is_finite() && shift.fract() == 0.0
}

fn rotate<T: Copy>(samples: &[T], shift: f64) -> Vec<T> {
    let n = samples.len();
    let k = (shift as i64).rem_euclid(n as i64) as usize;
    let mut out = samples.to_vec();
    out.rotate_right(k);
    out
}

fn fourier_shift(fft: &mut Fft, mut buffer: Vec<Complex<f64>>, shift: f64) -> Vec<Complex<f64>> {
    let n = buffer.len();
    fft.process(&mut buffer, FftDirection::Forward);

    for (bin, f) in buffer.iter_mut().zip(fft_frequencies(n)) {
        *bin *= Complex::from_polar(1.0, -2.0 * std::f64::consts::PI * f * shift);
    }

    fft.process(&mut buffer, FftDirection::Inverse);
    let scale = 1.0 / n as f64;
    for c in &mut buffer {
        *c *= scale;
    }
    buffer
}
