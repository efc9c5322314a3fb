//! Peak detection
//!
//! Candidate peaks come either from a `k * std` amplitude threshold or from
//! sign changes of the first difference. Candidates are then kept strongest
//! first, skipping any that fall within `min_distance` of a kept peak.

use serde::{Deserialize, Serialize};

use crate::interpolation::cubic_interpolate;
use crate::signal::replace_non_finite;
use crate::{invalid, Result};

/// Peak detection method
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PeakMethod {
    /// Samples more than `k` standard deviations above the mean
    KStdThreshold { k: f64, min_distance: f64 },
    /// Local maxima of the signal (first difference changes from + to -)
    Diff { min_distance: f64 },
    /// Local maxima refined to `1 / interp_factor` of a sample
    DiffInterp { min_distance: f64, interp_factor: usize },
}

impl Default for PeakMethod {
    fn default() -> Self {
        PeakMethod::KStdThreshold {
            k: 3.0,
            min_distance: 1.0,
        }
    }
}

impl PeakMethod {
    /// Build a method from its name (`kStdThreshold`, `diff`, `diffInterp`)
    ///
    /// `k` is the threshold coefficient for `kStdThreshold` and the minimum
    /// peak spacing for the difference methods (default 3). `k2` is the
    /// spacing for `kStdThreshold` (default 1) and the interpolation factor
    /// for `diffInterp` (default 4).
    pub fn from_name(name: &str, k: Option<f64>, k2: Option<f64>) -> Result<Self> {
        let k = k.unwrap_or(3.0);
        match name {
            "kStdThreshold" => Ok(PeakMethod::KStdThreshold {
                k,
                min_distance: k2.unwrap_or(1.0),
            }),
            "diff" => Ok(PeakMethod::Diff { min_distance: k }),
            "diffInterp" => Ok(PeakMethod::DiffInterp {
                min_distance: k,
                interp_factor: k2.unwrap_or(4.0).round().max(0.0) as usize,
            }),
            other => invalid(format!("unknown peak detection method '{}'", other)),
        }
    }
}

/// Detected peaks, sorted by position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Peaks {
    /// Peak positions in samples (fractional for `DiffInterp`)
    pub positions: Vec<f64>,
    /// Signal value at the (integer) peak sample
    pub amplitudes: Vec<f64>,
}

impl Peaks {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position closest to `target`, if any peak was found
    pub fn nearest_to(&self, target: f64) -> Option<f64> {
        self.positions
            .iter()
            .copied()
            .min_by(|a, b| (a - target).abs().total_cmp(&(b - target).abs()))
    }
}

/// Detect peaks in `signal`
///
/// Non-finite samples are treated as the smallest finite value and can
/// never be peaks. At most `max_peaks` peaks are returned (all when `None`).
///
/// # Errors
/// `InvalidArgument` for a non-positive spacing with the difference methods
/// or a zero interpolation factor.
pub fn detect_peaks(signal: &[f64], method: PeakMethod, max_peaks: Option<usize>) -> Result<Peaks> {
    let signal = replace_non_finite(signal);
    let max_peaks = max_peaks.unwrap_or(usize::MAX);

    match method {
        PeakMethod::KStdThreshold { k, min_distance } => {
            Ok(k_std_threshold(&signal, k, min_distance, max_peaks))
        }
        PeakMethod::Diff { min_distance } => {
            check_spacing(min_distance)?;
            Ok(diff_peaks(&signal, min_distance, max_peaks))
        }
        PeakMethod::DiffInterp {
            min_distance,
            interp_factor,
        } => {
            check_spacing(min_distance)?;
            if interp_factor == 0 {
                return invalid("interpolation factor must be at least 1");
            }
            let mut peaks = diff_peaks(&signal, min_distance, max_peaks);
            for position in &mut peaks.positions {
                *position = refine_position(&signal, *position as usize, interp_factor);
            }
            Ok(peaks)
        }
    }
}

fn check_spacing(min_distance: f64) -> Result<()> {
    if min_distance > 0.0 {
        Ok(())
    } else {
        invalid("the minimum distance between peaks must be positive")
    }
}

fn k_std_threshold(signal: &[f64], k: f64, min_distance: f64, max_peaks: usize) -> Peaks {
    if signal.is_empty() {
        return Peaks::default();
    }
    let n = signal.len() as f64;
    let mean = signal.iter().sum::<f64>() / n;
    let std = (signal.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
    let threshold = k * std;

    let candidates: Vec<usize> = (0..signal.len())
        .filter(|&i| signal[i] - mean > threshold)
        .collect();
    select(signal, candidates, min_distance, max_peaks)
}

fn diff_peaks(signal: &[f64], min_distance: f64, max_peaks: usize) -> Peaks {
    let n = signal.len();
    if n == 0 {
        return Peaks::default();
    }
    // Pad both ends with the minimum so edge samples can be peaks
    let floor = signal.iter().copied().fold(f64::INFINITY, f64::min);
    let at = |i: isize| -> f64 {
        if i < 0 || i >= n as isize {
            floor
        } else {
            signal[i as usize]
        }
    };

    let candidates: Vec<usize> = (0..n)
        .filter(|&i| {
            let i = i as isize;
            at(i) - at(i - 1) >= 0.0 && at(i + 1) - at(i) <= 0.0
        })
        .collect();
    select(signal, candidates, min_distance, max_peaks)
}

/// Keep the strongest candidates that are at least `min_distance` apart
fn select(signal: &[f64], mut candidates: Vec<usize>, min_distance: f64, max_peaks: usize) -> Peaks {
    candidates.sort_by(|&a, &b| signal[b].total_cmp(&signal[a]));

    let mut kept: Vec<usize> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_peaks {
            break;
        }
        let far_enough = kept
            .iter()
            .all(|&k| (k as f64 - candidate as f64).abs() >= min_distance);
        if far_enough {
            kept.push(candidate);
        }
    }
    kept.sort_unstable();

    Peaks {
        positions: kept.iter().map(|&i| i as f64).collect(),
        amplitudes: kept.iter().map(|&i| signal[i]).collect(),
    }
}

/// Sub-sample maximum within one sample of `index`
fn refine_position(signal: &[f64], index: usize, factor: usize) -> f64 {
    if index == 0 || index + 1 >= signal.len() {
        return index as f64;
    }
    let f = factor as isize;
    let best = (-f..=f).fold((0isize, f64::NEG_INFINITY), |best, j| {
        let value = cubic_interpolate(signal, index as f64 + j as f64 / factor as f64);
        if value > best.1 {
            (j, value)
        } else {
            best
        }
    });
    index as f64 + best.0 as f64 / factor as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_diff_finds_local_maxima() {
        let signal = vec![0.0, 1.0, 0.0, 0.0, 3.0, 0.0, 2.0, 0.0];
        let peaks = detect_peaks(&signal, PeakMethod::Diff { min_distance: 1.0 }, None).unwrap();

        assert_eq!(peaks.positions, vec![1.0, 4.0, 6.0]);
        assert_eq!(peaks.amplitudes, vec![1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_min_distance_keeps_strongest() {
        let signal = vec![0.0, 1.0, 0.0, 0.0, 3.0, 0.0, 2.0, 0.0];
        let peaks = detect_peaks(&signal, PeakMethod::Diff { min_distance: 3.0 }, None).unwrap();

        // Peak at 6 is within 3 samples of the stronger peak at 4
        assert_eq!(peaks.positions, vec![1.0, 4.0]);
    }

    #[test]
    fn test_max_peaks_limits_output() {
        let signal = vec![0.0, 1.0, 0.0, 0.0, 3.0, 0.0, 2.0, 0.0];
        let peaks = detect_peaks(&signal, PeakMethod::Diff { min_distance: 1.0 }, Some(2)).unwrap();
        assert_eq!(peaks.positions, vec![4.0, 6.0]);
    }

    #[test]
    fn test_k_std_threshold() {
        let mut signal = vec![0.0; 100];
        signal[20] = 10.0;
        signal[70] = 8.0;
        let peaks = detect_peaks(&signal, PeakMethod::default(), None).unwrap();

        assert_eq!(peaks.positions, vec![20.0, 70.0]);
        assert_eq!(peaks.amplitudes, vec![10.0, 8.0]);
    }

    #[test]
    fn test_diff_interp_refines_between_samples() {
        // Samples of 1 - (x - 10.3)^2, maximum between samples 10 and 11
        let signal: Vec<f64> = (0..21).map(|i| 1.0 - (i as f64 - 10.3).powi(2)).collect();
        let method = PeakMethod::DiffInterp {
            min_distance: 1.0,
            interp_factor: 10,
        };
        let peaks = detect_peaks(&signal, method, None).unwrap();

        assert_eq!(peaks.len(), 1);
        assert_relative_eq!(peaks.positions[0], 10.3, epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_values_are_not_peaks() {
        let signal = vec![0.0, f64::NAN, 0.0, 2.0, 0.0, f64::INFINITY];
        let peaks = detect_peaks(&signal, PeakMethod::Diff { min_distance: 1.0 }, Some(1)).unwrap();
        assert_eq!(peaks.positions, vec![3.0]);
    }

    #[test]
    fn test_invalid_parameters() {
        let signal = vec![0.0, 1.0, 0.0];
        assert!(detect_peaks(&signal, PeakMethod::Diff { min_distance: 0.0 }, None).is_err());
        assert!(PeakMethod::from_name("bogus", None, None).is_err());
        assert_eq!(
            PeakMethod::from_name("diffInterp", Some(10.0), Some(10.0)).unwrap(),
            PeakMethod::DiffInterp {
                min_distance: 10.0,
                interp_factor: 10
            }
        );
    }

    #[test]
    fn test_nearest_to() {
        let peaks = Peaks {
            positions: vec![12.0, 48.5, 97.0],
            amplitudes: vec![1.0, 1.0, 1.0],
        };
        assert_eq!(peaks.nearest_to(50.0), Some(48.5));
        assert_eq!(Peaks::default().nearest_to(50.0), None);
    }
}
