//! Interpolation of uniformly sampled data
//!
//! Used to resample signals onto a non-integer period grid and to refine
//! correlation and peak positions below one sample.

/// Sample `samples` at `count` positions `start, start + step, ...`
///
/// Positions falling outside the data are clamped onto its end points.
pub fn resample(samples: &[f64], start: f64, step: f64, count: usize) -> Vec<f64> {
    if samples.is_empty() {
        return Vec::new();
    }
    let max_pos = (samples.len() - 1) as f64;
    (0..count)
        .map(|k| cubic_interpolate(samples, (start + k as f64 * step).clamp(0.0, max_pos)))
        .collect()
}

/// Number of grid points `0, step, 2*step, ...` strictly below `len - 1`
///
/// This is the length of the resampled signal when a block of non-integer
/// length is stretched onto an integer number of steps.
pub fn grid_len(len: usize, step: f64) -> usize {
    if len < 2 || step <= 0.0 {
        return 0;
    }
    ((len - 1) as f64 / step).ceil() as usize
}

/// Straight line between the two samples around `position`
fn linear_interpolate(samples: &[f64], position: f64) -> f64 {
    let n = samples.len();
    let idx = (position.floor().max(0.0) as usize).min(n - 2);
    let frac = position - idx as f64;
    samples[idx] + frac * (samples[idx + 1] - samples[idx])
}

/// Catmull-Rom cubic through the 4 samples around `position`
///
/// Exact on quadratics away from the ends. Fewer than 4 samples fall back to
/// a straight line.
pub(crate) fn cubic_interpolate(samples: &[f64], position: f64) -> f64 {
    let n = samples.len();
    if n < 2 {
        return if n == 1 { samples[0] } else { 0.0 };
    }
    if n < 4 {
        return linear_interpolate(samples, position);
    }

    let idx = position.floor() as isize;
    let t = position - idx as f64;
    let at = |i: isize| samples[i.clamp(0, n as isize - 1) as usize];
    let (y0, y1, y2, y3) = (at(idx - 1), at(idx), at(idx + 1), at(idx + 2));

    // Hermite segment with central-difference tangents
    let m1 = 0.5 * (y2 - y0);
    let m2 = 0.5 * (y3 - y1);
    let t2 = t * t;
    let t3 = t2 * t;
    (2.0 * t3 - 3.0 * t2 + 1.0) * y1
        + (t3 - 2.0 * t2 + t) * m1
        + (-2.0 * t3 + 3.0 * t2) * y2
        + (t3 - t2) * m2
}
