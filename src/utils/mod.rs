//! Utility modules for signal processing
//!
//! This module contains low-level signal processing utilities used by
//! the analysis algorithms.

pub mod fft;
pub mod lstsq;

pub use fft::{fft_frequencies, Fft, FftDirection};
pub use lstsq::{polyfit, polyfit_derivative_at};
