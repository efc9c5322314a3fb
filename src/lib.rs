//! cyclostat-core: synchronous averaging and cycle synchronization
//!
//! This library estimates the periodic part of rotating-machine, gait and
//! other cyclostationary signals. It partitions signals into cycles, aligns
//! the cycles against a reference and averages them.
//!
//! # Core Types
//!
//! - [`Signal`] - Samples with sample rate, loadable from audio files
//! - [`SyncAverage`] - Synchronous average (and residual) of a signal
//! - [`Synchronizer`] - Per-cycle offset estimation and ensemble reconstruction
//! - [`circ_shift`] - Integer or fractional circular shift
//! - [`Peaks`] - Peak detection used for cepstral period picking
//! - [`Extrema`] - Per-cycle global minima and maxima
//! - [`CycloCorrelation`] - Cyclostationary time correlation `R(t, tau)`
//!
//! Advisory conditions never fail a call; they come back as [`Warning`]s in
//! each result and are logged through `tracing`.

pub mod signal;
pub mod diagnostics;
pub mod interpolation;
pub mod circshift;
pub mod sync_average;
pub mod synchronize;
pub mod peaks;
pub mod extrema;
pub mod cyclo_corr;

pub mod utils;

// Re-export main types at crate root
pub use signal::Signal;
pub use diagnostics::{NoProgress, Progress, Warning, WarningKind};
pub use circshift::{circ_shift, circ_shift_complex, circ_shift_rows, circ_shift_with, RowShift};
pub use sync_average::{SyncAverage, SyncAverageRows};
pub use synchronize::{
    synchronize, CepstrumParams, CorrelationScale, Reference, SyncMethod, SyncOptions,
    Synchronization, Synchronizer,
};
pub use peaks::{detect_peaks, PeakMethod, Peaks};
pub use extrema::{
    global_min_max, global_min_max_rows, DerivativeMethod, Enhancement, Extrema, ExtremaBatch,
    ExtremaOptions,
};
pub use cyclo_corr::{cyclo_time_correlation, cyclo_time_correlation_with_progress, CycloCorrelation};

// Batch inputs and outputs are nalgebra matrices, one signal per row
pub use nalgebra::DMatrix;

use thiserror::Error;

/// Errors that can occur in cyclostat-core operations
#[derive(Error, Debug)]
pub enum CycloError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV decoding error: {0}")]
    WavDecode(#[from] hound::Error),

    #[error("Audio decoding error: {0}")]
    Decode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Numerical error: {0}")]
    Numeric(String),
}

pub type Result<T> = std::result::Result<T, CycloError>;

/// Shorthand for an [`CycloError::InvalidArgument`] result
pub(crate) fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(CycloError::InvalidArgument(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_message() {
        let err = invalid::<()>("block size must be positive").unwrap_err();
        assert!(matches!(err, CycloError::InvalidArgument(_)));
        assert_eq!(err.to_string(), "Invalid argument: block size must be positive");
    }
}
