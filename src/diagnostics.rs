//! Warnings and progress reporting
//!
//! Analyses never abort on advisory conditions. They record a [`Warning`],
//! log it through `tracing`, and hand the collected warnings back to the
//! caller inside their result.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a non-fatal condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarningKind {
    /// More signals than samples per signal; the data is probably transposed
    Transposed,
    /// Block size is not an integer, the signal was resampled
    NonIntegerPeriod,
    /// Trailing samples that do not fill a whole block were dropped
    Truncated,
    /// Only one block was available for averaging
    SingleBlock,
    /// Peak picking found nothing to choose from
    NoPeakFound,
    /// A cycle could not be extracted because it lies outside the signal
    WindowOutOfRange,
}

/// A non-fatal diagnostic emitted by an analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    /// Name of the operation that raised it
    pub context: &'static str,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

/// Collects warnings for one call
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    context: &'static str,
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub(crate) fn new(context: &'static str) -> Self {
        Self {
            context,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(context = self.context, kind = ?kind, "{}", message);
        self.warnings.push(Warning {
            kind,
            message,
            context: self.context,
        });
    }

    pub(crate) fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        self.warnings.extend(warnings);
    }

    pub(crate) fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// Receives progress updates from long-running loops
pub trait Progress {
    /// `fraction` is in `[0, 1]`, `phase` names the current stage
    fn report(&mut self, fraction: f64, phase: &str);
}

impl<F> Progress for F
where
    F: FnMut(f64, &str),
{
    fn report(&mut self, fraction: f64, phase: &str) {
        self(fraction, phase)
    }
}

/// Progress sink that ignores every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _fraction: f64, _phase: &str) {}
}

pub(crate) fn report_clamped(progress: &mut dyn Progress, fraction: f64, phase: &str) {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    progress.report(fraction, phase);
}
