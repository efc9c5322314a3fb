//! Signal type for uniformly sampled data
//!
//! A Signal holds one channel of samples and its sample rate. It can be
//! loaded from audio containers (vibration and acoustic recordings are often
//! stored as WAV), cleaned of non-finite samples, and stacked into a matrix
//! for the batch analyses.

use std::fs::File;
use std::path::Path;

use nalgebra::DMatrix;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::diagnostics::NoProgress;
use crate::sync_average::SyncAverage;
use crate::synchronize::{Reference, SyncOptions, Synchronization, Synchronizer};
use crate::{circshift, invalid, CycloError, Result};

/// Uniformly sampled signal with its sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    samples: Vec<f64>,
    /// Sample rate in Hz
    sample_rate: f64,
}

impl Signal {
    /// Create a Signal from raw samples
    ///
    /// # Example
    /// ```
    /// use cyclostat_core::Signal;
    ///
    /// let signal = Signal::from_samples(&[0.0, 1.0, 0.0, -1.0], 1000.0);
    /// assert_eq!(signal.num_samples(), 4);
    /// ```
    pub fn from_samples(samples: &[f64], sample_rate: f64) -> Self {
        Self {
            samples: samples.to_vec(),
            sample_rate,
        }
    }

    /// Create a Signal from owned samples (avoids cloning)
    pub fn from_samples_owned(samples: Vec<f64>, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Load a Signal from an audio file, mixing channels down to mono
    ///
    /// WAV files are read with hound; anything else (FLAC, OGG, MP3) goes
    /// through symphonia. Integer samples are scaled to [-1, 1].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let channels = Self::from_file_channels(path)?;
        let sample_rate = channels.first().map_or(0.0, |c| c.sample_rate);
        let n_channels = channels.len().max(1) as f64;
        let len = channels.iter().map(|c| c.samples.len()).min().unwrap_or(0);

        let samples = (0..len)
            .map(|i| channels.iter().map(|c| c.samples[i]).sum::<f64>() / n_channels)
            .collect();

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Load a Signal per channel from an audio file
    pub fn from_file_channels<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let is_wav = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        if is_wav {
            Self::from_wav_channels(path)
        } else {
            Self::from_symphonia_channels(path)
        }
    }

    fn from_wav_channels(path: &Path) -> Result<Vec<Self>> {
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let sample_rate = spec.sample_rate as f64;
        let channels = (spec.channels as usize).max(1);

        let interleaved: Vec<f64> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_value = (1_i64 << (spec.bits_per_sample - 1)) as f64;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f64 / max_value))
                    .collect::<std::result::Result<_, _>>()?
            }
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(|v| v as f64))
                .collect::<std::result::Result<_, _>>()?,
        };

        Ok(deinterleave(&interleaved, channels, sample_rate))
    }

    fn from_symphonia_channels(path: &Path) -> Result<Vec<Self>> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| CycloError::Decode(format!("failed to probe format: {}", e)))?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| CycloError::Decode("no audio track found".to_string()))?;
        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| CycloError::Decode("unknown sample rate".to_string()))?
            as f64;
        let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| CycloError::Decode(format!("failed to create decoder: {}", e)))?;

        let mut interleaved: Vec<f64> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(CycloError::Decode(format!("error reading packet: {}", e))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => return Err(CycloError::Decode(format!("decode error: {}", e))),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            interleaved.extend(sample_buf.samples().iter().map(|&s| s as f64));
        }

        tracing::debug!(
            path = %path.display(),
            channels,
            frames = interleaved.len() / channels.max(1),
            "decoded audio"
        );
        Ok(deinterleave(&interleaved, channels.max(1), sample_rate))
    }

    /// Stack equally long signals into a matrix, one signal per row
    pub fn stack_rows(signals: &[Signal]) -> Result<DMatrix<f64>> {
        let ncols = match signals.first() {
            Some(first) => first.samples.len(),
            None => return invalid("cannot stack an empty list of signals"),
        };
        if let Some(bad) = signals.iter().find(|s| s.samples.len() != ncols) {
            return invalid(format!(
                "all rows must share the same length ({} != {})",
                bad.samples.len(),
                ncols
            ));
        }
        Ok(DMatrix::from_fn(signals.len(), ncols, |r, c| signals[r].samples[c]))
    }

    /// Get the sample rate in Hz
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Get a reference to the samples
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Get the number of samples
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Get the total duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    /// Copy of this signal with non-finite samples replaced
    ///
    /// NaN and infinities become the minimum finite sample (0.0 when no
    /// sample is finite), so they can never be picked as peaks.
    pub fn cleaned(&self) -> Signal {
        Signal {
            samples: replace_non_finite(&self.samples),
            sample_rate: self.sample_rate,
        }
    }

    /// Create a pure tone (sine wave)
    ///
    /// # Arguments
    /// * `frequency` - Frequency in Hz
    /// * `duration` - Duration in seconds
    /// * `sample_rate` - Sample rate in Hz
    /// * `amplitude` - Peak amplitude
    /// * `phase` - Initial phase in radians
    pub fn create_tone(
        frequency: f64,
        duration: f64,
        sample_rate: f64,
        amplitude: f64,
        phase: f64,
    ) -> Signal {
        let n_samples = (duration * sample_rate).round() as usize;
        let omega = 2.0 * std::f64::consts::PI * frequency / sample_rate;

        let samples: Vec<f64> = (0..n_samples)
            .map(|i| amplitude * (omega * i as f64 + phase).sin())
            .collect();

        Signal {
            samples,
            sample_rate,
        }
    }

    /// Synchronous average with blocks of `block_size` samples
    pub fn sync_average(&self, block_size: f64, want_residual: bool) -> Result<SyncAverage> {
        SyncAverage::from_samples(&self.samples, block_size, want_residual)
    }

    /// Align the cycles of this signal against `reference`
    pub fn synchronize(&self, reference: Reference, options: &SyncOptions) -> Result<Synchronization> {
        Synchronizer::new(options.clone()).run(&self.samples, &reference, &mut NoProgress)
    }

    /// Circularly shifted copy of this signal
    pub fn circ_shift(&self, shift: f64) -> Signal {
        Signal {
            samples: circshift::circ_shift(&self.samples, shift),
            sample_rate: self.sample_rate,
        }
    }
}

/// Replace NaN and infinite values by the smallest finite value
pub fn replace_non_finite(samples: &[f64]) -> Vec<f64> {
    let fill = samples
        .iter()
        .copied()
        .filter(|x| x.is_finite())
        .fold(f64::INFINITY, f64::min);
    let fill = if fill.is_finite() { fill } else { 0.0 };

    samples
        .iter()
        .map(|&x| if x.is_finite() { x } else { fill })
        .collect()
}

fn deinterleave(interleaved: &[f64], channels: usize, sample_rate: f64) -> Vec<Signal> {
    let mut channel_samples: Vec<Vec<f64>> = vec![Vec::new(); channels];
    for (i, &sample) in interleaved.iter().enumerate() {
        channel_samples[i % channels].push(sample);
    }
    channel_samples
        .into_iter()
        .map(|samples| Signal {
            samples,
            sample_rate,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_samples() {
        let samples = vec![0.0, 0.5, 1.0, 0.5, 0.0];
        let signal = Signal::from_samples(&samples, 44100.0);

        assert_eq!(signal.sample_rate(), 44100.0);
        assert_eq!(signal.num_samples(), 5);
        assert_relative_eq!(signal.duration(), 5.0 / 44100.0, epsilon = 1e-10);
    }

    #[test]
    fn test_pure_tone() {
        let signal = Signal::create_tone(100.0, 0.1, 1000.0, 1.0, 0.0);

        assert_eq!(signal.num_samples(), 100);
        assert_relative_eq!(signal.samples()[0], 0.0, epsilon = 1e-10);
        // Ten samples per cycle
        assert_relative_eq!(signal.samples()[10], 0.0, epsilon = 1e-10);
        assert_relative_eq!(signal.samples()[12], signal.samples()[2], epsilon = 1e-10);
    }

    #[test]
    fn test_cleaned_replaces_non_finite() {
        let signal = Signal::from_samples(&[1.0, f64::NAN, -2.0, f64::INFINITY], 10.0);
        let cleaned = signal.cleaned();

        assert_eq!(cleaned.samples(), &[1.0, -2.0, -2.0, -2.0]);
        // The source signal is untouched
        assert!(signal.samples()[1].is_nan());
    }

    #[test]
    fn test_cleaned_all_nan() {
        let cleaned = Signal::from_samples(&[f64::NAN, f64::NAN], 10.0).cleaned();
        assert_eq!(cleaned.samples(), &[0.0, 0.0]);
    }

    #[test]
    fn test_stack_rows() {
        let a = Signal::from_samples(&[1.0, 2.0, 3.0], 10.0);
        let b = Signal::from_samples(&[4.0, 5.0, 6.0], 10.0);
        let matrix = Signal::stack_rows(&[a.clone(), b]).unwrap();

        assert_eq!(matrix.nrows(), 2);
        assert_eq!(matrix[(1, 2)], 6.0);

        let short = Signal::from_samples(&[1.0], 10.0);
        assert!(Signal::stack_rows(&[a, short]).is_err());
    }

    #[test]
    fn test_deinterleave() {
        let channels = deinterleave(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2, 8000.0);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].samples(), &[1.0, 2.0, 3.0]);
        assert_eq!(channels[1].samples(), &[-1.0, -2.0, -3.0]);
    }
}
