//! Windowed STFT producing the power matrix the peak finder scans.
//!
//! Parameters are fixed by the fingerprint format and must not drift:
//! window size `N = round(Fs * 0.046)` samples, 50 % overlap, Hamming
//! window. Changing any of them changes every hash downstream, which
//! silently orphans an existing catalog.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::SAMPLE_RATE;

/// STFT window length as a fraction of a second.
pub const FFT_WINDOW_SECS: f64 = 0.046;

/// Window length in samples (1014 at the canonical rate).
pub fn window_size() -> usize {
    (SAMPLE_RATE as f64 * FFT_WINDOW_SECS).round() as usize
}

/// Power spectrogram with labeled axes.
///
/// `power` is indexed `[freq_bin][segment]`; `freqs[k] = k * Fs / N` and
/// `times[i]` is the start of segment `i` in seconds.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub freqs: Vec<f64>,
    pub times: Vec<f64>,
    pub power: Vec<Vec<f64>>,
}

impl Spectrogram {
    /// Number of frequency bins (rows of `power`).
    pub fn rows(&self) -> usize {
        self.power.len()
    }

    /// Number of time segments (columns of `power`).
    pub fn cols(&self) -> usize {
        self.power.first().map(|row| row.len()).unwrap_or(0)
    }
}

/// STFT processor owning a cached FFT plan and the precomputed window.
///
/// Plan construction is the cold-path cost; it amortizes over every segment
/// the processor computes. Processors are cheap enough to build one per
/// worker thread, which is also the sharing rule: a plan never crosses a
/// thread boundary.
pub struct SpectrogramProcessor {
    size: usize,
    hop: usize,
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
}

impl SpectrogramProcessor {
    pub fn new() -> Self {
        let size = window_size();
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        SpectrogramProcessor {
            size,
            hop: size - size / 2,
            fft,
            window: hamming_window(size),
        }
    }

    /// Compute the power spectrogram of a canonical (mono, 22,050 Hz) signal.
    ///
    /// The trailing segment is zero-padded when the signal ends mid-window.
    /// Signals shorter than half a window produce zero segments.
    pub fn compute(&self, samples: &[f64]) -> Spectrogram {
        let overlap = self.size / 2;
        let freq_bins = self.size / 2 + 1;
        let segments = samples.len().saturating_sub(overlap) / self.hop;

        let freq_step = SAMPLE_RATE as f64 / self.size as f64;
        let freqs: Vec<f64> = (0..freq_bins).map(|k| k as f64 * freq_step).collect();

        let time_step = self.hop as f64 / SAMPLE_RATE as f64;
        let times: Vec<f64> = (0..segments).map(|i| i as f64 * time_step).collect();

        let mut power = vec![vec![0.0; segments]; freq_bins];
        let mut buffer: Vec<Complex<f64>> = vec![Complex::new(0.0, 0.0); self.size];

        for seg in 0..segments {
            let start = seg * self.hop;
            let available = (samples.len() - start).min(self.size);

            for n in 0..available {
                buffer[n] = Complex::new(samples[start + n] * self.window[n], 0.0);
            }
            for slot in buffer.iter_mut().skip(available) {
                *slot = Complex::new(0.0, 0.0);
            }

            self.fft.process(&mut buffer);

            for (k, row) in power.iter_mut().enumerate() {
                row[seg] = buffer[k].norm_sqr();
            }
        }

        Spectrogram { freqs, times, power }
    }
}

impl Default for SpectrogramProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Hamming window: `w[n] = 0.54 - 0.46 * cos(2*pi*n / (N-1))`.
fn hamming_window(size: usize) -> Vec<f64> {
    let factor = 2.0 * std::f64::consts::PI / (size - 1) as f64;
    (0..size).map(|n| 0.54 - 0.46 * (factor * n as f64).cos()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_is_1014() {
        assert_eq!(window_size(), 1014, "round(22050 * 0.046)");
    }

    #[test]
    fn test_hamming_window_shape() {
        let w = hamming_window(window_size());

        // Hamming (unlike Hann) does not reach zero at the edges
        assert!((w[0] - 0.08).abs() < 1e-9, "edge should be 0.54 - 0.46 = 0.08");
        let mid = w[w.len() / 2];
        assert!(mid > 0.99, "center should approach 1.0, got {}", mid);

        for i in 0..w.len() / 2 {
            assert!(
                (w[i] - w[w.len() - 1 - i]).abs() < 1e-9,
                "window should be symmetric at index {}",
                i
            );
        }
    }

    #[test]
    fn test_axes_match_fft_parameters() {
        let processor = SpectrogramProcessor::new();
        let samples = vec![0.1; SAMPLE_RATE as usize];
        let spec = processor.compute(&samples);

        assert_eq!(spec.freqs.len(), 1014 / 2 + 1);
        let freq_step = SAMPLE_RATE as f64 / 1014.0;
        assert!((spec.freqs[1] - freq_step).abs() < 1e-9);
        assert!((spec.freqs[507] - 507.0 * freq_step).abs() < 1e-9);

        // hop = N - N/2 = 507; one second of audio gives (22050 - 507) / 507 segments
        let expected_segments = (SAMPLE_RATE as usize - 507) / 507;
        assert_eq!(spec.cols(), expected_segments);
        assert!((spec.times[1] - 507.0 / SAMPLE_RATE as f64).abs() < 1e-12);
    }

    #[test]
    fn test_constant_signal_concentrates_at_dc() {
        let processor = SpectrogramProcessor::new();
        let spec = processor.compute(&vec![0.5; SAMPLE_RATE as usize]);

        for seg in 0..spec.cols() {
            let dc = spec.power[0][seg];
            for k in 2..spec.rows() {
                assert!(
                    spec.power[k][seg] < dc,
                    "bin {} should be below DC for a constant signal",
                    k
                );
            }
        }
    }

    #[test]
    fn test_tone_lands_in_expected_bin() {
        let processor = SpectrogramProcessor::new();
        let freq = 1000.0;
        let samples: Vec<f64> = (0..SAMPLE_RATE as usize)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64).sin())
            .collect();
        let spec = processor.compute(&samples);

        let expected_bin = (freq / (SAMPLE_RATE as f64 / 1014.0)).round() as usize;
        for seg in 0..spec.cols() {
            let (max_bin, _) = spec
                .power
                .iter()
                .enumerate()
                .map(|(k, row)| (k, row[seg]))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap();
            assert!(
                (max_bin as i64 - expected_bin as i64).abs() <= 1,
                "segment {}: peak bin {} far from expected {}",
                seg,
                max_bin,
                expected_bin
            );
        }
    }

    #[test]
    fn test_short_signal_yields_no_segments() {
        let processor = SpectrogramProcessor::new();
        let spec = processor.compute(&vec![0.5; 100]);
        assert_eq!(spec.cols(), 0);
        assert_eq!(spec.times.len(), 0);
        assert_eq!(spec.freqs.len(), 508, "axis labels exist even with no segments");
    }

    #[test]
    fn test_power_is_nonnegative() {
        let processor = SpectrogramProcessor::new();
        let samples: Vec<f64> = (0..22_050)
            .map(|i| (i as f64 * 0.37).sin() - 0.5 * (i as f64 * 0.11).cos())
            .collect();
        let spec = processor.compute(&samples);
        for row in &spec.power {
            assert!(row.iter().all(|&v| v >= 0.0));
        }
    }
}
