//! Spectral peak selection.
//!
//! A peak is a time-frequency cell that dominates its neighborhood in the
//! power matrix. Two policies coexist:
//!
//! - **Optimized**: band-limited adaptive threshold, a peak-strength gate,
//!   temporal density limiting, and an aggressive global cap. Produces far
//!   fewer, far more distinctive peaks.
//! - **Legacy**: the original permissive scan kept for catalogs built before
//!   the quality gates existed.
//!
//! The two policies select different peak sets, so a catalog must be built
//! and queried under a single policy throughout its life.

use std::collections::BTreeMap;

use super::spectrogram::Spectrogram;

/// Side length of the square neighborhood a peak must dominate.
pub const PEAK_BOX_SIZE: usize = 20;

/// Fraction of the theoretical peak density retained by the global cap.
const POINT_EFFICIENCY_OPTIMIZED: f64 = 0.3;
const POINT_EFFICIENCY_LEGACY: f64 = 0.8;

/// Band considered musically informative; everything outside is noise-prone.
const MIN_FREQUENCY_HZ: f64 = 300.0;
const MAX_FREQUENCY_HZ: f64 = 8_000.0;

/// A candidate must be this many times stronger than its neighborhood mean.
const MIN_PEAK_STRENGTH: f64 = 4.0;

/// Temporal thinning: per window of this width, keep the strongest peaks.
const THINNING_WINDOW_SECS: f64 = 1.0 / 15.0;
const PEAKS_PER_WINDOW: usize = 15;

/// Peak selection policy for an entire catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakPolicy {
    /// Quality-gated detection (the `--optimized` path)
    Optimized,
    /// Permissive detection compatible with pre-gate catalogs
    Legacy,
}

impl PeakPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeakPolicy::Optimized => "optimized",
            PeakPolicy::Legacy => "legacy",
        }
    }
}

impl std::fmt::Display for PeakPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A spectral local maximum.
#[derive(Debug, Clone, PartialEq)]
pub struct Peak {
    pub freq_idx: usize,
    pub time_idx: usize,
    /// Bin center frequency in Hz (`freqs[freq_idx]`)
    pub freq: f64,
    /// Segment time in seconds (`times[time_idx]`), absolute within the clip
    pub time: f64,
    /// Power at the cell (`power[freq_idx][time_idx]`)
    pub amplitude: f64,
}

/// Find the spectral peaks of `spec` under the given policy.
///
/// Peaks are returned sorted by time, then frequency.
pub fn find_peaks(spec: &Spectrogram, policy: PeakPolicy) -> Vec<Peak> {
    let rows = spec.rows();
    let cols = spec.cols();
    let half = PEAK_BOX_SIZE / 2;

    if rows <= PEAK_BOX_SIZE || cols <= PEAK_BOX_SIZE {
        return Vec::new();
    }

    let band = match policy {
        PeakPolicy::Optimized => Some(band_rows(&spec.freqs)),
        PeakPolicy::Legacy => None,
    };

    let mean = matrix_mean(&spec.power, band.as_ref());
    let threshold = match policy {
        PeakPolicy::Optimized => 3.0 * mean,
        PeakPolicy::Legacy => 2.0 * mean,
    };

    let (row_lo, row_hi) = match &band {
        Some(range) => (range.start.max(half), range.end.min(rows - half)),
        None => (half, rows - half),
    };

    let mut candidates = Vec::new();
    for i in row_lo..row_hi {
        for j in half..cols - half {
            let value = spec.power[i][j];
            if value <= threshold {
                continue;
            }

            let Some(neighborhood_mean) = neighborhood_dominance(&spec.power, i, j, half) else {
                continue;
            };

            if policy == PeakPolicy::Optimized {
                let strength = if neighborhood_mean > 0.0 {
                    value / neighborhood_mean
                } else {
                    f64::INFINITY
                };
                if strength < MIN_PEAK_STRENGTH {
                    continue;
                }
            }

            candidates.push(Peak {
                freq_idx: i,
                time_idx: j,
                freq: spec.freqs[i],
                time: spec.times[j],
                amplitude: value,
            });
        }
    }

    if policy == PeakPolicy::Optimized {
        candidates = thin_temporally(candidates);
    }

    let efficiency = match policy {
        PeakPolicy::Optimized => POINT_EFFICIENCY_OPTIMIZED,
        PeakPolicy::Legacy => POINT_EFFICIENCY_LEGACY,
    };
    let cap = ((rows * cols) as f64 / (PEAK_BOX_SIZE * PEAK_BOX_SIZE) as f64 * efficiency) as usize;

    candidates.sort_by(compare_by_amplitude);
    candidates.truncate(cap);

    candidates.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.freq.total_cmp(&b.freq)));
    candidates
}

/// Row range whose bin centers fall inside the informative band.
fn band_rows(freqs: &[f64]) -> std::ops::Range<usize> {
    let start = freqs.partition_point(|&f| f < MIN_FREQUENCY_HZ);
    let end = freqs.partition_point(|&f| f <= MAX_FREQUENCY_HZ);
    start..end
}

fn matrix_mean(power: &[Vec<f64>], band: Option<&std::ops::Range<usize>>) -> f64 {
    let rows: &[Vec<f64>] = match band {
        Some(range) => &power[range.start..range.end],
        None => power,
    };

    let mut sum = 0.0;
    let mut count = 0usize;
    for row in rows {
        sum += row.iter().sum::<f64>();
        count += row.len();
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Check local maximality of `power[i][j]` over its square neighborhood.
///
/// Returns the neighborhood mean (center excluded) when the cell is a
/// strict-or-equal maximum, `None` when any neighbor strictly exceeds it.
fn neighborhood_dominance(power: &[Vec<f64>], i: usize, j: usize, half: usize) -> Option<f64> {
    let center = power[i][j];
    let mut sum = 0.0;
    let mut count = 0usize;

    for ni in i - half..=i + half {
        for nj in j - half..=j + half {
            if ni == i && nj == j {
                continue;
            }
            let v = power[ni][nj];
            if v > center {
                return None;
            }
            sum += v;
            count += 1;
        }
    }

    Some(sum / count as f64)
}

/// Partition candidates into fixed time windows and keep the strongest of
/// each, bounding peak density regardless of how busy the material is.
fn thin_temporally(candidates: Vec<Peak>) -> Vec<Peak> {
    let mut windows: BTreeMap<i64, Vec<Peak>> = BTreeMap::new();
    for peak in candidates {
        let window = (peak.time / THINNING_WINDOW_SECS).floor() as i64;
        windows.entry(window).or_default().push(peak);
    }

    let mut kept = Vec::new();
    for (_, mut group) in windows {
        group.sort_by(compare_by_amplitude);
        group.truncate(PEAKS_PER_WINDOW);
        kept.extend(group);
    }
    kept
}

/// Amplitude descending; ties break toward earlier time, then lower frequency.
fn compare_by_amplitude(a: &Peak, b: &Peak) -> std::cmp::Ordering {
    b.amplitude
        .total_cmp(&a.amplitude)
        .then(a.time.total_cmp(&b.time))
        .then(a.freq.total_cmp(&b.freq))
}
