//! The fingerprinting engine: spectrogram → peaks → landmark hashes.
//!
//! [`Fingerprinter`] coordinates the pipeline for one clip. Short clips run
//! on the calling thread; long clips are split into overlapping chunks and
//! fanned out across worker threads, then the per-chunk peak lists are
//! merged and de-duplicated at the seams. Every worker owns its own
//! [`SpectrogramProcessor`], so FFT plan state never crosses threads.

pub mod landmarks;
pub mod peaks;
pub mod spectrogram;

pub use landmarks::{hash_peak_pair, hash_peaks, Fingerprint};
pub use peaks::{find_peaks, Peak, PeakPolicy, PEAK_BOX_SIZE};
pub use spectrogram::{Spectrogram, SpectrogramProcessor};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::audio::{canonicalize, decode_file, SongTags};
use crate::error::Result;
use crate::SAMPLE_RATE;

/// Clips longer than this are fanned out across chunk workers.
const PARALLEL_THRESHOLD_SECS: f64 = 60.0;

/// Overlap carried into the next chunk so no landmark straddling a boundary
/// is lost.
const CHUNK_OVERLAP_SECS: f64 = 2.0;

/// Upper bound on chunk workers regardless of core count.
const MAX_CHUNK_WORKERS: usize = 4;

/// Optimized mode refuses clips shorter than this: too few peaks survive
/// the quality gates to score reliably.
const MIN_CLIP_SECS: f64 = 10.0;

/// Two merged peaks closer than this in both axes are the same peak seen
/// from two chunks.
const DUP_TIME_EPS: f64 = 0.1;
const DUP_FREQ_EPS: f64 = 50.0;

/// Quality gate: warn below these counts, but keep going.
const MIN_PEAKS_PARALLEL: usize = 100;
const MIN_PEAKS_SHORT: usize = 50;

/// Stable 16-hex-char identifier for a catalog entry, derived from its path.
pub fn song_id_for_path(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.to_string_lossy().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Pipeline coordinator for one peak policy.
pub struct Fingerprinter {
    policy: PeakPolicy,
}

impl Fingerprinter {
    pub fn new(policy: PeakPolicy) -> Self {
        Fingerprinter { policy }
    }

    pub fn policy(&self) -> PeakPolicy {
        self.policy
    }

    /// Decode, canonicalize, and fingerprint a file.
    ///
    /// The song id is derived from the path; tags come back alongside the
    /// fingerprints so ingest can store both in one transaction.
    pub fn fingerprint_file(&self, path: &Path) -> Result<(Vec<Fingerprint>, SongTags)> {
        let (decoded, tags) = decode_file(path)?;
        let samples = canonicalize(decoded.samples, decoded.sample_rate, decoded.channels)?;
        let fingerprints = self.fingerprint_samples(&samples, &song_id_for_path(path));
        Ok((fingerprints, tags))
    }

    /// Fingerprint a canonical (mono, 22,050 Hz) sample buffer.
    ///
    /// Returns an empty list for sub-10-second clips in optimized mode;
    /// callers treat that as "skip" (ingest) or "no match" (query).
    pub fn fingerprint_samples(&self, samples: &[f64], song_id: &str) -> Vec<Fingerprint> {
        let duration = samples.len() as f64 / SAMPLE_RATE as f64;

        if self.policy == PeakPolicy::Optimized && duration < MIN_CLIP_SECS {
            warn!(
                duration_secs = duration,
                "clip shorter than {} s in optimized mode; no fingerprints emitted",
                MIN_CLIP_SECS
            );
            return Vec::new();
        }

        let peaks = if duration > PARALLEL_THRESHOLD_SECS {
            self.parallel_peaks(samples)
        } else {
            let processor = SpectrogramProcessor::new();
            let spec = processor.compute(samples);
            let peaks = find_peaks(&spec, self.policy);
            if peaks.len() < MIN_PEAKS_SHORT {
                warn!(peaks = peaks.len(), "low peak count; match quality may suffer");
            }
            peaks
        };

        debug!(peaks = peaks.len(), duration_secs = duration, "peak extraction done");
        hash_peaks(&peaks, song_id)
    }

    /// Chunked peak extraction for long clips.
    ///
    /// Chunks overlap by [`CHUNK_OVERLAP_SECS`] at interior boundaries and
    /// each worker reports peak times offset to the clip's absolute
    /// timeline, so the merged list reads as if one thread had scanned the
    /// whole clip.
    fn parallel_peaks(&self, samples: &[f64]) -> Vec<Peak> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_CHUNK_WORKERS)
            .max(1);

        let overlap = (CHUNK_OVERLAP_SECS * SAMPLE_RATE as f64) as usize;
        let base = samples.len().div_ceil(workers);

        let mut ranges = Vec::with_capacity(workers);
        for w in 0..workers {
            let start = w * base;
            if start >= samples.len() {
                break;
            }
            let end = if w + 1 == workers {
                samples.len()
            } else {
                ((w + 1) * base + overlap).min(samples.len())
            };
            ranges.push((start, end));
        }

        let policy = self.policy;
        let mut merged: Vec<Peak> = ranges
            .into_par_iter()
            .map(|(start, end)| {
                let processor = SpectrogramProcessor::new();
                let spec = processor.compute(&samples[start..end]);
                let mut peaks = find_peaks(&spec, policy);
                let base_time = start as f64 / SAMPLE_RATE as f64;
                for peak in peaks.iter_mut() {
                    peak.time += base_time;
                }
                peaks
            })
            .reduce(Vec::new, |mut acc, mut chunk| {
                acc.append(&mut chunk);
                acc
            });

        merged.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.freq.total_cmp(&b.freq)));
        let peaks = dedup_boundary_peaks(merged);

        if peaks.len() < MIN_PEAKS_PARALLEL {
            warn!(peaks = peaks.len(), "low peak count; match quality may suffer");
        }
        peaks
    }
}

/// Drop near-duplicate peaks produced by chunk overlap.
///
/// Input must be sorted by time; of any cluster within [`DUP_TIME_EPS`] and
/// [`DUP_FREQ_EPS`], the earliest peak survives.
fn dedup_boundary_peaks(sorted: Vec<Peak>) -> Vec<Peak> {
    let mut kept: Vec<Peak> = Vec::with_capacity(sorted.len());

    'next: for candidate in sorted {
        for prior in kept.iter().rev() {
            if candidate.time - prior.time >= DUP_TIME_EPS {
                break;
            }
            if (candidate.freq - prior.freq).abs() < DUP_FREQ_EPS {
                continue 'next;
            }
        }
        kept.push(candidate);
    }

    kept
}
