//! Landmark pairing and hash generation.
//!
//! Each peak acts as an anchor and is paired with peaks inside a bounded
//! time-frequency zone ahead of it. A pair maps to a 40-bit hash; the hash
//! plus the anchor's absolute time is what the catalog stores and what a
//! query presents. The mapping is pure integer arithmetic after the floor
//! conversions, so identical peaks always yield identical hashes on any
//! platform — the interop requirement for sharing a catalog.

use std::collections::HashSet;

use super::peaks::Peak;

/// Target zone geometry, relative to the anchor.
const TARGET_START_SECS: f64 = 0.02;
const TARGET_SPAN_SECS: f64 = 0.5;
const TARGET_BAND_HZ: f64 = 500.0;

/// At most this many targets are paired with one anchor.
const TARGET_ZONE_POINTS: usize = 5;

/// Hashes occupy the low 40 bits.
const HASH_MASK: i64 = 0xFF_FFFF_FFFF;

/// A stored or transient `(hash, anchor_time, song_id)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    /// 40-bit landmark hash
    pub hash: i64,
    /// Anchor time in seconds from the start of the source clip
    pub offset: f64,
    /// Owning catalog entry (16 hex chars)
    pub song_id: String,
}

/// Combine an anchor/target pair into a 40-bit hash.
///
/// Layout: 14 bits anchor frequency (decihertz), 14 bits target frequency,
/// 12 bits time delta (tenths of a millisecond), each field masked to width.
pub fn hash_peak_pair(anchor: &Peak, target: &Peak) -> i64 {
    let f1 = (anchor.freq * 10.0).floor() as i64 & 0x3FFF;
    let f2 = (target.freq * 10.0).floor() as i64 & 0x3FFF;
    let dt = ((target.time - anchor.time) * 10_000.0).floor() as i64 & 0xFFF;

    ((f1 << 26) | (f2 << 12) | dt) & HASH_MASK
}

/// Peaks in the anchor's target zone, strongest first, capped at
/// [`TARGET_ZONE_POINTS`]. `peaks` must be sorted by time; the scan starts
/// just past the anchor and stops at the zone's far edge.
fn target_zone<'a>(peaks: &'a [Peak], anchor_idx: usize) -> Vec<&'a Peak> {
    let anchor = &peaks[anchor_idx];
    let t_min = anchor.time + TARGET_START_SECS;
    let t_max = t_min + TARGET_SPAN_SECS;
    let f_min = anchor.freq - TARGET_BAND_HZ * 0.5;
    let f_max = anchor.freq + TARGET_BAND_HZ * 0.5;

    let mut zone: Vec<&Peak> = Vec::new();
    for peak in &peaks[anchor_idx + 1..] {
        if peak.time > t_max {
            break;
        }
        if peak.time >= t_min && peak.freq >= f_min && peak.freq <= f_max {
            zone.push(peak);
        }
    }

    if zone.len() > TARGET_ZONE_POINTS {
        zone.sort_by(|a, b| {
            b.amplitude
                .total_cmp(&a.amplitude)
                .then(a.time.total_cmp(&b.time))
                .then(a.freq.total_cmp(&b.freq))
        });
        zone.truncate(TARGET_ZONE_POINTS);
    }

    zone
}

/// Hash every anchor/target pair of a time-sorted peak list.
///
/// Duplicate hashes are suppressed; because anchors are visited in time
/// order, the fingerprint that survives for a given hash carries its
/// earliest anchor time.
pub fn hash_peaks(peaks: &[Peak], song_id: &str) -> Vec<Fingerprint> {
    let mut seen: HashSet<i64> = HashSet::new();
    let mut fingerprints = Vec::new();

    for anchor_idx in 0..peaks.len() {
        let anchor = &peaks[anchor_idx];
        for target in target_zone(peaks, anchor_idx) {
            let hash = hash_peak_pair(anchor, target);
            if seen.insert(hash) {
                fingerprints.push(Fingerprint {
                    hash,
                    offset: anchor.time,
                    song_id: song_id.to_string(),
                });
            }
        }
    }

    fingerprints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(freq: f64, time: f64, amplitude: f64) -> Peak {
        Peak {
            freq_idx: 0,
            time_idx: 0,
            freq,
            time,
            amplitude,
        }
    }

    #[test]
    fn test_hash_bit_layout() {
        // 1000.0 Hz -> 10000 decihertz; 1250.0 Hz -> 12500; dt 0.1 s -> 1000
        let anchor = peak(1000.0, 1.0, 1.0);
        let target = peak(1250.0, 1.1, 1.0);

        // 1.1 - 1.0 rounds a hair above 0.1 in f64, so the floor stays 1000
        let expected = (10_000i64 << 26) | (12_500i64 << 12) | 1000;
        let got = hash_peak_pair(&anchor, &target);
        assert_eq!(got, expected, "got {:#x}, expected {:#x}", got, expected);
    }

    #[test]
    fn test_hash_fits_forty_bits() {
        // Frequencies above 1638.3 Hz overflow 14 bits and must wrap, not grow
        let anchor = peak(7800.0, 0.0, 1.0);
        let target = peak(7990.0, 0.5, 1.0);
        let hash = hash_peak_pair(&anchor, &target);
        assert!(hash >= 0);
        assert!(hash < 1 << 40, "hash {:#x} exceeds 40 bits", hash);
    }

    #[test]
    fn test_hash_is_deterministic() {
        let anchor = peak(523.25, 3.7, 2.0);
        let target = peak(659.25, 3.9, 1.0);
        assert_eq!(hash_peak_pair(&anchor, &target), hash_peak_pair(&anchor, &target));
    }

    #[test]
    fn test_target_zone_time_bounds() {
        let peaks = vec![
            peak(1000.0, 0.0, 1.0),  // anchor
            peak(1000.0, 0.01, 1.0), // before zone start
            peak(1000.0, 0.02, 1.0), // on the near edge: included
            peak(1000.0, 0.30, 1.0), // inside
            peak(1000.0, 0.52, 1.0), // on the far edge: included
            peak(1000.0, 0.53, 1.0), // past the zone
        ];
        let zone = target_zone(&peaks, 0);
        let times: Vec<f64> = zone.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![0.02, 0.30, 0.52]);
    }

    #[test]
    fn test_target_zone_frequency_bounds() {
        let peaks = vec![
            peak(1000.0, 0.0, 1.0), // anchor
            peak(749.0, 0.1, 1.0),  // below the band
            peak(750.0, 0.1, 1.0),  // on the lower edge: included
            peak(1250.0, 0.1, 1.0), // on the upper edge: included
            peak(1251.0, 0.1, 1.0), // above the band
        ];
        let zone = target_zone(&peaks, 0);
        let freqs: Vec<f64> = zone.iter().map(|p| p.freq).collect();
        assert_eq!(freqs, vec![750.0, 1250.0]);
    }

    #[test]
    fn test_target_zone_keeps_five_strongest() {
        let mut peaks = vec![peak(1000.0, 0.0, 1.0)];
        for k in 0..8 {
            peaks.push(peak(1000.0 + k as f64, 0.1 + 0.01 * k as f64, k as f64));
        }
        let zone = target_zone(&peaks, 0);
        assert_eq!(zone.len(), TARGET_ZONE_POINTS);
        assert!(
            zone.iter().all(|p| p.amplitude >= 3.0),
            "the five largest amplitudes (3..=7) should survive"
        );
    }

    #[test]
    fn test_fingerprints_have_unique_hashes() {
        // A repeating pattern guarantees identical pairs at several anchors
        let mut peaks = Vec::new();
        for rep in 0..10 {
            let base = rep as f64 * 2.0;
            peaks.push(peak(1000.0, base, 5.0));
            peaks.push(peak(1100.0, base + 0.1, 4.0));
            peaks.push(peak(1200.0, base + 0.2, 3.0));
        }

        let fingerprints = hash_peaks(&peaks, "00d1ceb00k000000");
        let mut hashes: Vec<i64> = fingerprints.iter().map(|f| f.hash).collect();
        let before = hashes.len();
        hashes.sort_unstable();
        hashes.dedup();
        assert_eq!(hashes.len(), before, "duplicate hashes must be suppressed");
        assert!(before > 0);
    }

    #[test]
    fn test_dedup_keeps_earliest_anchor() {
        // dt = 0.25 is exact in binary, so both pairs floor identically
        let peaks = vec![
            peak(1000.0, 0.0, 1.0),
            peak(1100.0, 0.25, 1.0),
            peak(1000.0, 5.0, 1.0),
            peak(1100.0, 5.25, 1.0),
        ];
        let fingerprints = hash_peaks(&peaks, "deadbeefdeadbeef");
        assert_eq!(fingerprints.len(), 1, "identical landmarks collapse to one hash");
        assert_eq!(fingerprints[0].offset, 0.0, "the earliest anchor time wins");
    }

    #[test]
    fn test_all_hashes_under_forty_bits() {
        let mut peaks = Vec::new();
        for k in 0..200 {
            let freq = 300.0 + (k as f64 * 37.7) % 7_700.0;
            peaks.push(peak(freq, k as f64 * 0.03, (k % 17) as f64));
        }
        peaks.sort_by(|a, b| a.time.total_cmp(&b.time));

        for f in hash_peaks(&peaks, "0123456789abcdef") {
            assert!(f.hash >= 0 && f.hash < 1 << 40, "hash {:#x} out of range", f.hash);
        }
    }
}
