//! Ingest and query coordination over the engine and the catalog.
//!
//! [`SongRecognizer`] owns a [`Database`] handle and a [`Fingerprinter`]
//! configured with one peak policy. Registration is idempotent per path;
//! recognition runs the same pipeline as ingest and hands the lookup result
//! to the matcher.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::audio::{canonicalize, decode_bytes, SongTags};
use crate::db::{Database, SongInfo, MATCH_THRESHOLD};
use crate::engine::{song_id_for_path, Fingerprint, Fingerprinter, PeakPolicy};
use crate::error::Result;
use crate::matcher::{rank_matches, RankedMatch, TOP_MATCHES};

/// Outcome of registering one file.
#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Stored with this many fingerprints
    Registered { hashes: usize },
    /// The song was already in the catalog; nothing was written
    AlreadyRegistered,
    /// The pipeline produced no fingerprints (e.g. short clip in optimized
    /// mode); nothing was written
    NoFingerprints,
}

/// A recognized song with its alignment evidence.
#[derive(Debug, Clone)]
pub struct SongMatch {
    pub info: SongInfo,
    /// Tallest delta-histogram bin
    pub score: usize,
    /// Total hash hits for the winning song
    pub match_count: usize,
    /// Index of the winning bin; `best_bin * 0.5 s` estimates the clip's
    /// position within the song
    pub best_bin: i64,
    pub recognition_time_ms: u64,
}

pub struct SongRecognizer {
    db: Database,
    engine: Fingerprinter,
}

impl SongRecognizer {
    pub fn new(db: Database, policy: PeakPolicy) -> Self {
        SongRecognizer {
            db,
            engine: Fingerprinter::new(policy),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Ingest one file: fingerprint it and store hashes plus metadata in a
    /// single transaction. Re-registering a known path is a no-op.
    pub fn register_song(&self, path: &Path) -> Result<RegisterOutcome> {
        self.db.record_peak_policy(self.engine.policy())?;

        let song_id = song_id_for_path(path);
        if self.db.contains_song(&song_id)? {
            debug!(path = %path.display(), "already registered, skipping");
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        let (fingerprints, tags) = self.engine.fingerprint_file(path)?;
        self.store_fingerprints(fingerprints, SongInfo::new(song_id, tags))
    }

    /// Ingest a clip already in canonical sample form under an explicit
    /// identity. Same idempotence rule as [`register_song`](Self::register_song).
    pub fn register_samples(
        &self,
        samples: &[f64],
        song_id: &str,
        tags: SongTags,
    ) -> Result<RegisterOutcome> {
        self.db.record_peak_policy(self.engine.policy())?;

        if self.db.contains_song(song_id)? {
            debug!(song_id, "already registered, skipping");
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        let fingerprints = self.engine.fingerprint_samples(samples, song_id);
        self.store_fingerprints(fingerprints, SongInfo::new(song_id.to_string(), tags))
    }

    fn store_fingerprints(
        &self,
        fingerprints: Vec<Fingerprint>,
        info: SongInfo,
    ) -> Result<RegisterOutcome> {
        if fingerprints.is_empty() {
            warn!(song_id = %info.song_id, "no fingerprints produced, skipping");
            return Ok(RegisterOutcome::NoFingerprints);
        }

        self.db.store_song(&fingerprints, &info)?;
        info!(
            song_id = %info.song_id,
            hashes = fingerprints.len(),
            title = %info.title,
            artist = %info.artist,
            "registered"
        );
        Ok(RegisterOutcome::Registered {
            hashes: fingerprints.len(),
        })
    }

    /// Identify the song a clip was taken from.
    pub fn recognize_file(&self, path: &Path) -> Result<Option<SongMatch>> {
        let started = Instant::now();
        let (fingerprints, _tags) = self.engine.fingerprint_file(path)?;
        self.recognize_fingerprints(&fingerprints, started)
    }

    /// Identify a clip delivered as a raw container blob (HTTP uploads).
    pub fn recognize_blob(&self, data: Vec<u8>) -> Result<Option<SongMatch>> {
        let started = Instant::now();
        let decoded = decode_bytes(data)?;
        let samples = canonicalize(decoded.samples, decoded.sample_rate, decoded.channels)?;
        let fingerprints = self.engine.fingerprint_samples(&samples, "query");
        self.recognize_fingerprints(&fingerprints, started)
    }

    /// Identify a clip already in canonical sample form.
    pub fn recognize_samples(&self, samples: &[f64]) -> Result<Option<SongMatch>> {
        let started = Instant::now();
        let fingerprints = self.engine.fingerprint_samples(samples, "query");
        self.recognize_fingerprints(&fingerprints, started)
    }

    fn recognize_fingerprints(
        &self,
        fingerprints: &[Fingerprint],
        started: Instant,
    ) -> Result<Option<SongMatch>> {
        if fingerprints.is_empty() {
            return Ok(None);
        }

        self.db.check_peak_policy(self.engine.policy())?;

        let matches = self.db.get_matches(fingerprints, MATCH_THRESHOLD)?;
        if matches.is_empty() {
            debug!("no candidate songs survived the lookup floor");
            return Ok(None);
        }

        let ranked = rank_matches(&matches);
        log_top_matches(&ranked);

        let Some(best) = ranked.into_iter().find(|m| m.score > 0) else {
            return Ok(None);
        };

        let Some(info) = self.db.song_info(&best.song_id)? else {
            // A hash row without its song_info row means a broken ingest
            warn!(song_id = %best.song_id, "winning candidate has no metadata row");
            return Ok(None);
        };

        Ok(Some(SongMatch {
            info,
            score: best.score,
            match_count: best.match_count,
            best_bin: best.best_bin,
            recognition_time_ms: started.elapsed().as_millis() as u64,
        }))
    }

    /// Catalog statistics: `(total_songs, total_hashes)`.
    pub fn stats(&self) -> Result<(i64, i64)> {
        Ok((self.db.total_songs()?, self.db.total_hashes()?))
    }
}

fn log_top_matches(ranked: &[RankedMatch]) {
    for (i, m) in ranked.iter().take(TOP_MATCHES).enumerate() {
        debug!(
            rank = i + 1,
            song_id = %m.song_id,
            score = m.score,
            match_count = m.match_count,
            "candidate"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::{noise, stepped_tone};
    use crate::SAMPLE_RATE;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_DB_SEQ: AtomicU32 = AtomicU32::new(0);

    struct TempDb {
        path: PathBuf,
    }

    impl TempDb {
        fn new() -> Self {
            let seq = TEST_DB_SEQ.fetch_add(1, Ordering::SeqCst);
            let path = std::env::temp_dir().join(format!(
                "soundprint-recognizer-test-{}-{}.db",
                std::process::id(),
                seq
            ));
            let _ = std::fs::remove_file(&path);
            TempDb { path }
        }

        fn recognizer(&self, policy: PeakPolicy) -> SongRecognizer {
            SongRecognizer::new(Database::open_at(&self.path).unwrap(), policy)
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm"] {
                let mut p = self.path.as_os_str().to_owned();
                p.push(suffix);
                let _ = std::fs::remove_file(PathBuf::from(p));
            }
        }
    }

    fn tags(title: &str) -> SongTags {
        SongTags {
            title: title.to_string(),
            artist: "Tester".to_string(),
            album: "Fixtures".to_string(),
        }
    }

    /// Register a clip from samples and return how many hashes were stored.
    fn register(rec: &SongRecognizer, samples: &[f64], song_id: &str, title: &str) -> usize {
        match rec.register_samples(samples, song_id, tags(title)).unwrap() {
            RegisterOutcome::Registered { hashes } => hashes,
            other => panic!("expected Registered, got {:?}", other),
        }
    }

    #[test]
    fn test_exact_clip_recognizes_itself() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);

        let samples = stepped_tone(30.0);
        let stored = register(&rec, &samples, "aaaa000000000000", "Tone A");

        let result = rec.recognize_samples(&samples).unwrap().expect("should match");
        assert_eq!(result.info.song_id, "aaaa000000000000");
        assert_eq!(result.info.title, "Tone A");
        // The unaltered source aligns every hash at delta zero
        assert!(
            result.score * 2 >= stored,
            "score {} should be at least half of {} stored fingerprints",
            result.score,
            stored
        );
        assert_eq!(result.best_bin, 0);
    }

    #[test]
    fn test_offset_clip_reports_shifted_bin() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);

        let samples = stepped_tone(70.0);
        register(&rec, &samples, "aaaa000000000000", "Tone A");

        // Query the 30..50 s window; the winning delta sits near 30 s
        let from = 30 * SAMPLE_RATE as usize;
        let to = 50 * SAMPLE_RATE as usize;
        let result = rec
            .recognize_samples(&samples[from..to])
            .unwrap()
            .expect("offset clip should still match");

        assert_eq!(result.info.song_id, "aaaa000000000000");
        // floor(30 / 0.5) = 60, allowing one bin of segmentation skew
        assert!(
            (59..=60).contains(&result.best_bin),
            "winning bin {} should be near 60",
            result.best_bin
        );
    }

    #[test]
    fn test_noise_matches_nothing() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);

        register(&rec, &stepped_tone(30.0), "aaaa000000000000", "Tone A");

        let result = rec.recognize_samples(&noise(12.0, 0x5eed_cafe)).unwrap();
        assert!(result.is_none(), "white noise must not match the catalog");
    }

    #[test]
    fn test_empty_catalog_matches_nothing() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);
        assert!(rec.recognize_samples(&stepped_tone(15.0)).unwrap().is_none());
    }

    #[test]
    fn test_short_clip_returns_no_match_not_error() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);
        register(&rec, &stepped_tone(30.0), "aaaa000000000000", "Tone A");

        // 5 s is below the optimized-mode floor: empty fingerprints, None
        let clip = stepped_tone(5.0);
        assert!(rec.recognize_samples(&clip).unwrap().is_none());
    }

    #[test]
    fn test_register_twice_is_idempotent() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);

        let samples = stepped_tone(30.0);
        register(&rec, &samples, "aaaa000000000000", "Tone A");
        let (songs, hashes) = rec.stats().unwrap();
        assert_eq!(songs, 1);

        let second = rec
            .register_samples(&samples, "aaaa000000000000", tags("Tone A"))
            .unwrap();
        assert_eq!(second, RegisterOutcome::AlreadyRegistered);

        let (songs2, hashes2) = rec.stats().unwrap();
        assert_eq!((songs, hashes), (songs2, hashes2), "re-ingest must not grow the catalog");
    }

    #[test]
    fn test_register_missing_file_errors() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);
        assert!(rec.register_song(Path::new("/nonexistent/clip.wav")).is_err());
    }

    #[test]
    fn test_two_songs_disambiguate() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);

        let song_a = stepped_tone(30.0);
        let song_b: Vec<f64> = noise(30.0, 0xb0b).iter().map(|v| v * 0.5).collect();

        register(&rec, &song_a, "aaaa000000000000", "Tone A");
        // Noise may fingerprint thinly; either outcome is fine here
        rec.register_samples(&song_b, "bbbb000000000000", tags("Noise B"))
            .unwrap();

        let from = 5 * SAMPLE_RATE as usize;
        let to = 25 * SAMPLE_RATE as usize;
        let result = rec
            .recognize_samples(&song_a[from..to])
            .unwrap()
            .expect("clip of song A should match");
        assert_eq!(result.info.song_id, "aaaa000000000000");
    }

    #[test]
    fn test_policy_mismatch_rejected_on_query() {
        let tmp = TempDb::new();
        let rec = tmp.recognizer(PeakPolicy::Optimized);
        register(&rec, &stepped_tone(30.0), "aaaa000000000000", "Tone A");
        drop(rec);

        let legacy = tmp.recognizer(PeakPolicy::Legacy);
        let err = legacy.recognize_samples(&stepped_tone(15.0)).unwrap_err();
        assert!(err.to_string().contains("peak policy"), "got: {}", err);
    }
}
