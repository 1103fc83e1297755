//! Soundprint - identify songs from short audio clips
//!
//! Soundprint fingerprints audio the way the classic landmark algorithms do:
//! it finds the loudest, most isolated points in a song's spectrogram and
//! remembers how they sit relative to each other. A few seconds of a noisy
//! phone recording preserves enough of that constellation to pick the song
//! back out of a catalog of thousands.
//!
//! # How recognition works
//!
//! 1. **Canonicalize** - decode the container, average stereo down to mono,
//!    and resample to 22,050 Hz ([`audio`]).
//! 2. **Spectrogram** - a Hamming-windowed STFT with 50 % overlap turns the
//!    clip into a power matrix ([`engine::spectrogram`]).
//! 3. **Peaks** - cells that dominate their neighborhood become landmarks;
//!    quality gates keep only strong, well-spread ones ([`engine::peaks`]).
//! 4. **Hashes** - each peak is paired with a handful of peaks just ahead of
//!    it; every pair packs into a 40-bit hash ([`engine::landmarks`]).
//! 5. **Lookup** - query hashes are matched against the SQLite catalog
//!    ([`db`]), and candidates are scored by how consistently their catalog
//!    offsets lead the query offsets ([`matcher`]). A real match piles into
//!    one histogram bin; collision noise does not.
//!
//! # Quick start
//!
//! ```no_run
//! use soundprint::{Database, PeakPolicy, SongRecognizer};
//!
//! let db = Database::open_at("fingerprints.db")?;
//! let recognizer = SongRecognizer::new(db, PeakPolicy::Optimized);
//!
//! recognizer.register_song(std::path::Path::new("library/song.flac"))?;
//!
//! match recognizer.recognize_file(std::path::Path::new("clip.wav"))? {
//!     Some(m) => println!("{} - {} (score {})", m.info.artist, m.info.title, m.score),
//!     None => println!("no match"),
//! }
//! # Ok::<(), soundprint::Error>(())
//! ```
//!
//! # Modules
//!
//! - [`audio`]: decoding, down-mixing, resampling
//! - [`engine`]: the DSP pipeline and its orchestrator
//! - [`db`]: the persistent hash catalog
//! - [`matcher`]: offset-coherence scoring
//! - [`recognizer`]: ingest/query coordination
//! - [`serve`]: the optional HTTP API

pub mod audio;
pub mod db;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod recognizer;
pub mod schema;
pub mod serve;

pub use db::{Database, SongInfo};
pub use engine::{Fingerprint, Fingerprinter, PeakPolicy};
pub use error::{Error, Result};
pub use matcher::{MatchOffset, RankedMatch};
pub use recognizer::{RegisterOutcome, SongMatch, SongRecognizer};

/// The canonical sample rate: every signal entering the engine is mono at
/// this rate, and every stored fingerprint assumes it.
pub const SAMPLE_RATE: u32 = 22_050;
