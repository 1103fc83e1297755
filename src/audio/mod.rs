//! Audio input: container decoding, down-mixing, and resampling.
//!
//! The engine consumes one representation only: mono f64 samples at
//! 22,050 Hz. [`decode`] turns files or raw blobs into PCM plus tags;
//! [`resample`] reduces that PCM to the canonical form.

pub mod decode;
pub mod resample;

pub use decode::{decode_bytes, decode_file, is_supported, DecodedAudio, SongTags};
pub use resample::{canonicalize, downmix_stereo};
