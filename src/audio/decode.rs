//! Container decoding and tag extraction via symphonia.
//!
//! This is the boundary between on-disk audio files and the engine's
//! canonical sample form. Symphonia probes the container (so raw HTTP bodies
//! work without an extension hint), decodes to interleaved f64 PCM, and
//! exposes whatever tags the container carries. Sources with more than two
//! channels are folded to mono here; the one- and two-channel cases are left
//! for the resampler's down-mix so the canonical path stays bit-exact.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

use crate::error::{Error, Result};

/// Extensions accepted by batch ingest, lowercase, without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "m4a"];

/// Decoded PCM plus the facts needed to canonicalize it.
#[derive(Debug)]
pub struct DecodedAudio {
    /// Interleaved samples (frame-major) for `channels` <= 2, mono otherwise
    pub samples: Vec<f64>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Song tags pulled from the container, with fallbacks already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongTags {
    pub title: String,
    pub artist: String,
    pub album: String,
}

impl SongTags {
    fn unknown() -> Self {
        SongTags {
            title: String::new(),
            artist: String::new(),
            album: String::new(),
        }
    }

    /// Fill empty fields: the file stem stands in for a missing title,
    /// everything else becomes `"Unknown"`.
    fn apply_fallbacks(mut self, path: &Path) -> Self {
        if self.title.is_empty() {
            self.title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        for field in [&mut self.title, &mut self.artist, &mut self.album] {
            if field.is_empty() {
                *field = "Unknown".to_string();
            }
        }
        self
    }
}

/// Whether the path's extension is in the ingest allowlist.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode an audio file into PCM and extract its tags.
///
/// Fails with [`Error::UnsupportedFormat`] for extensions outside the
/// allowlist and [`Error::DecodeFailed`] for container or codec errors.
pub fn decode_file(path: &Path) -> Result<(DecodedAudio, SongTags)> {
    if !is_supported(path) {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("(none)")
            .to_string();
        return Err(Error::UnsupportedFormat(ext));
    }

    let file = File::open(path)
        .map_err(|e| Error::DecodeFailed(format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let (audio, tags) = decode_stream(mss, hint)?;
    Ok((audio, tags.apply_fallbacks(path)))
}

/// Decode an in-memory blob (HTTP upload); the format is sniffed.
pub fn decode_bytes(data: Vec<u8>) -> Result<DecodedAudio> {
    let cursor = std::io::Cursor::new(data);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());
    let (audio, _tags) = decode_stream(mss, Hint::new())?;
    Ok(audio)
}

fn decode_stream(mss: MediaSourceStream, hint: Hint) -> Result<(DecodedAudio, SongTags)> {
    let format_opts = FormatOptions::default();
    let metadata_opts = MetadataOptions::default();
    let decoder_opts = DecoderOptions::default();

    let mut probed = symphonia::default::get_probe()
        .format(&hint, mss, &format_opts, &metadata_opts)
        .map_err(|e| Error::DecodeFailed(e.to_string()))?;

    let mut tags = SongTags::unknown();
    if let Some(metadata) = probed.metadata.get() {
        if let Some(rev) = metadata.current() {
            read_tags(&mut tags, rev);
        }
    }

    let mut format = probed.format;
    if let Some(rev) = format.metadata().current() {
        read_tags(&mut tags, rev);
    }

    let track = format
        .default_track()
        .ok_or_else(|| Error::DecodeFailed("no default audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::DecodeFailed("unknown sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(|e| Error::DecodeFailed(e.to_string()))?;

    let mut samples: Vec<f64> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut channels = 0u16;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            // End of stream; decode errors mid-file also terminate here
            Err(_) => break,
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // Skip corrupt packets rather than failing the whole file
            Err(_) => continue,
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            sample_buf = Some(SampleBuffer::new(capacity, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            let channel_count = decoded.spec().channels.count();
            buf.copy_interleaved_ref(decoded);

            if channel_count <= 2 {
                channels = channel_count as u16;
                samples.extend(buf.samples().iter().map(|&s| s as f64));
            } else {
                // Surround material: fold every frame to mono here so the
                // canonical down-mix only ever sees 1 or 2 channels.
                channels = 1;
                for frame in buf.samples().chunks(channel_count) {
                    let sum: f64 = frame.iter().map(|&s| s as f64).sum();
                    samples.push(sum / channel_count as f64);
                }
            }
        }
    }

    if samples.is_empty() {
        return Err(Error::DecodeFailed("decoder produced no samples".to_string()));
    }

    Ok((
        DecodedAudio {
            samples,
            sample_rate,
            channels,
        },
        tags,
    ))
}

fn read_tags(tags: &mut SongTags, rev: &MetadataRevision) {
    for tag in rev.tags() {
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) if tags.title.is_empty() => {
                tags.title = tag.value.to_string();
            }
            Some(StandardTagKey::Artist) if tags.artist.is_empty() => {
                tags.artist = tag.value.to_string();
            }
            // Album artist wins over the per-track artist when both exist
            Some(StandardTagKey::AlbumArtist) => {
                tags.artist = tag.value.to_string();
            }
            Some(StandardTagKey::Album) if tags.album.is_empty() => {
                tags.album = tag.value.to_string();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported(Path::new("album/track01.mp3")));
        assert!(is_supported(Path::new("track.FLAC")), "match is case-insensitive");
        assert!(is_supported(Path::new("clip.m4a")));
        assert!(!is_supported(Path::new("clip.ogg")));
        assert!(!is_supported(Path::new("no_extension")));
    }

    #[test]
    fn test_unsupported_extension_is_rejected_before_io() {
        // The file does not exist; the allowlist check must fire first
        let err = decode_file(Path::new("/nonexistent/file.ogg")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_tag_fallbacks_use_file_stem() {
        let tags = SongTags::unknown().apply_fallbacks(&PathBuf::from("/music/Blue Train.flac"));
        assert_eq!(tags.title, "Blue Train");
        assert_eq!(tags.artist, "Unknown");
        assert_eq!(tags.album, "Unknown");
    }

    #[test]
    fn test_tag_fallbacks_keep_existing_fields() {
        let tags = SongTags {
            title: "Naima".to_string(),
            artist: "John Coltrane".to_string(),
            album: String::new(),
        }
        .apply_fallbacks(&PathBuf::from("ignored.wav"));
        assert_eq!(tags.title, "Naima");
        assert_eq!(tags.artist, "John Coltrane");
        assert_eq!(tags.album, "Unknown");
    }
}
