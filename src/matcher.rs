//! Offset-coherence scoring.
//!
//! A true match produces many hash hits whose catalog offsets all lead the
//! query offsets by the same amount: the clip's position inside the song.
//! Histogramming `db_offset - query_offset` per candidate therefore piles a
//! real match into one tall bin, while collision noise spreads thin across
//! many bins. The tallest bin is the score.

use std::collections::{BTreeMap, HashMap};

/// Histogram bin width in seconds.
const BIN_WIDTH_SECS: f64 = 0.5;

/// How many ranked candidates are surfaced for diagnostics.
pub const TOP_MATCHES: usize = 10;

/// One hash hit: where the hash sits in the catalog vs. in the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOffset {
    pub db_offset: f64,
    pub query_offset: f64,
}

/// A scored candidate song.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedMatch {
    pub song_id: String,
    /// Count of the tallest delta-histogram bin
    pub score: usize,
    /// Total hash hits for the song
    pub match_count: usize,
    /// Index of the tallest bin; `best_bin * 0.5 s` approximates the clip's
    /// position within the song
    pub best_bin: i64,
}

/// Score one candidate's offsets: the tallest 0.5 s delta bin and its index.
///
/// Floor division keeps negative deltas (clip "ahead of" a colliding song)
/// in their own bins instead of folding them onto bin zero.
pub fn score_offsets(offsets: &[MatchOffset]) -> (usize, i64) {
    let mut histogram: BTreeMap<i64, usize> = BTreeMap::new();
    for offset in offsets {
        let delta = offset.db_offset - offset.query_offset;
        let bin = (delta / BIN_WIDTH_SECS).floor() as i64;
        *histogram.entry(bin).or_insert(0) += 1;
    }

    histogram
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .map(|(bin, count)| (count, bin))
        .unwrap_or((0, 0))
}

/// Rank every candidate best-first.
///
/// Order: score descending, then match count descending, then `song_id`
/// ascending so equal candidates resolve the same way on every run.
pub fn rank_matches(matches: &HashMap<String, Vec<MatchOffset>>) -> Vec<RankedMatch> {
    let mut ranked: Vec<RankedMatch> = matches
        .iter()
        .map(|(song_id, offsets)| {
            let (score, best_bin) = score_offsets(offsets);
            RankedMatch {
                song_id: song_id.clone(),
                score,
                match_count: offsets.len(),
                best_bin,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.match_count.cmp(&a.match_count))
            .then(a.song_id.cmp(&b.song_id))
    });
    ranked
}

/// The winning candidate, if any scored at all.
pub fn best_match(matches: &HashMap<String, Vec<MatchOffset>>) -> Option<RankedMatch> {
    rank_matches(matches).into_iter().find(|m| m.score > 0)
}
