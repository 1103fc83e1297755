//! SQLite hash catalog with Diesel and an r2d2 connection pool.
//!
//! Two durable tables: `hash_table` maps a 40-bit landmark hash to the
//! `(offset, song_id)` pairs that produced it, and `song_info` holds one
//! metadata row per song. A third single-purpose table, `catalog_meta`,
//! records which peak policy the catalog was built under so a legacy catalog
//! is never silently queried with optimized fingerprints (the hashes would
//! simply never match).
//!
//! Writes are transactional per song: a reader sees all of a song's hashes
//! or none of them. The database runs in WAL mode so lookups proceed against
//! a snapshot while a store holds the write lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;

use crate::audio::SongTags;
use crate::engine::{Fingerprint, PeakPolicy};
use crate::matcher::MatchOffset;
use crate::schema::{catalog_meta, hash_table, song_info};

const DEFAULT_DB_PATH: &str = "fingerprints.db";

/// Minimum hash hits a song needs to stay a candidate.
pub const MATCH_THRESHOLD: usize = 5;

/// Store retry policy for SQLITE_BUSY: linear backoff, then give up.
const STORE_ATTEMPTS: u32 = 3;
const STORE_BACKOFF: Duration = Duration::from_millis(100);

/// Rows per multi-row INSERT; 3 binds per row stays far under the SQLite
/// variable limit.
const INSERT_CHUNK: usize = 1_000;

/// Hashes per IN-clause batch during lookup.
const LOOKUP_CHUNK: usize = 500;

const PEAK_POLICY_KEY: &str = "peak_policy";

/// Resolve the index path: `DB_PATH` env var, else `fingerprints.db`.
pub fn default_db_path() -> PathBuf {
    std::env::var("DB_PATH")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH))
}

/// Catalog entry metadata. `song_id` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Queryable)]
pub struct SongInfo {
    pub song_id: String,
    pub artist: String,
    pub album: String,
    pub title: String,
}

impl SongInfo {
    /// Build from decoded tags, defaulting empty fields to `"Unknown"`.
    pub fn new(song_id: String, tags: SongTags) -> Self {
        let or_unknown = |s: String| if s.is_empty() { "Unknown".to_string() } else { s };
        SongInfo {
            song_id,
            artist: or_unknown(tags.artist),
            album: or_unknown(tags.album),
            title: or_unknown(tags.title),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = hash_table)]
struct NewHashRow<'a> {
    hash: i64,
    offset: f64,
    song_id: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = song_info)]
struct NewSongInfo<'a> {
    song_id: &'a str,
    artist: &'a str,
    album: &'a str,
    title: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = catalog_meta)]
struct NewMeta<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Queryable)]
struct HashRow {
    hash: i64,
    offset: f64,
    song_id: String,
}

/// Error type for catalog operations
#[derive(Debug)]
pub enum DbError {
    Connection(String),
    Query(diesel::result::Error),
    /// Write lock still contended after every retry attempt
    Contention,
    /// Catalog was built under a different peak policy than requested
    PolicyMismatch { stored: String, requested: String },
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::Connection(msg) => write!(f, "connection error: {}", msg),
            DbError::Query(e) => write!(f, "query error: {}", e),
            DbError::Contention => write!(
                f,
                "index write lock contended after {} attempts",
                STORE_ATTEMPTS
            ),
            DbError::PolicyMismatch { stored, requested } => write!(
                f,
                "catalog was built with the '{}' peak policy but '{}' was requested; \
                 fingerprints from different policies never match",
                stored, requested
            ),
        }
    }
}

impl std::error::Error for DbError {}

impl From<diesel::result::Error> for DbError {
    fn from(e: diesel::result::Error) -> Self {
        DbError::Query(e)
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection setup: WAL for reader/writer concurrency and a busy
/// timeout so short lock contention resolves inside SQLite before our own
/// retry loop gets involved.
#[derive(Debug)]
struct ConnectionSetup;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 1000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Handle to the fingerprint catalog.
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (creating if absent) the catalog at the default path.
    pub fn open() -> Result<Self> {
        Self::open_at(default_db_path())
    }

    /// Open (creating if absent) the catalog at `path`.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let url = path.as_ref().to_string_lossy().to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder()
            .max_size(5)
            .connection_customizer(Box::new(ConnectionSetup))
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Database { pool };
        db.init_schema()?;
        Ok(db)
    }

    fn conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.conn()?;

        diesel::sql_query(
            "CREATE TABLE IF NOT EXISTS hash_table (
                hash BIGINT NOT NULL,
                offset DOUBLE NOT NULL,
                song_id TEXT NOT NULL
            )",
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            "CREATE TABLE IF NOT EXISTS song_info (
                song_id TEXT PRIMARY KEY NOT NULL,
                artist TEXT NOT NULL,
                album TEXT NOT NULL,
                title TEXT NOT NULL
            )",
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            "CREATE TABLE IF NOT EXISTS catalog_meta (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )",
        )
        .execute(&mut conn)?;

        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_hash ON hash_table (hash)")
            .execute(&mut conn)?;

        Ok(())
    }

    /// Peak policy this catalog was built under, if any song was stored yet.
    pub fn stored_peak_policy(&self) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let value = catalog_meta::table
            .filter(catalog_meta::key.eq(PEAK_POLICY_KEY))
            .select(catalog_meta::value)
            .first::<String>(&mut conn)
            .optional()?;
        Ok(value)
    }

    /// Record the catalog's peak policy on first write; reject a mismatch.
    pub fn record_peak_policy(&self, policy: PeakPolicy) -> Result<()> {
        match self.stored_peak_policy()? {
            Some(stored) if stored == policy.as_str() => Ok(()),
            Some(stored) => Err(DbError::PolicyMismatch {
                stored,
                requested: policy.as_str().to_string(),
            }),
            None => {
                let mut conn = self.conn()?;
                diesel::insert_or_ignore_into(catalog_meta::table)
                    .values(&NewMeta {
                        key: PEAK_POLICY_KEY,
                        value: policy.as_str(),
                    })
                    .execute(&mut conn)?;
                Ok(())
            }
        }
    }

    /// Reject queries against a catalog built under a different policy.
    /// An unmarked (empty) catalog passes.
    pub fn check_peak_policy(&self, policy: PeakPolicy) -> Result<()> {
        match self.stored_peak_policy()? {
            Some(stored) if stored != policy.as_str() => Err(DbError::PolicyMismatch {
                stored,
                requested: policy.as_str().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Whether a song is already in the catalog (used to skip re-ingest).
    pub fn contains_song(&self, song_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let count: i64 = song_info::table
            .filter(song_info::song_id.eq(song_id))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    /// Store one song's fingerprints and metadata atomically.
    ///
    /// The whole song goes through a single `BEGIN IMMEDIATE` transaction:
    /// the write lock is taken up front and a concurrent reader sees either
    /// none of the rows or all of them. A contended lock is retried up to
    /// [`STORE_ATTEMPTS`] times with linearly growing backoff.
    pub fn store_song(&self, fingerprints: &[Fingerprint], info: &SongInfo) -> Result<()> {
        for attempt in 1..=STORE_ATTEMPTS {
            let mut conn = self.conn()?;
            let result = conn.immediate_transaction(|conn| {
                for chunk in fingerprints.chunks(INSERT_CHUNK) {
                    let rows: Vec<NewHashRow> = chunk
                        .iter()
                        .map(|f| NewHashRow {
                            hash: f.hash,
                            offset: f.offset,
                            song_id: &info.song_id,
                        })
                        .collect();
                    diesel::insert_into(hash_table::table)
                        .values(&rows)
                        .execute(conn)?;
                }

                diesel::replace_into(song_info::table)
                    .values(&NewSongInfo {
                        song_id: &info.song_id,
                        artist: &info.artist,
                        album: &info.album,
                        title: &info.title,
                    })
                    .execute(conn)?;

                Ok::<(), diesel::result::Error>(())
            });

            match result {
                Ok(()) => return Ok(()),
                Err(e) if is_lock_error(&e) => {
                    if attempt == STORE_ATTEMPTS {
                        return Err(DbError::Contention);
                    }
                    std::thread::sleep(STORE_BACKOFF * attempt);
                }
                Err(e) => return Err(DbError::Query(e)),
            }
        }

        Err(DbError::Contention)
    }

    /// Retrieve all catalog offsets matching the query fingerprints, grouped
    /// by song, with groups below `threshold` dropped.
    pub fn get_matches(
        &self,
        fingerprints: &[Fingerprint],
        threshold: usize,
    ) -> Result<HashMap<String, Vec<MatchOffset>>> {
        let mut grouped: HashMap<String, Vec<MatchOffset>> = HashMap::new();
        if fingerprints.is_empty() {
            return Ok(grouped);
        }

        // Query hashes are unique per clip (the hasher deduplicates), so a
        // plain map from hash to query offset is enough to join rows back.
        let query_offsets: HashMap<i64, f64> =
            fingerprints.iter().map(|f| (f.hash, f.offset)).collect();
        let hashes: Vec<i64> = query_offsets.keys().copied().collect();

        let mut conn = self.conn()?;
        for chunk in hashes.chunks(LOOKUP_CHUNK) {
            let rows: Vec<HashRow> = hash_table::table
                .filter(hash_table::hash.eq_any(chunk.to_vec()))
                .load(&mut conn)?;

            for row in rows {
                if let Some(&query_offset) = query_offsets.get(&row.hash) {
                    grouped.entry(row.song_id).or_default().push(MatchOffset {
                        db_offset: row.offset,
                        query_offset,
                    });
                }
            }
        }

        grouped.retain(|_, offsets| offsets.len() >= threshold);
        Ok(grouped)
    }

    /// Metadata for a catalog entry.
    pub fn song_info(&self, song_id: &str) -> Result<Option<SongInfo>> {
        let mut conn = self.conn()?;
        let info = song_info::table
            .filter(song_info::song_id.eq(song_id))
            .first::<SongInfo>(&mut conn)
            .optional()?;
        Ok(info)
    }

    pub fn total_songs(&self) -> Result<i64> {
        let mut conn = self.conn()?;
        Ok(song_info::table.count().get_result(&mut conn)?)
    }

    pub fn total_hashes(&self) -> Result<i64> {
        let mut conn = self.conn()?;
        Ok(hash_table::table.count().get_result(&mut conn)?)
    }
}

/// SQLITE_BUSY and friends surface as database errors whose message names
/// the lock; everything else is a real failure.
fn is_lock_error(e: &diesel::result::Error) -> bool {
    match e {
        diesel::result::Error::DatabaseError(_, info) => {
            let msg = info.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}
