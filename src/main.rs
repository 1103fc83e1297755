use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use soundprint::audio;
use soundprint::db::{self, Database};
use soundprint::engine::{Fingerprinter, PeakPolicy};
use soundprint::recognizer::{RegisterOutcome, SongRecognizer};
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "soundprint")]
#[command(author, version, about = "Identify songs from short audio clips")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Fingerprint database path (overrides the DB_PATH environment variable)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Use the quality-gated peak detection path. A catalog is bound to the
    /// mode it was built with; mixed-mode queries are rejected.
    #[arg(long, global = true)]
    optimized: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recursively register every supported audio file in a directory
    Register {
        /// Directory to scan (.wav .mp3 .flac .m4a)
        directory: PathBuf,
    },

    /// Identify the song a clip was taken from
    Recognize {
        /// Audio clip to identify
        file: PathBuf,
    },

    /// Print catalog statistics
    Stats,

    /// Compute and print fingerprints without touching the catalog
    Fingerprint {
        /// Audio file to fingerprint
        file: PathBuf,
    },

    /// Start the HTTP recognition API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if let Some(workers) = args.workers {
        rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build_global()
            .ok();
    }

    let db_path = args.db.clone().unwrap_or_else(db::default_db_path);
    let policy = if args.optimized {
        PeakPolicy::Optimized
    } else {
        PeakPolicy::Legacy
    };

    match args.command {
        Command::Register { directory } => register(&directory, &db_path, policy),
        Command::Recognize { file } => recognize(&file, &db_path, policy),
        Command::Stats => stats(&db_path),
        Command::Fingerprint { file } => fingerprint(&file, policy),
        Command::Serve { port } => {
            if let Err(e) = soundprint::serve::start(port, db_path, policy) {
                eprintln!("Server error: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
    }
}

fn open_recognizer(db_path: &PathBuf, policy: PeakPolicy) -> Result<SongRecognizer, ExitCode> {
    match Database::open_at(db_path) {
        Ok(db) => Ok(SongRecognizer::new(db, policy)),
        Err(e) => {
            eprintln!("Failed to open catalog at {}: {}", db_path.display(), e);
            Err(ExitCode::FAILURE)
        }
    }
}

fn register(directory: &PathBuf, db_path: &PathBuf, policy: PeakPolicy) -> ExitCode {
    if !directory.is_dir() {
        eprintln!("Not a directory: {}", directory.display());
        return ExitCode::FAILURE;
    }

    let recognizer = match open_recognizer(db_path, policy) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let files: Vec<PathBuf> = WalkDir::new(directory)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && audio::is_supported(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();

    if files.is_empty() {
        eprintln!(
            "No supported audio files found in {} (.wav .mp3 .flac .m4a)",
            directory.display()
        );
        return ExitCode::FAILURE;
    }

    eprintln!("\x1b[1mSoundprint - Registering {} file(s)\x1b[0m", files.len());
    eprintln!("Catalog: {}  Mode: {}", db_path.display(), policy);

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );

    let outcomes: Vec<(PathBuf, Result<RegisterOutcome, soundprint::Error>)> = files
        .par_iter()
        .map(|path| {
            let outcome = recognizer.register_song(path);
            pb.inc(1);
            pb.set_message(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            );
            (path.clone(), outcome)
        })
        .collect();
    pb.finish_and_clear();

    let mut registered = 0usize;
    let mut already = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for (path, outcome) in &outcomes {
        match outcome {
            Ok(RegisterOutcome::Registered { hashes }) => {
                registered += 1;
                println!("\x1b[32m[ok]\x1b[0m      {:>7} hashes  {}", hashes, path.display());
            }
            Ok(RegisterOutcome::AlreadyRegistered) => {
                already += 1;
                println!("\x1b[90m[present]\x1b[0m {:>7}         {}", "-", path.display());
            }
            Ok(RegisterOutcome::NoFingerprints) => {
                skipped += 1;
                println!("\x1b[33m[skipped]\x1b[0m {:>7}         {}", "-", path.display());
            }
            Err(e) => {
                failed += 1;
                eprintln!("\x1b[31m[failed]\x1b[0m  {}: {}", path.display(), e);
            }
        }
    }

    eprintln!("\n\x1b[1mSummary:\x1b[0m");
    eprintln!("  \x1b[32mRegistered:\x1b[0m {}", registered);
    eprintln!("  \x1b[90mPresent:\x1b[0m    {}", already);
    eprintln!("  \x1b[33mSkipped:\x1b[0m    {}", skipped);
    if failed > 0 {
        eprintln!("  \x1b[31mFailed:\x1b[0m     {}", failed);
    }

    match recognizer.stats() {
        Ok((songs, hashes)) => eprintln!("Catalog now holds {} songs / {} hashes", songs, hashes),
        Err(e) => eprintln!("Could not read catalog stats: {}", e),
    }

    ExitCode::SUCCESS
}

fn recognize(file: &PathBuf, db_path: &PathBuf, policy: PeakPolicy) -> ExitCode {
    let recognizer = match open_recognizer(db_path, policy) {
        Ok(r) => r,
        Err(code) => return code,
    };

    match recognizer.recognize_file(file) {
        Ok(Some(m)) => {
            println!("\x1b[32mMatch found!\x1b[0m");
            println!("  Artist:  {}", m.info.artist);
            println!("  Album:   {}", m.info.album);
            println!("  Title:   {}", m.info.title);
            println!("  Song ID: {}", m.info.song_id);
            println!(
                "  Score: {} ({} matching hashes, {} ms)",
                m.score, m.match_count, m.recognition_time_ms
            );
            ExitCode::SUCCESS
        }
        Ok(None) => {
            println!("\x1b[31mNo match found\x1b[0m");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Recognition failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn stats(db_path: &PathBuf) -> ExitCode {
    let db = match Database::open_at(db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to open catalog at {}: {}", db_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let totals = db
        .total_songs()
        .and_then(|songs| db.total_hashes().map(|hashes| (songs, hashes)))
        .and_then(|(songs, hashes)| db.stored_peak_policy().map(|mode| (songs, hashes, mode)));

    match totals {
        Ok((songs, hashes, mode)) => {
            println!("Catalog: {}", db_path.display());
            println!("  Total songs:  {}", songs);
            println!("  Total hashes: {}", hashes);
            if let Some(mode) = mode {
                println!("  Peak policy:  {}", mode);
            }
            if songs > 0 {
                println!("  Hashes/song:  {}", hashes / songs);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Stats query failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn fingerprint(file: &PathBuf, policy: PeakPolicy) -> ExitCode {
    let engine = Fingerprinter::new(policy);
    let started = std::time::Instant::now();

    match engine.fingerprint_file(file) {
        Ok((fingerprints, tags)) => {
            let elapsed = started.elapsed().as_millis();
            println!(
                "Generated {} hashes in {} ms ({} mode)",
                fingerprints.len(),
                elapsed,
                policy
            );
            println!("  Title: {}  Artist: {}  Album: {}", tags.title, tags.artist, tags.album);

            if !fingerprints.is_empty() {
                println!("\nSample hashes:");
                for f in fingerprints.iter().take(10) {
                    println!("  {:#012x} @ {:.3}s", f.hash, f.offset);
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Fingerprinting failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
