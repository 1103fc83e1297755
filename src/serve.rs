//! HTTP recognition API.
//!
//! `soundprint serve` → a small tiny_http server wrapping the recognizer:
//!
//! - `POST /recognize` — multipart form upload of an audio file
//! - `POST /recognize/stream` — raw audio bytes in the body, format sniffed
//! - `GET /stats` — catalog counters
//! - `GET /health` — liveness probe
//!
//! Responses are JSON. The server is a thin shim: every interesting decision
//! happens in [`SongRecognizer`].

use std::io::Read;
use std::path::PathBuf;

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{error, info};

use crate::db::Database;
use crate::engine::PeakPolicy;
use crate::recognizer::{SongMatch, SongRecognizer};

/// Uploads above this size are rejected outright.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Serialize)]
struct RecognizeResponse {
    #[serde(rename = "match")]
    matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(rename = "songId", skip_serializing_if = "Option::is_none")]
    song_id: Option<String>,
    #[serde(rename = "recognitionTimeMs")]
    recognition_time_ms: u64,
}

impl RecognizeResponse {
    fn from_result(result: Option<SongMatch>, elapsed_ms: u64) -> Self {
        match result {
            Some(m) => RecognizeResponse {
                matched: true,
                artist: Some(m.info.artist),
                album: Some(m.info.album),
                title: Some(m.info.title),
                song_id: Some(m.info.song_id),
                recognition_time_ms: m.recognition_time_ms,
            },
            None => RecognizeResponse {
                matched: false,
                artist: None,
                album: None,
                title: None,
                song_id: None,
                recognition_time_ms: elapsed_ms,
            },
        }
    }
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(rename = "totalSongs")]
    total_songs: i64,
    #[serde(rename = "totalHashes")]
    total_hashes: i64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Start the server and block serving requests.
pub fn start(port: u16, db_path: PathBuf, policy: PeakPolicy) -> std::io::Result<()> {
    let db = Database::open_at(&db_path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let recognizer = SongRecognizer::new(db, policy);

    let addr = format!("0.0.0.0:{}", port);
    let server = Server::http(&addr)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    info!(addr = %addr, db = %db_path.display(), %policy, "serving recognition API");
    eprintln!("Soundprint listening on http://{}", addr);
    eprintln!("  POST /recognize        - multipart audio upload");
    eprintln!("  POST /recognize/stream - raw audio body");
    eprintln!("  GET  /stats            - catalog statistics");
    eprintln!("  GET  /health           - health check");

    for request in server.incoming_requests() {
        handle(&recognizer, request);
    }

    Ok(())
}

fn handle(recognizer: &SongRecognizer, mut request: Request) {
    let url = request.url().to_string();
    let method = request.method().clone();

    let outcome = match (&method, url.as_str()) {
        (Method::Post, "/recognize") => recognize_multipart(recognizer, &mut request),
        (Method::Post, "/recognize/stream") => recognize_stream(recognizer, &mut request),
        (Method::Get, "/stats") => stats(recognizer),
        (Method::Get, "/health") => Ok(json_response(
            200,
            &serde_json::json!({
                "status": "ok",
                "timestamp": chrono::Local::now().to_rfc3339(),
            }),
        )),
        _ => Ok(json_response(
            404,
            &ErrorResponse {
                error: format!("no route for {} {}", method, url),
            },
        )),
    };

    let response = outcome.unwrap_or_else(|msg| {
        error!(%method, %url, error = %msg, "request failed");
        json_response(400, &ErrorResponse { error: msg })
    });

    if let Err(e) = request.respond(response) {
        error!(error = %e, "failed to send response");
    }
}

type HttpResult = std::result::Result<Response<std::io::Cursor<Vec<u8>>>, String>;

fn recognize_multipart(recognizer: &SongRecognizer, request: &mut Request) -> HttpResult {
    let boundary = multipart_boundary(request)
        .ok_or_else(|| "expected multipart/form-data with a boundary".to_string())?;
    let body = read_body(request)?;
    let audio = multipart_file(&body, &boundary)
        .ok_or_else(|| "no file part in multipart body".to_string())?;

    run_recognition(recognizer, audio)
}

fn recognize_stream(recognizer: &SongRecognizer, request: &mut Request) -> HttpResult {
    let body = read_body(request)?;
    if body.is_empty() {
        return Err("empty request body".to_string());
    }
    run_recognition(recognizer, body)
}

fn run_recognition(recognizer: &SongRecognizer, audio: Vec<u8>) -> HttpResult {
    let started = std::time::Instant::now();
    let result = recognizer
        .recognize_blob(audio)
        .map_err(|e| e.to_string())?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(json_response(
        200,
        &RecognizeResponse::from_result(result, elapsed_ms),
    ))
}

fn stats(recognizer: &SongRecognizer) -> HttpResult {
    let (total_songs, total_hashes) = recognizer.stats().map_err(|e| e.to_string())?;
    Ok(json_response(
        200,
        &StatsResponse {
            total_songs,
            total_hashes,
        },
    ))
}

fn read_body(request: &mut Request) -> std::result::Result<Vec<u8>, String> {
    if let Some(len) = request.body_length() {
        if len > MAX_BODY_BYTES {
            return Err(format!("body of {} bytes exceeds the upload limit", len));
        }
    }
    let mut body = Vec::new();
    request
        .as_reader()
        .take(MAX_BODY_BYTES as u64 + 1)
        .read_to_end(&mut body)
        .map_err(|e| e.to_string())?;
    if body.len() > MAX_BODY_BYTES {
        return Err("body exceeds the upload limit".to_string());
    }
    Ok(body)
}

fn json_response<T: Serialize>(status: u16, payload: &T) -> Response<std::io::Cursor<Vec<u8>>> {
    let body = serde_json::to_vec(payload).unwrap_or_else(|_| b"{}".to_vec());
    let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("static header is valid");
    Response::from_data(body)
        .with_status_code(status)
        .with_header(header)
}

/// Pull the boundary parameter out of a multipart Content-Type header.
fn multipart_boundary(request: &Request) -> Option<String> {
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))?
        .value
        .as_str()
        .to_string();

    if !content_type.to_ascii_lowercase().contains("multipart/form-data") {
        return None;
    }

    let boundary = content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))?;
    Some(boundary.trim_matches('"').to_string())
}

/// Extract the first file part's bytes from a multipart body.
///
/// Parts are delimited by `--<boundary>`; each part's headers end at a blank
/// line and its content ends two bytes (CRLF) before the next delimiter. A
/// part advertising a `filename` wins; failing that, the first part is used.
fn multipart_file(body: &[u8], boundary: &str) -> Option<Vec<u8>> {
    let delimiter = format!("--{}", boundary).into_bytes();
    let mut first_part: Option<Vec<u8>> = None;

    let mut pos = find_subslice(body, &delimiter, 0)? + delimiter.len();
    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }

        let headers_start = pos + 2; // skip the CRLF after the delimiter
        let headers_end = find_subslice(body, b"\r\n\r\n", headers_start)?;
        let content_start = headers_end + 4;
        let next_delim = find_subslice(body, &delimiter, content_start)?;
        let content_end = next_delim.checked_sub(2)?; // trailing CRLF

        let headers = &body[headers_start..headers_end];
        let content = body[content_start..content_end].to_vec();

        if slice_contains_ci(headers, b"filename=") {
            return Some(content);
        }
        if first_part.is_none() {
            first_part = Some(content);
        }

        pos = next_delim + delimiter.len();
    }

    first_part
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn slice_contains_ci(haystack: &[u8], needle: &[u8]) -> bool {
    let lowered: Vec<u8> = haystack.iter().map(|b| b.to_ascii_lowercase()).collect();
    lowered
        .windows(needle.len())
        .any(|w| w == needle.to_ascii_lowercase().as_slice())
}
