//! File read primitive: conditional GET, byte ranges, directory index.

use crate::http::{DevResponse, Headers};
use crate::mime;
use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

/// File served for a directory request.
pub const INDEX_FILE: &str = "index.html";

/// A loaded file and the location it was actually read from (a directory
/// request reads its `index.html`).
#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub location: Url,
    pub response: DevResponse,
}

/// Read `location` into a response.
///
/// Returns `Ok(None)` when there is nothing to serve there, so a handler
/// chain can move on. `hit_status` is the status of a full response (200,
/// or 404 for a `404.html` fallback).
pub async fn read_file(
    location: &Url,
    request_headers: &Headers,
    hit_status: u16,
) -> io::Result<Option<LoadedFile>> {
    let Ok(mut path) = location.to_file_path() else {
        return Ok(None);
    };
    let mut location = location.clone();

    let Ok(mut meta) = tokio::fs::metadata(&path).await else {
        return Ok(None);
    };

    if meta.is_dir() {
        if !location.path().ends_with('/') {
            let dir_path = format!("{}/", location.path());
            location.set_path(&dir_path);
        }
        location = match location.join(INDEX_FILE) {
            Ok(index) => index,
            Err(_) => return Ok(None),
        };
        path = path.join(INDEX_FILE);
        meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return Ok(None),
        };
    }

    let size = meta.len();
    let modified = meta.modified().ok();
    let etag = format!("W/\"{size}-{}\"", mtime_ms(modified));

    let mut response = DevResponse::new(hit_status)
        .with_header("content-type", mime::lookup(&path.to_string_lossy()))
        .with_header("etag", etag.as_str())
        .with_header("accept-ranges", "bytes");
    if let Some(modified) = modified {
        response = response.with_header("last-modified", http_date(modified));
    }

    if request_headers
        .get("if-none-match")
        .is_some_and(|tags| tags.split(',').any(|tag| tag.trim() == etag))
    {
        response.status = 304;
        response.headers.remove("content-type");
        return Ok(Some(LoadedFile { location, response }));
    }

    let contents = read_bytes(&path).await?;

    if let Some(range) = request_headers.get("range") {
        let size = contents.len() as u64;
        let Some((start, end)) = parse_range(range, size) else {
            response.status = 416;
            response.headers.set("content-range", format!("bytes */{size}"));
            return Ok(Some(LoadedFile { location, response }));
        };

        let slice = contents.slice(start as usize..=end as usize);
        response.status = 206;
        response
            .headers
            .set("content-range", format!("bytes {start}-{end}/{size}"));
        response.headers.set("content-length", slice.len().to_string());
        response.body = slice;
        return Ok(Some(LoadedFile { location, response }));
    }

    response.headers.set("content-length", contents.len().to_string());
    response.body = contents;

    Ok(Some(LoadedFile { location, response }))
}

async fn read_bytes(path: &Path) -> io::Result<bytes::Bytes> {
    tokio::fs::read(path).await.map(bytes::Bytes::from)
}

#[allow(clippy::cast_possible_truncation)]
fn mtime_ms(modified: Option<SystemTime>) -> u64 {
    modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as u64)
}

/// RFC 7231 IMF-fixdate.
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse the first range of a `bytes=` header into inclusive offsets.
///
/// `None` means unsatisfiable (or malformed).
fn parse_range(header: &str, size: u64) -> Option<(u64, u64)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let first = spec.split(',').next()?.trim();
    let (start, end) = first.split_once('-')?;

    if size == 0 {
        return None;
    }
    let last = size - 1;

    let (start, end) = match (start.trim(), end.trim()) {
        ("", "") => return None,
        ("", suffix) => {
            let suffix: u64 = suffix.parse().ok()?;
            if suffix == 0 {
                return None;
            }
            (size.saturating_sub(suffix), last)
        }
        (start, "") => (start.parse().ok()?, last),
        (start, end) => (start.parse().ok()?, end.parse::<u64>().ok()?.min(last)),
    };

    (start <= end && start <= last).then_some((start, end))
}
