//! Extension to MIME type lookup.

/// Fallback for unknown extensions.
pub const DEFAULT_MIME: &str = "application/octet-stream";

const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html;charset=utf-8"),
    ("htm", "text/html;charset=utf-8"),
    ("js", "text/javascript;charset=utf-8"),
    ("mjs", "text/javascript;charset=utf-8"),
    ("cjs", "text/javascript;charset=utf-8"),
    ("jsx", "text/javascript;charset=utf-8"),
    ("ts", "text/javascript;charset=utf-8"),
    ("mts", "text/javascript;charset=utf-8"),
    ("cts", "text/javascript;charset=utf-8"),
    ("tsx", "text/javascript;charset=utf-8"),
    ("css", "text/css;charset=utf-8"),
    ("json", "application/json"),
    ("map", "application/json"),
    ("webmanifest", "application/manifest+json"),
    ("wasm", "application/wasm"),
    ("txt", "text/plain;charset=utf-8"),
    ("md", "text/markdown;charset=utf-8"),
    ("xml", "application/xml"),
    ("csv", "text/csv;charset=utf-8"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("ico", "image/x-icon"),
    ("bmp", "image/bmp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
];

/// MIME type for a file name or path, by extension.
#[must_use]
pub fn lookup(name: &str) -> &'static str {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return DEFAULT_MIME;
    };
    let ext = ext.to_ascii_lowercase();

    MIME_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map_or(DEFAULT_MIME, |(_, mime)| *mime)
}
