//! Mapping between public URL paths and filesystem locations.
//!
//! Request paths normally address files under the source directory.
//! Leading `/@../` segments climb one directory above the source directory
//! each, which is how modules outside the source tree (a sibling `lib/`, a
//! hoisted `node_modules`) are served. Whatever the path, the final
//! location must stay inside the base directory, the directory holding the
//! ixie config.

use crate::error::{Error, Result};
use std::path::Path;
use url::Url;

/// Path segment meaning "one directory above the source directory".
pub const ESCAPE_SEGMENT: &str = "@..";

/// Directories fixed at server start. All three are `file:` URLs ending
/// in `/`, so relative joins never lose the last segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeDirs {
    /// Sandbox boundary.
    pub base_dir: Url,
    /// Root of transformed sources.
    pub source_dir: Url,
    /// Root of static assets.
    pub public_dir: Url,
}

impl ServeDirs {
    /// Resolve `source_dir` and `public_dir` (relative paths or `file:` URLs)
    /// against `base_dir`.
    pub fn new(base_dir: &Path, source_dir: &str, public_dir: &str) -> Result<Self> {
        let canonical = dunce::canonicalize(base_dir)?;
        let base_dir = Url::from_directory_path(&canonical)
            .map_err(|()| Error::other(format!("invalid base directory: {}", canonical.display())))?;

        Ok(Self {
            source_dir: resolve_dir(&base_dir, source_dir)?,
            public_dir: resolve_dir(&base_dir, public_dir)?,
            base_dir,
        })
    }

    /// Public path for `location` relative to the source directory.
    #[must_use]
    pub fn public_path(&self, location: &Url) -> String {
        to_public_path(location, &self.source_dir)
    }

    /// Filesystem location for a request path under the source directory.
    pub fn source_location(&self, url_path: &str) -> Result<Url> {
        to_filesystem(url_path, &self.source_dir, &self.base_dir)
    }
}

fn resolve_dir(base: &Url, dir: &str) -> Result<Url> {
    let dir = if dir.is_empty() { "." } else { dir };
    let mut joined = base
        .join(dir)
        .map_err(|e| Error::other(format!("invalid directory '{dir}': {e}")))?;
    ensure_trailing_slash(&mut joined);

    // Canonicalize when the directory exists so it shares a prefix with
    // canonical resolver output.
    let canonical = joined
        .to_file_path()
        .ok()
        .and_then(|p| dunce::canonicalize(p).ok())
        .and_then(|p| Url::from_directory_path(p).ok());

    Ok(canonical.unwrap_or(joined))
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
}

/// Map a request path to a filesystem location.
///
/// `/@../@../x` resolves two levels above `source_dir`; any other path
/// resolves under `source_dir`. Fails with [`Error::Unauthorized`] when the
/// result is outside `base_dir` (escape paths) or `source_dir` (plain paths).
pub fn to_filesystem(url_path: &str, source_dir: &Url, base_dir: &Url) -> Result<Url> {
    let lowered = url_path.to_ascii_lowercase();
    if lowered.contains("%2f") || lowered.contains("%5c") || lowered.contains("%00") {
        return Err(Error::unauthorized(url_path));
    }

    let mut rest = url_path.strip_prefix('/').unwrap_or(url_path);
    let mut levels = 0;
    loop {
        if let Some(stripped) = rest.strip_prefix("@../") {
            rest = stripped;
        } else if rest == ESCAPE_SEGMENT {
            rest = "";
        } else {
            break;
        }
        levels += 1;
    }

    let (root, boundary) = if levels == 0 {
        (source_dir.clone(), source_dir)
    } else {
        let up = source_dir
            .join(&"../".repeat(levels))
            .map_err(|_| Error::unauthorized(url_path))?;
        (up, base_dir)
    };

    let location = root
        .join(&format!("./{rest}"))
        .map_err(|_| Error::unauthorized(url_path))?;

    if !is_within(&location, boundary) {
        return Err(Error::unauthorized(url_path));
    }

    Ok(location)
}

/// Public path for `location`, relative to `base` (a directory URL).
///
/// Locations above `base` get one `@..` segment per level climbed.
/// Non-`file:` locations are already public and come back verbatim.
#[must_use]
pub fn to_public_path(location: &Url, base: &Url) -> String {
    if location.scheme() != "file" || base.scheme() != "file" {
        return location.to_string();
    }

    let location_segments: Vec<&str> = location.path().split('/').collect();
    let base_path = base.path();
    let base_segments: Vec<&str> = base_path
        .strip_suffix('/')
        .unwrap_or(base_path)
        .split('/')
        .collect();

    let common = location_segments
        .iter()
        .zip(&base_segments)
        .take_while(|(a, b)| a == b)
        .count();

    let mut segments: Vec<&str> = vec![ESCAPE_SEGMENT; base_segments.len() - common];
    segments.extend(&location_segments[common..]);

    format!("/{}", segments.join("/"))
}

/// Join a request path under `dir`, `None` if it would leave `dir`.
#[must_use]
pub fn join_contained(dir: &Url, url_path: &str) -> Option<Url> {
    let rest = url_path.strip_prefix('/').unwrap_or(url_path);
    let location = dir.join(&format!("./{rest}")).ok()?;
    is_within(&location, dir).then_some(location)
}

/// `location` is `dir` itself or a descendant of it.
fn is_within(location: &Url, dir: &Url) -> bool {
    location.scheme() == dir.scheme()
        && location.host() == dir.host()
        && location.path().starts_with(dir.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn dirs() -> (Url, Url) {
        (
            Url::parse("file:///project/web/src/").unwrap(),
            Url::parse("file:///project/").unwrap(),
        )
    }

    #[test]
    fn test_plain_path_maps_under_source() {
        let (source, base) = dirs();
        let location = to_filesystem("/app/main.ts", &source, &base).unwrap();
        assert_eq!(location.as_str(), "file:///project/web/src/app/main.ts");
    }

    #[test]
    fn test_escape_segments_climb() {
        let (source, base) = dirs();
        let location = to_filesystem("/@../lib/util.js", &source, &base).unwrap();
        assert_eq!(location.as_str(), "file:///project/web/lib/util.js");

        let location = to_filesystem("/@../@../node_modules/x/index.js", &source, &base).unwrap();
        assert_eq!(location.as_str(), "file:///project/node_modules/x/index.js");
    }

    #[test]
    fn test_escape_outside_base_is_unauthorized() {
        let (source, base) = dirs();
        let err = to_filesystem("/@../@../@../secret", &source, &base).unwrap_err();
        assert!(matches!(err, Error::Unauthorized { .. }));
    }

    #[test]
    fn test_escape_to_exactly_base_is_allowed() {
        let (source, base) = dirs();
        let location = to_filesystem("/@../@../", &source, &base).unwrap();
        assert_eq!(location, base);
    }

    #[test]
    fn test_plain_path_cannot_climb() {
        let (source, base) = dirs();
        assert!(to_filesystem("/../../etc/passwd", &source, &base).is_err());
        assert!(to_filesystem("/a/..%2F..%2Fsecret", &source, &base).is_err());
    }

    #[test]
    fn test_public_path() {
        let (source, _) = dirs();
        let inside = Url::parse("file:///project/web/src/app/main.ts").unwrap();
        assert_eq!(to_public_path(&inside, &source), "/app/main.ts");

        let sibling = Url::parse("file:///project/web/lib/util.js").unwrap();
        assert_eq!(to_public_path(&sibling, &source), "/@../lib/util.js");

        let hoisted = Url::parse("file:///project/node_modules/x/index.js").unwrap();
        assert_eq!(to_public_path(&hoisted, &source), "/@../@../node_modules/x/index.js");

        let builtin = Url::parse("node:fs").unwrap();
        assert_eq!(to_public_path(&builtin, &source), "node:fs");
    }

    #[test]
    fn test_round_trip() {
        let (source, base) = dirs();
        for location in [
            "file:///project/web/src/a.ts",
            "file:///project/web/src/deep/er/b.js",
            "file:///project/web/lib/c.cjs",
            "file:///project/shared/d.json",
            "file:///project/e.js",
        ] {
            let location = Url::parse(location).unwrap();
            let public = to_public_path(&location, &source);
            assert_eq!(to_filesystem(&public, &source, &base).unwrap(), location, "{public}");
        }
    }

    #[test]
    fn test_outside_base_fails_round_trip() {
        let (source, base) = dirs();
        let outside = Url::parse("file:///etc/passwd").unwrap();
        let public = to_public_path(&outside, &source);
        assert_eq!(public, "/@../@../@../etc/passwd");
        assert!(to_filesystem(&public, &source, &base).is_err());
    }

    #[test]
    fn test_join_contained() {
        let public = Url::parse("file:///project/public/").unwrap();
        assert_eq!(
            join_contained(&public, "/favicon.ico").unwrap().as_str(),
            "file:///project/public/favicon.ico"
        );
        assert!(join_contained(&public, "/../secret").is_none());
    }

    #[test]
    fn test_serve_dirs_end_in_slash() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("web/src")).unwrap();

        let dirs = ServeDirs::new(dir.path(), "./web/src", "public").unwrap();
        assert!(dirs.base_dir.path().ends_with('/'));
        assert!(dirs.source_dir.path().ends_with("/web/src/"));
        // Missing directories still get a trailing slash.
        assert!(dirs.public_dir.path().ends_with("/public/"));
        assert!(dirs.source_dir.as_str().starts_with(dirs.base_dir.as_str()));
    }
}
