//! Node-style resolution primitive.
//!
//! Supports:
//! - Relative specifiers: `./`, `../`
//! - Absolute filesystem specifiers
//! - `file:`, `node:` and `data:` URL specifiers
//! - Bare builtin names (`fs`, `path`, ...) mapped to `node:` URLs
//! - Bare specifiers with `node_modules` lookup
//! - Extension probing, plus `.js` to `.ts` substitution
//! - Directory resolution (`exports` root, `browser`, `main`, `index.*`)
//! - package.json `exports` subpaths and patterns
//! - package.json `imports` (`#`-prefixed specifiers)

use super::exports::{read_package_json, resolve_exports, resolve_exports_root, resolve_imports_map};
use super::{Conditions, ModuleResolver, ResolveError, ResolveReasonCode, ResolvedModule};
use crate::format;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use url::Url;

/// Default extensions for probing.
pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".ts", ".tsx", ".mts", ".cts", ".js", ".jsx", ".mjs", ".cjs", ".json",
];

/// Maximum number of tried paths to record.
const MAX_TRIED_PATHS: usize = 20;

/// Node builtin module names accepted without the `node:` prefix.
pub const BUILTIN_MODULES: &[&str] = &[
    "assert", "assert/strict", "async_hooks", "buffer", "child_process", "cluster", "console",
    "constants", "crypto", "dgram", "diagnostics_channel", "dns", "dns/promises", "domain",
    "events", "fs", "fs/promises", "http", "http2", "https", "inspector", "module", "net", "os",
    "path", "path/posix", "path/win32", "perf_hooks", "process", "punycode", "querystring",
    "readline", "readline/promises", "repl", "stream", "stream/consumers", "stream/promises",
    "stream/web", "string_decoder", "sys", "timers", "timers/promises", "tls", "trace_events",
    "tty", "url", "util", "util/types", "v8", "vm", "wasi", "worker_threads", "zlib",
];

/// Returns true for a bare builtin name such as `fs/promises`.
#[must_use]
pub fn is_builtin(spec: &str) -> bool {
    BUILTIN_MODULES.contains(&spec)
}

/// Filesystem-backed resolver following Node's algorithm.
#[derive(Debug, Clone)]
pub struct NodeResolver {
    /// Extensions to probe (in order).
    extensions: &'static [&'static str],
    /// Base directory for specifiers resolved without a parent.
    cwd: Option<PathBuf>,
}

impl Default for NodeResolver {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS,
            cwd: None,
        }
    }
}

impl NodeResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: &'static [&'static str]) -> Self {
        self.extensions = extensions;
        self
    }

    /// Directory relative specifiers are resolved against.
    fn parent_dir(&self, parent: Option<&Url>) -> PathBuf {
        parent
            .filter(|p| p.scheme() == "file")
            .and_then(|p| p.to_file_path().ok())
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .or_else(|| self.cwd.clone())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn resolve_location(
        &self,
        spec: &str,
        parent: Option<&Url>,
        probe: &mut Probe<'_>,
    ) -> Result<Url, ResolveReasonCode> {
        if spec.is_empty() {
            return Err(ResolveReasonCode::SpecifierInvalid);
        }

        if let Some(url) = parse_url_specifier(spec) {
            return resolve_url(url, probe);
        }

        if is_builtin(spec) {
            return Url::parse(&format!("node:{spec}"))
                .map_err(|_| ResolveReasonCode::SpecifierInvalid);
        }

        let parent_dir = self.parent_dir(parent);

        if spec.starts_with('#') {
            return self.resolve_hash_import(&parent_dir, spec, probe);
        }

        let path = if is_relative(spec) {
            resolve_path(&parent_dir.join(spec), probe)?
        } else if is_absolute_path(spec) {
            resolve_path(Path::new(spec), probe)?
        } else {
            resolve_bare(&parent_dir, spec, probe)?
        };

        file_url(&path)
    }

    /// Resolve a `#`-prefixed import using the nearest package.json.
    fn resolve_hash_import(
        &self,
        start: &Path,
        spec: &str,
        probe: &mut Probe<'_>,
    ) -> Result<Url, ResolveReasonCode> {
        let mut current = Some(start);

        while let Some(dir) = current {
            let pkg_json_path = dir.join("package.json");

            if pkg_json_path.is_file() {
                probe.add_tried(&pkg_json_path);

                let target = read_package_json(&pkg_json_path)
                    .and_then(|pkg| resolve_imports_map(&pkg, spec, probe.conditions))
                    .ok_or(ResolveReasonCode::ImportsNotFound)?;

                if target.starts_with("./") {
                    let path = resolve_path(&dir.join(target.trim_start_matches("./")), probe)?;
                    return file_url(&path);
                }

                // Bare target: resolve as if imported from the package root.
                let pkg_url = Url::from_file_path(&pkg_json_path)
                    .map_err(|()| ResolveReasonCode::SpecifierInvalid)?;
                return self.resolve_location(&target, Some(&pkg_url), probe);
            }

            current = dir.parent();
        }

        Err(ResolveReasonCode::ImportsNotFound)
    }
}

impl ModuleResolver for NodeResolver {
    fn resolve(
        &self,
        specifier: &str,
        parent: Option<&Url>,
        conditions: &Conditions,
    ) -> Result<ResolvedModule, ResolveError> {
        let mut probe = Probe {
            extensions: self.extensions,
            conditions,
            tried: Vec::new(),
        };

        match self.resolve_location(specifier, parent, &mut probe) {
            Ok(location) => {
                let format = format::classify(&location);
                Ok(ResolvedModule { location, format })
            }
            Err(reason) => {
                Err(ResolveError::new(specifier, parent, reason).with_tried(probe.tried))
            }
        }
    }
}

/// Per-call resolution state.
struct Probe<'a> {
    extensions: &'static [&'static str],
    conditions: &'a Conditions,
    tried: Vec<PathBuf>,
}

impl Probe<'_> {
    /// Add a path to tried list (with cap).
    fn add_tried(&mut self, path: &Path) {
        if self.tried.len() < MAX_TRIED_PATHS {
            self.tried.push(path.to_path_buf());
        }
    }
}

fn is_relative(spec: &str) -> bool {
    spec == "." || spec == ".." || spec.starts_with("./") || spec.starts_with("../")
}

/// Check if a specifier is an absolute path.
fn is_absolute_path(spec: &str) -> bool {
    if spec.starts_with('/') {
        return true;
    }

    // Windows absolute: C:\, D:\, etc.
    let bytes = spec.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
    {
        return true;
    }

    // UNC path: \\server\share
    spec.starts_with("\\\\")
}

/// Parse a protocol-qualified specifier. Single-letter schemes are drive
/// letters, not URLs.
fn parse_url_specifier(spec: &str) -> Option<Url> {
    Url::parse(spec).ok().filter(|url| url.scheme().len() > 1)
}

fn resolve_url(url: Url, probe: &mut Probe<'_>) -> Result<Url, ResolveReasonCode> {
    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| ResolveReasonCode::SpecifierInvalid)?;
            let resolved = resolve_path(&path, probe)?;
            file_url(&resolved)
        }
        "node" | "data" => Ok(url),
        _ => Err(ResolveReasonCode::UnsupportedScheme),
    }
}

/// Canonical `file:` URL for a resolved path.
fn file_url(path: &Path) -> Result<Url, ResolveReasonCode> {
    let canonical = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Url::from_file_path(canonical).map_err(|()| ResolveReasonCode::NotFound)
}

/// `base` with `ext` appended (not replacing any existing extension).
fn append_extension(base: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = base.as_os_str().to_owned();
    name.push(ext);
    PathBuf::from(name)
}

/// `./x.js` written in TypeScript sources usually means `./x.ts`.
fn typescript_twin(base: &Path) -> Option<PathBuf> {
    let twin = match base.extension()?.to_str()? {
        "js" => "ts",
        "mjs" => "mts",
        "cjs" => "cts",
        "jsx" => "tsx",
        _ => return None,
    };
    Some(base.with_extension(twin))
}

/// Resolve a path (exact file, extension probing, TS twin, directory).
fn resolve_path(base: &Path, probe: &mut Probe<'_>) -> Result<PathBuf, ResolveReasonCode> {
    if base.is_dir() {
        return resolve_directory(base, probe);
    }

    resolve_file(base, probe).ok_or(ResolveReasonCode::NotFound)
}

/// Exact file, then extension probing, then the TypeScript twin.
fn resolve_file(base: &Path, probe: &mut Probe<'_>) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }

    for ext in probe.extensions {
        let with_ext = append_extension(base, ext);
        probe.add_tried(&with_ext);

        if with_ext.is_file() {
            return Some(with_ext);
        }
    }

    let twin = typescript_twin(base)?;
    probe.add_tried(&twin);
    twin.is_file().then_some(twin)
}

/// Exact file or `index.*` inside a directory, without package.json.
fn resolve_entry(path: &Path, probe: &mut Probe<'_>) -> Option<PathBuf> {
    if let Some(file) = resolve_file(path, probe) {
        return Some(file);
    }
    if path.is_dir() {
        return resolve_index(path, probe);
    }
    None
}

fn resolve_index(dir: &Path, probe: &mut Probe<'_>) -> Option<PathBuf> {
    for ext in probe.extensions {
        let index = dir.join(format!("index{ext}"));
        probe.add_tried(&index);

        if index.is_file() {
            return Some(index);
        }
    }
    None
}

/// Resolve a directory (package.json exports > browser > main > index.*).
fn resolve_directory(dir: &Path, probe: &mut Probe<'_>) -> Result<PathBuf, ResolveReasonCode> {
    let pkg_json_path = dir.join("package.json");

    if pkg_json_path.is_file() {
        probe.add_tried(&pkg_json_path);

        if let Some(pkg_json) = read_package_json(&pkg_json_path) {
            if let Some(target) = resolve_exports_root(&pkg_json, probe.conditions) {
                let target_path = dir.join(target.trim_start_matches("./"));
                probe.add_tried(&target_path);

                return resolve_file(&target_path, probe)
                    .ok_or(ResolveReasonCode::ExportsTargetNotFound);
            }

            let mut entries = Vec::new();
            if probe.conditions.contains("browser") {
                entries.extend(pkg_json.get("browser").and_then(|v| v.as_str()));
            }
            entries.extend(pkg_json.get("main").and_then(|v| v.as_str()));

            for entry in entries {
                let entry_path = dir.join(entry);
                if entry_path == dir || entry_path == dir.join(".") {
                    continue;
                }
                if let Some(found) = resolve_entry(&entry_path, probe) {
                    return Ok(found);
                }
            }
        }
    }

    if let Some(index) = resolve_index(dir, probe) {
        return Ok(index);
    }

    if dir.is_dir() {
        return Err(ResolveReasonCode::IsDirectory);
    }

    Err(ResolveReasonCode::NotFound)
}

/// Resolve a bare specifier via `node_modules`.
fn resolve_bare(
    start: &Path,
    spec: &str,
    probe: &mut Probe<'_>,
) -> Result<PathBuf, ResolveReasonCode> {
    // e.g., "lodash/fp" -> "lodash", "@scope/pkg/sub" -> "@scope/pkg"
    let (pkg_name, subpath) = parse_bare_specifier(spec);
    if pkg_name.is_empty() {
        return Err(ResolveReasonCode::SpecifierInvalid);
    }

    let mut found_node_modules = false;
    let mut specific_error: Option<ResolveReasonCode> = None;
    let mut current = Some(start);

    while let Some(dir) = current {
        let node_modules = dir.join("node_modules");

        if node_modules.is_dir() {
            found_node_modules = true;

            let pkg_dir = node_modules.join(pkg_name);
            probe.add_tried(&pkg_dir);

            if pkg_dir.is_dir() {
                let result = match subpath {
                    Some(sub) => resolve_package_subpath(&pkg_dir, sub, probe),
                    None => resolve_directory(&pkg_dir, probe),
                };

                match result {
                    Ok(path) => return Ok(path),
                    Err(
                        reason @ (ResolveReasonCode::ExportsTargetNotFound
                        | ResolveReasonCode::ExportsNotFound
                        | ResolveReasonCode::PackageMainNotFound),
                    ) => specific_error = specific_error.or(Some(reason)),
                    Err(_) => {}
                }
            }
        }

        current = dir.parent();
    }

    if let Some(error) = specific_error {
        return Err(error);
    }

    if found_node_modules {
        Err(ResolveReasonCode::NotFound)
    } else {
        Err(ResolveReasonCode::NodeModulesNotFound)
    }
}

/// Resolve a package subpath: exports first, then the filesystem.
fn resolve_package_subpath(
    pkg_dir: &Path,
    subpath: &str,
    probe: &mut Probe<'_>,
) -> Result<PathBuf, ResolveReasonCode> {
    let pkg_json_path = pkg_dir.join("package.json");

    if pkg_json_path.is_file() {
        probe.add_tried(&pkg_json_path);

        if let Some(pkg_json) = read_package_json(&pkg_json_path) {
            if pkg_json.get("exports").is_some() {
                let exports_subpath = format!("./{subpath}");
                let target = resolve_exports(&pkg_json, Some(&exports_subpath), probe.conditions)
                    .ok_or(ResolveReasonCode::ExportsNotFound)?;

                let target_path = pkg_dir.join(target.trim_start_matches("./"));
                probe.add_tried(&target_path);

                return resolve_file(&target_path, probe)
                    .ok_or(ResolveReasonCode::ExportsTargetNotFound);
            }
        }
    }

    resolve_path(&pkg_dir.join(subpath), probe)
}

/// Parse a bare specifier into package name and optional subpath.
fn parse_bare_specifier(spec: &str) -> (&str, Option<&str>) {
    // Scoped package: @scope/pkg or @scope/pkg/subpath
    if spec.starts_with('@') {
        let mut slash_count = 0;
        for (i, c) in spec.char_indices() {
            if c == '/' {
                slash_count += 1;
                if slash_count == 2 {
                    return (&spec[..i], Some(&spec[i + 1..]));
                }
            }
        }
        return (spec, None);
    }

    match spec.split_once('/') {
        Some((name, sub)) => (name, Some(sub)),
        None => (spec, None),
    }
}
