//! Per-request module transformation.
//!
//! Dispatches on the served file's extension: scripts are classified and
//! either rewritten in place (interchange modules) or wrapped (legacy
//! CommonJS modules), markup gets its module `<script src>` attributes
//! resolved, everything else passes through untouched.

pub mod cjs;
pub mod esm;
pub mod html;
pub mod shims;
pub mod swc;

use crate::format::{self, ModuleFormat};
use crate::http::{DevResponse, JAVASCRIPT};
use crate::resolver::{ResolutionContext, ResolveError, ResolvedModule, Resolver, REQUIRE_CONDITION};
use crate::sandbox::ServeDirs;
use crate::static_file::LoadedFile;
use thiserror::Error;
use url::Url;

/// Dynamic import endpoint, queried with `base` and `specifier`.
pub const DYNAMIC_ENDPOINT: &str = "/@dynamic";
/// Prefix that initializes a legacy module before re-exporting it.
pub const CJS_INIT_PREFIX: &str = "/@cjsInit";
/// Prefix that marks an interchange module as consumable by legacy code.
pub const CJS_INTEROP_PREFIX: &str = "/@cjsInterop";
/// Prefix serving a JSON file as a module.
pub const JSON_PREFIX: &str = "/@json";

/// Extensions rewritten as scripts.
const SCRIPT_EXTENSIONS: &[&str] = &["ts", "mts", "cts", "js", "mjs", "cjs"];
/// Extensions rewritten as markup.
const MARKUP_EXTENSIONS: &[&str] = &["html", "htm"];

/// Headers that no longer describe a rewritten body.
const STALE_HEADERS: &[&str] = &[
    "content-length",
    "content-range",
    "accept-ranges",
    "etag",
    "last-modified",
];

/// A script body could not be transformed.
#[derive(Debug, Clone, Error)]
#[error("{message}{}", .file.as_deref().map(|f| format!(" ({f})")).unwrap_or_default())]
pub struct TransformError {
    pub message: String,
    pub file: Option<String>,
}

impl TransformError {
    pub fn new(message: impl Into<String>, file: &str) -> Self {
        Self {
            message: message.into(),
            file: Some(file.to_string()),
        }
    }
}

/// JavaScript string literal for `s`.
pub(crate) fn js_string(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// Lowercased extension of the last path segment of `location`.
fn extension(location: &Url) -> Option<String> {
    let name = location.path_segments()?.next_back()?;
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Rewrites served files for one server instance.
#[derive(Debug, Clone, Copy)]
pub struct Transformer<'a> {
    resolver: &'a Resolver,
    dirs: &'a ServeDirs,
}

impl<'a> Transformer<'a> {
    #[must_use]
    pub fn new(resolver: &'a Resolver, dirs: &'a ServeDirs) -> Self {
        Self { resolver, dirs }
    }

    #[must_use]
    pub fn dirs(&self) -> &ServeDirs {
        self.dirs
    }

    /// Public path of a resolved location.
    #[must_use]
    pub fn public_path(&self, location: &Url) -> String {
        self.dirs.public_path(location)
    }

    /// Transform a loaded file into the response sent to the browser.
    ///
    /// Only full responses (200, or 404 for fallback pages) are touched;
    /// 206/304/416 pass through.
    pub fn transform(&self, file: LoadedFile) -> Result<DevResponse, TransformError> {
        let LoadedFile { location, response } = file;
        if response.status != 200 && response.status != 404 {
            return Ok(response);
        }

        let Some(ext) = extension(&location) else {
            return Ok(response);
        };

        if SCRIPT_EXTENSIONS.contains(&ext.as_str()) {
            let source = body_text(&response, &location)?;
            let code = self.transform_script(&location, &source)?;
            let mut response = finish(response, code);
            response.headers.set("content-type", JAVASCRIPT);
            Ok(response)
        } else if MARKUP_EXTENSIONS.contains(&ext.as_str()) {
            let source = body_text(&response, &location)?;
            let document = html::rewrite_scripts(self, &location, &source);
            Ok(finish(response, document))
        } else {
            Ok(response)
        }
    }

    /// Rewrite a script at `location` into an interchange module.
    pub fn transform_script(&self, location: &Url, source: &str) -> Result<String, TransformError> {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        let name = location.as_str();
        let format = format::classify_source(location, source);

        let code = if format.is_annotated() && format.is_commonjs() {
            swc::strip_commonjs_types(source, name)?
        } else if format.is_annotated() {
            swc::strip_types(source, name, false)?
        } else {
            source.to_string()
        };

        if format.is_commonjs() {
            Ok(cjs::wrap_commonjs(self, location, &code))
        } else {
            esm::rewrite_module(self, location, &code)
        }
    }

    /// Resolve `specifier` imported by `parent`.
    pub fn resolve(&self, specifier: &str, parent: &Url) -> Result<ResolvedModule, ResolveError> {
        let ctx = ResolutionContext::new(Some(parent.clone()));
        let encode = |location: &Url| self.public_path(location);
        self.resolver.resolve(specifier, &ctx, Some(&encode))
    }

    /// Resolve a `require` argument: first with the `require` condition,
    /// then without it.
    pub fn resolve_require(
        &self,
        specifier: &str,
        parent: &Url,
    ) -> Result<ResolvedModule, ResolveError> {
        let ctx = ResolutionContext::new(Some(parent.clone())).with_condition(REQUIRE_CONDITION);
        let encode = |location: &Url| self.public_path(location);
        self.resolver
            .resolve(specifier, &ctx, Some(&encode))
            .or_else(|_| self.resolve(specifier, parent))
    }

    /// Path an interchange importer should use for a resolved module.
    ///
    /// Legacy targets go through the init endpoint, JSON through the JSON
    /// endpoint; non-file locations are already public.
    #[must_use]
    pub fn import_path(&self, resolved: &ResolvedModule) -> String {
        if resolved.location.scheme() != "file" {
            return resolved.location.to_string();
        }
        let public = self.public_path(&resolved.location);
        match resolved.format {
            f if f.is_commonjs() => format!("{CJS_INIT_PREFIX}{public}"),
            ModuleFormat::Json => format!("{JSON_PREFIX}{public}"),
            _ => public,
        }
    }
}

fn body_text(response: &DevResponse, location: &Url) -> Result<String, TransformError> {
    String::from_utf8(response.body.to_vec())
        .map_err(|_| TransformError::new("source is not valid UTF-8", location.as_str()))
}

/// Replace the body and drop headers describing the old one.
fn finish(mut response: DevResponse, body: String) -> DevResponse {
    for name in STALE_HEADERS {
        response.headers.remove(name);
    }
    response.headers.set("cache-control", "no-cache");
    response.with_body(body)
}
