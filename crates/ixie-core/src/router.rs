//! Request routing.
//!
//! A request runs through an ordered chain of handlers; the first one
//! producing a response wins. Handlers return `Ok(None)` for "not mine /
//! not found" so the chain continues, and errors short-circuit it: a
//! sandbox violation becomes a 403, anything else a logged 500.

use crate::alias::AliasPatternCache;
use crate::config::IxieConfig;
use crate::error::{Error, Result};
use crate::http::{DevRequest, DevResponse};
use crate::resolver::{ResolutionContext, Resolver};
use crate::sandbox::{join_contained, ServeDirs};
use crate::static_file::{read_file, LoadedFile};
use crate::transform::{
    shims, Transformer, CJS_INIT_PREFIX, CJS_INTEROP_PREFIX, DYNAMIC_ENDPOINT, JSON_PREFIX,
};
use futures::future::{BoxFuture, FutureExt};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

/// Body of a 403.
pub const UNAUTHORIZED_BODY: &str =
    "unauthorized: you can only access files in the directory your ixie config is in or below!";
/// Body of the terminal 404.
pub const NOT_FOUND_BODY: &str = "file not found";
/// Body of a 500.
pub const SERVER_ERROR_BODY: &str = "server error";

/// Fallback page looked up in the source and public trees.
const NOT_FOUND_PAGE: &str = "404.html";

type Handler = for<'a> fn(&'a DevServer, &'a DevRequest) -> BoxFuture<'a, Result<Option<DevResponse>>>;

/// The handler chain, in order.
const HANDLERS: [(&str, Handler); 6] = [
    ("dynamic", dynamic_handler),
    ("shim", shim_handler),
    ("source", source_handler),
    ("public", public_handler),
    ("source 404", source_not_found_handler),
    ("public 404", public_not_found_handler),
];

fn dynamic_handler<'a>(
    server: &'a DevServer,
    request: &'a DevRequest,
) -> BoxFuture<'a, Result<Option<DevResponse>>> {
    server.serve_dynamic(request).boxed()
}

fn shim_handler<'a>(
    server: &'a DevServer,
    request: &'a DevRequest,
) -> BoxFuture<'a, Result<Option<DevResponse>>> {
    server.serve_shim(request).boxed()
}

fn source_handler<'a>(
    server: &'a DevServer,
    request: &'a DevRequest,
) -> BoxFuture<'a, Result<Option<DevResponse>>> {
    server.serve_source(request).boxed()
}

fn public_handler<'a>(
    server: &'a DevServer,
    request: &'a DevRequest,
) -> BoxFuture<'a, Result<Option<DevResponse>>> {
    server.serve_public(request).boxed()
}

fn source_not_found_handler<'a>(
    server: &'a DevServer,
    request: &'a DevRequest,
) -> BoxFuture<'a, Result<Option<DevResponse>>> {
    server.serve_source_not_found(request).boxed()
}

fn public_not_found_handler<'a>(
    server: &'a DevServer,
    request: &'a DevRequest,
) -> BoxFuture<'a, Result<Option<DevResponse>>> {
    server.serve_public_not_found(request).boxed()
}

struct Inner {
    dirs: ServeDirs,
    resolver: Resolver,
}

/// The dev server: directories, resolver and handler chain.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct DevServer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DevServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServer")
            .field("dirs", &self.inner.dirs)
            .finish_non_exhaustive()
    }
}

impl DevServer {
    /// Build a server for `config` found in `base_dir`.
    pub fn new(config: &IxieConfig, base_dir: &Path) -> Result<Self> {
        let dirs = ServeDirs::new(base_dir, &config.source_dir, &config.public_dir)?;
        let resolver = Resolver::new(
            config.resolve.alias.clone(),
            config.resolve.conditions.clone(),
            Arc::new(AliasPatternCache::new()),
        );
        Ok(Self::from_parts(dirs, resolver))
    }

    #[must_use]
    pub fn from_parts(dirs: ServeDirs, resolver: Resolver) -> Self {
        Self {
            inner: Arc::new(Inner { dirs, resolver }),
        }
    }

    #[must_use]
    pub fn dirs(&self) -> &ServeDirs {
        &self.inner.dirs
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    #[must_use]
    pub fn transformer(&self) -> Transformer<'_> {
        Transformer::new(&self.inner.resolver, &self.inner.dirs)
    }

    /// Handle a request. Never fails: errors become 403 or 500 responses.
    pub async fn handle(&self, request: DevRequest) -> DevResponse {
        let response = match self.route(&request).await {
            Ok(Some(response)) => response,
            Ok(None) => DevResponse::text(404, NOT_FOUND_BODY),
            Err(Error::Unauthorized { path }) => {
                debug!(path = %path, "rejected path outside the base directory");
                DevResponse::text(403, UNAUTHORIZED_BODY)
            }
            Err(err) => {
                error!(error = %err, path = request.path(), "request failed");
                DevResponse::text(500, SERVER_ERROR_BODY)
            }
        };

        debug!(
            method = %request.method,
            path = request.path(),
            status = response.status,
            "served"
        );
        response
    }

    async fn route(&self, request: &DevRequest) -> Result<Option<DevResponse>> {
        for (name, handler) in HANDLERS {
            if let Some(response) = handler(self, request).await? {
                debug!(handler = name, "handled");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// `/@dynamic?base=<public path>&specifier=<specifier>`
    async fn serve_dynamic(&self, request: &DevRequest) -> Result<Option<DevResponse>> {
        if request.path() != DYNAMIC_ENDPOINT {
            return Ok(None);
        }

        let base = request.query_param("base").unwrap_or_else(|| "/".to_string());
        let specifier = request.query_param("specifier").unwrap_or_default();
        let parent = self.dirs().source_location(&base)?;

        let ctx = ResolutionContext::new(Some(parent));
        let encode = |location: &url::Url| self.dirs().public_path(location);
        let resolved = match self.resolver().resolve(&specifier, &ctx, Some(&encode)) {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::warn!(%err, "unresolved dynamic import");
                return Ok(Some(DevResponse::javascript(shims::resolve_failure(&specifier))));
            }
        };

        let location = &resolved.location;
        let response = match location.scheme() {
            "file" => DevResponse::redirect(&self.transformer().import_path(&resolved)),
            "data" => match data_module_source(location) {
                Some(code) => DevResponse::javascript(code),
                None => DevResponse::redirect(location.as_str()),
            },
            _ => DevResponse::javascript(shims::resolve_failure(&specifier)),
        };
        Ok(Some(response))
    }

    /// `/@cjsInit/<path>`, `/@cjsInterop/<path>`, `/@json/<path>`
    async fn serve_shim(&self, request: &DevRequest) -> Result<Option<DevResponse>> {
        let path = request.path();

        if let Some(target) = strip_endpoint(path, CJS_INIT_PREFIX) {
            return Ok(Some(DevResponse::javascript(shims::cjs_init(target))));
        }
        if let Some(target) = strip_endpoint(path, CJS_INTEROP_PREFIX) {
            return Ok(Some(DevResponse::javascript(shims::cjs_interop(target))));
        }
        let Some(target) = strip_endpoint(path, JSON_PREFIX) else {
            return Ok(None);
        };

        let location = self.dirs().source_location(target)?;
        let Some(file) = read_file(&location, &request.headers, 200).await? else {
            return Ok(None);
        };
        if file.response.status != 200 {
            return Ok(Some(file.response));
        }
        let source = String::from_utf8_lossy(&file.response.body).into_owned();
        Ok(Some(
            DevResponse::javascript(shims::json_module(&source)).with_header("cache-control", "no-cache"),
        ))
    }

    async fn serve_source(&self, request: &DevRequest) -> Result<Option<DevResponse>> {
        let location = self.dirs().source_location(request.path())?;
        match read_file(&location, &request.headers, 200).await? {
            Some(file) => self.transform(file).await.map(Some),
            None => Ok(None),
        }
    }

    async fn serve_public(&self, request: &DevRequest) -> Result<Option<DevResponse>> {
        let Some(location) = join_contained(&self.dirs().public_dir, request.path()) else {
            return Ok(None);
        };
        Ok(read_file(&location, &request.headers, 200)
            .await?
            .map(|file| file.response))
    }

    async fn serve_source_not_found(&self, request: &DevRequest) -> Result<Option<DevResponse>> {
        let Ok(location) = self.dirs().source_dir.join(NOT_FOUND_PAGE) else {
            return Ok(None);
        };
        match read_file(&location, &request.headers, 404).await? {
            Some(file) => self.transform(file).await.map(Some),
            None => Ok(None),
        }
    }

    async fn serve_public_not_found(&self, request: &DevRequest) -> Result<Option<DevResponse>> {
        let Ok(location) = self.dirs().public_dir.join(NOT_FOUND_PAGE) else {
            return Ok(None);
        };
        Ok(read_file(&location, &request.headers, 404)
            .await?
            .map(|file| file.response))
    }

    /// Run the transform engine on the blocking pool.
    async fn transform(&self, file: LoadedFile) -> Result<DevResponse> {
        let server = self.clone();
        let response = tokio::task::spawn_blocking(move || server.transformer().transform(file))
            .await
            .map_err(|e| Error::other(format!("transform task failed: {e}")))??;
        Ok(response)
    }
}

/// `/<prefix>/<rest>` to `/<rest>`.
fn strip_endpoint<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix).filter(|rest| rest.starts_with('/') && rest.len() > 1)
}

/// Source of a `data:text/javascript,` module.
fn data_module_source(location: &url::Url) -> Option<String> {
    let (meta, data) = location.path().split_once(',')?;
    let is_javascript = meta.starts_with("text/javascript") || meta.starts_with("application/javascript");
    if !is_javascript || meta.ends_with(";base64") {
        return None;
    }
    urlencoding::decode(data).ok().map(std::borrow::Cow::into_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn server(dir: &Path) -> DevServer {
        DevServer::new(&IxieConfig::default(), dir).unwrap()
    }

    async fn get(server: &DevServer, path: &str) -> DevResponse {
        server.handle(DevRequest::get(path).unwrap()).await
    }

    #[test]
    fn test_strip_endpoint() {
        assert_eq!(strip_endpoint("/@json/a.json", JSON_PREFIX), Some("/a.json"));
        assert_eq!(strip_endpoint("/@json/", JSON_PREFIX), None);
        assert_eq!(strip_endpoint("/@jsonx/a", JSON_PREFIX), None);
    }

    #[test]
    fn test_data_module_source() {
        let url = url::Url::parse("data:text/javascript,export%20default%201%3B").unwrap();
        assert_eq!(data_module_source(&url).as_deref(), Some("export default 1;"));

        let url = url::Url::parse("data:application/json,{}").unwrap();
        assert_eq!(data_module_source(&url), None);
    }

    #[tokio::test]
    async fn test_terminal_not_found() {
        let dir = tempdir().unwrap();
        let response = get(&server(dir.path()), "/missing.js").await;
        assert_eq!(response.status, 404);
        assert_eq!(response.text_body(), NOT_FOUND_BODY);
    }

    #[tokio::test]
    async fn test_cjs_init_endpoint() {
        let dir = tempdir().unwrap();
        let response = get(&server(dir.path()), "/@cjsInit/lib/a.cjs").await;
        assert_eq!(response.status, 200);
        assert!(response.text_body().contains("export * from \"/lib/a.cjs\";"));
    }

    #[tokio::test]
    async fn test_internal_error_is_500() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.mjs"), "export const = ;").unwrap();

        let response = get(&server(dir.path()), "/broken.mjs").await;
        assert_eq!(response.status, 500);
        assert_eq!(response.text_body(), SERVER_ERROR_BODY);
    }
}
