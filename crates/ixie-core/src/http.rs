//! Transport-neutral request and response types.
//!
//! The router speaks these; the CLI's listener converts to and from its
//! HTTP stack.

use bytes::Bytes;
use url::Url;

/// Content type of every generated or rewritten script.
pub const JAVASCRIPT: &str = "text/javascript";

/// Case-insensitive header list. Names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value of `name` with `value`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.0.push((name.to_ascii_lowercase(), value.into()));
    }

    /// Add a value without replacing existing ones.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0.push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value);
        }
        headers
    }
}

/// An inbound request.
#[derive(Debug, Clone)]
pub struct DevRequest {
    pub method: String,
    /// Normalized URL: dot segments removed, percent-encoding kept.
    pub url: Url,
    pub headers: Headers,
}

impl DevRequest {
    /// Build a request from a raw path and optional query string.
    pub fn new(
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: Headers,
    ) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(ORIGIN)?;
        url.set_path(path);
        url.set_query(query);
        Ok(Self {
            method: method.to_string(),
            url,
            headers,
        })
    }

    /// GET request for `path_and_query`.
    pub fn get(path_and_query: &str) -> Result<Self, url::ParseError> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        Self::new("GET", path, query, Headers::new())
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// First decoded value of query parameter `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Placeholder origin that request paths are parsed against.
const ORIGIN: &str = "http://ixie.localhost/";

/// A response produced by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl DevResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text response.
    #[must_use]
    pub fn text(status: u16, body: &str) -> Self {
        Self::new(status)
            .with_header("content-type", "text/plain;charset=utf-8")
            .with_body(body.to_string())
    }

    /// 200 script response.
    #[must_use]
    pub fn javascript(code: impl Into<Bytes>) -> Self {
        Self::new(200)
            .with_header("content-type", JAVASCRIPT)
            .with_body(code)
    }

    /// 302 to `location`.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self::new(302).with_header("location", location)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text_body(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html");
        assert_eq!(headers.get("content-type"), Some("text/html"));

        headers.set("CONTENT-TYPE", "text/javascript");
        assert_eq!(headers.iter().count(), 1);
        assert_eq!(headers.get("Content-Type"), Some("text/javascript"));

        headers.remove("content-TYPE");
        assert!(!headers.contains("content-type"));
    }

    #[test]
    fn test_request_path_is_normalized() {
        let request = DevRequest::get("/a/./b/../c.ts?x=1").unwrap();
        assert_eq!(request.path(), "/a/c.ts");
        assert_eq!(request.query_param("x").as_deref(), Some("1"));
    }

    #[test]
    fn test_escape_segments_survive_normalization() {
        let request = DevRequest::get("/@../@../lib/x.js").unwrap();
        assert_eq!(request.path(), "/@../@../lib/x.js");
    }

    #[test]
    fn test_query_param_decoding() {
        let request = DevRequest::get("/@dynamic?base=%2Fsrc%2Fa.ts&specifier=.%2Fb%20c.js").unwrap();
        assert_eq!(request.query_param("base").as_deref(), Some("/src/a.ts"));
        assert_eq!(request.query_param("specifier").as_deref(), Some("./b c.js"));
        assert_eq!(request.query_param("missing"), None);
    }
}
