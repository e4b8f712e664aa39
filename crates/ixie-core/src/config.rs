//! Configuration file discovery and parsing.
//!
//! Loads the nearest `ixie.config.*` and extracts static configuration:
//!
//! ```js
//! export default defineConfig({
//!   sourceDir: "./src",
//!   publicDir: new URL("./public", import.meta.url),
//!   resolve: {
//!     alias: { "@": new URL("./src", import.meta.url).href, fs: { browser: "memfs", default: "fs" } },
//!     conditions: ["browser"],
//!   },
//!   serve: { port: 3000, hostname: "localhost" },
//! });
//! ```
//!
//! Config files are never executed. The default export must be a literal
//! object; the only expression understood is `new URL(<string>,
//! import.meta.url)`, evaluated against the config file's location.

use crate::alias::{AliasMap, AliasTarget};
use crate::error::{Error, Result};
use crate::resolver::Conditions;
use crate::transform::swc::strip_types;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use url::Url;

/// Config file names in priority order.
pub const CONFIG_FILES: &[&str] = &[
    "ixie.config.ts",
    "ixie.config.mts",
    "ixie.config.cts",
    "ixie.config.js",
    "ixie.config.mjs",
    "ixie.config.cjs",
    "ixie.config.json",
];

/// Configuration loaded from a config file.
#[derive(Debug, Clone)]
pub struct IxieConfig {
    /// Static assets, relative to the config file (or a `file:` URL).
    pub public_dir: String,
    /// Transformed sources, relative to the config file (or a `file:` URL).
    pub source_dir: String,
    pub resolve: ResolveConfig,
    pub serve: ServeConfig,
}

impl Default for IxieConfig {
    fn default() -> Self {
        Self {
            public_dir: ".".to_string(),
            source_dir: ".".to_string(),
            resolve: ResolveConfig::default(),
            serve: ServeConfig::default(),
        }
    }
}

/// `resolve` options.
#[derive(Debug, Clone, Default)]
pub struct ResolveConfig {
    pub alias: AliasMap,
    /// Appended to the conditions of every resolution.
    pub conditions: Conditions,
}

/// `serve` options, overridden by command-line flags.
#[derive(Debug, Clone, Default)]
pub struct ServeConfig {
    pub port: Option<u16>,
    pub hostname: Option<String>,
}

/// Find the nearest config file, searching `start` and its ancestors.
#[must_use]
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    })
}

/// Load configuration.
///
/// With `explicit`, that file must exist (relative paths are taken from
/// `cwd`). Otherwise the nearest config above `cwd` is used, and `None`
/// means there is none.
pub fn load_config(cwd: &Path, explicit: Option<&Path>) -> Result<Option<(PathBuf, IxieConfig)>> {
    let path = match explicit {
        Some(p) => {
            let abs = if p.is_absolute() {
                p.to_path_buf()
            } else {
                cwd.join(p)
            };
            if !abs.is_file() {
                return Err(Error::ConfigNotFound { start: abs });
            }
            abs
        }
        None => match find_config_file(cwd) {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    let source = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;

    let config = parse_config(&source, &path)?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(Some((path, config)))
}

/// Parse config file contents; `path` decides the syntax and anchors
/// `import.meta.url`.
pub fn parse_config(source: &str, path: &Path) -> Result<IxieConfig> {
    let parse_error = |message: String| Error::ConfigParse {
        path: path.to_path_buf(),
        message,
    };

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let value = if ext == "json" {
        serde_json::from_str(source).map_err(|e| parse_error(e.to_string()))?
    } else {
        let js = if matches!(ext, "ts" | "mts" | "cts") {
            strip_types(source, &path.display().to_string(), false)
                .map_err(|e| parse_error(e.message))?
        } else {
            source.to_string()
        };
        let base = path
            .canonicalize()
            .ok()
            .and_then(|p| Url::from_file_path(p).ok());
        parse_default_export(&js, base).map_err(parse_error)?
    };

    config_from_value(&value).map_err(parse_error)
}

fn config_from_value(value: &Value) -> std::result::Result<IxieConfig, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "config must be an object".to_string())?;
    let mut config = IxieConfig::default();

    if let Some(dir) = string_field(obj, "publicDir")? {
        config.public_dir = dir;
    }
    if let Some(dir) = string_field(obj, "sourceDir")? {
        config.source_dir = dir;
    }

    if let Some(resolve) = obj.get("resolve").and_then(Value::as_object) {
        if let Some(alias) = resolve.get("alias") {
            config.resolve.alias = parse_alias(alias)?;
        }
        if let Some(conditions) = resolve.get("conditions") {
            let list = conditions
                .as_array()
                .ok_or_else(|| "resolve.conditions must be an array".to_string())?;
            config.resolve.conditions = list
                .iter()
                .map(|c| {
                    c.as_str()
                        .ok_or_else(|| "resolve.conditions must contain strings".to_string())
                })
                .collect::<std::result::Result<Vec<_>, _>>()?
                .into_iter()
                .collect();
        }
    }

    if let Some(serve) = obj.get("serve").and_then(Value::as_object) {
        if let Some(port) = serve.get("port") {
            let port = port
                .as_u64()
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| format!("serve.port must be a port number, got {port}"))?;
            config.serve.port = Some(port);
        }
        config.serve.hostname = string_field(serve, "hostname")?;
    }

    Ok(config)
}

fn string_field(
    obj: &Map<String, Value>,
    key: &str,
) -> std::result::Result<Option<String>, String> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(format!("{key} must be a string, got {other}")),
    }
}

fn parse_alias(value: &Value) -> std::result::Result<AliasMap, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "resolve.alias must be an object".to_string())?;

    let mut entries = Vec::with_capacity(obj.len());
    for (key, target) in obj {
        let target = match target {
            Value::String(s) => AliasTarget::Plain(s.clone()),
            Value::Object(conditions) => {
                let mut pairs = Vec::with_capacity(conditions.len());
                for (condition, replacement) in conditions {
                    let replacement = replacement.as_str().ok_or_else(|| {
                        format!("alias '{key}' condition '{condition}' must be a string")
                    })?;
                    pairs.push((condition.clone(), replacement.to_string()));
                }
                AliasTarget::Conditional(pairs)
            }
            other => return Err(format!("alias '{key}' must be a string or an object, got {other}")),
        };
        entries.push((key.clone(), target));
    }

    Ok(AliasMap::new(entries))
}

/// Extract and parse the default export object of a JS config.
fn parse_default_export(source: &str, base: Option<Url>) -> std::result::Result<Value, String> {
    let stripped = strip_comments(source);
    let start = ["export default", "module.exports ="]
        .iter()
        .find_map(|marker| stripped.find(marker).map(|idx| idx + marker.len()))
        .ok_or_else(|| "no `export default` or `module.exports =` found".to_string())?;

    let mut parser = JsObjectParser::new(&stripped[start..], base);
    parser.skip_whitespace();
    if parser.eat_word("defineConfig") {
        parser.skip_whitespace();
        parser.expect('(')?;
    }
    parser.parse_value()
}

/// Strip single-line (//) and multi-line (/* */) comments from JS source.
fn strip_comments(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut i = 0;
    let mut in_string: Option<char> = None;

    while i < len {
        if let Some(quote) = in_string {
            result.push(chars[i]);
            if chars[i] == '\\' && i + 1 < len {
                result.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if chars[i] == quote {
                in_string = None;
            }
            i += 1;
        } else if i + 1 < len && chars[i] == '/' && chars[i + 1] == '/' {
            while i < len && chars[i] != '\n' {
                i += 1;
            }
        } else if i + 1 < len && chars[i] == '/' && chars[i + 1] == '*' {
            i += 2;
            while i + 1 < len && !(chars[i] == '*' && chars[i + 1] == '/') {
                // Keep line structure
                if chars[i] == '\n' {
                    result.push('\n');
                }
                i += 1;
            }
            i += 2;
        } else {
            if matches!(chars[i], '"' | '\'' | '`') {
                in_string = Some(chars[i]);
            }
            result.push(chars[i]);
            i += 1;
        }
    }

    result
}

/// Parser for JavaScript object literals into `serde_json::Value`.
///
/// Handles unquoted keys, single/double/template strings, trailing commas,
/// nested objects and arrays, numbers, booleans, `null`, and
/// `new URL(<string>, import.meta.url)[.href]`.
struct JsObjectParser {
    chars: Vec<char>,
    pos: usize,
    base: Option<Url>,
}

impl JsObjectParser {
    fn new(input: &str, base: Option<Url>) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            base,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> std::result::Result<(), String> {
        self.skip_whitespace();
        match self.advance() {
            Some(ch) if ch == expected => Ok(()),
            other => Err(format!("expected '{expected}' at position {}, got {other:?}", self.pos)),
        }
    }

    /// Consume `word` if it is next and not followed by an identifier char.
    fn eat_word(&mut self, word: &str) -> bool {
        let end = self.pos + word.chars().count();
        let matches = self.starts_with(word)
            && !self
                .chars
                .get(end)
                .is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == '$');
        if matches {
            self.pos = end;
        }
        matches
    }

    fn parse_value(&mut self) -> std::result::Result<Value, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some('"' | '\'' | '`') => self.parse_string().map(Value::String),
            Some(ch) if ch == '-' || ch == '.' || ch.is_ascii_digit() => self.parse_number(),
            Some(_) if self.eat_word("true") => Ok(Value::Bool(true)),
            Some(_) if self.eat_word("false") => Ok(Value::Bool(false)),
            Some(_) if self.eat_word("null") => Ok(Value::Null),
            Some(_) if self.eat_word("new") => self.parse_new_url(),
            Some(ch) => Err(format!("unexpected character '{ch}' at position {}", self.pos)),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn parse_object(&mut self) -> std::result::Result<Value, String> {
        self.advance(); // '{'
        let mut map = Map::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.advance();
                    return Ok(Value::Object(map));
                }
                None => return Err("unterminated object".to_string()),
                _ => {}
            }

            let key = self.parse_key()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            map.insert(key, value);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some('}') => {}
                None => return Err("unterminated object".to_string()),
                Some(ch) => return Err(format!("expected ',' or '}}' in object, got '{ch}'")),
            }
        }
    }

    fn parse_array(&mut self) -> std::result::Result<Value, String> {
        self.advance(); // '['
        let mut arr = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(']') => {
                    self.advance();
                    return Ok(Value::Array(arr));
                }
                None => return Err("unterminated array".to_string()),
                _ => {}
            }

            arr.push(self.parse_value()?);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.advance();
                }
                Some(']') => {}
                None => return Err("unterminated array".to_string()),
                Some(ch) => return Err(format!("expected ',' or ']' in array, got '{ch}'")),
            }
        }
    }

    fn parse_key(&mut self) -> std::result::Result<String, String> {
        self.skip_whitespace();
        match self.peek() {
            Some('"' | '\'') => self.parse_string(),
            Some(ch) if ch.is_alphanumeric() || ch == '_' || ch == '$' => {
                let mut key = String::new();
                while let Some(ch) = self.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                        key.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
                Ok(key)
            }
            other => Err(format!("expected object key, got {other:?}")),
        }
    }

    fn parse_string(&mut self) -> std::result::Result<String, String> {
        let Some(quote) = self.advance() else {
            return Err("expected string".to_string());
        };
        let mut s = String::new();

        loop {
            match self.advance() {
                Some(ch) if ch == quote => return Ok(s),
                Some('$') if quote == '`' && self.peek() == Some('{') => {
                    return Err("template interpolation is not supported".to_string());
                }
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some('\n') => {}
                    Some(ch) => s.push(ch),
                    None => return Err("unterminated string escape".to_string()),
                },
                Some(ch) => s.push(ch),
                None => return Err("unterminated string".to_string()),
            }
        }
    }

    fn parse_number(&mut self) -> std::result::Result<Value, String> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.advance();
        }
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '_'))
        {
            self.advance();
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("invalid number '{text}'"))
    }

    /// After `new`: `URL(<string>, import.meta.url)` with optional `.href`.
    fn parse_new_url(&mut self) -> std::result::Result<Value, String> {
        self.skip_whitespace();
        if !self.eat_word("URL") {
            return Err(format!("only `new URL(...)` is supported (position {})", self.pos));
        }
        self.expect('(')?;
        self.skip_whitespace();
        let relative = self.parse_string()?;
        self.expect(',')?;
        self.skip_whitespace();
        if !self.eat_word("import.meta.url") {
            return Err("`new URL` must be relative to import.meta.url".to_string());
        }
        self.skip_whitespace();
        if self.peek() == Some(',') {
            self.advance();
        }
        self.expect(')')?;

        let checkpoint = self.pos;
        self.skip_whitespace();
        if !(self.peek() == Some('.') && {
            self.advance();
            self.eat_word("href")
        }) {
            self.pos = checkpoint;
        }

        let base = self
            .base
            .as_ref()
            .ok_or_else(|| "import.meta.url is unknown for this config".to_string())?;
        let url = base
            .join(&relative)
            .map_err(|e| format!("invalid URL '{relative}': {e}"))?;
        Ok(Value::String(url.to_string()))
    }

    fn starts_with(&self, s: &str) -> bool {
        let mut chars = self.chars[self.pos..].iter();
        s.chars().all(|expected| chars.next() == Some(&expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn parse_js(source: &str) -> IxieConfig {
        parse_config(source, Path::new("/project/ixie.config.js")).unwrap()
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        assert!(find_config_file(&nested).is_none());

        fs::write(dir.path().join("ixie.config.json"), "{}").unwrap();
        assert_eq!(
            find_config_file(&nested).unwrap(),
            dir.path().join("ixie.config.json")
        );

        // ts takes priority over json in the same directory
        fs::write(dir.path().join("ixie.config.ts"), "export default {}").unwrap();
        assert_eq!(
            find_config_file(&nested).unwrap(),
            dir.path().join("ixie.config.ts")
        );

        // nearer directories win
        fs::write(nested.join("ixie.config.js"), "export default {}").unwrap();
        assert_eq!(find_config_file(&nested).unwrap(), nested.join("ixie.config.js"));
    }

    #[test]
    fn test_defaults() {
        let config = parse_js("export default {};");
        assert_eq!(config.public_dir, ".");
        assert_eq!(config.source_dir, ".");
        assert!(config.resolve.alias.is_empty());
        assert!(config.resolve.conditions.is_empty());
        assert_eq!(config.serve.port, None);
    }

    #[test]
    fn test_parse_full_config() {
        let source = r#"
            // dev server config
            import { defineConfig } from "ixie";
            export default defineConfig({
                sourceDir: './src',
                publicDir: `public`, /* static files */
                resolve: {
                    alias: {
                        "@": "/src",
                        fs: { browser: 'memfs', default: 'node:fs' },
                    },
                    conditions: ["browser", "development",],
                },
                serve: { port: 4000, hostname: 'localhost' },
            });
        "#;

        let config = parse_js(source);
        assert_eq!(config.source_dir, "./src");
        assert_eq!(config.public_dir, "public");
        assert_eq!(
            config.resolve.alias.get("@"),
            Some(&AliasTarget::Plain("/src".to_string()))
        );
        assert_eq!(
            config.resolve.alias.get("fs"),
            Some(&AliasTarget::Conditional(vec![
                ("browser".to_string(), "memfs".to_string()),
                ("default".to_string(), "node:fs".to_string()),
            ]))
        );
        assert_eq!(
            config.resolve.conditions.iter().collect::<Vec<_>>(),
            vec!["browser", "development"]
        );
        assert_eq!(config.serve.port, Some(4000));
        assert_eq!(config.serve.hostname.as_deref(), Some("localhost"));
    }

    #[test]
    fn test_new_url_relative_to_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ixie.config.mjs");
        let source = r#"export default {
            sourceDir: new URL("./src/", import.meta.url).href,
            resolve: { alias: { lib: new URL('../shared/lib', import.meta.url) } },
        };"#;
        fs::write(&path, source).unwrap();

        let config = parse_config(source, &path).unwrap();
        let base = Url::from_file_path(path.canonicalize().unwrap()).unwrap();
        assert_eq!(config.source_dir, base.join("./src/").unwrap().to_string());
        assert_eq!(
            config.resolve.alias.get("lib"),
            Some(&AliasTarget::Plain(
                base.join("../shared/lib").unwrap().to_string()
            ))
        );
    }

    #[test]
    fn test_typescript_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ixie.config.ts");
        let source = r#"
            interface Config { sourceDir: string }
            const port: number = 1;
            export default { sourceDir: "src" } satisfies Config;
        "#;
        fs::write(&path, source).unwrap();

        let (found, config) = load_config(dir.path(), None).unwrap().unwrap();
        assert_eq!(found, path);
        assert_eq!(config.source_dir, "src");
    }

    #[test]
    fn test_commonjs_and_json_configs() {
        let config = parse_config(
            "module.exports = { serve: { port: 8080 } };",
            Path::new("/p/ixie.config.cjs"),
        )
        .unwrap();
        assert_eq!(config.serve.port, Some(8080));

        let config = parse_config(
            r#"{ "publicDir": "static" }"#,
            Path::new("/p/ixie.config.json"),
        )
        .unwrap();
        assert_eq!(config.public_dir, "static");
    }

    #[test]
    fn test_malformed_alias_is_an_error() {
        let err = parse_config(
            "export default { resolve: { alias: { a: 1 } } };",
            Path::new("/p/ixie.config.js"),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
        assert!(err.to_string().contains("alias 'a'"));
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let err = parse_config(
            "export default { serve: { port: 70000 } };",
            Path::new("/p/ixie.config.js"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("serve.port"));
    }

    #[test]
    fn test_no_default_export() {
        assert!(parse_config("const config = {};", Path::new("/p/ixie.config.js")).is_err());
    }

    #[test]
    fn test_load_config_explicit_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("custom.json"), r#"{ "sourceDir": "app" }"#).unwrap();

        let (_, config) = load_config(dir.path(), Some(Path::new("custom.json")))
            .unwrap()
            .unwrap();
        assert_eq!(config.source_dir, "app");

        let missing = load_config(dir.path(), Some(Path::new("nope.json")));
        assert!(matches!(missing, Err(Error::ConfigNotFound { .. })));
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let result = strip_comments("a // x\n'http://b' /* c */ d");
        assert_eq!(result, "a \n'http://b'  d");
    }
}
