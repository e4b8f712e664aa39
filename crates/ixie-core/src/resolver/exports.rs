//! package.json `exports` and `imports` evaluation.
//!
//! Follows Node's rules:
//! - root exports (string, `"."` key, or a bare conditions object)
//! - exact subpath keys (`"./feature"`)
//! - pattern keys with one `*` (most specific wins)
//! - condition objects walked in declaration order, `"default"` always matching
//! - array targets as ordered fallbacks

use super::Conditions;
use serde_json::{Map, Value};

/// Resolve exports for the package root (`subpath` = `None`) or a
/// `"./..."` subpath.
///
/// Returns the target path (starting with "./") if found.
#[must_use]
pub fn resolve_exports(
    pkg_json: &Value,
    subpath: Option<&str>,
    conditions: &Conditions,
) -> Option<String> {
    match subpath {
        None => resolve_exports_root(pkg_json, conditions),
        Some(sub) => resolve_exports_subpath(pkg_json, sub, conditions)
            .or_else(|| resolve_exports_pattern(pkg_json, sub, conditions)),
    }
}

/// Resolve the root export. Callers fall back to `main` on `None`.
#[must_use]
pub fn resolve_exports_root(pkg_json: &Value, conditions: &Conditions) -> Option<String> {
    let exports = pkg_json.get("exports")?;

    if exports.is_string() || exports.is_array() {
        return resolve_target(exports, conditions);
    }

    let obj = exports.as_object()?;
    if let Some(dot) = obj.get(".") {
        return resolve_target(dot, conditions);
    }

    // A root-level conditions object has no "./" keys at all.
    if !obj.keys().any(|k| k.starts_with('.')) {
        return resolve_target(exports, conditions);
    }

    None
}

/// Resolve an exact subpath key such as `"./feature"`.
#[must_use]
pub fn resolve_exports_subpath(
    pkg_json: &Value,
    subpath: &str,
    conditions: &Conditions,
) -> Option<String> {
    if !subpath.starts_with("./") {
        return None;
    }

    let obj = pkg_json.get("exports")?.as_object()?;
    if !has_subpath_keys(obj) {
        return None;
    }

    resolve_target(obj.get(subpath)?, conditions)
}

/// Resolve a pattern key such as `"./features/*"`.
#[must_use]
pub fn resolve_exports_pattern(
    pkg_json: &Value,
    subpath: &str,
    conditions: &Conditions,
) -> Option<String> {
    if !subpath.starts_with("./") {
        return None;
    }

    let obj = pkg_json.get("exports")?.as_object()?;
    resolve_pattern_map(obj, subpath, "./", conditions)
}

/// Resolve a `#`-prefixed specifier through the `imports` field.
///
/// Exact keys win over `*` patterns. Unlike exports, targets may be bare
/// package names; those are returned as-is for the caller to resolve.
#[must_use]
pub fn resolve_imports_map(
    pkg_json: &Value,
    spec: &str,
    conditions: &Conditions,
) -> Option<String> {
    if !spec.starts_with('#') {
        return None;
    }

    let imports = pkg_json.get("imports")?.as_object()?;
    if let Some(target) = imports.get(spec) {
        return resolve_import_target(target, conditions);
    }

    let mut best: Option<(&str, &Value, &str)> = None;
    for (key, value) in imports {
        if let Some(star) = match_pattern(key, spec) {
            if best.map_or(true, |(k, _, _)| key.len() > k.len()) {
                best = Some((key.as_str(), value, star));
            }
        }
    }
    let (_, value, star) = best?;
    let target = resolve_import_target(value, conditions)?;
    substitute_star(&target, star)
}

fn resolve_pattern_map(
    obj: &Map<String, Value>,
    subpath: &str,
    prefix: &str,
    conditions: &Conditions,
) -> Option<String> {
    let mut matches: Vec<(&str, &Value, &str)> = obj
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .filter_map(|(key, value)| {
            match_pattern(key, subpath).map(|star| (key.as_str(), value, star))
        })
        .collect();

    if matches.is_empty() {
        return None;
    }

    // Most specific pattern: longest key, then lexicographic for ties
    matches.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));

    let (_, target_value, star) = matches[0];
    let target = resolve_target(target_value, conditions)?;
    substitute_star(&target, star)
}

/// Check if the exports object has subpath keys (keys starting with "./").
fn has_subpath_keys(obj: &Map<String, Value>) -> bool {
    obj.keys().any(|k| k.starts_with("./") && k != ".")
}

/// Match a single-`*` pattern key, returning the `*` substitution.
fn match_pattern<'a>(pattern: &str, subpath: &'a str) -> Option<&'a str> {
    if pattern.matches('*').count() != 1 {
        return None;
    }
    let (prefix, suffix) = pattern.split_once('*')?;

    if !subpath.starts_with(prefix) || !subpath.ends_with(suffix) {
        return None;
    }

    let start = prefix.len();
    let end = subpath.len() - suffix.len();
    if start >= end {
        return None;
    }

    Some(&subpath[start..end])
}

/// Substitute `*` in a target, rejecting results that climb out of the
/// package.
fn substitute_star(target: &str, star_value: &str) -> Option<String> {
    if !target.contains('*') {
        return None;
    }

    let result = target.replace('*', star_value);
    if result.starts_with("./") && result.split('/').any(|segment| segment == "..") {
        return None;
    }

    Some(result)
}

/// Evaluate an exports target: string, fallback array, or conditions object.
fn resolve_target(target: &Value, conditions: &Conditions) -> Option<String> {
    match target {
        Value::String(s) => validate_export_path(s),
        Value::Array(items) => items.iter().find_map(|item| resolve_target(item, conditions)),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| *key == "default" || conditions.contains(key))
            .find_map(|(_, value)| resolve_target(value, conditions)),
        _ => None,
    }
}

fn resolve_import_target(target: &Value, conditions: &Conditions) -> Option<String> {
    match target {
        Value::String(s) if !s.starts_with("./") && !s.starts_with('/') => {
            Some(s.clone()).filter(|s| !s.contains(':') && !s.starts_with(".."))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|item| resolve_import_target(item, conditions)),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| *key == "default" || conditions.contains(key))
            .find_map(|(_, value)| resolve_import_target(value, conditions)),
        _ => resolve_target(target, conditions),
    }
}

/// Export targets must be package-relative and must not escape the package.
fn validate_export_path(path: &str) -> Option<String> {
    if !path.starts_with("./") {
        return None;
    }
    if path.split('/').any(|segment| segment == ".." || segment == "node_modules") {
        return None;
    }
    Some(path.to_string())
}

/// Read and parse a package.json; `None` if missing or invalid.
#[must_use]
pub fn read_package_json(path: &std::path::Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}
