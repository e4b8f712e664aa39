//! Prefix-based specifier aliasing.
//!
//! An alias key matches only a whole leading segment of a specifier: the
//! key `"ab"` rewrites `"ab"` and `"ab/x"` but leaves `"abc"` alone. All keys
//! of a map are folded into one alternation, compiled once and kept in an
//! [`AliasPatternCache`] owned by whoever starts the server.

use crate::resolver::Conditions;
use regex_lite::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Replacement for an alias key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    /// Always substitute this string.
    Plain(String),
    /// Condition name to replacement, in declaration order.
    Conditional(Vec<(String, String)>),
}

impl AliasTarget {
    /// Pick the replacement for the active conditions.
    ///
    /// A conditional target uses the first declared key present in
    /// `conditions`, then `"default"`. `None` means the alias does not apply.
    #[must_use]
    pub fn select(&self, conditions: &Conditions) -> Option<&str> {
        match self {
            Self::Plain(replacement) => Some(replacement),
            Self::Conditional(entries) => entries
                .iter()
                .find(|(condition, _)| conditions.contains(condition))
                .or_else(|| entries.iter().find(|(condition, _)| condition == "default"))
                .map(|(_, replacement)| replacement.as_str()),
        }
    }
}

/// Ordered alias map from the `resolve.alias` config key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    entries: Vec<(String, AliasTarget)>,
    pattern: Option<String>,
}

impl AliasMap {
    /// Build a map; later duplicates of a key replace earlier ones.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (String, AliasTarget)>) -> Self {
        let mut deduped: Vec<(String, AliasTarget)> = Vec::new();
        for (key, target) in entries {
            if let Some(existing) = deduped.iter_mut().find(|(k, _)| *k == key) {
                existing.1 = target;
            } else {
                deduped.push((key, target));
            }
        }

        let pattern = build_pattern(deduped.iter().map(|(key, _)| key.as_str()));
        Self {
            entries: deduped,
            pattern,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AliasTarget> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, target)| target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AliasTarget)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t))
    }

    /// Source of the combined key pattern, `None` for an empty map.
    #[must_use]
    pub fn pattern_source(&self) -> Option<&str> {
        self.pattern.as_deref()
    }
}

/// `^(k1|k2|...)(?:/|$)` with longer keys first, so `node:fs/promises`
/// wins over `node:fs`.
fn build_pattern<'a>(keys: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut keys: Vec<&str> = keys.filter(|k| !k.is_empty()).collect();
    if keys.is_empty() {
        return None;
    }
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let alternation = keys
        .iter()
        .map(|k| regex_lite::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Some(format!("^({alternation})(?:/|$)"))
}

/// Compiled alias patterns keyed by pattern source.
///
/// Populated lazily; two requests racing on the same map compile the same
/// regex and the second insert overwrites the first with an equal value.
#[derive(Debug, Default)]
pub struct AliasPatternCache {
    patterns: RwLock<HashMap<String, Arc<Regex>>>,
}

impl AliasPatternCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pattern_for(&self, source: &str) -> Option<Arc<Regex>> {
        if let Some(hit) = self
            .patterns
            .read()
            .ok()
            .and_then(|patterns| patterns.get(source).cloned())
        {
            return Some(hit);
        }

        let compiled = match Regex::new(source) {
            Ok(re) => Arc::new(re),
            Err(e) => {
                tracing::warn!(pattern = source, error = %e, "alias pattern failed to compile");
                return None;
            }
        };

        if let Ok(mut patterns) = self.patterns.write() {
            patterns.insert(source.to_string(), Arc::clone(&compiled));
        }
        Some(compiled)
    }

    /// Number of compiled patterns held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.read().map(|p| p.len()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rewrite `specifier` through `aliases`. No match is the identity.
#[must_use]
pub fn match_alias<'a>(
    aliases: &AliasMap,
    cache: &AliasPatternCache,
    conditions: &Conditions,
    specifier: &'a str,
) -> Cow<'a, str> {
    let Some(source) = aliases.pattern_source() else {
        return Cow::Borrowed(specifier);
    };
    let Some(pattern) = cache.pattern_for(source) else {
        return Cow::Borrowed(specifier);
    };
    let Some(key) = pattern.captures(specifier).and_then(|c| c.get(1)) else {
        return Cow::Borrowed(specifier);
    };

    let replacement = aliases
        .get(key.as_str())
        .and_then(|target| target.select(conditions));

    match replacement {
        Some(replacement) => Cow::Owned(format!("{replacement}{}", &specifier[key.end()..])),
        None => Cow::Borrowed(specifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(key: &str, value: &str) -> (String, AliasTarget) {
        (key.to_string(), AliasTarget::Plain(value.to_string()))
    }

    fn conditions(names: &[&str]) -> Conditions {
        names.iter().copied().collect()
    }

    #[test]
    fn test_alias_matches_whole_segment_only() {
        let map = AliasMap::new([plain("ab", "/lib/ab.js")]);
        let cache = AliasPatternCache::new();
        let none = Conditions::default();

        assert_eq!(match_alias(&map, &cache, &none, "ab"), "/lib/ab.js");
        assert_eq!(match_alias(&map, &cache, &none, "ab/x"), "/lib/ab.js/x");
        assert_eq!(match_alias(&map, &cache, &none, "abc"), "abc");
        assert_eq!(match_alias(&map, &cache, &none, "xab"), "xab");
    }

    #[test]
    fn test_alias_keeps_trailing_subpath() {
        let map = AliasMap::new([plain("@app", "./src")]);
        let cache = AliasPatternCache::new();

        assert_eq!(
            match_alias(&map, &cache, &Conditions::default(), "@app/components/button.ts"),
            "./src/components/button.ts"
        );
    }

    #[test]
    fn test_alias_condition_selection() {
        let map = AliasMap::new([(
            "pkg".to_string(),
            AliasTarget::Conditional(vec![
                ("node".to_string(), "A".to_string()),
                ("default".to_string(), "B".to_string()),
            ]),
        )]);
        let cache = AliasPatternCache::new();

        assert_eq!(
            match_alias(&map, &cache, &conditions(&["browser", "node"]), "pkg"),
            "A"
        );
        assert_eq!(match_alias(&map, &cache, &conditions(&["browser"]), "pkg"), "B");
    }

    #[test]
    fn test_alias_without_matching_condition_or_default_passes_through() {
        let map = AliasMap::new([(
            "node:path".to_string(),
            AliasTarget::Conditional(vec![("browser".to_string(), "/polyfills/path.cjs".to_string())]),
        )]);
        let cache = AliasPatternCache::new();

        assert_eq!(
            match_alias(&map, &cache, &conditions(&["node"]), "node:path"),
            "node:path"
        );
        assert_eq!(
            match_alias(&map, &cache, &conditions(&["browser"]), "node:path"),
            "/polyfills/path.cjs"
        );
    }

    #[test]
    fn test_longest_key_wins() {
        let map = AliasMap::new([
            plain("node:fs", "/fs.js"),
            plain("node:fs/promises", "/fs-promises.js"),
        ]);
        let cache = AliasPatternCache::new();
        let none = Conditions::default();

        assert_eq!(match_alias(&map, &cache, &none, "node:fs/promises"), "/fs-promises.js");
        assert_eq!(match_alias(&map, &cache, &none, "node:fs"), "/fs.js");
    }

    #[test]
    fn test_regex_metacharacters_in_keys_are_literal() {
        let map = AliasMap::new([plain("a.b", "X")]);
        let cache = AliasPatternCache::new();
        let none = Conditions::default();

        assert_eq!(match_alias(&map, &cache, &none, "a.b"), "X");
        assert_eq!(match_alias(&map, &cache, &none, "axb"), "axb");
    }

    #[test]
    fn test_pattern_compiled_once_per_map() {
        let map = AliasMap::new([plain("a", "b")]);
        let cache = AliasPatternCache::new();
        let none = Conditions::default();

        let _ = match_alias(&map, &cache, &none, "a");
        let _ = match_alias(&map, &cache, &none, "a/b");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_empty_map_is_identity() {
        let cache = AliasPatternCache::new();
        assert_eq!(
            match_alias(&AliasMap::default(), &cache, &Conditions::default(), "x"),
            "x"
        );
        assert!(cache.is_empty());
    }
}
