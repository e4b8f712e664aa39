//! `<script type="module" src>` rewriting for HTML documents.

use super::esm::is_public;
use super::{js_string, Transformer};
use url::Url;

/// An attribute of a start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Lowercased name.
    pub name: String,
    /// Decoded value, `None` for a bare attribute.
    pub value: Option<String>,
    /// Byte range of the raw value, quotes included.
    pub value_span: Option<(usize, usize)>,
}

/// A `<script>` element found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptElement {
    /// Byte offset of `<script`.
    pub start: usize,
    /// Byte offset just past `</script>` (or the end of the document).
    pub end: usize,
    pub attributes: Vec<Attribute>,
}

impl ScriptElement {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Find every `<script>` element, skipping comments and raw text.
#[must_use]
pub fn scan_scripts(html: &str) -> Vec<ScriptElement> {
    let bytes = html.as_bytes();
    let mut scripts = Vec::new();
    let mut i = 0;

    while let Some(offset) = html[i..].find('<') {
        let start = i + offset;
        let rest = &html[start..];

        if rest.starts_with("<!--") {
            i = rest.find("-->").map_or(bytes.len(), |end| start + end + 3);
            continue;
        }

        let Some(tag) = raw_text_tag(rest) else {
            i = start + 1;
            continue;
        };

        let (attributes, open_end) = parse_attributes(html, start + 1 + tag.len());
        let end = find_close_tag(html, open_end, tag);
        if tag == "script" {
            scripts.push(ScriptElement {
                start,
                end,
                attributes,
            });
        }
        i = end;
    }

    scripts
}

/// `script` or `style` when `rest` opens one of them.
fn raw_text_tag(rest: &str) -> Option<&'static str> {
    ["script", "style"].into_iter().find(|tag| {
        let bytes = rest.as_bytes();
        bytes.len() > tag.len() + 1
            && bytes[1..=tag.len()].eq_ignore_ascii_case(tag.as_bytes())
            && matches!(bytes[tag.len() + 1], b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r' | 0x0c)
    })
}

/// Parse attributes from `i` up to the closing `>`. Returns them and the
/// offset past `>`.
fn parse_attributes(html: &str, mut i: usize) -> (Vec<Attribute>, usize) {
    let bytes = html.as_bytes();
    let mut attributes = Vec::new();

    loop {
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
            i += 1;
        }
        if i >= bytes.len() {
            return (attributes, bytes.len());
        }
        if bytes[i] == b'>' {
            return (attributes, i + 1);
        }

        let name_start = i;
        while i < bytes.len() && !matches!(bytes[i], b'=' | b'>' | b'/') && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let name = html[name_start..i].to_ascii_lowercase();

        let mut j = i;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j >= bytes.len() || bytes[j] != b'=' {
            attributes.push(Attribute {
                name,
                value: None,
                value_span: None,
            });
            continue;
        }

        i = j + 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let value_start = i;
        let raw = match bytes.get(i) {
            Some(&quote @ (b'"' | b'\'')) => {
                let close = html[i + 1..]
                    .find(quote as char)
                    .map_or(bytes.len(), |end| i + 1 + end);
                let raw = &html[i + 1..close];
                i = (close + 1).min(bytes.len());
                raw
            }
            _ => {
                while i < bytes.len() && bytes[i] != b'>' && !bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                &html[value_start..i]
            }
        };

        attributes.push(Attribute {
            name,
            value: Some(decode_entities(raw)),
            value_span: Some((value_start, i)),
        });
    }
}

/// Offset past the `</tag>` closing the raw text starting at `i`.
fn find_close_tag(html: &str, i: usize, tag: &str) -> usize {
    let lowered = html[i..].to_ascii_lowercase();
    let close = format!("</{tag}");
    match lowered.find(&close) {
        Some(offset) => {
            let at = i + offset;
            html[at..].find('>').map_or(html.len(), |end| at + end + 1)
        }
        None => html.len(),
    }
}

/// Decode the named references attribute values commonly carry plus
/// numeric `&#NN;` and `&#xNN;` references. Anything else is kept verbatim.
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        match rest.find(';').and_then(|end| Some((decode_reference(&rest[1..end])?, end))) {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "quot" => Some('"'),
        "apos" => Some('\''),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        _ => {
            let number = name.strip_prefix('#')?;
            let code = match number.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => number.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Inline module script that throws `message` when executed.
fn throwing_script(message: &str) -> String {
    format!(
        "<script type=\"module\">throw new Error({})</script>",
        js_string(message).replace("</", "<\\/")
    )
}

/// Resolve the `src` of every module script in `html`.
///
/// Root-relative and absolute sources are left alone. A source that fails
/// to resolve turns the element into a script that throws at execution,
/// so the rest of the page still loads.
#[must_use]
pub fn rewrite_scripts(transformer: &Transformer<'_>, location: &Url, html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;

    for script in scan_scripts(html) {
        let is_module = script
            .attribute("type")
            .and_then(|a| a.value.as_deref())
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("module"));
        let Some(src) = script.attribute("src") else {
            continue;
        };
        let (Some(specifier), Some((value_start, value_end))) = (src.value.as_deref(), src.value_span)
        else {
            continue;
        };
        if !is_module || is_public(specifier) || specifier.starts_with("//") {
            continue;
        }

        match transformer.resolve(specifier, location) {
            Ok(resolved) => {
                let path = transformer.import_path(&resolved);
                out.push_str(&html[cursor..value_start]);
                out.push('"');
                out.push_str(&escape_attribute(&path));
                out.push('"');
                cursor = value_end;
            }
            Err(err) => {
                tracing::warn!(%err, "unresolved module script");
                out.push_str(&html[cursor..script.start]);
                out.push_str(&throwing_script(&format!("failed to resolve '{specifier}'")));
                cursor = script.end;
            }
        }
    }

    out.push_str(&html[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{AliasMap, AliasPatternCache};
    use crate::resolver::{Conditions, Resolver};
    use crate::sandbox::ServeDirs;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_scan_scripts() {
        let html = r#"<html><!-- <script src="c.js"></script> -->
<SCRIPT type=module src='./a.ts'></SCRIPT>
<style>.x::after { content: "<script>" }</style>
<script>if (a < b) document.write("<p>")</script>
<script defer src="b.js" />
"#;
        let scripts = scan_scripts(html);
        assert_eq!(scripts.len(), 3);

        let first = &scripts[0];
        assert_eq!(
            first.attribute("type").unwrap().value.as_deref(),
            Some("module")
        );
        assert_eq!(first.attribute("src").unwrap().value.as_deref(), Some("./a.ts"));
        assert!(html[first.start..first.end].ends_with("</SCRIPT>"));

        assert!(scripts[1].attribute("src").is_none());
        assert_eq!(scripts[2].attribute("defer").unwrap().value, None);
    }

    #[test]
    fn test_attribute_entities_are_decoded() {
        let scripts = scan_scripts(r#"<script src="a.js?x=1&amp;y=2"></script>"#);
        assert_eq!(
            scripts[0].attribute("src").unwrap().value.as_deref(),
            Some("a.js?x=1&y=2")
        );
    }

    #[test]
    fn test_numeric_references_are_decoded() {
        assert_eq!(decode_entities("&#x2F;main.js"), "/main.js");
        assert_eq!(decode_entities("&#47;main&#X2e;js"), "/main.js");
        assert_eq!(decode_entities("a&amp;lt;b"), "a&lt;b");
        assert_eq!(decode_entities("&#39;q&apos;"), "'q'");
        // unknown or malformed references pass through
        assert_eq!(decode_entities("a&b; &#xZZ; &#1114112; &"), "a&b; &#xZZ; &#1114112; &");
    }

    fn rewrite(dir: &std::path::Path, html: &str) -> String {
        let resolver = Resolver::new(
            AliasMap::default(),
            Conditions::new(),
            Arc::new(AliasPatternCache::new()),
        );
        let dirs = ServeDirs::new(dir, ".", ".").unwrap();
        let transformer = Transformer::new(&resolver, &dirs);
        let location = dirs.source_dir.join("index.html").unwrap();
        rewrite_scripts(&transformer, &location, html)
    }

    #[test]
    fn test_module_src_is_resolved() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.ts"), "export {};").unwrap();
        fs::write(dir.path().join("legacy.cjs"), "exports.x = 1;").unwrap();

        let html = r#"<script type="module" src="./src/main.ts"></script>
<script type="module" src=./legacy.cjs></script>
<script type="module" src="/abs.js"></script>
<script src="./src/main.ts"></script>"#;
        let out = rewrite(dir.path(), html);

        assert_eq!(
            out,
            r#"<script type="module" src="/src/main.ts"></script>
<script type="module" src="/@cjsInit/legacy.cjs"></script>
<script type="module" src="/abs.js"></script>
<script src="./src/main.ts"></script>"#
        );
    }

    #[test]
    fn test_encoded_src_is_resolved() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.ts"), "export {};").unwrap();

        let out = rewrite(
            dir.path(),
            r#"<script type="module" src="&#46;&#x2F;src&#47;main.ts"></script>"#,
        );
        assert_eq!(out, r#"<script type="module" src="/src/main.ts"></script>"#);
    }

    #[test]
    fn test_unresolved_src_becomes_throwing_script() {
        let dir = tempdir().unwrap();
        let html = "<body><script type=\"module\" src=\"./nope.ts\"></script></body>";
        let out = rewrite(dir.path(), html);

        assert_eq!(
            out,
            "<body><script type=\"module\">throw new Error(\"failed to resolve './nope.ts'\")</script></body>"
        );
    }

    #[test]
    fn test_throwing_script_escapes_close_tags() {
        let script = throwing_script("</script>");
        assert_eq!(
            script,
            "<script type=\"module\">throw new Error(\"<\\/script>\")</script>"
        );
    }
}
