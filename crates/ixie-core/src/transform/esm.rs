//! Specifier rewriting for interchange modules.

use super::swc::scan_module;
use super::{js_string, TransformError, Transformer, DYNAMIC_ENDPOINT};
use url::Url;

/// An edit to the source: replace `start..end` with `text`.
#[derive(Debug)]
struct Splice {
    start: usize,
    end: usize,
    text: String,
}

/// Rewrite import/export sources and dynamic imports of the module at
/// `location`. Everything outside the edited spans is kept byte for byte.
pub fn rewrite_module(
    transformer: &Transformer<'_>,
    location: &Url,
    code: &str,
) -> Result<String, TransformError> {
    let scan = scan_module(code, location.as_str(), false)?;
    let mut splices = Vec::with_capacity(scan.statics.len() + scan.dynamics.len() * 2);

    for source in &scan.statics {
        let rewritten = rewrite_specifier(transformer, location, &source.value);
        if rewritten != source.value {
            splices.push(Splice {
                start: source.start,
                end: source.end,
                text: js_string(&rewritten),
            });
        }
    }

    if !scan.dynamics.is_empty() {
        let prefix = dynamic_prefix(&transformer.public_path(location));
        for call in &scan.dynamics {
            splices.push(Splice {
                start: call.arg_start,
                end: call.arg_start,
                text: prefix.clone(),
            });
            splices.push(Splice {
                start: call.arg_end,
                end: call.arg_end,
                text: ")".to_string(),
            });
        }
    }

    Ok(apply(code, splices))
}

/// Replacement for a static specifier.
///
/// Root-relative paths and absolute URLs are already public. Specifiers
/// that fail to resolve become a module that throws when evaluated.
pub fn rewrite_specifier(transformer: &Transformer<'_>, parent: &Url, specifier: &str) -> String {
    if is_public(specifier) {
        return specifier.to_string();
    }

    match transformer.resolve(specifier, parent) {
        Ok(resolved) => transformer.import_path(&resolved),
        Err(err) => {
            tracing::warn!(%err, "unresolved import");
            throwing_data_module(specifier)
        }
    }
}

/// Expression prefix routing a dynamic import through the dynamic endpoint.
/// The original argument follows, then a closing `)`.
fn dynamic_prefix(public_path: &str) -> String {
    let url = format!(
        "{DYNAMIC_ENDPOINT}?base={}&specifier=",
        urlencoding::encode(public_path)
    );
    format!("{}+encodeURIComponent(", js_string(&url))
}

/// `data:` module throwing a resolution failure for `specifier`.
pub(crate) fn throwing_data_module(specifier: &str) -> String {
    let body = super::shims::resolve_failure(specifier);
    format!("data:text/javascript,{}", urlencoding::encode(&body))
}

/// Root-relative path or absolute URL.
pub(crate) fn is_public(specifier: &str) -> bool {
    if specifier.starts_with('/') {
        return true;
    }
    // A one-letter scheme is a Windows drive, not a URL.
    specifier
        .split_once(':')
        .is_some_and(|(scheme, _)| scheme.len() > 1 && Url::parse(specifier).is_ok())
}

fn apply(code: &str, mut splices: Vec<Splice>) -> String {
    splices.sort_by_key(|s| (s.start, s.end));

    let mut out = String::with_capacity(code.len() + splices.len() * 16);
    let mut cursor = 0;
    for splice in splices {
        if splice.start < cursor || splice.end > code.len() {
            continue;
        }
        out.push_str(&code[cursor..splice.start]);
        out.push_str(&splice.text);
        cursor = splice.end;
    }
    out.push_str(&code[cursor..]);
    out
}
