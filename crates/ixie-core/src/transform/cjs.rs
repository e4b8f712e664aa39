//! Interchange wrappers around legacy CommonJS modules.
//!
//! The body is analyzed at token level for the names it assigns on its
//! exports object and the modules it requires. The wrapper imports every
//! required module up front, exports one binding per detected name plus
//! the exports object as default, and defers running the body to an
//! idempotent `__cjsInit` so two legacy modules requiring each other see
//! each other's partial exports instead of failing.

use super::swc::{scan_module, strip_types};
use super::{js_string, Transformer, CJS_INTEROP_PREFIX, JSON_PREFIX};
use crate::format::{self, ModuleFormat};
use crate::lexer::{tokenize, Token};
use std::collections::HashSet;
use url::Url;

/// How many levels of `module.exports = require(...)` chains contribute
/// export names.
const MAX_REEXPORT_DEPTH: usize = 4;

/// Names that never become named exports of a wrapper.
const RESERVED_EXPORTS: &[&str] = &["default", "__cjsInit"];

/// What a legacy module exports and requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CjsAnalysis {
    /// Names assigned on the exports object, first seen first.
    pub exports: Vec<String>,
    /// Literal `require` arguments, first seen first.
    pub requires: Vec<String>,
    /// Modules whose exports are re-exported wholesale.
    pub reexports: Vec<String>,
}

impl CjsAnalysis {
    fn add_export(&mut self, name: &str) {
        push_unique(&mut self.exports, name);
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Analyze a legacy module body.
#[must_use]
pub fn analyze_commonjs(source: &str) -> CjsAnalysis {
    let tokens = tokenize(source);
    let mut analysis = CjsAnalysis::default();

    for i in 0..tokens.len() {
        let after_dot = i > 0 && (tokens[i - 1].is_punct(".") || tokens[i - 1].is_punct("?."));
        let at = |offset: usize| tokens.get(i + offset);

        match &tokens[i] {
            Token::Ident(word) if word == "require" && !after_dot => {
                if let Some(name) = require_call(&tokens, i) {
                    push_unique(&mut analysis.requires, &name);
                }
            }
            Token::Ident(word) if word == "exports" && !after_dot => {
                if let Some(name) = member_assignment(&tokens, i + 1) {
                    analysis.add_export(&name);
                }
            }
            Token::Ident(word) if word == "module" && !after_dot => {
                let is_exports = at(1).is_some_and(|t| t.is_punct("."))
                    && at(2).is_some_and(|t| t.is_ident("exports"));
                if !is_exports {
                    continue;
                }
                if let Some(name) = member_assignment(&tokens, i + 3) {
                    analysis.add_export(&name);
                } else if at(3).is_some_and(|t| t.is_punct("=")) {
                    module_exports_assignment(&tokens, i + 4, &mut analysis);
                }
            }
            Token::Ident(word) if word == "defineProperty" && after_dot => {
                let on_object = i >= 2 && tokens[i - 2].is_ident("Object");
                if on_object {
                    if let Some(name) = define_property(&tokens, i + 1) {
                        analysis.add_export(&name);
                    }
                }
            }
            Token::Ident(word) if word == "__exportStar" || word == "__export" => {
                let wrapped = at(1).is_some_and(|t| t.is_punct("("))
                    && at(2).is_some_and(|t| t.is_ident("require"));
                if wrapped {
                    if let Some(name) = require_call(&tokens, i + 2) {
                        push_unique(&mut analysis.reexports, &name);
                    }
                }
            }
            _ => {}
        }
    }

    analysis
}

/// `require("x")` starting at `i`, not followed by a property access.
fn require_call(tokens: &[Token], i: usize) -> Option<String> {
    let name = match (tokens.get(i + 1), tokens.get(i + 2), tokens.get(i + 3)) {
        (Some(open), Some(Token::Str(name)), Some(close))
            if open.is_punct("(") && close.is_punct(")") =>
        {
            name.clone()
        }
        _ => return None,
    };
    Some(name)
}

/// `.name =` or `["name"] =` starting at `i` (not `==`).
fn member_assignment(tokens: &[Token], i: usize) -> Option<String> {
    match (tokens.get(i), tokens.get(i + 1), tokens.get(i + 2), tokens.get(i + 3)) {
        (Some(dot), Some(Token::Ident(name)), Some(eq), _) if dot.is_punct(".") && eq.is_punct("=") => {
            Some(name.clone())
        }
        (Some(open), Some(Token::Str(name)), Some(close), Some(eq))
            if open.is_punct("[") && close.is_punct("]") && eq.is_punct("=") =>
        {
            Some(name.clone())
        }
        _ => None,
    }
}

/// `(exports, "name"` or `(module.exports, "name"` starting at `i`.
fn define_property(tokens: &[Token], i: usize) -> Option<String> {
    if !tokens.get(i)?.is_punct("(") {
        return None;
    }
    let mut j = i + 1;
    if tokens.get(j)?.is_ident("module") {
        if !(tokens.get(j + 1)?.is_punct(".") && tokens.get(j + 2)?.is_ident("exports")) {
            return None;
        }
        j += 3;
    } else if tokens.get(j)?.is_ident("exports") {
        j += 1;
    } else {
        return None;
    }
    match (tokens.get(j)?, tokens.get(j + 1)?) {
        (comma, Token::Str(name)) if comma.is_punct(",") => Some(name.clone()),
        _ => None,
    }
}

/// Right-hand side of `module.exports =`, starting at `i`.
fn module_exports_assignment(tokens: &[Token], i: usize, analysis: &mut CjsAnalysis) {
    match tokens.get(i) {
        Some(Token::Ident(word)) if word == "require" => {
            let terminated = tokens
                .get(i + 4)
                .map_or(true, |t| !t.is_punct(".") && !t.is_punct("[") && !t.is_punct("("));
            if terminated {
                if let Some(name) = require_call(tokens, i) {
                    push_unique(&mut analysis.reexports, &name);
                }
            }
        }
        Some(open) if open.is_punct("{") => object_literal_keys(tokens, i + 1, analysis),
        _ => {}
    }
}

/// Keys of an object literal whose first token is at `i`.
fn object_literal_keys(tokens: &[Token], mut i: usize, analysis: &mut CjsAnalysis) {
    loop {
        let Some(token) = tokens.get(i) else { return };
        if token.is_punct("}") {
            return;
        }

        let next = tokens.get(i + 1);
        match token {
            Token::Punct("...") => {
                if tokens.get(i + 1).is_some_and(|t| t.is_ident("require")) {
                    if let Some(name) = require_call(tokens, i + 1) {
                        push_unique(&mut analysis.reexports, &name);
                    }
                }
            }
            Token::Ident(word)
                if (word == "get" || word == "set")
                    && matches!(next, Some(Token::Ident(_) | Token::Str(_))) =>
            {
                if let Some(Token::Ident(name) | Token::Str(name)) = next {
                    analysis.add_export(name);
                }
            }
            Token::Ident(name) | Token::Str(name)
                if next.is_some_and(|t| t.is_punct(",") || t.is_punct("}") || t.is_punct(":") || t.is_punct("(")) =>
            {
                analysis.add_export(name);
            }
            _ => {}
        }

        // Skip to the comma ending this property.
        let mut depth = 0usize;
        loop {
            let Some(token) = tokens.get(i) else { return };
            match token {
                Token::Punct("(" | "[" | "{") => depth += 1,
                Token::Punct(")" | "]") => depth = depth.saturating_sub(1),
                Token::Punct("}") => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                Token::Punct(",") if depth == 0 => {
                    i += 1;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
    }
}

/// How a required module is imported into the wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RequireTarget {
    /// Another legacy module: its exports object and initializer.
    Legacy(String),
    /// JSON, default-imported through the JSON endpoint.
    Json(String),
    /// An interchange module, imported as a namespace.
    Namespace(String),
    /// Resolution failed; requiring it throws.
    Unresolved,
}

/// Build the wrapper module for the legacy `code` at `location`.
#[must_use]
pub fn wrap_commonjs(transformer: &Transformer<'_>, location: &Url, code: &str) -> String {
    let body = strip_hashbang(code);
    let analysis = analyze_commonjs(body);

    let mut exports = analysis.exports.clone();
    let mut visited = HashSet::from([location.to_string()]);
    collect_reexports(transformer, location, &analysis.reexports, 1, &mut visited, &mut exports);
    exports.retain(|name| !RESERVED_EXPORTS.contains(&name.as_str()));

    let targets: Vec<RequireTarget> = analysis
        .requires
        .iter()
        .map(|name| require_target(transformer, location, name))
        .collect();

    let public_path = transformer.public_path(location);
    let dirname = public_path
        .rsplit_once('/')
        .map_or("/", |(dir, _)| if dir.is_empty() { "/" } else { dir });

    let mut out = String::new();

    for (i, target) in targets.iter().enumerate() {
        match target {
            RequireTarget::Legacy(path) => out.push_str(&format!(
                "import{{default as r${i},__cjsInit as i${i}}}from{};\n",
                js_string(path)
            )),
            RequireTarget::Json(path) => {
                out.push_str(&format!("import r${i} from{};\n", js_string(path)));
            }
            RequireTarget::Namespace(path) => {
                out.push_str(&format!("import*as r${i} from{};\n", js_string(path)));
            }
            RequireTarget::Unresolved => {}
        }
    }

    out.push_str("let exports$={},module$=Object.defineProperty({},\"exports\",{get(){return exports$},set(v){exports$=v},enumerable:true})");
    for i in 0..exports.len() {
        out.push_str(&format!(",e${i}"));
    }
    out.push_str(";\n");

    let entries: Vec<String> = analysis
        .requires
        .iter()
        .zip(&targets)
        .enumerate()
        .map(|(i, (name, target))| {
            let getter = match target {
                RequireTarget::Legacy(_) => format!("()=>(i${i}?.(),r${i})"),
                RequireTarget::Json(_) | RequireTarget::Namespace(_) => format!("()=>r${i}"),
                RequireTarget::Unresolved => format!(
                    "()=>{{throw new Error({})}}",
                    js_string(&format!("failed to resolve '{name}'"))
                ),
            };
            format!("{}:{getter}", js_string(name))
        })
        .collect();
    out.push_str(&format!(
        "const requires$={{{}}},require$=(name)=>{{let m=requires$[name];if(!m)throw new Error(\"module \"+name+\" not loaded\");return m()}};\n",
        entries.join(",")
    ));

    let mut specifiers = vec!["exports$ as default".to_string()];
    for (i, name) in exports.iter().enumerate() {
        specifiers.push(format!("e${i} as {}", export_name(name)));
    }
    out.push_str(&format!("export{{{}}};\n", specifiers.join(",")));

    // Parameters hide the wrapper's own bindings from the body.
    let mut hidden = vec![
        "global", "module", "exports", "require", "__filename", "__dirname", "__cjsInit",
    ]
    .into_iter()
    .map(String::from)
    .collect::<Vec<_>>();
    for (i, target) in targets.iter().enumerate() {
        match target {
            RequireTarget::Legacy(_) => {
                hidden.push(format!("r${i}"));
                hidden.push(format!("i${i}"));
            }
            RequireTarget::Json(_) | RequireTarget::Namespace(_) => hidden.push(format!("r${i}")),
            RequireTarget::Unresolved => {}
        }
    }
    hidden.extend((0..exports.len()).map(|i| format!("e${i}")));
    hidden.extend(["exports$", "module$", "requires$", "require$"].map(String::from));

    out.push_str("export function __cjsInit(){__cjsInit=undefined;");
    for (i, target) in targets.iter().enumerate() {
        if matches!(target, RequireTarget::Legacy(_)) {
            out.push_str(&format!("i${i}?.();"));
        }
    }
    out.push_str(&format!("(function({}){{\n", hidden.join(",")));
    out.push_str(body);
    out.push_str(&format!(
        "\n}}).call(module$.exports,globalThis,module$,module$.exports,require$,{},{});\n",
        js_string(&public_path),
        js_string(dirname)
    ));
    for (i, name) in exports.iter().enumerate() {
        out.push_str(&format!("e${i}=module$.exports[{}];", js_string(name)));
    }
    out.push_str("\n}\n");

    out
}

/// Drop a leading `#!` line, keeping the line break.
fn strip_hashbang(code: &str) -> &str {
    if code.starts_with("#!") {
        code.find('\n').map_or("", |end| &code[end..])
    } else {
        code
    }
}

/// Export specifier name: an identifier, or a string for anything else.
fn export_name(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        js_string(name)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn require_target(transformer: &Transformer<'_>, parent: &Url, name: &str) -> RequireTarget {
    let resolved = match transformer.resolve_require(name, parent) {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::warn!(%err, "unresolved require");
            return RequireTarget::Unresolved;
        }
    };

    let location = &resolved.location;
    match location.scheme() {
        "file" => {}
        "data" => return RequireTarget::Namespace(location.to_string()),
        _ => {
            tracing::warn!(specifier = name, location = %location, "require target cannot be served");
            return RequireTarget::Unresolved;
        }
    }

    let public = transformer.public_path(location);
    match resolved.format {
        f if f.is_commonjs() => RequireTarget::Legacy(public),
        ModuleFormat::Json => RequireTarget::Json(format!("{JSON_PREFIX}{public}")),
        f if is_legacy_aware(location, f) => RequireTarget::Namespace(public),
        _ => RequireTarget::Namespace(format!("{CJS_INTEROP_PREFIX}{public}")),
    }
}

/// Interchange module exporting `__esModule`.
fn is_legacy_aware(location: &Url, format: ModuleFormat) -> bool {
    let Ok(path) = location.to_file_path() else {
        return false;
    };
    let Ok(source) = std::fs::read_to_string(&path) else {
        return false;
    };
    scan_module(&source, location.as_str(), format.is_annotated())
        .is_ok_and(|scan| scan.es_module_marker)
}

/// Add the export names of re-exported legacy modules.
fn collect_reexports(
    transformer: &Transformer<'_>,
    parent: &Url,
    reexports: &[String],
    depth: usize,
    visited: &mut HashSet<String>,
    exports: &mut Vec<String>,
) {
    if depth > MAX_REEXPORT_DEPTH {
        return;
    }

    for specifier in reexports {
        let Ok(resolved) = transformer.resolve_require(specifier, parent) else {
            continue;
        };
        if !resolved.format.is_commonjs() || !visited.insert(resolved.location.to_string()) {
            continue;
        }
        let Some(source) = read_legacy_source(&resolved.location) else {
            continue;
        };

        let analysis = analyze_commonjs(strip_hashbang(&source));
        for name in &analysis.exports {
            push_unique(exports, name);
        }
        collect_reexports(
            transformer,
            &resolved.location,
            &analysis.reexports,
            depth + 1,
            visited,
            exports,
        );
    }
}

fn read_legacy_source(location: &Url) -> Option<String> {
    let path = location.to_file_path().ok()?;
    let source = std::fs::read_to_string(path).ok()?;
    if format::classify_source(location, &source).is_annotated() {
        strip_types(&source, location.as_str(), false).ok()
    } else {
        Some(source)
    }
}
