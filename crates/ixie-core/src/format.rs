//! Module format classification.
//!
//! Every transform branch keys off this: the extension decides for
//! `.mjs`/`.cjs`/`.json` and friends, the nearest package.json `"type"`
//! decides for `.js`/`.ts`, and a lexical scan for module syntax breaks the
//! tie when no type is declared.

use crate::lexer::has_module_syntax;
use crate::resolver::exports::read_package_json;
use std::fmt;
use std::path::Path;
use url::Url;

/// Format of a resolved module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleFormat {
    /// A `node:` builtin.
    Builtin,
    /// `require`/`module.exports` code.
    CommonJs,
    /// CommonJS written in TypeScript.
    TsCommonJs,
    /// Standard `import`/`export` module.
    Esm,
    /// ES module written in TypeScript.
    TsEsm,
    Json,
    Wasm,
    /// Native addon (`.node`).
    Addon,
}

impl ModuleFormat {
    #[must_use]
    pub fn is_commonjs(self) -> bool {
        matches!(self, Self::CommonJs | Self::TsCommonJs)
    }

    #[must_use]
    pub fn is_esm(self) -> bool {
        matches!(self, Self::Esm | Self::TsEsm)
    }

    /// Carries type annotations that must be stripped.
    #[must_use]
    pub fn is_annotated(self) -> bool {
        matches!(self, Self::TsCommonJs | Self::TsEsm)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::CommonJs => "commonjs",
            Self::TsCommonJs => "commonjs-typescript",
            Self::Esm => "module",
            Self::TsEsm => "module-typescript",
            Self::Json => "json",
            Self::Wasm => "wasm",
            Self::Addon => "addon",
        }
    }
}

impl fmt::Display for ModuleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"type"` declared by the nearest package.json.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageType {
    Module,
    CommonJs,
}

/// Classify a location, reading the file if syntax detection is needed.
#[must_use]
pub fn classify(location: &Url) -> ModuleFormat {
    classify_with(location, None)
}

/// Classify a location whose source text is already loaded.
#[must_use]
pub fn classify_source(location: &Url, source: &str) -> ModuleFormat {
    classify_with(location, Some(source))
}

fn classify_with(location: &Url, source: Option<&str>) -> ModuleFormat {
    match location.scheme() {
        "node" => return ModuleFormat::Builtin,
        "data" => return classify_data_url(location),
        "file" => {}
        _ => return ModuleFormat::Esm,
    }

    let Ok(path) = location.to_file_path() else {
        return ModuleFormat::Esm;
    };

    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "mjs" => ModuleFormat::Esm,
        "mts" => ModuleFormat::TsEsm,
        "cjs" => ModuleFormat::CommonJs,
        "cts" => ModuleFormat::TsCommonJs,
        "json" => ModuleFormat::Json,
        "wasm" => ModuleFormat::Wasm,
        "node" => ModuleFormat::Addon,
        "js" | "jsx" => classify_scoped(&path, false, source),
        "ts" | "tsx" => classify_scoped(&path, true, source),
        _ => ModuleFormat::Esm,
    }
}

fn classify_scoped(path: &Path, annotated: bool, source: Option<&str>) -> ModuleFormat {
    let esm = match package_type(path) {
        Some(PackageType::Module) => true,
        Some(PackageType::CommonJs) => false,
        None => match source {
            Some(text) => has_module_syntax(text),
            None => std::fs::read_to_string(path)
                .map(|text| has_module_syntax(&text))
                .unwrap_or(false),
        },
    };

    match (esm, annotated) {
        (true, false) => ModuleFormat::Esm,
        (true, true) => ModuleFormat::TsEsm,
        (false, false) => ModuleFormat::CommonJs,
        (false, true) => ModuleFormat::TsCommonJs,
    }
}

/// The nearest package.json decides; one without a `"type"` declares nothing.
fn package_type(path: &Path) -> Option<PackageType> {
    let mut current = path.parent();

    while let Some(dir) = current {
        let pkg_json_path = dir.join("package.json");
        if pkg_json_path.is_file() {
            let pkg = read_package_json(&pkg_json_path)?;
            return match pkg.get("type").and_then(|t| t.as_str()) {
                Some("module") => Some(PackageType::Module),
                Some("commonjs") => Some(PackageType::CommonJs),
                _ => None,
            };
        }
        current = dir.parent();
    }

    None
}

fn classify_data_url(location: &Url) -> ModuleFormat {
    let path = location.path();
    let end = path.find(|c: char| c == ',' || c == ';').unwrap_or(path.len());

    match path[..end].trim().to_ascii_lowercase().as_str() {
        "application/json" => ModuleFormat::Json,
        "application/wasm" => ModuleFormat::Wasm,
        _ => ModuleFormat::Esm,
    }
}
