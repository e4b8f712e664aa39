//! Bodies of the virtual endpoints.

use super::js_string;

/// Re-export a legacy module after running its initializer.
#[must_use]
pub fn cjs_init(public_path: &str) -> String {
    let source = js_string(public_path);
    format!(
        "export * from {source};\n\
         export {{ default }} from {source};\n\
         import {{ __cjsInit }} from {source};\n\
         if (__cjsInit) __cjsInit();\n"
    )
}

/// Re-export an interchange module with an `__esModule` marker so legacy
/// interop helpers pick up its default export.
#[must_use]
pub fn cjs_interop(public_path: &str) -> String {
    let source = js_string(public_path);
    format!(
        "import * as m from {source};\n\
         export * from {source};\n\
         export default m.default;\n\
         export const __esModule = true;\n"
    )
}

/// Module whose default export is the parsed JSON document.
#[must_use]
pub fn json_module(source: &str) -> String {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    match serde_json::from_str::<serde_json::Value>(source) {
        Ok(value) => format!("export default {value};\n"),
        Err(err) => throwing(&format!("failed to parse JSON: {err}")),
    }
}

/// Script throwing a resolution failure for `specifier`.
#[must_use]
pub fn resolve_failure(specifier: &str) -> String {
    throwing(&format!("failed to resolve '{specifier}'"))
}

/// Script that throws `message` when evaluated.
#[must_use]
pub fn throwing(message: &str) -> String {
    format!("throw new Error({});\n", js_string(message))
}
