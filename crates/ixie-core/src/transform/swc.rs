//! SWC-backed parsing: annotation stripping and specifier discovery.

use super::TransformError;
use swc_common::{
    comments::SingleThreadedComments, errors::Handler, sync::Lrc, FileName, Globals, Mark,
    SourceFile, SourceMap, Spanned, GLOBALS,
};
use swc_ecma_ast::{
    CallExpr, Callee, Decl, EsVersion, ExportAll, ExportSpecifier, ImportDecl, Module,
    ModuleDecl, ModuleExportName, ModuleItem, NamedExport, Pat, Program, Stmt, Str,
};
use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
use swc_ecma_transforms_typescript::strip;
use swc_ecma_visit::{FoldWith, Visit, VisitWith};

/// A static `from "..."` source: byte range of the string literal
/// (quotes included) and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSpecifier {
    pub start: usize,
    pub end: usize,
    pub value: String,
}

/// The first argument of an `import(...)` call, as a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicImport {
    pub arg_start: usize,
    pub arg_end: usize,
}

/// What the rewriter needs to know about a module.
#[derive(Debug, Clone, Default)]
pub struct ModuleScan {
    pub statics: Vec<StaticSpecifier>,
    pub dynamics: Vec<DynamicImport>,
    /// The module exports a binding named `__esModule`.
    pub es_module_marker: bool,
}

/// Strip TypeScript annotations, returning plain JavaScript.
pub fn strip_types(source: &str, file_name: &str, tsx: bool) -> Result<String, TransformError> {
    strip_program(source, file_name, tsx, false)
}

/// Strip annotations from a legacy (CommonJS) file.
///
/// The output is pasted into a function body, so the empty `export {}`
/// left behind by the strip pass is dropped and exported declarations
/// become plain statements.
pub fn strip_commonjs_types(source: &str, file_name: &str) -> Result<String, TransformError> {
    strip_program(source, file_name, false, true)
}

fn strip_program(
    source: &str,
    file_name: &str,
    tsx: bool,
    legacy: bool,
) -> Result<String, TransformError> {
    let cm: Lrc<SourceMap> = Default::default();
    let comments = SingleThreadedComments::default();
    let syntax = Syntax::Typescript(TsSyntax {
        tsx,
        decorators: true,
        ..Default::default()
    });

    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(file_name.to_string())),
        source.to_string(),
    );
    let module = parse(&cm, &fm, syntax, &comments, file_name)?;

    let output = GLOBALS.set(&Globals::default(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();

        let mut program = Program::Module(module);
        program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, true));
        program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));

        let mut module = match program {
            Program::Module(m) => m,
            Program::Script(s) => Module {
                span: s.span,
                body: s.body.into_iter().map(ModuleItem::Stmt).collect(),
                shebang: s.shebang,
            },
        };
        if legacy {
            module.body = script_items(module.body);
        }

        module
            .fold_with(&mut hygiene())
            .fold_with(&mut fixer(Some(&comments)))
    });

    let mut buf = Vec::new();
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg: swc_ecma_codegen::Config::default().with_target(EsVersion::EsNext),
            cm: cm.clone(),
            comments: Some(&comments),
            wr: writer,
        };

        emitter
            .emit_module(&output)
            .map_err(|e| TransformError::new(format!("Failed to emit: {e}"), file_name))?;
    }

    String::from_utf8(buf)
        .map_err(|e| TransformError::new(format!("Invalid UTF-8 output: {e}"), file_name))
}

fn script_items(body: Vec<ModuleItem>) -> Vec<ModuleItem> {
    body.into_iter()
        .filter_map(|item| match item {
            ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(named))
                if named.src.is_none() && named.specifiers.is_empty() =>
            {
                None
            }
            ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
                Some(ModuleItem::Stmt(Stmt::Decl(export.decl)))
            }
            item => Some(item),
        })
        .collect()
}

/// Parse `source` as a module and collect import/export sources and
/// dynamic imports.
pub fn scan_module(
    source: &str,
    file_name: &str,
    typescript: bool,
) -> Result<ModuleScan, TransformError> {
    let cm: Lrc<SourceMap> = Default::default();
    let comments = SingleThreadedComments::default();
    let syntax = if typescript {
        Syntax::Typescript(TsSyntax {
            decorators: true,
            ..Default::default()
        })
    } else {
        Syntax::Es(EsSyntax {
            decorators: true,
            ..Default::default()
        })
    };

    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(file_name.to_string())),
        source.to_string(),
    );
    let module = parse(&cm, &fm, syntax, &comments, file_name)?;

    let mut collector = SpecifierCollector {
        origin: fm.start_pos.0,
        scan: ModuleScan::default(),
    };
    module.visit_with(&mut collector);
    collector.scan.es_module_marker = exports_es_module_marker(&module);

    Ok(collector.scan)
}

fn parse(
    cm: &Lrc<SourceMap>,
    fm: &Lrc<SourceFile>,
    syntax: Syntax,
    comments: &SingleThreadedComments,
    file_name: &str,
) -> Result<Module, TransformError> {
    // Diagnostics are reported through the returned error, not stderr.
    let handler = Handler::with_emitter_writer(Box::new(std::io::sink()), Some(cm.clone()));

    let lexer = Lexer::new(syntax, EsVersion::EsNext, StringInput::from(&**fm), Some(comments));
    let mut parser = Parser::new_from(lexer);

    let module = parser.parse_module().map_err(|e| {
        let line = cm.lookup_char_pos(e.span().lo).line;
        let kind = format!("{:?}", e.kind());
        e.into_diagnostic(&handler).emit();
        TransformError::new(format!("Failed to parse (line {line}): {kind}"), file_name)
    })?;

    let errors: Vec<String> = parser
        .take_errors()
        .into_iter()
        .map(|e| format!("{:?}", e.kind()))
        .collect();
    if !errors.is_empty() {
        return Err(TransformError::new(
            format!("Failed to parse: {}", errors.join(", ")),
            file_name,
        ));
    }

    Ok(module)
}

struct SpecifierCollector {
    origin: u32,
    scan: ModuleScan,
}

impl SpecifierCollector {
    fn offset(&self, pos: swc_common::BytePos) -> usize {
        pos.0.saturating_sub(self.origin) as usize
    }

    fn push_static(&mut self, src: &Str) {
        self.scan.statics.push(StaticSpecifier {
            start: self.offset(src.span.lo),
            end: self.offset(src.span.hi),
            value: src.value.to_string(),
        });
    }
}

impl Visit for SpecifierCollector {
    fn visit_import_decl(&mut self, n: &ImportDecl) {
        if !n.type_only {
            self.push_static(&n.src);
        }
    }

    fn visit_named_export(&mut self, n: &NamedExport) {
        if let Some(src) = &n.src {
            if !n.type_only {
                self.push_static(src);
            }
        }
    }

    fn visit_export_all(&mut self, n: &ExportAll) {
        if !n.type_only {
            self.push_static(&n.src);
        }
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        if matches!(n.callee, Callee::Import(_)) {
            if let Some(arg) = n.args.first() {
                let span = arg.expr.span();
                self.scan.dynamics.push(DynamicImport {
                    arg_start: self.offset(span.lo),
                    arg_end: self.offset(span.hi),
                });
            }
        }
        n.visit_children_with(self);
    }
}

fn exports_es_module_marker(module: &Module) -> bool {
    module.body.iter().any(|item| match item {
        ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => match &export.decl {
            Decl::Var(var) => var.decls.iter().any(|d| {
                matches!(&d.name, Pat::Ident(binding) if &*binding.id.sym == "__esModule")
            }),
            _ => false,
        },
        ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(named)) => {
            named.specifiers.iter().any(|spec| match spec {
                ExportSpecifier::Named(named) => {
                    let name = named.exported.as_ref().unwrap_or(&named.orig);
                    export_name(name) == "__esModule"
                }
                _ => false,
            })
        }
        _ => false,
    })
}

#[allow(unreachable_patterns)]
fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_types() {
        let out = strip_types("export const x: number = 1;\n", "a.ts", false).unwrap();
        assert!(out.contains("export const x = 1;"));
        assert!(!out.contains("number"));
    }

    #[test]
    fn test_strip_removes_type_only_declarations() {
        let source = "interface A { a: string }\ntype B = A;\nexport function f(a: A): B { return a; }\n";
        let out = strip_types(source, "a.ts", false).unwrap();
        assert!(!out.contains("interface"));
        assert!(!out.contains("type B"));
        assert!(out.contains("export function f(a)"));
    }

    #[test]
    fn test_strip_commonjs_leaves_no_module_syntax() {
        let source = "import type { Shape } from './shape';\n\
                      import dep = require('./dep.cjs');\n\
                      const value: Shape = dep.value;\n\
                      export = { value };\n";
        let out = strip_commonjs_types(source, "legacy.cts").unwrap();

        for line in out.lines() {
            let line = line.trim_start();
            assert!(!line.starts_with("export"), "module syntax left in {out}");
            assert!(!line.starts_with("import "), "module syntax left in {out}");
        }
        assert!(out.contains("require("));
        assert!(out.contains("./dep.cjs"));
        assert!(out.contains("module.exports"));
        assert!(!out.contains("Shape"));
    }

    #[test]
    fn test_strip_commonjs_unwraps_exported_declarations() {
        let out = strip_commonjs_types("export const n: number = 1;\nmodule.exports.n = n;\n", "a.cts")
            .unwrap();
        assert!(out.starts_with("const n = 1;"), "{out}");
        assert!(!out.contains("export const"), "{out}");
    }

    #[test]
    fn test_strip_reports_parse_errors() {
        let err = strip_types("export const = ;", "bad.ts", false).unwrap_err();
        assert_eq!(err.file.as_deref(), Some("bad.ts"));
    }

    #[test]
    fn test_scan_static_specifier_spans() {
        let source = "import a from './a.js';\nexport * from \"./b.js\";\nexport { c } from './c.js';\n";
        let scan = scan_module(source, "m.js", false).unwrap();

        let values: Vec<&str> = scan.statics.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, vec!["./a.js", "./b.js", "./c.js"]);
        for s in &scan.statics {
            assert_eq!(&source[s.start + 1..s.end - 1], s.value);
        }
    }

    #[test]
    fn test_scan_dynamic_imports() {
        let source = "const m = await import(name + '.js');\nimport('./x.js').then(f);\n";
        let scan = scan_module(source, "m.js", false).unwrap();

        assert_eq!(scan.dynamics.len(), 2);
        let first = scan.dynamics[0];
        assert_eq!(&source[first.arg_start..first.arg_end], "name + '.js'");
    }

    #[test]
    fn test_scan_offsets_are_bytes() {
        let source = "const s = 'héllo';\nimport x from './x.js';\n";
        let scan = scan_module(source, "m.js", false).unwrap();
        let s = &scan.statics[0];
        assert_eq!(&source[s.start..s.end], "'./x.js'");
    }

    #[test]
    fn test_es_module_marker() {
        let marked = scan_module("export const __esModule = true;", "m.js", false).unwrap();
        assert!(marked.es_module_marker);

        let renamed = scan_module("const m = 1; export { m as __esModule };", "m.js", false)
            .unwrap();
        assert!(renamed.es_module_marker);

        let plain = scan_module("export const x = 1;", "m.js", false).unwrap();
        assert!(!plain.es_module_marker);
    }
}
