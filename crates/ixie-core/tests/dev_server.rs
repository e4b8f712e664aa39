//! End-to-end tests driving `DevServer::handle` over real trees.

use ixie_core::router::{NOT_FOUND_BODY, UNAUTHORIZED_BODY};
use ixie_core::{load_config, DevRequest, DevResponse, DevServer};
use std::fs;
use tempfile::{tempdir, TempDir};

/// A project with `ixie.config.json` in `project/`, sources in
/// `project/src`, static files in `project/public`, and a `secret`
/// sibling of `project/`.
fn project(files: &[(&str, &str)]) -> (TempDir, DevServer) {
    let dir = tempdir().unwrap();
    let root = dir.path().join("project");
    fs::create_dir_all(root.join("src")).unwrap();
    fs::create_dir_all(root.join("public")).unwrap();
    fs::write(dir.path().join("secret"), "top secret").unwrap();
    fs::write(
        root.join("ixie.config.json"),
        r#"{ "sourceDir": "src", "publicDir": "public" }"#,
    )
    .unwrap();

    for (name, contents) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    let (config_path, config) = load_config(&root, None).unwrap().unwrap();
    let server = DevServer::new(&config, config_path.parent().unwrap()).unwrap();
    (dir, server)
}

async fn get(server: &DevServer, path: &str) -> DevResponse {
    server.handle(DevRequest::get(path).unwrap()).await
}

#[tokio::test]
async fn typescript_module_is_stripped() {
    let (_dir, server) = project(&[("src/a.ts", "export const x: number = 1;\n")]);

    let response = get(&server, "/a.ts").await;

    assert_eq!(response.status, 200);
    let body = response.text_body();
    assert!(body.contains("export const x = 1;"), "{body}");
    assert!(!body.contains(": number"));
    assert_eq!(response.headers.get("content-type"), Some("text/javascript"));
    assert!(!response.headers.contains("content-length"));
}

#[tokio::test]
async fn escape_outside_base_is_forbidden() {
    let (_dir, server) = project(&[]);

    let response = get(&server, "/@../@../secret").await;

    assert_eq!(response.status, 403);
    assert_eq!(response.text_body(), UNAUTHORIZED_BODY);
}

#[tokio::test]
async fn escape_inside_base_is_served() {
    let (_dir, server) = project(&[
        ("lib/util.js", "export const util = 1;\n"),
        ("src/main.js", "import { util } from '../lib/util.js';\n"),
    ]);

    let main = get(&server, "/main.js").await;
    assert!(
        main.text_body().contains(r#"from "/@../lib/util.js""#),
        "{}",
        main.text_body()
    );

    let util = get(&server, "/@../lib/util.js").await;
    assert_eq!(util.status, 200);
    assert!(util.text_body().contains("export const util = 1;"));
}

#[tokio::test]
async fn escape_to_base_dir_serves_its_index() {
    let (_dir, server) = project(&[("index.html", "<p>base</p>")]);

    let response = get(&server, "/@..").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text_body(), "<p>base</p>");
}

#[tokio::test]
async fn source_tree_wins_over_public_tree() {
    let (_dir, server) = project(&[
        ("src/app.ts", "export const from: string = 'source';\n"),
        ("public/app.ts", "export const from = 'public';\n"),
        ("public/logo.svg", "<svg/>"),
    ]);

    let response = get(&server, "/app.ts").await;
    assert!(response.text_body().contains("source"));

    let asset = get(&server, "/logo.svg").await;
    assert_eq!(asset.status, 200);
    assert_eq!(asset.text_body(), "<svg/>");
    assert_eq!(asset.headers.get("content-type"), Some("image/svg+xml"));
}

#[tokio::test]
async fn public_files_are_not_transformed() {
    let (_dir, server) = project(&[("public/vendor.ts", "export const x: number = 1;\n")]);

    let response = get(&server, "/vendor.ts").await;
    assert_eq!(response.text_body(), "export const x: number = 1;\n");
}

#[tokio::test]
async fn legacy_module_is_wrapped() {
    let (_dir, server) = project(&[
        ("src/dep.cjs", "exports.ready = true;\n"),
        (
            "src/main.cjs",
            "const a = require('./dep.cjs');\nconst b = require('./dep.cjs');\nexports.a = 1;\nexports.b = 2;\n",
        ),
    ]);

    let body = get(&server, "/main.cjs").await.text_body();

    // one import for the dependency, however often it is required
    assert_eq!(body.matches("from\"/dep.cjs\"").count(), 1, "{body}");
    assert!(body.contains("export{exports$ as default,e$0 as a,e$1 as b};"), "{body}");
    // the dependency is initialized before the body runs
    let init = body.find("i$0?.();(function(").unwrap();
    let run = body.find("exports.a = 1;").unwrap();
    assert!(init < run);
}

#[tokio::test]
async fn interchange_import_of_legacy_module_goes_through_init() {
    let (_dir, server) = project(&[
        ("src/legacy.cjs", "exports.answer = 42;\n"),
        ("src/main.mjs", "import { answer } from './legacy.cjs';\nconsole.log(answer);\n"),
    ]);

    let body = get(&server, "/main.mjs").await.text_body();
    assert!(body.contains(r#"from "/@cjsInit/legacy.cjs""#), "{body}");

    let shim = get(&server, "/@cjsInit/legacy.cjs").await;
    assert_eq!(shim.status, 200);
    assert!(shim.text_body().contains("__cjsInit();"));
}

/// The code pasted between the wrapper function's opening and its call.
fn wrapped_body(module: &str) -> &str {
    let open = module.find("(function(").unwrap();
    let start = open + module[open..].find("{\n").unwrap() + 2;
    let end = module.find("\n}).call(").unwrap();
    &module[start..end]
}

fn assert_script_body(body: &str) {
    for line in body.lines() {
        let line = line.trim_start();
        assert!(!line.starts_with("export"), "module syntax in wrapper: {body}");
        assert!(!line.starts_with("import "), "module syntax in wrapper: {body}");
    }
}

#[tokio::test]
async fn typed_legacy_module_is_stripped_then_wrapped() {
    let (_dir, server) = project(&[
        ("src/dep.cjs", "exports.ready = true;\n"),
        (
            "src/typed.cts",
            "import type { Shape } from './shape';\n\
             import dep = require('./dep.cjs');\n\
             const ready: boolean = dep.ready;\n\
             module.exports = { ready } as Shape;\n",
        ),
    ]);

    let response = get(&server, "/typed.cts").await;
    assert_eq!(response.status, 200);
    let module = response.text_body();

    let body = wrapped_body(&module);
    assert_script_body(body);
    assert!(body.contains("module.exports"), "{module}");
    assert!(!body.contains("Shape"), "{module}");
    assert_eq!(module.matches(r#"from"/dep.cjs""#).count(), 1, "{module}");
}

#[tokio::test]
async fn typescript_under_commonjs_package_is_wrapped() {
    let (_dir, server) = project(&[
        ("src/legacy/package.json", r#"{ "type": "commonjs" }"#),
        (
            "src/legacy/count.ts",
            "import type { Counter } from './types';\n\
             const start: number = 1;\n\
             export = { start } as Counter;\n",
        ),
    ]);

    let module = get(&server, "/legacy/count.ts").await.text_body();

    assert!(module.starts_with("let exports$={}"), "{module}");
    let body = wrapped_body(&module);
    assert_script_body(body);
    assert!(body.contains("module.exports"), "{module}");
    assert!(module.contains("export function __cjsInit(){__cjsInit=undefined;"));
}

#[tokio::test]
async fn legacy_module_imported_twice_shares_one_init_path() {
    let (_dir, server) = project(&[
        ("src/legacy.cjs", "exports.answer = 42;\n"),
        ("src/nested/index.js", ""),
        (
            "src/main.mjs",
            "import legacy from './legacy.cjs';\n\
             import { answer } from './nested/../legacy.cjs';\n\
             console.log(legacy, answer);\n",
        ),
    ]);

    let body = get(&server, "/main.mjs").await.text_body();
    assert_eq!(body.matches(r#"from "/@cjsInit/legacy.cjs""#).count(), 2, "{body}");
    assert!(!body.contains("./legacy.cjs"), "{body}");

    // Both imports land on one shim, which re-exports one module instance.
    let first = get(&server, "/@cjsInit/legacy.cjs").await.text_body();
    let second = get(&server, "/@cjsInit/legacy.cjs").await.text_body();
    assert_eq!(first, second);
    assert_eq!(first.matches(r#""/legacy.cjs""#).count(), 3, "{first}");
    assert!(first.contains("if (__cjsInit) __cjsInit();"));
}

#[tokio::test]
async fn legacy_init_runs_dependencies_once_per_binding() {
    let (_dir, server) = project(&[
        ("src/dep.cjs", "exports.ready = true;\n"),
        (
            "src/main.cjs",
            "const a = require('./dep.cjs');\nconst b = require('./dep.cjs');\nmodule.exports = a === b;\n",
        ),
    ]);

    let module = get(&server, "/main.cjs").await.text_body();

    assert_eq!(module.matches("__cjsInit as i$").count(), 1, "{module}");
    assert_eq!(module.matches("i$0?.();").count(), 1, "{module}");
    assert!(!module.contains("i$1"), "{module}");
    // the getter runs the optional initializer, which clears itself
    assert!(module.contains(r#""./dep.cjs":()=>(i$0?.(),r$0)"#), "{module}");
    assert!(module.contains("export function __cjsInit(){__cjsInit=undefined;i$0?.();"));
    assert_script_body(wrapped_body(&module));
}

#[tokio::test]
async fn dynamic_import_targets_dynamic_endpoint() {
    let (_dir, server) = project(&[(
        "src/pages/router.js",
        "export const load = (name) => import('./' + name + '.js');\n",
    )]);

    let body = get(&server, "/pages/router.js").await.text_body();
    assert!(
        body.contains(r#"import("/@dynamic?base=%2Fpages%2Frouter.js&specifier="+encodeURIComponent('./' + name + '.js'))"#),
        "{body}"
    );
}

#[tokio::test]
async fn dynamic_endpoint_redirects() {
    let (_dir, server) = project(&[
        ("src/pages/home.ts", "export default 1;\n"),
        ("src/pages/old.cjs", "module.exports = 1;\n"),
    ]);

    let response = get(&server, "/@dynamic?base=%2Fpages%2Findex.js&specifier=.%2Fhome.js").await;
    assert_eq!(response.status, 302);
    assert_eq!(response.headers.get("location"), Some("/pages/home.ts"));

    let response = get(&server, "/@dynamic?base=%2Fpages%2Findex.js&specifier=.%2Fold.cjs").await;
    assert_eq!(response.headers.get("location"), Some("/@cjsInit/pages/old.cjs"));
}

#[tokio::test]
async fn dynamic_endpoint_failure_is_a_throwing_script() {
    let (_dir, server) = project(&[]);

    let response = get(&server, "/@dynamic?base=%2Findex.js&specifier=.%2Fnope.js").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.headers.get("content-type"), Some("text/javascript"));
    assert!(response.text_body().contains("failed to resolve './nope.js'"));
}

#[tokio::test]
async fn dynamic_endpoint_rejects_escaping_base() {
    let (_dir, server) = project(&[]);

    let response = get(&server, "/@dynamic?base=%2F%40..%2F%40..%2Fx.js&specifier=.%2Fsecret").await;
    assert_eq!(response.status, 403);
}

#[tokio::test]
async fn json_endpoint() {
    let (_dir, server) = project(&[
        ("src/data.json", "{ \"n\": 1 }"),
        ("src/bad.json", "{ n: 1 }"),
    ]);

    let response = get(&server, "/@json/data.json").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text_body(), "export default {\"n\":1};\n");

    let bad = get(&server, "/@json/bad.json").await;
    assert!(bad.text_body().starts_with("throw new Error("));

    let missing = get(&server, "/@json/missing.json").await;
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn html_scripts_are_resolved() {
    let (_dir, server) = project(&[
        ("src/main.ts", "export {};\n"),
        (
            "src/index.html",
            "<script type=\"module\" src=\"./main.ts\"></script><script type=\"module\" src=\"./gone.ts\"></script>",
        ),
    ]);

    let response = get(&server, "/").await;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.text_body(),
        "<script type=\"module\" src=\"/main.ts\"></script><script type=\"module\">throw new Error(\"failed to resolve './gone.ts'\")</script>"
    );
}

#[tokio::test]
async fn not_found_falls_back_to_source_page() {
    let (_dir, server) = project(&[
        ("src/404.html", "<script type=\"module\" src=\"./nf.ts\"></script>"),
        ("src/nf.ts", "export {};\n"),
        ("public/404.html", "public page"),
    ]);

    let response = get(&server, "/nowhere").await;
    assert_eq!(response.status, 404);
    assert_eq!(
        response.text_body(),
        "<script type=\"module\" src=\"/nf.ts\"></script>"
    );
}

#[tokio::test]
async fn not_found_falls_back_to_public_page() {
    let (_dir, server) = project(&[("public/404.html", "public page")]);

    let response = get(&server, "/nowhere").await;
    assert_eq!(response.status, 404);
    assert_eq!(response.text_body(), "public page");
}

#[tokio::test]
async fn terminal_not_found() {
    let (_dir, server) = project(&[]);

    let response = get(&server, "/nowhere.js").await;
    assert_eq!(response.status, 404);
    assert_eq!(response.text_body(), NOT_FOUND_BODY);
}

#[tokio::test]
async fn conditional_and_range_requests_on_static_files() {
    let (_dir, server) = project(&[("public/data.txt", "0123456789")]);

    let full = get(&server, "/data.txt").await;
    let etag = full.headers.get("etag").unwrap().to_string();

    let request = DevRequest::get("/data.txt")
        .unwrap()
        .with_header("If-None-Match", &etag);
    assert_eq!(server.handle(request).await.status, 304);

    let request = DevRequest::get("/data.txt")
        .unwrap()
        .with_header("range", "bytes=2-4");
    let partial = server.handle(request).await;
    assert_eq!(partial.status, 206);
    assert_eq!(partial.text_body(), "234");
    assert_eq!(partial.headers.get("content-range"), Some("bytes 2-4/10"));

    let request = DevRequest::get("/data.txt")
        .unwrap()
        .with_header("range", "bytes=20-30");
    assert_eq!(server.handle(request).await.status, 416);
}

#[tokio::test]
async fn aliases_and_conditions_from_config() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("polyfills")).unwrap();
    fs::write(root.join("polyfills/path.js"), "export default {};\n").unwrap();
    fs::write(root.join("main.js"), "import path from 'path';\nexport default path;\n").unwrap();
    fs::write(
        root.join("ixie.config.mjs"),
        r#"export default {
            resolve: {
                alias: { "node:path": { browser: new URL("./polyfills/path.js", import.meta.url).href, default: "node:path" } },
                conditions: ["browser"],
            },
        };"#,
    )
    .unwrap();

    let (config_path, config) = load_config(root, None).unwrap().unwrap();
    let server = DevServer::new(&config, config_path.parent().unwrap()).unwrap();

    let body = get(&server, "/main.js").await.text_body();
    assert!(body.contains(r#"from "/polyfills/path.js""#), "{body}");
}
