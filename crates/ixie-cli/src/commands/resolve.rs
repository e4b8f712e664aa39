//! `ixie resolve` command implementation.

use ixie_core::resolver::{NodeResolver, ResolutionContext};
use ixie_core::{DevServer, ResolveError, ResolvedModule};
use miette::{miette, IntoDiagnostic, Result};
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// Resolve `specifier` with the project's aliases and conditions.
pub fn run(
    cwd: &Path,
    specifier: &str,
    from: Option<&Path>,
    conditions: &[String],
    config: Option<&Path>,
    json: bool,
) -> Result<()> {
    let (base_dir, config) = super::load_project(cwd, config)?;
    let server = DevServer::new(&config, &base_dir).into_diagnostic()?;
    let resolver = server
        .resolver()
        .clone()
        .with_primitive(Arc::new(NodeResolver::new().with_cwd(cwd)));

    let parent = match from {
        Some(file) => {
            let path = super::absolute(cwd, file);
            let path = dunce::canonicalize(&path).unwrap_or(path);
            let url = Url::from_file_path(&path)
                .map_err(|()| miette!("not an absolute path: {}", path.display()))?;
            Some(url)
        }
        None => None,
    };

    let ctx = conditions
        .iter()
        .fold(ResolutionContext::new(parent), |ctx, c| ctx.with_condition(c));
    let dirs = server.dirs();
    let public_path: &dyn Fn(&Url) -> String = &|location| dirs.public_path(location);

    match resolver.resolve(specifier, &ctx, Some(public_path)) {
        Ok(resolved) => {
            let public = (resolved.location.scheme() == "file")
                .then(|| dirs.public_path(&resolved.location));
            if json {
                let output = success_json(specifier, &resolved, public.as_deref());
                println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
            } else {
                println!("{} ({})", resolved.location, resolved.format);
                if let Some(public) = public {
                    println!("  served at {public}");
                }
            }
            Ok(())
        }
        Err(err) => {
            if json {
                let output = failure_json(&err);
                println!("{}", serde_json::to_string_pretty(&output).into_diagnostic()?);
            } else {
                eprintln!("{}: {err}", err.reason);
                for path in &err.tried {
                    eprintln!("  tried {}", path.display());
                }
            }
            Err(miette!("failed to resolve '{}'", err.specifier))
        }
    }
}

fn success_json(specifier: &str, resolved: &ResolvedModule, public: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "ok": true,
        "specifier": specifier,
        "url": resolved.location.as_str(),
        "format": resolved.format.as_str(),
        "publicPath": public,
    })
}

fn failure_json(err: &ResolveError) -> serde_json::Value {
    serde_json::json!({
        "ok": false,
        "specifier": err.specifier,
        "parent": err.parent,
        "error": {
            "code": err.reason.to_string(),
            "message": err.to_string(),
            "tried": err.tried.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
        },
    })
}
