//! `ixie transform` command implementation.

use ixie_core::static_file::LoadedFile;
use ixie_core::{DevResponse, DevServer};
use miette::{miette, IntoDiagnostic, Result, WrapErr};
use std::io::Write;
use std::path::Path;
use url::Url;

/// Print `file` as the dev server would send it.
pub fn run(cwd: &Path, file: &Path, config: Option<&Path>) -> Result<()> {
    let (base_dir, config) = super::load_project(cwd, config)?;
    let server = DevServer::new(&config, &base_dir).into_diagnostic()?;

    let path = super::absolute(cwd, file);
    let path = dunce::canonicalize(&path)
        .into_diagnostic()
        .wrap_err_with(|| format!("cannot read {}", path.display()))?;
    let location = Url::from_file_path(&path)
        .map_err(|()| miette!("not an absolute path: {}", path.display()))?;
    let body = std::fs::read(&path).into_diagnostic()?;

    let loaded = LoadedFile {
        location,
        response: DevResponse::new(200).with_body(body),
    };
    let response = server.transformer().transform(loaded).into_diagnostic()?;

    std::io::stdout().write_all(&response.body).into_diagnostic()?;
    Ok(())
}
