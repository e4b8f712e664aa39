//! Subcommand implementations.

pub mod dev;
pub mod resolve;
pub mod transform;
pub mod version;

use ixie_core::{load_config, IxieConfig};
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};

/// Load the project config and the base directory it anchors.
///
/// Without a config file the working directory is the base directory and
/// every option keeps its default.
pub fn load_project(cwd: &Path, config: Option<&Path>) -> Result<(PathBuf, IxieConfig)> {
    match load_config(cwd, config).into_diagnostic()? {
        Some((path, config)) => {
            let base_dir = path
                .parent()
                .map_or_else(|| cwd.to_path_buf(), Path::to_path_buf);
            tracing::info!(config = %path.display(), "using config");
            Ok((base_dir, config))
        }
        None => Ok((cwd.to_path_buf(), IxieConfig::default())),
    }
}

/// `path` made absolute against `cwd`.
pub fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_project_without_config_uses_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let (base_dir, config) = load_project(dir.path(), None).unwrap();
        assert_eq!(base_dir, dir.path());
        assert_eq!(config.source_dir, ".");
        assert_eq!(config.public_dir, ".");
    }

    #[test]
    fn test_load_project_anchors_at_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ixie.config.json"),
            r#"{ "sourceDir": "src", "serve": { "port": 4000 } }"#,
        )
        .unwrap();
        let nested = dir.path().join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();

        let (base_dir, config) = load_project(&nested, None).unwrap();
        assert_eq!(base_dir, dir.path());
        assert_eq!(config.source_dir, "src");
        assert_eq!(config.serve.port, Some(4000));
    }

    #[test]
    fn test_load_project_missing_explicit_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_project(dir.path(), Some(Path::new("nope.config.json"))).is_err());
    }

    #[test]
    fn test_absolute() {
        let cwd = Path::new("/work");
        assert_eq!(absolute(cwd, Path::new("a.ts")), PathBuf::from("/work/a.ts"));
        assert_eq!(absolute(cwd, Path::new("/b.ts")), PathBuf::from("/b.ts"));
    }
}
