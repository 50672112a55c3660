//! Global context for dagen operations.
//!
//! Provides centralized access to the working directory, verbosity and
//! configuration paths.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;

use crate::core::manifest::MANIFEST_FILE;
use crate::util::config::{load_config, project_config_path, Config};

/// Project directories for dagen
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("com", "dagen", "dagen"));

/// Global context containing configuration and paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,

    /// Directory holding the global configuration
    config_dir: Option<PathBuf>,

    /// Whether to use verbose output
    verbose: bool,
}

impl GlobalContext {
    /// Create a new GlobalContext with defaults.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;

        let config_dir = match PROJECT_DIRS.as_ref() {
            Some(dirs) => Some(dirs.config_dir().to_path_buf()),
            None => directories::BaseDirs::new().map(|b| b.home_dir().join(".dagen")),
        };

        Ok(GlobalContext {
            cwd,
            config_dir,
            verbose: false,
        })
    }

    /// Create a GlobalContext with a specific working directory.
    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.cwd = cwd;
        Ok(ctx)
    }

    /// Use a different global configuration directory.
    pub fn with_config_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config_dir = dir;
        self
    }

    /// Set verbose mode.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Get the current working directory.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Check if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Get the global configuration file path.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|dir| dir.join("config.toml"))
    }

    /// Load the global configuration merged with the project's.
    pub fn load_config(&self, project_root: &Path) -> Config {
        load_config(
            self.config_path().as_deref(),
            &project_config_path(project_root),
        )
    }

    /// Find dagen.toml starting from cwd and searching upward.
    pub fn find_manifest(&self) -> Result<PathBuf> {
        let mut current = self.cwd.clone();
        loop {
            let candidate = current.join(MANIFEST_FILE);
            if candidate.is_file() {
                return Ok(candidate);
            }
            if !current.pop() {
                bail!(
                    "could not find `{}` in `{}` or any parent directory",
                    MANIFEST_FILE,
                    self.cwd.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_paths() {
        let ctx = GlobalContext::new().unwrap();
        assert!(ctx.cwd().is_absolute());
        assert!(!ctx.is_verbose());
    }

    #[test]
    fn test_find_manifest() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join(MANIFEST_FILE);
        std::fs::write(&manifest, "").unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();
        assert_eq!(ctx.find_manifest().ok(), Some(manifest));
    }

    #[test]
    fn test_find_manifest_searches_upward() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join(MANIFEST_FILE);
        std::fs::write(&manifest, "").unwrap();
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = GlobalContext::with_cwd(nested).unwrap();
        assert_eq!(ctx.find_manifest().ok(), Some(manifest));
    }

    #[test]
    fn test_load_config_without_global() {
        let tmp = TempDir::new().unwrap();
        let project = project_config_path(tmp.path());
        std::fs::create_dir_all(project.parent().unwrap()).unwrap();
        std::fs::write(&project, "[flags]\nopt = \"2\"\n").unwrap();

        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf())
            .unwrap()
            .with_config_dir(None);
        assert_eq!(ctx.load_config(tmp.path()).flag_values()["opt"], "2");
    }
}
