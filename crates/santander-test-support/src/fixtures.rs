//! Sandbox directories and environment probes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// Temporary directory whose root is canonicalised, so symlinked temp
/// locations such as `/tmp -> /private/tmp` do not trip allow-list checks.
pub struct Sandbox {
    _dir: TempDir,
    root: PathBuf,
}

impl Sandbox {
    /// Create an empty sandbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or resolved.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("failed to create sandbox")?;
        let root = dir
            .path()
            .canonicalize()
            .context("failed to canonicalise sandbox root")?;
        Ok(Self { _dir: dir, root })
    }

    /// Canonical sandbox root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path below the root; nothing is created.
    #[must_use]
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Write `contents` to `relative`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_file(&self, relative: impl AsRef<Path>, contents: &[u8]) -> Result<PathBuf> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Create directory `relative` and its parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn create_dir(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let path = self.path(relative);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(path)
    }
}

/// Whether the tests run with an effective uid of 0, where permission checks
/// do not apply.
#[must_use]
pub fn running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Sorted names of the entries directly inside `dir`.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed.
pub fn entry_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to read entries of {}", dir.display()))?;
    names.sort();
    Ok(names)
}
