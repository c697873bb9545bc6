//! Per-request execution workspaces.
//!
//! Each request gets a private `execution_<random>` directory under the
//! configured root. The directory is removed when the request completes,
//! either through [`Workspace::release`] or, on early exits and panics,
//! when the workspace is dropped.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::registry::LanguageRecipe;

/// Directory name prefix shared by all workspaces (used by the stale sweep).
pub const WORKSPACE_PREFIX: &str = "execution_";

/// A private, uniquely named directory owned by one request.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    root: PathBuf,
    created_at: SystemTime,
}

impl Workspace {
    /// Create a fresh workspace directory under `base`.
    pub fn acquire(base: &Path) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(base)?;
        let root = dir.path().to_path_buf();
        debug!(path = %root.display(), "Acquired workspace");

        Ok(Self {
            dir: Some(dir),
            root,
            created_at: SystemTime::now(),
        })
    }

    /// Workspace root directory.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Time since the workspace was acquired.
    fn age(&self) -> Duration {
        self.created_at.elapsed().unwrap_or_default()
    }

    /// Absolute path of the source file for `recipe`.
    pub fn source_path(&self, recipe: &LanguageRecipe) -> PathBuf {
        self.root.join(&recipe.source_filename)
    }

    /// Write the submitted code under the recipe's source filename.
    pub async fn write_source(
        &self,
        recipe: &LanguageRecipe,
        code: &str,
    ) -> std::io::Result<PathBuf> {
        let path = self.source_path(recipe);
        tokio::fs::write(&path, code.as_bytes()).await?;
        debug!(path = %path.display(), code_len = code.len(), "Wrote source file");
        Ok(path)
    }

    /// Delete the workspace recursively.
    ///
    /// Best effort: failures are logged and never returned, the request's
    /// result is already decided by the time this runs.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let age_secs = self.age().as_secs_f64();
        match dir.close() {
            Ok(()) => debug!(path = %self.root.display(), age_secs, "Released workspace"),
            Err(e) => {
                warn!(path = %self.root.display(), error = %e, "Failed to remove workspace");
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.dir.is_some() {
            debug!(path = %self.root.display(), "Workspace dropped without release");
            self.remove();
        }
    }
}

/// Remove workspaces left behind under `base` that are older than `max_age`.
///
/// Runs at startup to clean up after a host crash. Entries that cannot be
/// inspected or removed are logged and skipped. Returns the number removed.
pub fn sweep_stale(base: &Path, max_age: Duration) -> usize {
    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %base.display(), error = %e, "Cannot read workspace root");
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Error reading workspace root entry");
                continue;
            }
        };

        if !entry.file_name().to_string_lossy().starts_with(WORKSPACE_PREFIX) {
            continue;
        }

        let path = entry.path();
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }

        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                info!(path = %path.display(), age_secs = age.as_secs(), "Removed stale workspace");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale workspace"),
        }
    }

    removed
}
