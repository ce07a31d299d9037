use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::foundation::error::{ReelError, ReelResult};

/// Environment variable consulted by [`OutputResolver::from_env`].
pub const OUTPUT_DIR_ENV: &str = "STILLREEL_OUTPUT_DIR";

/// Maps output filenames to locations inside one writable directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputResolver {
    root: PathBuf,
}

impl OutputResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Uses `$STILLREEL_OUTPUT_DIR`, falling back to the working directory.
    pub fn from_env() -> Self {
        let root = std::env::var_os(OUTPUT_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the location for `filename`, creating the directory if needed.
    ///
    /// Destructive: an existing file at that location is deleted.
    pub fn resolve(&self, filename: &str) -> ReelResult<PathBuf> {
        validate_filename(filename)?;

        std::fs::create_dir_all(&self.root).with_context(|| {
            format!("failed to create output directory '{}'", self.root.display())
        })?;

        let path = self.root.join(filename);
        match std::fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                return Err(ReelError::validation(format!(
                    "output location '{}' is a directory",
                    path.display()
                )));
            }
            Ok(_) => {
                tracing::info!(path = %path.display(), "removing existing output file");
                std::fs::remove_file(&path)
                    .with_context(|| format!("unable to delete '{}'", path.display()))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("inspect output location '{}'", path.display()))
                    .into());
            }
        }
        Ok(path)
    }
}

impl Default for OutputResolver {
    fn default() -> Self {
        Self::from_env()
    }
}

fn validate_filename(filename: &str) -> ReelResult<()> {
    if filename.trim().is_empty() {
        return Err(ReelError::validation("output filename must not be empty"));
    }
    if filename == "." || filename == ".." || filename.contains(['/', '\\']) {
        return Err(ReelError::validation(format!(
            "output filename '{filename}' must be a plain file name"
        )));
    }
    Ok(())
}
