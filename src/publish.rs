use std::path::{Path, PathBuf};

use anyhow::Context as _;

/// Offers a finished video to some media library.
///
/// Fire-and-forget: implementations log their own failures and never report them back.
pub trait Publisher: Send + Sync {
    fn publish(&self, location: &Path);
}

/// Publishes nowhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPublisher;

impl Publisher for NoopPublisher {
    fn publish(&self, location: &Path) {
        tracing::debug!(path = %location.display(), "publish skipped");
    }
}

/// Copies finished videos into a library directory.
#[derive(Clone, Debug)]
pub struct LibraryPublisher {
    library_dir: PathBuf,
}

impl LibraryPublisher {
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
        }
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    fn copy_into_library(&self, location: &Path) -> anyhow::Result<PathBuf> {
        let name = location
            .file_name()
            .with_context(|| format!("'{}' has no file name", location.display()))?;
        std::fs::create_dir_all(&self.library_dir)
            .with_context(|| format!("create library dir '{}'", self.library_dir.display()))?;
        let dest = self.library_dir.join(name);
        std::fs::copy(location, &dest).with_context(|| {
            format!("copy '{}' to '{}'", location.display(), dest.display())
        })?;
        Ok(dest)
    }
}

impl Publisher for LibraryPublisher {
    fn publish(&self, location: &Path) {
        match self.copy_into_library(location) {
            Ok(dest) => tracing::info!(path = %dest.display(), "published to library"),
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "publish to library failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_publisher_copies_file() {
        let root = PathBuf::from("target").join("publish_tests").join("copies");
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        let src = root.join("clip.mp4");
        std::fs::write(&src, b"movie").unwrap();

        let lib = LibraryPublisher::new(root.join("library"));
        lib.publish(&src);
        assert_eq!(std::fs::read(root.join("library/clip.mp4")).unwrap(), b"movie");
    }

    #[test]
    fn library_publisher_swallows_failures() {
        let lib = LibraryPublisher::new(PathBuf::from("target").join("publish_tests").join("lib"));
        lib.publish(Path::new("target/publish_tests/does-not-exist.mp4"));
        NoopPublisher.publish(Path::new("anything.mp4"));
    }
}
