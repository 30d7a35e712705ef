//! Temporary directories for store files.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] and names store files the way the
//! tests expect (`<name>.gv`).

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Extension used for store files created in tests.
pub const STORE_EXTENSION: &str = "gv";

/// A temporary directory removed on drop.
///
/// # Example
///
/// ```
/// use graphvault_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let path = dir.store_file("quads");
/// assert!(path.starts_with(dir.path()));
/// assert_eq!(path.extension().unwrap(), "gv");
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates the directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: TempDir::new().expect("failed to create temp directory") }
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Joins a relative path onto the directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Path of a store file called `name` inside the directory.
    #[must_use]
    pub fn store_file(&self, name: &str) -> PathBuf {
        self.join(name).with_extension(STORE_EXTENSION)
    }

    /// Size of a file inside the directory in bytes, or 0 if it is missing.
    #[must_use]
    pub fn file_len<P: AsRef<Path>>(&self, path: P) -> u64 {
        std::fs::metadata(self.join(path)).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
