#![deny(unsafe_code)]

//! Shared fixtures for linuxio tests.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary tree of module directories for loader tests.
///
/// The fixture exposes a `system` and a `user` subdirectory mirroring the
/// production scan order, and writes `module.yaml` files into named
/// module directories.
pub struct ModuleTree {
    root: TempDir,
}

impl ModuleTree {
    /// Creates an empty fixture.
    ///
    /// # Panics
    ///
    /// Panics when the temporary directory cannot be created; fixtures
    /// are test-only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create module tree tempdir"),
        }
    }

    /// The system-scope scan directory.
    #[must_use]
    pub fn system_dir(&self) -> PathBuf {
        self.root.path().join("system")
    }

    /// The user-scope scan directory.
    #[must_use]
    pub fn user_dir(&self) -> PathBuf {
        self.root.path().join("user")
    }

    /// Writes a manifest into `<scope>/<name>/module.yaml`.
    ///
    /// # Panics
    ///
    /// Panics on I/O failure; fixtures are test-only.
    pub fn write_manifest(&self, scope_dir: &Path, name: &str, yaml: &str) -> PathBuf {
        let dir = scope_dir.join(name);
        std::fs::create_dir_all(&dir).expect("create module dir");
        std::fs::write(dir.join("module.yaml"), yaml).expect("write module.yaml");
        dir
    }
}

impl Default for ModuleTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_manifests_under_the_requested_scope() {
        let tree = ModuleTree::new();
        let dir = tree.write_manifest(&tree.system_dir(), "demo", "name: demo\n");
        assert!(dir.join("module.yaml").is_file());
        assert!(dir.starts_with(tree.system_dir()));
    }
}
