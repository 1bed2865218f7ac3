//! Path helpers shared by the watcher and the build executor.

use std::path::{Component, Path, PathBuf};

/// Name of the directory package managers install third-party code into.
pub static DEPENDENCY_DIR_NAME: &str = "node_modules";

/// Returns `path` if it's absolute, otherwise `base.join(path)`, with `.` and `..`
/// components folded away lexically.
pub fn absolutize(path: impl AsRef<Path>, base: &Path) -> PathBuf {
    let path = path.as_ref();
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut normal = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other.as_os_str()),
        }
    }
    normal
}

/// Path of `path` relative to `base`, `"."` if they're the same directory.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    match pathdiff::diff_paths(path, base) {
        Some(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        Some(rel) => rel,
        None => path.to_path_buf(),
    }
}

/// Whether any component of `path` is a [`DEPENDENCY_DIR_NAME`] directory.
pub fn is_dependency_path(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == std::ffi::OsStr::new(DEPENDENCY_DIR_NAME))
}
