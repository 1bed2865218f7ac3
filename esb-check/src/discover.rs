use std::path::{Path, PathBuf};

pub static TSCONFIG_FILENAME: &str = "tsconfig.json";

/// Look for a [`TSCONFIG_FILENAME`] in `start` and its ancestors, up to and including `root`.
///
/// If `start` isn't inside of `root` only `start` and `root` themselves are checked.
pub fn find_tsconfig(start: &Path, root: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(TSCONFIG_FILENAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if dir == root || !dir.starts_with(root) {
            break;
        }
    }

    let candidate = root.join(TSCONFIG_FILENAME);
    candidate.is_file().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearest_up_to_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let nested = root.join("packages/app/src");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_tsconfig(&nested, root), None);

        std::fs::write(root.join(TSCONFIG_FILENAME), "{}").unwrap();
        assert_eq!(find_tsconfig(&nested, root), Some(root.join(TSCONFIG_FILENAME)));

        let app = root.join("packages/app");
        std::fs::write(app.join(TSCONFIG_FILENAME), "{}").unwrap();
        assert_eq!(find_tsconfig(&nested, root), Some(app.join(TSCONFIG_FILENAME)));
    }
}
