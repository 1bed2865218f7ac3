use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use esb_ore::path::{absolutize, is_dependency_path};
use esb_types::Metafile;
use globset::GlobSet;

/// The files a project's watcher observes, derived from the bundler's [`Metafile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    /// Source files to watch.
    pub inputs: BTreeSet<PathBuf>,
    /// Files the build wrote, events for these are caused by us.
    pub outputs: BTreeSet<PathBuf>,
}

impl WatchSet {
    /// Derive a [`WatchSet`] from `metafile`, resolving its paths against `cwd`.
    ///
    /// The inputs are everything the bundler read minus everything it wrote. When there are
    /// more than `vendor_threshold` inputs, files in dependency directories are dropped too.
    pub fn derive(
        metafile: &Metafile,
        cwd: &Path,
        vendor_threshold: usize,
        ignore: Option<&GlobSet>,
    ) -> WatchSet {
        let outputs: BTreeSet<_> = metafile
            .outputs
            .keys()
            .map(|path| absolutize(path, cwd))
            .collect();

        let skip_vendor = metafile.inputs.len() > vendor_threshold;
        let inputs = metafile
            .inputs
            .keys()
            .filter(|path| !is_virtual(path))
            .filter(|path| !ignore.is_some_and(|set| set.is_match(path.as_str())))
            .map(|path| absolutize(path, cwd))
            .filter(|path| !outputs.contains(path))
            .filter(|path| !(skip_vendor && is_dependency_path(path)))
            .collect();

        WatchSet { inputs, outputs }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Directories that need a watch for us to see changes to all of the inputs.
    pub(crate) fn directories(&self) -> BTreeSet<PathBuf> {
        self.inputs
            .iter()
            .filter_map(|path| path.parent())
            .map(Path::to_path_buf)
            .collect()
    }
}

/// Bundler plugins can report inputs that don't exist on disk, e.g. `ns:some/module`.
fn is_virtual(path: &str) -> bool {
    match path.split_once(':') {
        // Windows drive letters look like a namespace, e.g. `C:\src\a.ts`.
        Some((ns, _)) => ns.len() > 1,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metafile(inputs: &[&str], outputs: &[&str]) -> Metafile {
        let mut meta = Metafile::default();
        for input in inputs {
            meta.inputs.insert(input.to_string(), serde_json::json!({}));
        }
        for output in outputs {
            meta.outputs.insert(output.to_string(), serde_json::json!({}));
        }
        meta
    }

    #[test]
    fn inputs_minus_outputs() {
        let cwd = Path::new("/proj");
        let meta = metafile(
            &["src/a.ts", "src/b.ts", "dist/gen.js", "node_modules/x/index.js"],
            &["dist/gen.js"],
        );
        let set = WatchSet::derive(&meta, cwd, 100, None);

        let expected: BTreeSet<_> = [
            "/proj/src/a.ts",
            "/proj/src/b.ts",
            "/proj/node_modules/x/index.js",
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(set.inputs, expected);
        assert!(set.outputs.contains(Path::new("/proj/dist/gen.js")));
    }

    #[test]
    fn vendor_files_dropped_above_threshold() {
        let cwd = Path::new("/proj");
        let mut inputs: Vec<String> = (0..100)
            .map(|i| format!("node_modules/pkg{i}/index.js"))
            .collect();
        inputs.push("src/main.ts".to_string());
        let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();

        let meta = metafile(&inputs, &["out.js"]);
        let set = WatchSet::derive(&meta, cwd, 100, None);
        assert_eq!(set.len(), 1);
        assert!(set.inputs.contains(Path::new("/proj/src/main.ts")));

        // Exactly at the threshold nothing is dropped.
        let meta = metafile(&inputs[..100], &["out.js"]);
        assert_eq!(WatchSet::derive(&meta, cwd, 100, None).len(), 100);
    }

    #[test]
    fn ignore_globs_and_virtual_inputs() {
        let mut globs = globset::GlobSetBuilder::new();
        globs.add(globset::Glob::new("**/*.test.ts").unwrap());
        let globs = globs.build().unwrap();

        let meta = metafile(&["src/a.ts", "src/a.test.ts", "virtual:env"], &[]);
        let set = WatchSet::derive(&meta, Path::new("/proj"), 100, Some(&globs));
        assert_eq!(
            set.inputs.into_iter().collect::<Vec<_>>(),
            vec![PathBuf::from("/proj/src/a.ts")]
        );
    }

    #[test]
    fn directories_of_inputs() {
        let meta = metafile(&["src/a.ts", "src/b.ts", "lib/c.ts"], &[]);
        let set = WatchSet::derive(&meta, Path::new("/proj"), 100, None);
        let dirs: Vec<_> = set.directories().into_iter().collect();
        assert_eq!(dirs, vec![PathBuf::from("/proj/lib"), PathBuf::from("/proj/src")]);
    }
}
