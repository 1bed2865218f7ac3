//! The metadata file the bundler writes describing every input and output of a build.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// `{ "inputs": { path: {...} }, "outputs": { path: {...} } }`
///
/// Paths are relative to the directory the bundler ran in. We only care about the keys, the
/// per-file details are kept opaque.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Metafile {
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum MetafileError {
    #[error("failed to read metafile {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse metafile {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl Metafile {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn read(path: &Path) -> Result<Self, MetafileError> {
        let raw = std::fs::read_to_string(path).map_err(|source| MetafileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Metafile::from_json(&raw).map_err(|source| MetafileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
