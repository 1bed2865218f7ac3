//! Deterministic identity of a project.
//!
//! Two builds with the same project directory, output, and entry points are the same project:
//! they share a file watcher and a type checker.

use esb_ore::hash::ContentHasher;
use esb_types::{BuildConfig, OutputTarget, ProjectId};

/// Number of digest bytes kept in a [`ProjectId`].
const ID_BYTES: usize = 16;

/// The [`ProjectId`] of `config`, computed once and then cached on the config.
pub fn project_id(config: &BuildConfig) -> &ProjectId {
    config.identity.get_or_init(|| compute(config))
}

fn compute(config: &BuildConfig) -> ProjectId {
    let mut hasher = ContentHasher::new();
    hasher.field(config.cwd.as_os_str().as_encoded_bytes());

    let (kind, path) = match &config.output {
        OutputTarget::None => ("none", None),
        OutputTarget::File(path) => ("file", Some(path)),
        OutputTarget::Dir(path) => ("dir", Some(path)),
    };
    hasher.field(kind.as_bytes());
    hasher.field(path.map(|p| p.as_os_str().as_encoded_bytes()).unwrap_or_default());

    hasher.field(&(config.entry_points.len() as u64).to_le_bytes());
    for entry in &config.entry_points {
        hasher.field(entry.as_bytes());
    }

    ProjectId::new(hasher.hex_digest(ID_BYTES))
}
