use std::path::PathBuf;

/// Errors that end a build, or a single cycle of one.
///
/// Bundler and type checker failures are not in here, they become a failed
/// [`BuildOutcome`](esb_types::BuildOutcome) instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config: {0}")]
    Config(String),
    #[error("hook failed: {0:#}")]
    Hook(anyhow::Error),
    #[error("watch: {0}")]
    WatchIo(#[from] esb_watch::Error),
    #[error("build canceled")]
    Canceled,
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
