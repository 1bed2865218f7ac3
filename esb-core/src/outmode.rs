//! Applying `outfileMode` to the build output.

use std::path::Path;

use esb_types::FileModeSpec;

use crate::Error;

/// Change the permissions of `path` according to `spec`, returning the new mode.
#[cfg(unix)]
pub async fn apply_output_mode(path: &Path, spec: &FileModeSpec) -> Result<u32, Error> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| Error::io(path, err))?;
    let current = metadata.permissions().mode();
    let mode = spec
        .resolve(current)
        .map_err(|err| Error::config(format!("outfileMode: {err}")))?;

    if mode != current {
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|err| Error::io(path, err))?;
        tracing::debug!(path = %path.display(), mode = format_args!("{mode:o}"), "changed output mode");
    }
    Ok(mode)
}

#[cfg(not(unix))]
pub async fn apply_output_mode(path: &Path, spec: &FileModeSpec) -> Result<u32, Error> {
    spec.resolve(0o644)
        .map_err(|err| Error::config(format!("outfileMode: {err}")))?;
    tracing::debug!(path = %path.display(), "file modes are not supported on this platform");
    Ok(0o644)
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[tokio::test]
    async fn sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.js");
        std::fs::write(&file, "#!/usr/bin/env node").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mode = apply_output_mode(&file, &FileModeSpec::Expr("+x".to_string()))
            .await
            .unwrap();
        assert_eq!(mode & 0o777, 0o755);
        let on_disk = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(on_disk & 0o777, 0o755);
    }

    #[tokio::test]
    async fn bad_spec_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("out.js");
        std::fs::write(&file, "").unwrap();

        let err = apply_output_mode(&file, &FileModeSpec::Expr("q+z".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
