//! Post-processing of source maps the bundler wrote.

use std::path::Path;

use esb_ore::path::relative_to;
use serde_json::Value;

use crate::Error;

/// Rewrite the source map at `map` in place: embedded sources are dropped and `sourceRoot`
/// points from the map's directory back to the project directory `cwd`.
pub async fn patch_source_map(map: &Path, cwd: &Path) -> Result<(), Error> {
    let raw = tokio::fs::read_to_string(map)
        .await
        .map_err(|err| Error::io(map, err))?;
    let mut json: serde_json::Map<String, Value> = serde_json::from_str(&raw)?;

    json.remove("sourcesContent");
    let map_dir = map.parent().unwrap_or(cwd);
    let root = relative_to(cwd, map_dir);
    let root = root.to_string_lossy().replace('\\', "/");
    json.insert("sourceRoot".to_string(), Value::String(root));

    let patched = serde_json::to_string(&json)?;
    tokio::fs::write(map, patched)
        .await
        .map_err(|err| Error::io(map, err))?;
    tracing::debug!(map = %map.display(), "patched source map");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strips_content_and_sets_root() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dist/js");
        std::fs::create_dir_all(&out).unwrap();
        let map = out.join("out.js.map");
        std::fs::write(
            &map,
            r#"{"version":3,"sources":["../../src/a.ts"],"sourcesContent":["let a = 1"],"mappings":"AAAA"}"#,
        )
        .unwrap();

        patch_source_map(&map, dir.path()).await.unwrap();

        let json: Value = serde_json::from_str(&std::fs::read_to_string(&map).unwrap()).unwrap();
        assert!(json.get("sourcesContent").is_none());
        assert_eq!(json["sourceRoot"], "../..");
        assert_eq!(json["mappings"], "AAAA");
    }

    #[tokio::test]
    async fn missing_map_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = patch_source_map(&dir.path().join("nope.map"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
