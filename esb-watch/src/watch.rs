use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use esb_ore::cancel::CancelToken;
use esb_types::{BuildConfig, Metafile, ProjectId};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};

use crate::{ProjectWatcher, WATCH_VENDOR_THRESHOLD, WatchSet, WatcherRegistry};

/// Watch the inputs of the project described by `config` until `token` is canceled.
///
/// After every build cycle the bundler's `metafile` is re-read to learn the current set of
/// inputs. `cycles` ticks whenever a cycle ran, including ones we didn't start ourselves.
/// When any input changes, `rebuild` gets called with the changed paths and is awaited before
/// we look for more changes.
pub async fn watch_files<F, Fut>(
    registry: &Arc<WatcherRegistry>,
    config: &BuildConfig,
    id: &ProjectId,
    metafile: &Path,
    token: &CancelToken,
    mut cycles: watch::Receiver<u64>,
    mut rebuild: F,
) -> Result<(), crate::Error>
where
    F: FnMut(Vec<PathBuf>) -> Fut,
    Fut: Future<Output = ()>,
{
    let (watcher, reused) = registry.acquire(id)?;
    {
        let registry = Arc::clone(registry);
        let id = id.clone();
        token.on_cancel(move || registry.release(&id));
    }
    tracing::debug!(project = %id, reused, "watching for changes");

    let ignore = match &config.watch {
        Some(options) if !options.ignore.is_empty() => Some(build_ignore(&options.ignore)?),
        _ => None,
    };
    let threshold = usize::try_from(WATCH_VENDOR_THRESHOLD.read(registry.configs()))
        .unwrap_or(usize::MAX);
    let mut changes = watcher.subscribe();

    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        cycles.borrow_and_update();
        if let Err(err) = refresh(&watcher, metafile, &config.cwd, threshold, ignore.as_ref()) {
            // Keep watching whatever we were watching before.
            tracing::error!(project = %id, %err, "failed to refresh watched files");
        }

        let changed = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            Ok(()) = cycles.changed() => continue,
            batch = next_batch(&mut changes) => match batch {
                Some(batch) => batch,
                None => return Ok(()),
            },
        };
        tracing::info!(project = %id, files = changed.len(), "change detected, rebuilding");
        rebuild(changed).await;
    }
}

/// Re-read the metafile and install the derived [`WatchSet`].
fn refresh(
    watcher: &ProjectWatcher,
    metafile: &Path,
    cwd: &Path,
    threshold: usize,
    ignore: Option<&GlobSet>,
) -> Result<(), crate::Error> {
    let meta = Metafile::read(metafile)?;
    let set = WatchSet::derive(&meta, cwd, threshold, ignore);
    watcher.install(set)
}

/// Wait for the next batch of changes, folding in any batches that queued up meanwhile.
async fn next_batch(changes: &mut broadcast::Receiver<Arc<[PathBuf]>>) -> Option<Vec<PathBuf>> {
    let mut batch: Vec<PathBuf> = loop {
        match changes.recv().await {
            Ok(paths) => break paths.to_vec(),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "fell behind on file changes");
            }
            Err(RecvError::Closed) => return None,
        }
    };

    loop {
        match changes.try_recv() {
            Ok(paths) => batch.extend(paths.iter().cloned()),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    batch.sort();
    batch.dedup();
    Some(batch)
}

fn build_ignore(globs: &[String]) -> Result<GlobSet, crate::Error> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        builder.add(Glob::new(glob)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use esb_cfg::ConfigSet;
    use esb_types::WatchOptions;

    use super::*;

    fn registry() -> Arc<WatcherRegistry> {
        let mut builder = ConfigSet::builder();
        crate::register_configs(&mut builder);
        Arc::new(WatcherRegistry::new(builder.build()))
    }

    #[tokio::test]
    async fn rebuilds_on_change_until_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let source = root.join("a.ts");
        std::fs::write(&source, "1").unwrap();
        let metafile = root.join("meta.json");
        std::fs::write(
            &metafile,
            r#"{ "inputs": { "a.ts": {} }, "outputs": { "out.js": {} } }"#,
        )
        .unwrap();

        let mut config = BuildConfig::new(vec!["a.ts".into()], root.clone());
        config.watch = Some(WatchOptions::default());
        let id = ProjectId::new("watch-test".into());
        let registry = registry();
        let token = CancelToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (_cycles, cycles_rx) = watch::channel(0);
        let task = {
            let registry = Arc::clone(&registry);
            let token = token.clone();
            let seen = Arc::clone(&seen);
            let metafile = metafile.clone();
            let id = id.clone();
            tokio::spawn(async move {
                watch_files(&registry, &config, &id, &metafile, &token, cycles_rx, |changed| {
                    seen.lock().unwrap().push(changed);
                    async {}
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(registry.len(), 1);
        std::fs::write(&source, "2").unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("no rebuild observed");
        assert_eq!(seen.lock().unwrap()[0], vec![source.clone()]);

        token.cancel(Some("test done"));
        task.await.unwrap().unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn refreshes_after_cycles_started_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("a.ts"), "1").unwrap();
        std::fs::write(root.join("b.ts"), "1").unwrap();
        let metafile = root.join("meta.json");
        std::fs::write(&metafile, r#"{ "inputs": { "a.ts": {} } }"#).unwrap();

        let mut config = BuildConfig::new(vec!["a.ts".into()], root.clone());
        config.watch = Some(WatchOptions::default());
        let id = ProjectId::new("outside-cycle".into());
        let registry = registry();
        let token = CancelToken::new();
        let (cycles, cycles_rx) = watch::channel(0u64);

        let task = {
            let registry = Arc::clone(&registry);
            let token = token.clone();
            let metafile = metafile.clone();
            let id = id.clone();
            tokio::spawn(async move {
                watch_files(&registry, &config, &id, &metafile, &token, cycles_rx, |_| async {})
                    .await
            })
        };

        let watched = || {
            registry
                .get(&id)
                .map(|watcher| watcher.watch_set().inputs)
                .unwrap_or_default()
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while !watched().contains(&root.join("a.ts")) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("initial watch set never installed");

        // Some other cycle, like a manual rebuild, found a new input.
        std::fs::write(&metafile, r#"{ "inputs": { "a.ts": {}, "b.ts": {} } }"#).unwrap();
        cycles.send_modify(|n| *n += 1);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !watched().contains(&root.join("b.ts")) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("watch set never refreshed");

        token.cancel(None);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unreadable_metafile_keeps_previous_set() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let registry = registry();
        let id = ProjectId::new("bad-meta".into());
        let (watcher, _) = registry.acquire(&id).unwrap();

        let mut previous = WatchSet::default();
        previous.inputs.insert(root.join("kept.ts"));
        watcher.install(previous.clone()).unwrap();

        let result = refresh(&watcher, &root.join("missing.json"), &root, 100, None);
        assert!(matches!(result, Err(crate::Error::Metafile(_))));
        assert_eq!(watcher.watch_set(), previous);
    }
}
