use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::TypeCheckHandle;

/// Wait for `handle`, showing a spinner if it takes longer than `delay`.
///
/// The spinner is purely informational, nothing gets aborted.
pub async fn wait_with_notice(handle: &TypeCheckHandle, delay: Duration, quiet: bool) -> bool {
    tokio::select! {
        passed = handle.wait() => return passed,
        _ = tokio::time::sleep(delay) => {}
    }

    let spinner = (!quiet).then(|| {
        let spinner = ProgressBar::new_spinner().with_message("waiting for type checker...");
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.blue} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    });
    tracing::debug!(?delay, "still waiting on the type checker");

    let passed = handle.wait().await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    passed
}
