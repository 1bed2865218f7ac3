//! Everything the user sees on stderr that isn't a log line.

use std::io::Write;
use std::time::Duration;

use ansi_term::{Colour, Style};
use esb_types::Message;

use crate::normalize::ConfigWarning;

static BUG_REPORT_HINT: &str =
    "if this is a valid bundler option, please file a bug so it can be added to the known options";

/// Prints diagnostics and build summaries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reporter {
    color: bool,
    quiet: bool,
}

impl Reporter {
    pub fn new(color: bool, quiet: bool) -> Self {
        Reporter { color, quiet }
    }

    fn paint(&self, style: Style, text: &str) -> String {
        if self.color {
            style.paint(text).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn warning(&self, message: &Message) {
        if self.quiet {
            return;
        }
        eprintln!("{} {message}", self.paint(Colour::Yellow.bold(), "warning:"));
    }

    /// Errors are printed even when quiet.
    pub fn error(&self, message: &Message) {
        eprintln!("{} {message}", self.paint(Colour::Red.bold(), "error:"));
    }

    pub fn config_warning(&self, warning: &ConfigWarning) {
        eprintln!("{}", self.format_config_warning(warning));
    }

    fn format_config_warning(&self, warning: &ConfigWarning) -> String {
        let mut line = format!("{} {warning}", self.paint(Colour::Yellow.bold(), "warning:"));
        if warning.unknown {
            line.push_str("\n  ");
            line.push_str(&self.paint(Style::new().dimmed(), BUG_REPORT_HINT));
        }
        line
    }

    /// One line summary of a successful cycle.
    pub fn summary(&self, output: &str, bytes: u64, elapsed: Duration) {
        if self.quiet {
            return;
        }
        eprintln!(
            "{} {} {}",
            self.paint(Colour::Green.bold(), "Wrote"),
            output,
            self.paint(
                Style::new().dimmed(),
                &format!("({}, {})", format_bytes(bytes), format_elapsed(elapsed)),
            ),
        );
    }

    pub fn clear_screen(&self) {
        let sequence = self.clear_sequence();
        if sequence.is_empty() {
            return;
        }
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(sequence);
        let _ = stderr.flush();
    }

    /// Clear the screen and scrollback, then move the cursor home. Nothing when quiet.
    fn clear_sequence(&self) -> &'static [u8] {
        if self.quiet {
            b""
        } else {
            b"\x1b[2J\x1b[3J\x1b[H"
        }
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["kB", "MB", "GB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1000.0 {
            break;
        }
        value /= 1000.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{:.2}s", elapsed.as_secs_f64())
    }
}
