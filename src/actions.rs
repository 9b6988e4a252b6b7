//! Step output: colored progress lines plus pipeline workflow commands.
//!
//! Workflow commands are plain lines on stdout that the runner host parses
//! (`::debug::`, `::error::`, `::add-mask::`). Outputs go to the file named by
//! `GITHUB_OUTPUT`.

use anyhow::{Context, Result};
use colored::Colorize;
use std::io::Write;
use std::path::Path;

pub fn info(msg: impl AsRef<str>) {
    println!("{} {}", "→".blue().bold(), msg.as_ref());
}

pub fn success(msg: impl AsRef<str>) {
    println!("{} {}", "✓".green().bold(), msg.as_ref());
}

pub fn warning(msg: impl AsRef<str>) {
    println!("{} {}", "!".yellow().bold(), msg.as_ref());
}

pub fn debug(msg: impl AsRef<str>) {
    println!("::debug::{}", escape_data(msg.as_ref()));
}

/// Report a step failure. The caller decides the exit code.
pub fn error(msg: impl AsRef<str>) {
    println!("::error::{}", escape_data(msg.as_ref()));
}

/// Register a secret so the host redacts it from every later log line.
pub fn add_mask(secret: &str) {
    if secret.is_empty() {
        return;
    }
    println!("::add-mask::{}", escape_data(secret));
}

/// Set a step output. Appends to `output_file` when the host provides one,
/// otherwise falls back to the legacy `set-output` command.
pub fn set_output(output_file: Option<&Path>, name: &str, value: &str) -> Result<()> {
    match output_file {
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open step output file {}", path.display()))?;
            writeln!(file, "{}", output_line(name, value))
                .with_context(|| format!("Failed to write output '{}'", name))?;
        }
        None => println!("::set-output name={}::{}", name, escape_data(value)),
    }
    Ok(())
}

/// `name=value` line for the output file. Values are single-line in this tool
/// (a VM name), so the heredoc form is not needed.
pub(crate) fn output_line(name: &str, value: &str) -> String {
    format!("{}={}", name, value)
}

/// Escape a workflow command payload.
pub(crate) fn escape_data(s: &str) -> String {
    s.replace('%', "%25").replace('\r', "%0D").replace('\n', "%0A")
}
