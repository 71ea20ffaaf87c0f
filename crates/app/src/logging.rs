use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context as _;
use tracing_subscriber::fmt;

/// Env var enabling the log file; any non-empty value except `0`.
pub const LOG_ENV: &str = "BOOKCLUB_LOG";

pub fn enabled(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        let v = v.trim();
        !v.is_empty() && v != "0"
    })
}

/// Logs go to a file; the terminal belongs to the reader.
pub fn init(verbose: bool, path: &Path) -> anyhow::Result<()> {
    if !verbose {
        return Ok(());
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))?;
    let _ = fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    Ok(())
}
