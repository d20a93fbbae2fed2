//! Output file naming.

use std::path::{Path, PathBuf};

/// File name prefix used when no output path is configured.
pub const DEFAULT_PREFIX: &str = "ScreenRecording";

/// Build `{prefix}_{yyyy-MM-dd_HH-mm-ss}.mp4` under `dir` from local time.
pub fn timestamped_path(dir: &Path, prefix: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("{prefix}_{stamp}.mp4"))
}

/// Directory recordings land in when the caller names none: the user's
/// downloads directory, or the current directory without one.
pub fn default_output_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default output path for a recording started now.
pub fn default_output_path() -> PathBuf {
    timestamped_path(&default_output_dir(), DEFAULT_PREFIX)
}
