//! Path utilities for log output

use std::path::{Path, PathBuf};

/// Default log directory (`./logs`, next to the `.env` file the bot runs from)
pub fn default_log_dir() -> PathBuf {
    std::env::current_dir()
        .map(|dir| dir.join("logs"))
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

/// Log file path inside `log_dir`
pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join("arena-autopilot.log")
}
