//! Small operational helpers: app-directory bootstrap and raw-mode terminal setup/teardown.
//! The latter is used by the interactive REPL (C6) around its foreground edit loop.

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::error::Result;

/// App directory name, under `~/.hostpilot`.
const APP_DIR_NAME: &str = ".avconsoletoolkit";

/// Ensure the toolkit's per-user config/history/log directory exists; return its path.
pub fn ensure_app_dir(home_dir: &std::path::Path) -> Result<std::path::PathBuf> {
    let app_dir = home_dir.join(APP_DIR_NAME);
    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir)?;
    }
    Ok(app_dir)
}

/// Enter raw mode for the interactive pass-through REPL. Must be paired with `restore_terminal`.
pub fn setup_terminal() -> Result<()> {
    enable_raw_mode().map_err(|e| crate::error::ActError::Io(e.to_string()))
}

/// Leave raw mode, restoring normal terminal line-editing/echo behavior.
pub fn restore_terminal() -> Result<()> {
    disable_raw_mode().map_err(|e| crate::error::ActError::Io(e.to_string()))
}
