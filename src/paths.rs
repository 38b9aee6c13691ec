//! Centralized path resolution for dockyard
//!
//! # Environment Variables
//!
//! - `DOCKYARD_STATE_DIR` - Override the state directory
//! - `DOCKYARD_STACK` - Default stack name (read by the CLI)
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `--state-dir` flag
//! 2. `DOCKYARD_STATE_DIR` environment variable
//! 3. `XDG_STATE_HOME/dockyard` (if set)
//! 4. Platform default:
//!    - Windows: `%LOCALAPPDATA%\dockyard`
//!    - macOS/Linux: `~/.local/state/dockyard`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "DOCKYARD_STATE_DIR";

/// Get the dockyard state directory path
pub fn state_dir(flag: Option<&Path>) -> Result<PathBuf> {
    // 1. Explicit flag
    if let Some(dir) = flag {
        let path = expand(&dir.to_string_lossy());
        log::debug!("Using state dir from --state-dir: {}", path.display());
        return Ok(path);
    }

    // 2. Check environment variable override
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    // 3. Check XDG_STATE_HOME
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("dockyard");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    // 4. Platform default
    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("dockyard");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("dockyard");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================
