// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory and config file resolution.

use std::path::{Path, PathBuf};

use bonwerk_core::BonwerkConfig;
use tracing::{info, warn};

/// Return the application data directory, creating it if needed.
///
/// `BONWERK_DATA_DIR` wins, then `$XDG_DATA_HOME/bonwerk`, then
/// `~/.local/share/bonwerk`.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("BONWERK_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs_fallback().join("bonwerk"),
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn dirs_fallback() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    PathBuf::from("/tmp")
}

/// Load settings from `$BONWERK_CONFIG`, else `<dir>/config.json`.
///
/// A missing file means defaults.  A file that fails to parse or validate is
/// logged and replaced by defaults.
pub fn load_config(dir: &Path) -> BonwerkConfig {
    let path = std::env::var_os("BONWERK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| dir.join("config.json"));
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> BonwerkConfig {
    if !path.exists() {
        info!(path = %path.display(), "no config file, using defaults");
        return BonwerkConfig::default();
    }
    match BonwerkConfig::load(path) {
        Ok(config) => {
            info!(path = %path.display(), "config loaded");
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config rejected, using defaults");
            BonwerkConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config_from(&dir.path().join("config.json"));
        assert_eq!(config, BonwerkConfig::default());
    }

    #[test]
    fn invalid_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "link": { "chunk_attempts": 0 } }"#).expect("write");
        assert_eq!(load_config_from(&path), BonwerkConfig::default());
    }

    #[test]
    fn valid_file_is_used() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "preview": { "paper_width_dots": 576 } }"#).expect("write");
        assert_eq!(load_config_from(&path).preview.paper_width_dots, 576);
    }
}
