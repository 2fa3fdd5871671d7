//! On-disk defaults for the `GIMERA_*` toggles, read from
//! `~/.config/gimera/config.toml`.
//!
//! Precedence for any given toggle is: CLI flag > environment variable >
//! this file > built-in default. Callers that already check
//! [`crate::env`] should fall back to the matching field here before
//! defaulting to `false`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct UserConfig {
    pub non_interactive: bool,
    pub non_threaded: bool,
    pub ignore_fetch_errors: bool,
    pub force: bool,
    pub no_sha_update: bool,
    pub no_precommit: bool,
}

fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("gimera").join("config.toml"))
}

impl UserConfig {
    /// Load from the default path, returning an all-`false` config if the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        let Some(path) = config_path() else {
            return Ok(Self::default());
        };
        Self::load_from(&path)
    }

    fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = UserConfig::load_from(&tmp.path().join("config.toml")).unwrap();
        assert!(!cfg.force);
        assert!(!cfg.non_interactive);
    }

    #[test]
    fn parses_declared_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "force = true\nno-precommit = true\n").unwrap();
        let cfg = UserConfig::load_from(&path).unwrap();
        assert!(cfg.force);
        assert!(cfg.no_precommit);
        assert!(!cfg.non_threaded);
    }
}
