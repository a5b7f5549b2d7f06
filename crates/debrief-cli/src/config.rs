//! Config file loading.
//!
//! Looks for `~/.config/debrief/config.toml` unless a path is given. Both
//! tables are optional and every key falls back to its default:
//!
//! ```toml
//! [index]
//! root = "/srv/archive/domainSessions"
//!
//! [playback]
//! username = "observer"
//! entity_lookback_ms = 15000
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use debrief_index::IndexConfig;
use debrief_kernel::PlaybackConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub playback: PlaybackConfig,
}

/// Default config path (`~/.config/debrief/config.toml`).
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("debrief").join("config.toml"))
}

/// Load the config at `explicit`, or the default path when none is given.
///
/// A missing default file means defaults; a missing explicit file is an
/// error.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("no config file, using defaults");
                return Ok(Config::default());
            }
        },
    };

    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let config = parse_config(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

pub fn parse_config(text: &str) -> Result<Config> {
    Ok(toml::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use debrief_types::MessageType;

    #[test]
    fn test_partial_tables_keep_defaults() {
        let config = parse_config(
            r#"
            [index]
            root = "/srv/archive"

            [playback]
            username = "observer"
            fast_forward_types = ["APPLY_STRATEGIES"]
            "#,
        )
        .unwrap();
        assert_eq!(config.index.root, PathBuf::from("/srv/archive"));
        assert_eq!(config.index.index_file_name, "logIndex.json");
        assert_eq!(config.playback.username.as_deref(), Some("observer"));
        assert_eq!(config.playback.fast_forward_types, vec![MessageType::ApplyStrategies]);
        assert_eq!(config.playback.entity_lookback_ms, 30_000);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(parse_config("").unwrap(), Config::default());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());

        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[index]\npublish_score_timeout_ms = 5000\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.index.publish_score_timeout_ms, 5_000);
    }
}
