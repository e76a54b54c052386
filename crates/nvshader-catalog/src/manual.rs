//! Hand-maintained game entries.
//!
//! Games that no launcher knows about (bare Wine prefixes, itch.io
//! installs) live in `~/.config/nvshader/games.json`. The same schema is
//! read by the detector and written by [`ManualConfig::save`], so edits
//! made by hand and through the API round-trip.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use nvshader_core::{Game, GameSource, NvError, Result};

use crate::GameDetector;

/// Config file location relative to the home directory.
const CONFIG_REL_PATH: &str = ".config/nvshader/games.json";

/// One hand-entered game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualGame {
    pub name: String,
    pub install_path: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_paths: Vec<PathBuf>,
}

/// The persisted manual-games document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualConfig {
    #[serde(default)]
    pub entries: Vec<ManualGame>,
}

impl ManualConfig {
    /// Default config path under the home directory.
    pub fn default_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(CONFIG_REL_PATH))
            .ok_or(NvError::NoHomeDir)
    }

    /// Load the config from `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&text)
            .map_err(|err| NvError::InvalidManifest(format!("{}: {err}", path.display())))
    }

    /// Write the config to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| NvError::InvalidManifest(err.to_string()))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Append a game entry.
    pub fn add_game(&mut self, game: ManualGame) {
        self.entries.push(game);
    }
}

/// Detector for the manual games config.
#[derive(Debug, Default)]
pub struct ManualDetector {
    path_override: Option<PathBuf>,
}

impl ManualDetector {
    /// Detector reading the default config location.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector reading an explicit config file.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path_override: Some(path.into()),
        }
    }

    fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path_override {
            return Some(path.clone());
        }
        ManualConfig::default_path().ok()
    }
}

impl GameDetector for ManualDetector {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn detect(&self) -> Vec<Game> {
        let Some(path) = self.config_path() else {
            return Vec::new();
        };
        let config = match ManualConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable manual games config");
                return Vec::new();
            }
        };

        config
            .entries
            .into_iter()
            .map(|entry| {
                // Ids derive from the install directory's basename; two
                // entries installed into same-named directories collide.
                let basename = entry
                    .install_path
                    .file_name()
                    .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
                let mut game = Game::new(
                    GameSource::Manual,
                    format!("manual:{basename}"),
                    entry.name,
                    entry.install_path,
                );
                game.cache_hints = entry.cache_paths;
                game
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_config() {
        let dir = TempDir::new().unwrap();
        let config = ManualConfig::load(&dir.path().join("games.json")).unwrap();
        assert!(config.entries.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/games.json");

        let mut config = ManualConfig::default();
        config.add_game(ManualGame {
            name: "Factorio".into(),
            install_path: "/games/factorio".into(),
            cache_paths: vec!["/home/u/.factorio/cache".into()],
        });
        config.save(&path).unwrap();

        let loaded = ManualConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_detector_builds_prefixed_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("games.json");
        let mut config = ManualConfig::default();
        config.add_game(ManualGame {
            name: "Factorio".into(),
            install_path: "/games/factorio".into(),
            cache_paths: Vec::new(),
        });
        config.save(&path).unwrap();

        let games = ManualDetector::with_path(&path).detect();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].id, "manual:factorio");
        assert_eq!(games[0].source, GameSource::Manual);
    }

    #[test]
    fn test_malformed_json_detects_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("games.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(ManualDetector::with_path(&path).detect().is_empty());
    }
}
