//! Lutris game-config discovery.
//!
//! Lutris stores one YAML file per game. Only a handful of top-level
//! scalar keys matter here, so the files are read as flat key/value
//! documents instead of pulling in a YAML parser: a recognized key at
//! column zero takes the rest of the line as its value, with surrounding
//! ASCII double quotes stripped.

use std::fs;
use std::path::PathBuf;

use nvshader_core::{Game, GameSource};

use crate::GameDetector;

/// Detector for games configured in Lutris.
#[derive(Debug, Default)]
pub struct LutrisDetector {
    dirs_override: Option<Vec<PathBuf>>,
}

impl LutrisDetector {
    /// Detector probing the standard Lutris config directories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector reading explicit config directories.
    #[must_use]
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs_override: Some(dirs),
        }
    }

    fn config_dirs(&self) -> Vec<PathBuf> {
        if let Some(dirs) = &self.dirs_override {
            return dirs.clone();
        }
        let Some(home) = dirs::home_dir() else {
            return Vec::new();
        };
        vec![
            home.join(".local/share/lutris/games"),
            home.join(".config/lutris/games"),
        ]
    }
}

impl GameDetector for LutrisDetector {
    fn name(&self) -> &'static str {
        "lutris"
    }

    fn detect(&self) -> Vec<Game> {
        let mut games = Vec::new();
        for dir in self.config_dirs() {
            let Ok(read) = fs::read_dir(&dir) else {
                continue;
            };
            for dir_entry in read.filter_map(std::result::Result::ok) {
                let path = dir_entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("yml") {
                    continue;
                }
                match fs::read_to_string(&path) {
                    Ok(text) => {
                        if let Some(game) = parse_game_config(&text) {
                            games.push(game);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "unreadable Lutris config");
                    }
                }
            }
        }
        games
    }
}

/// Parse one Lutris game YAML. A game is emitted only when `name`,
/// `slug` and `directory` are all present.
#[must_use]
pub fn parse_game_config(text: &str) -> Option<Game> {
    let mut name = None;
    let mut slug = None;
    let mut directory = None;
    let mut cache = None;
    let mut runner = None;

    for line in text.lines() {
        // Indented lines belong to nested sections and are ignored.
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = unquote(value.trim());
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "name" => name = Some(value),
            "slug" => slug = Some(value),
            "directory" => directory = Some(value),
            "cache" => cache = Some(value),
            "runner" => runner = Some(value),
            _ => {}
        }
    }

    let (name, slug, directory) = (name?, slug?, directory?);
    let mut game = Game::new(
        GameSource::Lutris,
        format!("lutris:{slug}"),
        name,
        PathBuf::from(directory),
    );
    if let Some(cache) = cache {
        game.cache_hints.push(PathBuf::from(cache));
    }
    if let Some(runner) = runner {
        game.tags.push(format!("runner:{runner}"));
    }
    Some(game)
}

fn unquote(s: &str) -> String {
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
        .to_string()
}
