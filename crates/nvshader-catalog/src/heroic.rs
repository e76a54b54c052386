//! Heroic Games Launcher discovery.
//!
//! Heroic persists three JSON catalogs (GOG, Epic via legendary, and
//! sideloaded titles), and their shapes differ between versions: some are
//! arrays of objects, others map an app name to its object. An untagged
//! union accepts both and normalizes immediately.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use nvshader_core::{Game, GameSource};

use crate::GameDetector;

/// The three Heroic stores, with their launcher flavor labels.
const STORES: [(&str, &str); 3] = [
    ("gog", "gog_store/installed.json"),
    ("epic", "legendaryConfig/legendary/installed.json"),
    ("sideload", "sideload_apps/library.json"),
];

/// Detector for games installed through Heroic.
#[derive(Debug, Default)]
pub struct HeroicDetector {
    config_root_override: Option<PathBuf>,
}

impl HeroicDetector {
    /// Detector probing `~/.config/heroic`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector rooted at an explicit Heroic config directory.
    #[must_use]
    pub fn with_config_root(root: impl Into<PathBuf>) -> Self {
        Self {
            config_root_override: Some(root.into()),
        }
    }

    fn config_root(&self) -> Option<PathBuf> {
        if let Some(root) = &self.config_root_override {
            return Some(root.clone());
        }
        dirs::home_dir().map(|h| h.join(".config/heroic"))
    }
}

impl GameDetector for HeroicDetector {
    fn name(&self) -> &'static str {
        "heroic"
    }

    fn detect(&self) -> Vec<Game> {
        let Some(root) = self.config_root() else {
            return Vec::new();
        };

        let mut games = Vec::new();
        for (flavor, rel_path) in STORES {
            let path = root.join(rel_path);
            let Ok(text) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<HeroicDoc>(&text) {
                Ok(doc) => {
                    for object in doc.into_objects() {
                        if let Some(game) = game_from_object(flavor, &object) {
                            games.push(game);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "malformed Heroic catalog");
                }
            }
        }
        games
    }
}

/// A Heroic catalog document: an array of game objects, or an object
/// mapping app names to game objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HeroicDoc {
    List(Vec<Value>),
    Table(Map<String, Value>),
}

impl HeroicDoc {
    fn into_objects(self) -> Vec<Map<String, Value>> {
        let values = match self {
            Self::List(values) => values,
            Self::Table(table) => table.into_iter().map(|(_, v)| v).collect(),
        };
        values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(obj) => Some(obj),
                _ => None,
            })
            .collect()
    }
}

fn game_from_object(flavor: &str, object: &Map<String, Value>) -> Option<Game> {
    let first_string = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| object.get(*k))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let app_name = first_string(&["app_name", "appName", "title"])?;
    let install_path = first_string(&["install_path", "installPath", "folder_name"])?;
    let display = first_string(&["title", "app_name"]).unwrap_or_else(|| app_name.clone());

    let mut game = Game::new(
        GameSource::Heroic,
        format!("heroic-{flavor}:{app_name}"),
        display,
        PathBuf::from(install_path),
    );
    if let Some(platform) = first_string(&["platform"]) {
        game.tags.push(format!("platform:{platform}"));
    }
    Some(game)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_form() {
        let doc: HeroicDoc = serde_json::from_str(
            r#"[
                {"app_name": "1423049311", "title": "Cyberpunk 2077",
                 "install_path": "/games/cp2077", "platform": "windows"},
                {"title": "No Path Game"}
            ]"#,
        )
        .unwrap();
        let objects = doc.into_objects();
        assert_eq!(objects.len(), 2);

        let game = game_from_object("gog", &objects[0]).unwrap();
        assert_eq!(game.id, "heroic-gog:1423049311");
        assert_eq!(game.name, "Cyberpunk 2077");
        assert_eq!(game.install_path, PathBuf::from("/games/cp2077"));
        assert_eq!(game.tags, vec!["platform:windows".to_string()]);

        // Objects without an install path contribute nothing.
        assert!(game_from_object("gog", &objects[1]).is_none());
    }

    #[test]
    fn test_map_form() {
        let doc: HeroicDoc = serde_json::from_str(
            r#"{
                "Fortnite": {"appName": "fn", "title": "Fortnite", "installPath": "/games/fn"}
            }"#,
        )
        .unwrap();
        let objects = doc.into_objects();
        assert_eq!(objects.len(), 1);
        let game = game_from_object("epic", &objects[0]).unwrap();
        assert_eq!(game.id, "heroic-epic:fn");
        assert_eq!(game.install_path, PathBuf::from("/games/fn"));
    }

    #[test]
    fn test_title_serves_as_identity_fallback() {
        let doc: HeroicDoc =
            serde_json::from_str(r#"[{"title": "Indie", "folder_name": "/side/indie"}]"#).unwrap();
        let objects = doc.into_objects();
        let game = game_from_object("sideload", &objects[0]).unwrap();
        assert_eq!(game.id, "heroic-sideload:Indie");
        assert_eq!(game.name, "Indie");
    }

    #[test]
    fn test_non_object_values_are_skipped() {
        let doc: HeroicDoc = serde_json::from_str(r#"{"installed": ["not-an-object"]}"#).unwrap();
        assert!(doc.into_objects().is_empty());
    }
}
