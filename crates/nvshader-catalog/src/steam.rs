//! Steam library and app-manifest discovery.
//!
//! Steam records its state in Valve Data Format (VDF) text files. Rather
//! than a full VDF grammar, both `libraryfolders.vdf` and the per-app
//! `appmanifest_*.acf` files are read with a tolerant line scanner that
//! only looks at quoted key/value pairs; unknown structure is ignored.

use std::fs;
use std::path::{Path, PathBuf};

use nvshader_core::{Game, GameSource};

use crate::{quoted_strings, GameDetector};

/// Candidate Steam roots relative to the home directory, in probe order.
const STEAM_HOME_SUFFIXES: [&str; 3] = [
    ".local/share/Steam",
    ".steam/steam",
    ".var/app/com.valvesoftware.Steam/.local/share/Steam",
];

/// Detector for games installed through Steam.
#[derive(Debug, Default)]
pub struct SteamDetector {
    root_override: Option<PathBuf>,
}

impl SteamDetector {
    /// Detector probing the canonical install locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Detector rooted at an explicit Steam directory. Used by tests and
    /// by callers managing a portable install.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_override: Some(root.into()),
        }
    }

    /// Locate the Steam root, resolving symlinks to canonical form.
    ///
    /// `~/.steam/steam` is conventionally a symlink into the real data
    /// directory; canonicalizing here keeps it from appearing as a second
    /// library later.
    #[must_use]
    pub fn locate_root(&self) -> Option<PathBuf> {
        if let Some(root) = &self.root_override {
            return canonical_dir(root);
        }
        let home = dirs::home_dir()?;
        STEAM_HOME_SUFFIXES
            .iter()
            .find_map(|suffix| canonical_dir(&home.join(suffix)))
    }

    /// All library roots: the Steam root plus every `"path"` entry from
    /// `steamapps/libraryfolders.vdf`, canonicalized and deduplicated in
    /// first-seen order.
    #[must_use]
    pub fn libraries(&self) -> Vec<PathBuf> {
        let Some(root) = self.locate_root() else {
            return Vec::new();
        };

        let mut libraries = vec![root.clone()];
        let vdf = root.join("steamapps/libraryfolders.vdf");
        if let Ok(text) = fs::read_to_string(&vdf) {
            for path in parse_library_folders(&text) {
                if let Some(canonical) = canonical_dir(&path) {
                    if !libraries.contains(&canonical) {
                        libraries.push(canonical);
                    }
                }
            }
        }
        libraries
    }
}

impl GameDetector for SteamDetector {
    fn name(&self) -> &'static str {
        "steam"
    }

    fn detect(&self) -> Vec<Game> {
        let Some(root) = self.locate_root() else {
            tracing::debug!("no Steam root found");
            return Vec::new();
        };

        let mut games = Vec::new();
        for library in self.libraries() {
            let steamapps = library.join("steamapps");
            let Ok(read) = fs::read_dir(&steamapps) else {
                continue;
            };
            for dir_entry in read.filter_map(std::result::Result::ok) {
                let path = dir_entry.path();
                if !is_app_manifest(&path) {
                    continue;
                }
                let Ok(text) = fs::read_to_string(&path) else {
                    tracing::warn!(path = %path.display(), "unreadable app manifest");
                    continue;
                };
                if let Some(app) = parse_app_manifest(&text) {
                    games.push(app.into_game(&steamapps, &root));
                }
            }
        }
        games
    }
}

/// Fields pulled from one `appmanifest_*.acf`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SteamApp {
    pub appid: String,
    pub name: String,
    pub installdir: String,
    pub size_on_disk: Option<u64>,
    pub last_played: Option<u64>,
}

impl SteamApp {
    fn into_game(self, steamapps: &Path, steam_root: &Path) -> Game {
        let mut game = Game::new(
            GameSource::Steam,
            format!("steam:{}", self.appid),
            self.name,
            steamapps.join("common").join(&self.installdir),
        );

        let shadercache = steam_root
            .join("steamapps/shadercache")
            .join(&self.appid);
        if shadercache.is_dir() {
            game.cache_hints.push(shadercache);
        }
        if let Some(played) = self.last_played {
            game.tags.push(format!("last-played:{played}"));
        }
        if let Some(size) = self.size_on_disk {
            game.tags.push(format!("size-on-disk:{size}"));
        }
        game
    }
}

/// Extract every `"path"` value from `libraryfolders.vdf` text.
#[must_use]
pub fn parse_library_folders(text: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for line in text.lines() {
        let tokens = quoted_strings(line);
        if let ["path", value, ..] = tokens.as_slice() {
            paths.push(PathBuf::from(value));
        }
    }
    paths
}

/// Parse one `appmanifest_*.acf` document. Returns `None` when the
/// manifest lacks an appid or a name.
#[must_use]
pub fn parse_app_manifest(text: &str) -> Option<SteamApp> {
    let mut app = SteamApp::default();
    for line in text.lines() {
        let tokens = quoted_strings(line);
        let [key, value, ..] = tokens.as_slice() else {
            continue;
        };
        match *key {
            "appid" => app.appid = (*value).to_string(),
            "name" => app.name = (*value).to_string(),
            "installdir" => app.installdir = (*value).to_string(),
            "SizeOnDisk" => app.size_on_disk = value.parse().ok(),
            "LastPlayed" => app.last_played = value.parse().ok(),
            _ => {}
        }
    }
    (!app.appid.is_empty() && !app.name.is_empty()).then_some(app)
}

fn is_app_manifest(path: &Path) -> bool {
    path.is_file()
        && path.file_name().and_then(|n| n.to_str()).is_some_and(|n| {
            n.starts_with("appmanifest_") && n.ends_with(".acf")
        })
}

fn canonical_dir(path: &Path) -> Option<PathBuf> {
    let canonical = fs::canonicalize(path).ok()?;
    canonical.is_dir().then_some(canonical)
}
