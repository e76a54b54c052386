//! Common types for nvshader.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The cache formats nvshader knows how to discover and manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// DXVK DirectX 9/10/11 state cache (flat binary file)
    Dxvk,
    /// vkd3d-proton DirectX 12 shader cache (same layout as DXVK)
    Vkd3d,
    /// NVIDIA driver compute/shader cache (directory tree)
    Nvidia,
    /// Mesa on-disk shader cache (directory tree)
    Mesa,
    /// Fossilize Vulkan pipeline container (`.foz` file or Steam directory)
    Fossilize,
}

impl CacheKind {
    /// All kinds, in stable order.
    pub const ALL: [CacheKind; 5] = [
        CacheKind::Dxvk,
        CacheKind::Vkd3d,
        CacheKind::Nvidia,
        CacheKind::Mesa,
        CacheKind::Fossilize,
    ];

    /// Human-readable name.
    #[must_use]
    pub const fn long_name(self) -> &'static str {
        match self {
            Self::Dxvk => "DXVK State Cache",
            Self::Vkd3d => "vkd3d-proton Shader Cache",
            Self::Nvidia => "NVIDIA Compute Cache",
            Self::Mesa => "Mesa Shader Cache",
            Self::Fossilize => "Fossilize Pipeline Cache",
        }
    }

    /// Short identifier used in manifests and wire payloads.
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::Dxvk => "dxvk",
            Self::Vkd3d => "vkd3d",
            Self::Nvidia => "nvidia",
            Self::Mesa => "mesa",
            Self::Fossilize => "fossilize",
        }
    }

    /// Canonical file extension, empty for directory-based kinds.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Dxvk | Self::Vkd3d => "dxvk-cache",
            Self::Fossilize => "foz",
            Self::Nvidia | Self::Mesa => "",
        }
    }

    /// Parse a short identifier back into a kind.
    #[must_use]
    pub fn from_short_name(s: &str) -> Option<Self> {
        match s {
            "dxvk" => Some(Self::Dxvk),
            "vkd3d" => Some(Self::Vkd3d),
            "nvidia" => Some(Self::Nvidia),
            "mesa" => Some(Self::Mesa),
            "fossilize" => Some(Self::Fossilize),
            _ => None,
        }
    }
}

/// Which installer a game record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameSource {
    Steam,
    Lutris,
    Heroic,
    Manual,
}

/// One installed game, as reported by a catalog detector.
///
/// `id` is unique per catalog and carries a source prefix
/// (`steam:<appid>`, `lutris:<slug>`, `heroic-<flavor>:<appname>`,
/// `manual:<basename>`). No cross-source deduplication is performed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub source: GameSource,
    pub id: String,
    pub name: String,
    pub install_path: PathBuf,
    /// Filesystem paths that bind cache entries to this game when they
    /// prefix an entry's path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_hints: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Game {
    /// Create a game record with no hints or tags.
    #[must_use]
    pub fn new(
        source: GameSource,
        id: impl Into<String>,
        name: impl Into<String>,
        install_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            id: id.into(),
            name: name.into(),
            install_path: install_path.into(),
            cache_hints: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// The id with its source prefix stripped (`steam:570` -> `570`).
    #[must_use]
    pub fn bare_id(&self) -> &str {
        self.id.split_once(':').map_or(self.id.as_str(), |(_, v)| v)
    }
}

/// One discoverable cache artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Absolute filesystem location.
    pub path: PathBuf,
    pub kind: CacheKind,
    /// For directories, the recursive total of contained regular files.
    pub size_bytes: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_source: Option<GameSource>,
    /// Number of shader records parsed from a typed file kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<u32>,
    pub is_directory: bool,
}

impl CacheEntry {
    /// Create a file-backed entry with no game binding yet.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>, kind: CacheKind, size_bytes: u64, modified_ns: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            size_bytes,
            modified_ns,
            game_name: None,
            game_id: None,
            game_source: None,
            entry_count: None,
            is_directory: false,
        }
    }

    /// Create a directory-backed entry with no game binding yet.
    #[must_use]
    pub fn directory(
        path: impl Into<PathBuf>,
        kind: CacheKind,
        size_bytes: u64,
        modified_ns: u64,
    ) -> Self {
        Self {
            is_directory: true,
            ..Self::file(path, kind, size_bytes, modified_ns)
        }
    }

    /// Bind this entry to a game from the catalog.
    pub fn bind_game(&mut self, game: &Game) {
        self.game_name = Some(game.name.clone());
        self.game_id = Some(game.id.clone());
        self.game_source = Some(game.source);
    }

    /// The file name portion of the entry path.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.path
            .file_name()
            .map_or("", |n| n.to_str().unwrap_or(""))
    }
}

/// Aggregate of a scanned entry set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_size_bytes: u64,
    /// Number of cache entries (files and directories).
    pub file_count: u32,
    /// Number of entries bound to a game.
    pub game_count: u32,
    pub dxvk_bytes: u64,
    pub vkd3d_bytes: u64,
    pub nvidia_bytes: u64,
    pub mesa_bytes: u64,
    pub fossilize_bytes: u64,
    /// Modification time of the oldest entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_ns: Option<u64>,
    /// Modification time of the newest entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_ns: Option<u64>,
}

impl CacheStats {
    /// Byte total for one kind.
    #[must_use]
    pub const fn kind_bytes(&self, kind: CacheKind) -> u64 {
        match kind {
            CacheKind::Dxvk => self.dxvk_bytes,
            CacheKind::Vkd3d => self.vkd3d_bytes,
            CacheKind::Nvidia => self.nvidia_bytes,
            CacheKind::Mesa => self.mesa_bytes,
            CacheKind::Fossilize => self.fossilize_bytes,
        }
    }

    pub(crate) fn add_kind_bytes(&mut self, kind: CacheKind, bytes: u64) {
        match kind {
            CacheKind::Dxvk => self.dxvk_bytes += bytes,
            CacheKind::Vkd3d => self.vkd3d_bytes += bytes,
            CacheKind::Nvidia => self.nvidia_bytes += bytes,
            CacheKind::Mesa => self.mesa_bytes += bytes,
            CacheKind::Fossilize => self.fossilize_bytes += bytes,
        }
    }

    /// Age of the oldest entry in whole days relative to `now_ns`.
    #[must_use]
    pub fn oldest_age_days(&self, now_ns: u64) -> Option<u64> {
        self.oldest_ns
            .map(|t| now_ns.saturating_sub(t) / crate::time::NANOS_PER_DAY)
    }

    /// Age of the newest entry in whole days relative to `now_ns`.
    #[must_use]
    pub fn newest_age_days(&self, now_ns: u64) -> Option<u64> {
        self.newest_ns
            .map(|t| now_ns.saturating_sub(t) / crate::time::NANOS_PER_DAY)
    }

    /// Aggregate a set of entries in one pass.
    #[must_use]
    pub fn aggregate(entries: &[CacheEntry]) -> Self {
        let mut stats = Self::default();
        for entry in entries {
            stats.total_size_bytes += entry.size_bytes;
            stats.file_count += 1;
            if entry.game_name.is_some() {
                stats.game_count += 1;
            }
            stats.add_kind_bytes(entry.kind, entry.size_bytes);
            stats.oldest_ns = Some(match stats.oldest_ns {
                Some(t) => t.min(entry.modified_ns),
                None => entry.modified_ns,
            });
            stats.newest_ns = Some(match stats.newest_ns {
                Some(t) => t.max(entry.modified_ns),
                None => entry.modified_ns,
            });
        }
        stats
    }
}

/// Strip a kind's canonical extension from a file name, yielding the
/// game-name guess a scan records for typed file entries.
#[must_use]
pub fn game_name_from_filename(path: &Path, kind: CacheKind) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let ext = kind.extension();
    if ext.is_empty() {
        return Some(name.to_string());
    }
    let suffix = format!(".{ext}");
    name.strip_suffix(&suffix).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(CacheKind::Dxvk.short_name(), "dxvk");
        assert_eq!(CacheKind::Vkd3d.extension(), "dxvk-cache");
        assert_eq!(CacheKind::Mesa.extension(), "");
        assert_eq!(CacheKind::from_short_name("fossilize"), Some(CacheKind::Fossilize));
        assert_eq!(CacheKind::from_short_name("opengl"), None);
    }

    #[test]
    fn test_bare_id() {
        let game = Game::new(GameSource::Steam, "steam:1086940", "Baldur's Gate 3", "/g");
        assert_eq!(game.bare_id(), "1086940");
    }

    #[test]
    fn test_game_name_from_filename() {
        let name = game_name_from_filename(Path::new("/c/elden.dxvk-cache"), CacheKind::Dxvk);
        assert_eq!(name.as_deref(), Some("elden"));

        let name = game_name_from_filename(Path::new("/c/steamapp.foz"), CacheKind::Fossilize);
        assert_eq!(name.as_deref(), Some("steamapp"));
    }

    #[test]
    fn test_stats_aggregate() {
        let mut a = CacheEntry::file("/a", CacheKind::Dxvk, 100, 5);
        a.game_name = Some("A".into());
        let b = CacheEntry::file("/b", CacheKind::Vkd3d, 200, 9);
        let c = CacheEntry::directory("/c", CacheKind::Mesa, 300, 1);

        let stats = CacheStats::aggregate(&[a, b, c]);
        assert_eq!(stats.total_size_bytes, 600);
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.game_count, 1);
        assert_eq!(stats.dxvk_bytes, 100);
        assert_eq!(stats.vkd3d_bytes, 200);
        assert_eq!(stats.mesa_bytes, 300);
        assert_eq!(stats.kind_bytes(CacheKind::Nvidia), 0);
        assert_eq!(stats.oldest_ns, Some(1));
        assert_eq!(stats.newest_ns, Some(9));
    }

    #[test]
    fn test_stats_age_days() {
        let now = 10 * crate::time::NANOS_PER_DAY;
        let entries = vec![
            CacheEntry::file("/a", CacheKind::Dxvk, 1, 2 * crate::time::NANOS_PER_DAY),
            CacheEntry::file("/b", CacheKind::Dxvk, 1, 9 * crate::time::NANOS_PER_DAY),
        ];
        let stats = CacheStats::aggregate(&entries);
        assert_eq!(stats.oldest_age_days(now), Some(8));
        assert_eq!(stats.newest_age_days(now), Some(1));
        assert_eq!(CacheStats::default().oldest_age_days(now), None);
    }

    #[test]
    fn test_per_kind_sizes_sum_to_total() {
        let entries = vec![
            CacheEntry::file("/a", CacheKind::Dxvk, 11, 1),
            CacheEntry::file("/b", CacheKind::Fossilize, 22, 2),
            CacheEntry::directory("/c", CacheKind::Nvidia, 33, 3),
        ];
        let stats = CacheStats::aggregate(&entries);
        let per_kind: u64 = CacheKind::ALL.iter().map(|k| stats.kind_bytes(*k)).sum();
        assert_eq!(per_kind, stats.total_size_bytes);
    }
}
