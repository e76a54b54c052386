//! The cache manager: scanning, statistics, retention and association.
//!
//! A [`CacheManager`] owns the resolved roots and the entry list produced
//! by the latest scan. Retention operations mutate both the list and the
//! on-disk artifacts; there is no journaling, so a failure mid-prune
//! leaves some artifacts removed and the next scan re-establishes truth.

use std::fs;

use nvshader_core::time::{now_nanos, NANOS_PER_DAY};
use nvshader_core::{CacheEntry, CacheKind, CachePaths, CacheStats, Game, Result};

use crate::{dxvk, scanner};

/// Outcome of a [`CacheManager::validate`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Entries examined.
    pub checked: u32,
    /// Entries that no longer meet their format or existence invariants.
    pub invalid: u32,
}

/// Owns a scanned entry set and applies policies to it.
pub struct CacheManager {
    paths: CachePaths,
    entries: Vec<CacheEntry>,
}

impl CacheManager {
    /// Create a manager with roots resolved from the ambient environment.
    pub fn new() -> Result<Self> {
        Ok(Self::with_paths(CachePaths::resolve()?))
    }

    /// Create a manager over explicit roots.
    #[must_use]
    pub fn with_paths(paths: CachePaths) -> Self {
        Self {
            paths,
            entries: Vec::new(),
        }
    }

    /// The resolved cache roots.
    #[must_use]
    pub fn paths(&self) -> &CachePaths {
        &self.paths
    }

    /// The entries produced by the most recent scan.
    #[must_use]
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Walk all roots, replacing the current entry set.
    ///
    /// Prior entries are dropped but the vector's capacity is retained,
    /// so repeated scans do not reallocate. Returns the number of
    /// entries found.
    pub fn scan(&mut self) -> usize {
        self.entries.clear();
        scanner::scan_into(&self.paths, &mut self.entries);
        tracing::info!(count = self.entries.len(), "cache scan complete");
        self.entries.len()
    }

    /// Aggregate statistics over the current entry set.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats::aggregate(&self.entries)
    }

    /// Delete every entry older than `days` days, on disk and from the
    /// entry list. Returns the number removed.
    pub fn clean_older_than(&mut self, days: u64) -> usize {
        let cutoff = now_nanos().saturating_sub(days.saturating_mul(NANOS_PER_DAY));
        let before = self.entries.len();

        let mut kept = Vec::with_capacity(self.entries.capacity());
        for entry in self.entries.drain(..) {
            if entry.modified_ns < cutoff {
                delete_artifact(&entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;

        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::info!(removed, days, "age prune complete");
        }
        removed
    }

    /// Evict oldest entries until the total size fits `max_bytes`.
    /// Returns the number removed.
    ///
    /// Ties on modification time keep the earlier list position, so the
    /// outcome is deterministic for a given entry order.
    pub fn shrink_to_size(&mut self, max_bytes: u64) -> usize {
        let mut total: u64 = self.entries.iter().map(|e| e.size_bytes).sum();
        let mut removed = 0;

        while total > max_bytes {
            let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.modified_ns)
                .map(|(i, _)| i)
            else {
                break;
            };
            let entry = self.entries.remove(oldest);
            delete_artifact(&entry);
            total -= entry.size_bytes;
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, max_bytes, "size shrink complete");
        }
        removed
    }

    /// Delete every entry bound to `game_id`. Returns the number removed.
    pub fn clear_game_cache(&mut self, game_id: &str) -> usize {
        let before = self.entries.len();
        let mut kept = Vec::with_capacity(self.entries.capacity());
        for entry in self.entries.drain(..) {
            if entry.game_id.as_deref() == Some(game_id) {
                delete_artifact(&entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;
        before - self.entries.len()
    }

    /// Re-check every entry against its format invariants without
    /// modifying any state.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for entry in &self.entries {
            report.checked += 1;
            let ok = match entry.kind {
                CacheKind::Dxvk | CacheKind::Vkd3d => dxvk::probe(&entry.path).is_ok(),
                CacheKind::Nvidia | CacheKind::Mesa => entry.path.exists(),
                CacheKind::Fossilize => {
                    if entry.is_directory {
                        entry.path.exists()
                    } else {
                        entry.path.is_file()
                    }
                }
            };
            if !ok {
                tracing::warn!(path = %entry.path.display(), "invalid cache entry");
                report.invalid += 1;
            }
        }
        report
    }

    /// Bind entries to catalog games using the association rules.
    ///
    /// Running this twice against the same catalog is a no-op the second
    /// time: a bound entry re-matches its game by id.
    pub fn associate(&mut self, catalog: &[Game]) {
        for entry in &mut self.entries {
            if let Some(game) = find_match(entry, catalog) {
                entry.bind_game(game);
            }
        }
    }
}

/// Apply the ordered association rules, returning the winning game.
///
/// 1. Exact id equality.
/// 2. Case-insensitive name equality, then substring containment.
/// 3. Best (longest) cache-hint prefix match; the install path counts
///    as a hint.
/// 4. For Steam games, the appid appearing as a full path segment.
pub(crate) fn find_match<'a>(entry: &CacheEntry, catalog: &'a [Game]) -> Option<&'a Game> {
    // Rule 1: id equality.
    if let Some(id) = &entry.game_id {
        if let Some(game) = catalog.iter().find(|g| &g.id == id) {
            return Some(game);
        }
    }

    // Rule 2: name equality, then containment either way.
    if let Some(name) = &entry.game_name {
        let lower = name.to_lowercase();
        if let Some(game) = catalog.iter().find(|g| g.name.to_lowercase() == lower) {
            return Some(game);
        }
        if let Some(game) = catalog.iter().find(|g| {
            let game_lower = g.name.to_lowercase();
            game_lower.contains(&lower) || lower.contains(&game_lower)
        }) {
            return Some(game);
        }
    }

    // Rule 3: highest-scoring hint prefix.
    let mut best: Option<(usize, &Game)> = None;
    for game in catalog {
        for hint in game
            .cache_hints
            .iter()
            .chain(std::iter::once(&game.install_path))
        {
            if hint.as_os_str().is_empty() || !entry.path.starts_with(hint) {
                continue;
            }
            let score = hint.as_os_str().len();
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, game));
            }
        }
    }
    if let Some((_, game)) = best {
        return Some(game);
    }

    // Rule 4: Steam appid as a full path segment.
    let mut best: Option<(usize, &Game)> = None;
    for game in catalog
        .iter()
        .filter(|g| g.source == nvshader_core::GameSource::Steam)
    {
        let appid = game.bare_id();
        if appid.is_empty() {
            continue;
        }
        let segment_match = entry
            .path
            .components()
            .any(|c| c.as_os_str().to_str() == Some(appid));
        if segment_match {
            let score = appid.len();
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, game));
            }
        }
    }
    best.map(|(_, game)| game)
}

fn delete_artifact(entry: &CacheEntry) {
    let result = if entry.is_directory {
        fs::remove_dir_all(&entry.path)
    } else {
        fs::remove_file(&entry.path)
    };
    match result {
        Ok(()) => tracing::debug!(path = %entry.path.display(), "deleted cache artifact"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %entry.path.display(), error = %err, "failed to delete cache artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvshader_core::GameSource;
    use std::path::Path;

    fn entry(path: &str, size: u64, modified: u64) -> CacheEntry {
        CacheEntry::file(path, CacheKind::Dxvk, size, modified)
    }

    #[test]
    fn test_shrink_removes_oldest_first() {
        let mut manager = CacheManager::with_paths(CachePaths::default());
        manager.entries = vec![
            entry("/a", 100, 1),
            entry("/b", 200, 2),
            entry("/c", 300, 3),
        ];

        let removed = manager.shrink_to_size(250);
        assert_eq!(removed, 2);
        assert_eq!(manager.entries.len(), 1);
        assert_eq!(manager.entries[0].path, Path::new("/c"));
        assert!(manager.stats().total_size_bytes <= 250);
    }

    #[test]
    fn test_shrink_tie_break_removes_first_occurrence() {
        let mut manager = CacheManager::with_paths(CachePaths::default());
        manager.entries = vec![entry("/first", 100, 7), entry("/second", 100, 7)];

        let removed = manager.shrink_to_size(150);
        assert_eq!(removed, 1);
        assert_eq!(manager.entries[0].path, Path::new("/second"));
    }

    #[test]
    fn test_shrink_to_zero_empties_the_list() {
        let mut manager = CacheManager::with_paths(CachePaths::default());
        manager.entries = vec![entry("/a", 1, 1), entry("/b", 2, 2)];
        assert_eq!(manager.shrink_to_size(0), 2);
        assert!(manager.entries.is_empty());
    }

    #[test]
    fn test_clean_older_than_zero_removes_everything() {
        let mut manager = CacheManager::with_paths(CachePaths::default());
        manager.entries = vec![entry("/a", 1, 1), entry("/b", 2, now_nanos() - 1)];
        assert_eq!(manager.clean_older_than(0), 2);
        assert!(manager.entries.is_empty());
    }

    #[test]
    fn test_clean_keeps_recent_entries() {
        let mut manager = CacheManager::with_paths(CachePaths::default());
        let fresh = now_nanos();
        let stale = fresh.saturating_sub(10 * NANOS_PER_DAY);
        manager.entries = vec![entry("/old", 1, stale), entry("/new", 2, fresh)];

        assert_eq!(manager.clean_older_than(7), 1);
        assert_eq!(manager.entries.len(), 1);
        assert_eq!(manager.entries[0].path, Path::new("/new"));
    }

    #[test]
    fn test_association_by_id() {
        let catalog = vec![Game::new(GameSource::Steam, "steam:570", "Dota 2", "/g/dota2")];
        let mut e = entry("/x", 1, 1);
        e.game_id = Some("steam:570".into());
        assert_eq!(find_match(&e, &catalog).unwrap().id, "steam:570");
    }

    #[test]
    fn test_association_by_name_priority() {
        let catalog = vec![
            Game::new(GameSource::Lutris, "lutris:elden-ring", "ELDEN RING", "/g/er"),
            Game::new(GameSource::Lutris, "lutris:elden", "elden", "/g/e"),
        ];
        // Exact (case-insensitive) equality beats containment even when
        // the containment candidate appears earlier.
        let mut e = entry("/x/elden.dxvk-cache", 1, 1);
        e.game_name = Some("elden".into());
        assert_eq!(find_match(&e, &catalog).unwrap().id, "lutris:elden");
    }

    #[test]
    fn test_association_by_containment() {
        let catalog = vec![Game::new(
            GameSource::Lutris,
            "lutris:the-witcher-3",
            "The Witcher 3: Wild Hunt",
            "/g/w3",
        )];
        let mut e = entry("/x/witcher 3.dxvk-cache", 1, 1);
        e.game_name = Some("Witcher 3".into());
        assert_eq!(find_match(&e, &catalog).unwrap().id, "lutris:the-witcher-3");
    }

    #[test]
    fn test_association_by_hint_prefix() {
        let mut game_a = Game::new(GameSource::Manual, "manual:a", "A", "/games/a");
        game_a.cache_hints.push("/caches/shared".into());
        let mut game_b = Game::new(GameSource::Manual, "manual:b", "B", "/games/b");
        game_b.cache_hints.push("/caches/shared/deeper".into());

        // The longer hint wins.
        let e = entry("/caches/shared/deeper/file.dxvk-cache", 1, 1);
        assert_eq!(find_match(&e, &[game_a.clone(), game_b.clone()]).unwrap().id, "manual:b");

        // Prefix must end on a path boundary: `/caches/shared-x` does
        // not match the `/caches/shared` hint.
        let e = entry("/caches/shared-x/file.dxvk-cache", 1, 1);
        assert!(find_match(&e, &[game_a, game_b]).is_none());
    }

    #[test]
    fn test_association_by_steam_appid_segment() {
        let catalog = vec![Game::new(GameSource::Steam, "steam:570", "Dota 2", "/g/dota2")];
        let e = entry(
            "/home/u/.steam/steam/steamapps/shadercache/570/fozpipelinesv6",
            1,
            1,
        );
        let game = find_match(&e, &catalog).unwrap();
        assert_eq!(game.id, "steam:570");

        // The appid appearing as a substring of a segment is not a match.
        let e = entry("/home/u/shadercache/5700/foz", 1, 1);
        assert!(find_match(&e, &catalog).is_none());
    }

    #[test]
    fn test_association_is_idempotent() {
        let catalog = vec![Game::new(GameSource::Steam, "steam:570", "Dota 2", "/g/dota2")];
        let mut manager = CacheManager::with_paths(CachePaths::default());
        let mut e = CacheEntry::directory(
            "/home/u/.steam/steam/steamapps/shadercache/570",
            CacheKind::Fossilize,
            10,
            1,
        );
        e.game_name = None;
        manager.entries = vec![e];

        manager.associate(&catalog);
        let first = manager.entries.clone();
        manager.associate(&catalog);
        assert_eq!(manager.entries, first);

        assert_eq!(manager.entries[0].game_id.as_deref(), Some("steam:570"));
        assert_eq!(manager.entries[0].game_name.as_deref(), Some("Dota 2"));
        assert_eq!(manager.entries[0].game_source, Some(GameSource::Steam));
    }

    #[test]
    fn test_stats_count_games_after_association() {
        let catalog = vec![Game::new(GameSource::Steam, "steam:570", "Dota 2", "/g/dota2")];
        let mut manager = CacheManager::with_paths(CachePaths::default());
        manager.entries = vec![
            CacheEntry::directory("/x/shadercache/570", CacheKind::Fossilize, 10, 1),
            entry("/y/unrelated.dxvk-cache", 5, 2),
        ];
        manager.associate(&catalog);

        let stats = manager.stats();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.game_count, 1);
        assert_eq!(stats.total_size_bytes, 15);
    }
}
