//! Per-root cache walkers.
//!
//! Each resolved root has its own shape: DXVK and vkd3d roots hold flat
//! `.dxvk-cache` files, Fossilize roots mix `.foz` containers with
//! per-app directories, the NVIDIA and Mesa caches are opaque directory
//! trees, and the Steam `shadercache` tree has one directory per appid.
//! Walkers are best-effort: unreadable or malformed artifacts are logged
//! and skipped, never fatal.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use nvshader_core::paths::dir_size;
use nvshader_core::time::modified_nanos;
use nvshader_core::types::game_name_from_filename;
use nvshader_core::{CacheEntry, CacheKind, CachePaths};

use crate::dxvk;

/// Walk every resolved root, appending discovered entries.
pub(crate) fn scan_into(paths: &CachePaths, entries: &mut Vec<CacheEntry>) {
    if let Some(root) = &paths.dxvk {
        scan_state_caches(root, CacheKind::Dxvk, entries);
    }
    if let Some(root) = &paths.vkd3d {
        scan_state_caches(root, CacheKind::Vkd3d, entries);
    }
    if let Some(root) = &paths.fossilize {
        scan_fossilize(root, entries);
    }
    if let Some(root) = &paths.nvidia {
        scan_nvidia(root, entries);
    }
    if let Some(root) = &paths.mesa {
        scan_mesa(root, entries);
    }
    if let Some(root) = &paths.steam_shader {
        // The Steam tree can resolve to the same directory as the
        // Fossilize root; scanning it twice would duplicate paths.
        if paths.fossilize.as_deref() != Some(root) {
            scan_steam_shadercache(root, entries);
        }
    }
}

/// DXVK / vkd3d roots: every regular `.dxvk-cache` file, recursively.
fn scan_state_caches(root: &Path, kind: CacheKind, entries: &mut Vec<CacheEntry>) {
    for walked in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !walked.file_type().is_file() {
            continue;
        }
        let path = walked.path();
        if !has_extension(path, kind.extension()) {
            continue;
        }
        let Ok(meta) = walked.metadata() else { continue };
        if meta.len() == 0 {
            continue;
        }

        let (entry_count, header_ok) = match dxvk::probe(path) {
            Ok((_, count)) => (Some(count), true),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping unparseable state cache");
                (None, false)
            }
        };
        if !header_ok {
            continue;
        }

        let mut entry = CacheEntry::file(path, kind, meta.len(), modified_nanos(&meta));
        entry.entry_count = entry_count;
        entry.game_name = game_name_from_filename(path, kind);
        entries.push(entry);
    }
}

/// Fossilize root: loose `.foz` containers plus per-app directories.
fn scan_fossilize(root: &Path, entries: &mut Vec<CacheEntry>) {
    let Ok(read) = fs::read_dir(root) else { return };
    for dir_entry in read.filter_map(std::result::Result::ok) {
        let path = dir_entry.path();
        let Ok(file_type) = dir_entry.file_type() else {
            continue;
        };

        if file_type.is_file() && has_extension(&path, CacheKind::Fossilize.extension()) {
            let Ok(meta) = dir_entry.metadata() else { continue };
            if meta.len() == 0 {
                continue;
            }
            let mut entry =
                CacheEntry::file(&path, CacheKind::Fossilize, meta.len(), modified_nanos(&meta));
            entry.game_name = game_name_from_filename(&path, CacheKind::Fossilize);
            entries.push(entry);
        } else if file_type.is_dir() {
            let size = dir_size(&path);
            if size == 0 {
                continue;
            }
            let Ok(meta) = dir_entry.metadata() else { continue };
            let mut entry =
                CacheEntry::directory(&path, CacheKind::Fossilize, size, modified_nanos(&meta));
            entry.game_name = Some(format!("Fossilize Cache {}", basename(&path)));
            entries.push(entry);
        }
    }
}

/// NVIDIA compute cache: one entry per populated subdirectory, or a
/// single aggregate entry for the root when the driver keeps everything
/// flat.
fn scan_nvidia(root: &Path, entries: &mut Vec<CacheEntry>) {
    let mut found_subdir = false;

    if let Ok(read) = fs::read_dir(root) {
        for dir_entry in read.filter_map(std::result::Result::ok) {
            let path = dir_entry.path();
            if !dir_entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let size = dir_size(&path);
            if size == 0 {
                continue;
            }
            found_subdir = true;
            let Ok(meta) = dir_entry.metadata() else { continue };
            let mut entry =
                CacheEntry::directory(&path, CacheKind::Nvidia, size, modified_nanos(&meta));
            entry.game_name = Some(format!("Compute Cache {}", basename(&path)));
            entries.push(entry);
        }
    }

    if !found_subdir {
        let size = dir_size(root);
        if size > 0 {
            if let Ok(meta) = fs::metadata(root) {
                let mut entry =
                    CacheEntry::directory(root, CacheKind::Nvidia, size, modified_nanos(&meta));
                entry.game_name = Some("NVIDIA Driver Cache".to_string());
                entries.push(entry);
            }
        }
    }
}

/// Mesa cache: a single aggregate entry for the whole tree.
fn scan_mesa(root: &Path, entries: &mut Vec<CacheEntry>) {
    let size = dir_size(root);
    if size == 0 {
        return;
    }
    let Ok(meta) = fs::metadata(root) else { return };
    let mut entry = CacheEntry::directory(root, CacheKind::Mesa, size, modified_nanos(&meta));
    entry.game_name = Some("Mesa Shader Cache".to_string());
    entries.push(entry);
}

/// Steam `shadercache` tree: one Fossilize entry per populated appid
/// directory.
fn scan_steam_shadercache(root: &Path, entries: &mut Vec<CacheEntry>) {
    let Ok(read) = fs::read_dir(root) else { return };
    for dir_entry in read.filter_map(std::result::Result::ok) {
        let path = dir_entry.path();
        if !dir_entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let size = dir_size(&path);
        if size == 0 {
            continue;
        }
        let Ok(meta) = dir_entry.metadata() else { continue };
        let mut entry =
            CacheEntry::directory(&path, CacheKind::Fossilize, size, modified_nanos(&meta));
        entry.game_name = Some(format!("Steam AppID {}", basename(&path)));
        entries.push(entry);
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(&format!(".{ext}")))
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
}
