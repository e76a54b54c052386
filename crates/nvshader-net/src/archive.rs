//! Portable cache bundles.
//!
//! A bundle is a plain directory: `manifest.json` describing the
//! exported entries plus a `cache/` subtree holding one stored file or
//! directory per entry, named `<index>_<basename>` in list order. The
//! manifest is written last via temp file + rename, so a bundle with a
//! manifest is always complete.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nvshader_core::paths::dir_size;
use nvshader_core::time::now_nanos;
use nvshader_core::{CacheEntry, NvError, Result};

/// Manifest versions this build can restore.
pub const MANIFEST_VERSION: u64 = 1;

/// Manifest file name inside a bundle.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Subdirectory holding the stored artifacts.
pub const CACHE_SUBDIR: &str = "cache";

/// Copy chunk size for file payloads.
const CHUNK_SIZE: usize = 64 * 1024;

/// One exported artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Cache kind short name.
    pub cache_type: String,
    /// Absolute path the artifact was exported from.
    pub original_path: PathBuf,
    /// Name under `cache/`: `<index>_<basename>`.
    pub stored_path: String,
    pub is_directory: bool,
    /// Size measured at export time.
    pub size_bytes: u64,
}

/// The bundle manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub version: u64,
    /// Export time, seconds since the Unix epoch.
    pub created_at: u64,
    /// Optional label for the game this bundle belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    pub entries: Vec<ArchiveEntry>,
}

/// Export `entries` into a bundle directory at `dest`.
///
/// A single entry failing to copy is logged and left out of the
/// manifest; the rest of the bundle is still produced.
pub fn export_bundle(
    dest: &Path,
    entries: &[CacheEntry],
    game: Option<&str>,
) -> Result<ArchiveManifest> {
    let cache_dir = dest.join(CACHE_SUBDIR);
    fs::create_dir_all(&cache_dir)?;

    let mut manifest = ArchiveManifest {
        version: MANIFEST_VERSION,
        created_at: now_nanos() / 1_000_000_000,
        game: game.map(str::to_string),
        entries: Vec::with_capacity(entries.len()),
    };

    for (index, entry) in entries.iter().enumerate() {
        let stored_path = stored_name(index, &entry.path);
        let target = cache_dir.join(&stored_path);

        let copied = if entry.is_directory {
            copy_dir(&entry.path, &target).map(|()| dir_size(&target))
        } else {
            copy_file(&entry.path, &target)
        };

        match copied {
            Ok(size_bytes) => manifest.entries.push(ArchiveEntry {
                cache_type: entry.kind.short_name().to_string(),
                original_path: entry.path.clone(),
                stored_path,
                is_directory: entry.is_directory,
                size_bytes,
            }),
            Err(err) => {
                tracing::warn!(path = %entry.path.display(), error = %err, "entry skipped during export");
            }
        }
    }

    write_manifest(dest, &manifest)?;
    tracing::info!(bundle = %dest.display(), entries = manifest.entries.len(), "bundle exported");
    Ok(manifest)
}

/// Read and validate a bundle's manifest.
///
/// The version gate runs before full decoding so an unsupported bundle
/// reports [`NvError::UnsupportedManifest`] rather than a shape error.
pub fn read_manifest(bundle: &Path) -> Result<ArchiveManifest> {
    let path = bundle.join(MANIFEST_NAME);
    let text = fs::read_to_string(&path)?;

    let value: Value = serde_json::from_str(&text)
        .map_err(|err| NvError::InvalidManifest(err.to_string()))?;
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| NvError::InvalidManifest("missing version".to_string()))?;
    if version != MANIFEST_VERSION {
        return Err(NvError::UnsupportedManifest(version));
    }

    serde_json::from_value(value).map_err(|err| NvError::InvalidManifest(err.to_string()))
}

/// Restore every entry of the bundle at `bundle`.
///
/// Entries are restored to their `original_path`, or rebased to
/// `<override_dir>/<basename>` when an override is given. Returns the
/// restored paths.
pub fn import_bundle(bundle: &Path, override_dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let manifest = read_manifest(bundle)?;
    let cache_dir = bundle.join(CACHE_SUBDIR);

    let mut restored = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        let source = cache_dir.join(&entry.stored_path);
        let target = match override_dir {
            Some(dir) => {
                let basename = entry
                    .original_path
                    .file_name()
                    .ok_or_else(|| {
                        NvError::InvalidManifest(format!(
                            "entry has no basename: {}",
                            entry.original_path.display()
                        ))
                    })?;
                dir.join(basename)
            }
            None => entry.original_path.clone(),
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if entry.is_directory {
            copy_dir(&source, &target)?;
        } else {
            copy_file(&source, &target)?;
        }
        restored.push(target);
    }

    tracing::info!(bundle = %bundle.display(), restored = restored.len(), "bundle imported");
    Ok(restored)
}

pub(crate) fn stored_name(index: usize, path: &Path) -> String {
    let basename = path
        .file_name()
        .map_or_else(|| "entry".to_string(), |n| n.to_string_lossy().into_owned());
    format!("{index}_{basename}")
}

/// Copy a file in 64 KiB chunks, returning the bytes copied.
pub(crate) fn copy_file(source: &Path, target: &Path) -> std::io::Result<u64> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(target)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

/// Recursively copy a directory tree. Non-regular entries are skipped.
pub(crate) fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::create_dir_all(target)?;
    for dir_entry in fs::read_dir(source)? {
        let dir_entry = dir_entry?;
        let file_type = dir_entry.file_type()?;
        let from = dir_entry.path();
        let to = target.join(dir_entry.file_name());
        if file_type.is_dir() {
            copy_dir(&from, &to)?;
        } else if file_type.is_file() {
            copy_file(&from, &to)?;
        }
    }
    Ok(())
}

pub(crate) fn write_manifest<M: Serialize>(dest: &Path, manifest: &M) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|err| NvError::InvalidManifest(err.to_string()))?;
    let path = dest.join(MANIFEST_NAME);
    let tmp = dest.join(format!("{MANIFEST_NAME}.tmp"));
    fs::write(&tmp, json)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvshader_core::CacheKind;
    use tempfile::TempDir;

    fn file_entry(path: &Path, kind: CacheKind) -> CacheEntry {
        let size = fs::metadata(path).unwrap().len();
        CacheEntry::file(path, kind, size, 1)
    }

    #[test]
    fn test_stored_name() {
        assert_eq!(stored_name(0, Path::new("/a/elden.dxvk-cache")), "0_elden.dxvk-cache");
        assert_eq!(stored_name(3, Path::new("/a/570")), "3_570");
    }

    #[test]
    fn test_export_import_roundtrip() {
        let src = TempDir::new().unwrap();
        let bundle = TempDir::new().unwrap();
        let restore = TempDir::new().unwrap();

        let file_a = src.path().join("elden.dxvk-cache");
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        fs::write(&file_a, &payload).unwrap();

        let dir_b = src.path().join("570");
        fs::create_dir_all(dir_b.join("nested")).unwrap();
        fs::write(dir_b.join("fozpipelinesv6"), [7u8; 1000]).unwrap();
        fs::write(dir_b.join("nested/deep"), [9u8; 50]).unwrap();

        let entries = vec![
            file_entry(&file_a, CacheKind::Dxvk),
            CacheEntry::directory(&dir_b, CacheKind::Fossilize, dir_size(&dir_b), 2),
        ];

        let manifest = export_bundle(bundle.path(), &entries, Some("Elden Ring")).unwrap();
        assert_eq!(manifest.version, MANIFEST_VERSION);
        assert_eq!(manifest.game.as_deref(), Some("Elden Ring"));
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[0].stored_path, "0_elden.dxvk-cache");
        assert_eq!(manifest.entries[1].stored_path, "1_570");

        // Manifest sizes match a re-measure of the stored artifacts.
        let stored_file = bundle.path().join("cache/0_elden.dxvk-cache");
        assert_eq!(
            manifest.entries[0].size_bytes,
            fs::metadata(&stored_file).unwrap().len()
        );
        let stored_dir = bundle.path().join("cache/1_570");
        assert_eq!(manifest.entries[1].size_bytes, dir_size(&stored_dir));

        // Import rebased into a fresh directory restores identical bytes.
        let restored = import_bundle(bundle.path(), Some(restore.path())).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(
            fs::read(restore.path().join("elden.dxvk-cache")).unwrap(),
            payload
        );
        assert_eq!(
            fs::read(restore.path().join("570/nested/deep")).unwrap(),
            vec![9u8; 50]
        );
    }

    #[test]
    fn test_import_to_original_paths() {
        let src = TempDir::new().unwrap();
        let bundle = TempDir::new().unwrap();

        let file_a = src.path().join("game.dxvk-cache");
        fs::write(&file_a, b"cache-bytes").unwrap();
        let entries = vec![file_entry(&file_a, CacheKind::Dxvk)];
        export_bundle(bundle.path(), &entries, None).unwrap();

        // Delete the original, then restore without an override.
        fs::remove_file(&file_a).unwrap();
        let restored = import_bundle(bundle.path(), None).unwrap();
        assert_eq!(restored, vec![file_a.clone()]);
        assert_eq!(fs::read(&file_a).unwrap(), b"cache-bytes");
    }

    #[test]
    fn test_unsupported_version_is_rejected_before_restore() {
        let bundle = TempDir::new().unwrap();
        let restore = TempDir::new().unwrap();
        fs::write(
            bundle.path().join(MANIFEST_NAME),
            r#"{"version": 2, "created_at": 0, "entries": []}"#,
        )
        .unwrap();

        let err = import_bundle(bundle.path(), Some(restore.path())).unwrap_err();
        assert!(matches!(err, NvError::UnsupportedManifest(2)));
        // Nothing was written.
        assert_eq!(fs::read_dir(restore.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_version_is_invalid() {
        let bundle = TempDir::new().unwrap();
        fs::write(bundle.path().join(MANIFEST_NAME), r#"{"entries": []}"#).unwrap();
        assert!(matches!(
            read_manifest(bundle.path()),
            Err(NvError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_unreadable_entry_is_skipped() {
        let bundle = TempDir::new().unwrap();
        let entries = vec![CacheEntry::file(
            "/does/not/exist.dxvk-cache",
            CacheKind::Dxvk,
            10,
            1,
        )];
        let manifest = export_bundle(bundle.path(), &entries, None).unwrap();
        assert!(manifest.entries.is_empty());
        // The bundle itself is still valid.
        assert!(read_manifest(bundle.path()).is_ok());
    }
}
