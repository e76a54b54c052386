//! `.nvcache` packages.
//!
//! A package is the shareable flavor of a bundle: same directory shape
//! (`manifest.json` + `cache/`), but the manifest carries the producing
//! GPU's identity and each entry uses a short-name `type` key. Importing
//! onto an incompatible GPU warns and proceeds; the caches are harmless
//! but useless there.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use nvshader_core::paths::dir_size;
use nvshader_core::time::now_nanos;
use nvshader_core::{CacheEntry, GpuProfile, NvError, Result};

use crate::archive::{copy_dir, copy_file, stored_name, write_manifest, CACHE_SUBDIR, MANIFEST_NAME};

/// Package manifest version.
pub const PACKAGE_VERSION: u64 = 1;

/// Canonical extension for package directories.
pub const PACKAGE_EXTENSION: &str = "nvcache";

/// GPU identity recorded in a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuMetadata {
    pub vendor_id: u32,
    pub device_id: u32,
    pub driver_version: String,
    pub architecture: String,
}

impl From<&GpuProfile> for GpuMetadata {
    fn from(profile: &GpuProfile) -> Self {
        Self {
            vendor_id: profile.vendor_id,
            device_id: profile.device_id,
            driver_version: profile.driver_version.clone(),
            architecture: profile.architecture.clone(),
        }
    }
}

impl GpuMetadata {
    /// Reconstruct a profile for compatibility checks.
    #[must_use]
    pub fn to_profile(&self) -> GpuProfile {
        let mut profile = GpuProfile::from_ids(self.vendor_id, self.device_id);
        profile.driver_version = self.driver_version.clone();
        profile.architecture = self.architecture.clone();
        profile
    }
}

/// One packaged artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Cache kind short name.
    #[serde(rename = "type")]
    pub kind: String,
    pub original_path: PathBuf,
    pub stored_path: String,
    pub is_directory: bool,
    pub size_bytes: u64,
}

/// The package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub version: u64,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<String>,
    pub gpu: GpuMetadata,
    pub entries: Vec<PackageEntry>,
}

/// Result of a package import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub restored: Vec<PathBuf>,
    /// Whether the package's GPU is compatible with the local one. An
    /// incompatible import still restores; this flag lets callers warn.
    pub gpu_compatible: bool,
}

/// Write a package directory at `dest` from `entries`, stamping `gpu`.
pub fn write_package(
    dest: &Path,
    entries: &[CacheEntry],
    gpu: &GpuProfile,
    game: Option<&str>,
) -> Result<PackageManifest> {
    let cache_dir = dest.join(CACHE_SUBDIR);
    fs::create_dir_all(&cache_dir)?;

    let mut manifest = PackageManifest {
        version: PACKAGE_VERSION,
        created_at: now_nanos() / 1_000_000_000,
        game: game.map(str::to_string),
        gpu: GpuMetadata::from(gpu),
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
            Ok(size_bytes) => manifest.entries.push(PackageEntry {
                kind: entry.kind.short_name().to_string(),
                original_path: entry.path.clone(),
                stored_path,
                is_directory: entry.is_directory,
                size_bytes,
            }),
            Err(err) => {
                tracing::warn!(path = %entry.path.display(), error = %err, "entry skipped during packaging");
            }
        }
    }

    write_manifest(dest, &manifest)?;
    tracing::info!(package = %dest.display(), entries = manifest.entries.len(), "package written");
    Ok(manifest)
}

/// Read and validate a package manifest.
pub fn read_package_manifest(package: &Path) -> Result<PackageManifest> {
    let text = fs::read_to_string(package.join(MANIFEST_NAME))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|err| NvError::InvalidPackage(err.to_string()))?;

    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| NvError::InvalidPackage("missing version".to_string()))?;
    if version != PACKAGE_VERSION {
        return Err(NvError::UnsupportedManifest(version));
    }
    if !value.get("entries").is_some_and(Value::is_array) {
        return Err(NvError::InvalidPackage("missing entries array".to_string()));
    }

    serde_json::from_value(value).map_err(|err| NvError::InvalidPackage(err.to_string()))
}

/// Restore a package, checking GPU compatibility against `local_gpu`.
///
/// Incompatibility is a warning, not an error: restoration proceeds and
/// the report carries the verdict.
pub fn import_package(
    package: &Path,
    local_gpu: &GpuProfile,
    override_dir: Option<&Path>,
) -> Result<ImportReport> {
    let manifest = read_package_manifest(package)?;

    let remote = manifest.gpu.to_profile();
    let gpu_compatible = local_gpu.is_compatible_with(&remote);
    if !gpu_compatible {
        tracing::warn!(
            package_arch = %manifest.gpu.architecture,
            local_arch = %local_gpu.architecture,
            "package was produced on an incompatible GPU"
        );
    }

    let cache_dir = package.join(CACHE_SUBDIR);
    let mut restored = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        let source = cache_dir.join(&entry.stored_path);
        let target = match override_dir {
            Some(dir) => {
                let basename = entry.original_path.file_name().ok_or_else(|| {
                    NvError::InvalidPackage(format!(
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

    Ok(ImportReport {
        restored,
        gpu_compatible,
    })
}
