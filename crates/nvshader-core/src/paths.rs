//! Cache root discovery.
//!
//! Resolves the well-known shader cache locations of the Linux gaming
//! stack. Each root honors, in order: an explicit override, an environment
//! variable, then a list of default locations probed for existence. A root
//! is reported only when the directory currently exists.

use std::env;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{NvError, Result};

/// Environment variable DXVK uses for its state cache directory.
pub const DXVK_ENV: &str = "DXVK_STATE_CACHE_PATH";
/// Environment variable vkd3d-proton uses for its shader cache directory.
pub const VKD3D_ENV: &str = "VKD3D_SHADER_CACHE_PATH";

/// Explicit root overrides, taking precedence over environment probes.
///
/// `home` substitutes the home directory used for every default path,
/// which keeps resolution testable without touching the real `$HOME`.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub home: Option<PathBuf>,
    pub dxvk: Option<PathBuf>,
    pub vkd3d: Option<PathBuf>,
    pub nvidia: Option<PathBuf>,
    pub mesa: Option<PathBuf>,
    pub fossilize: Option<PathBuf>,
    pub steam_shader: Option<PathBuf>,
}

/// The resolved cache roots for one manager instance.
///
/// All fields are owned paths; `None` means the root does not exist on
/// this host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePaths {
    /// DXVK state cache directory (`*.dxvk-cache` files).
    pub dxvk: Option<PathBuf>,
    /// vkd3d-proton shader cache directory.
    pub vkd3d: Option<PathBuf>,
    /// NVIDIA driver compute cache (`~/.nv/ComputeCache`).
    pub nvidia: Option<PathBuf>,
    /// Mesa shader cache.
    pub mesa: Option<PathBuf>,
    /// Fossilize container location under the Steam data directory.
    pub fossilize: Option<PathBuf>,
    /// Steam `shadercache` tree (per-appid Fossilize directories).
    pub steam_shader: Option<PathBuf>,
}

impl CachePaths {
    /// Resolve all roots from the ambient environment.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with(&PathOverrides::default())
    }

    /// Resolve all roots, honoring explicit overrides first.
    pub fn resolve_with(overrides: &PathOverrides) -> Result<Self> {
        let home = match &overrides.home {
            Some(h) => h.clone(),
            None => dirs::home_dir().ok_or(NvError::NoHomeDir)?,
        };

        // A home override pins the whole layout; ambient XDG variables
        // only apply when resolving against the real home directory.
        let xdg_cache = if overrides.home.is_none() {
            env::var_os("XDG_CACHE_HOME")
                .map(PathBuf::from)
                .filter(|p| p.is_absolute())
                .unwrap_or_else(|| home.join(".cache"))
        } else {
            home.join(".cache")
        };

        let steam_roots = [
            home.join(".local/share/Steam"),
            home.join(".steam/steam"),
            home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"),
        ];

        let paths = Self {
            dxvk: resolve_root(
                overrides.dxvk.as_deref(),
                Some(DXVK_ENV),
                &[home.join(".cache/dxvk")],
            ),
            vkd3d: resolve_root(
                overrides.vkd3d.as_deref(),
                Some(VKD3D_ENV),
                &[home.join(".cache/vkd3d-proton")],
            ),
            nvidia: resolve_root(
                overrides.nvidia.as_deref(),
                None,
                &[home.join(".nv/ComputeCache")],
            ),
            mesa: resolve_root(
                overrides.mesa.as_deref(),
                None,
                &[
                    xdg_cache.join("mesa_shader_cache"),
                    home.join(".cache/mesa_shader_cache"),
                ],
            ),
            fossilize: resolve_root(
                overrides.fossilize.as_deref(),
                None,
                &[
                    home.join(".local/share/Steam/steamapps/shadercache"),
                    home.join(
                        ".var/app/com.valvesoftware.Steam/.local/share/Steam/steamapps/shadercache",
                    ),
                ],
            ),
            steam_shader: resolve_root(
                overrides.steam_shader.as_deref(),
                None,
                &steam_roots.map(|r| r.join("steamapps/shadercache")),
            ),
        };

        tracing::debug!(
            dxvk = paths.dxvk.is_some(),
            vkd3d = paths.vkd3d.is_some(),
            nvidia = paths.nvidia.is_some(),
            mesa = paths.mesa.is_some(),
            fossilize = paths.fossilize.is_some(),
            steam = paths.steam_shader.is_some(),
            "resolved cache roots"
        );
        Ok(paths)
    }

    /// True when no root was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dxvk.is_none()
            && self.vkd3d.is_none()
            && self.nvidia.is_none()
            && self.mesa.is_none()
            && self.fossilize.is_none()
            && self.steam_shader.is_none()
    }
}

fn resolve_root(
    override_path: Option<&Path>,
    env_var: Option<&str>,
    defaults: &[PathBuf],
) -> Option<PathBuf> {
    if let Some(p) = override_path {
        return existing(p.to_path_buf());
    }
    if let Some(var) = env_var {
        if let Some(p) = env::var_os(var).map(PathBuf::from) {
            return existing(p);
        }
    }
    defaults.iter().cloned().find_map(existing)
}

fn existing(p: PathBuf) -> Option<PathBuf> {
    p.is_dir().then_some(p)
}

/// Recursive byte total of the regular files under `path`.
///
/// Symlinks, sockets and other non-regular entries are skipped, as are
/// unreadable subtrees.
#[must_use]
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Recursive count of the regular files under `path`.
#[must_use]
pub fn file_count(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fake_home() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_missing_roots_resolve_to_none() {
        let home = fake_home();
        let paths = CachePaths::resolve_with(&PathOverrides {
            home: Some(home.path().to_path_buf()),
            ..PathOverrides::default()
        })
        .unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn test_default_roots_found_when_present() {
        let home = fake_home();
        fs::create_dir_all(home.path().join(".cache/dxvk")).unwrap();
        fs::create_dir_all(home.path().join(".nv/ComputeCache")).unwrap();
        fs::create_dir_all(home.path().join(".local/share/Steam/steamapps/shadercache")).unwrap();

        let paths = CachePaths::resolve_with(&PathOverrides {
            home: Some(home.path().to_path_buf()),
            ..PathOverrides::default()
        })
        .unwrap();

        assert_eq!(paths.dxvk, Some(home.path().join(".cache/dxvk")));
        assert_eq!(paths.nvidia, Some(home.path().join(".nv/ComputeCache")));
        assert_eq!(
            paths.fossilize,
            Some(home.path().join(".local/share/Steam/steamapps/shadercache"))
        );
        assert_eq!(paths.fossilize, paths.steam_shader);
        assert!(paths.vkd3d.is_none());
    }

    #[test]
    fn test_override_beats_defaults() {
        let home = fake_home();
        fs::create_dir_all(home.path().join(".cache/dxvk")).unwrap();
        let custom = home.path().join("elsewhere");
        fs::create_dir_all(&custom).unwrap();

        let paths = CachePaths::resolve_with(&PathOverrides {
            home: Some(home.path().to_path_buf()),
            dxvk: Some(custom.clone()),
            ..PathOverrides::default()
        })
        .unwrap();
        assert_eq!(paths.dxvk, Some(custom));
    }

    #[test]
    fn test_override_of_missing_dir_is_none() {
        let home = fake_home();
        let paths = CachePaths::resolve_with(&PathOverrides {
            home: Some(home.path().to_path_buf()),
            dxvk: Some(home.path().join("does-not-exist")),
            ..PathOverrides::default()
        })
        .unwrap();
        assert!(paths.dxvk.is_none());
    }

    #[test]
    fn test_dir_size_and_file_count() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), [0u8; 100]).unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b"), [0u8; 50]).unwrap();

        assert_eq!(dir_size(dir.path()), 150);
        assert_eq!(file_count(dir.path()), 2);
    }

    #[test]
    fn test_empty_dir_measures_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(dir_size(dir.path()), 0);
        assert_eq!(file_count(dir.path()), 0);
    }
}
