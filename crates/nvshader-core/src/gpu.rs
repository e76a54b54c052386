//! GPU profile detection and architecture classification.
//!
//! Cache artifacts are only portable between GPUs of the same vendor,
//! and for NVIDIA only within one architecture generation. The generation
//! is inferred from PCI device-id ranges; the probe reads sysfs so it
//! works without any driver userspace installed.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// PCI vendor id for NVIDIA Corporation.
pub const NVIDIA_VENDOR_ID: u32 = 0x10de;

/// Architecture label for devices outside every known range.
pub const UNKNOWN_ARCH: &str = "unknown";

/// A coarse description of the GPU a cache was produced on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuProfile {
    pub vendor_id: u32,
    pub device_id: u32,
    pub driver_version: String,
    /// Generation label (`"Ada Lovelace"`, `"Ampere"`, ...).
    pub architecture: String,
    pub vram_mb: u32,
}

impl GpuProfile {
    /// Build a profile from explicit PCI ids.
    ///
    /// Driver version and VRAM are left empty; architecture is derived
    /// from the device id for NVIDIA vendors.
    #[must_use]
    pub fn from_ids(vendor_id: u32, device_id: u32) -> Self {
        let architecture = if vendor_id == NVIDIA_VENDOR_ID {
            architecture_name(device_id).to_string()
        } else {
            UNKNOWN_ARCH.to_string()
        };
        Self {
            vendor_id,
            device_id,
            driver_version: String::new(),
            architecture,
            vram_mb: 0,
        }
    }

    /// Probe the running system for its primary GPU.
    ///
    /// Scans `/sys/class/drm/card*` and prefers the first NVIDIA device;
    /// otherwise the first card found. Returns `None` on hosts without
    /// a DRM device (headless VMs, containers).
    #[must_use]
    pub fn detect() -> Option<Self> {
        Self::detect_in(Path::new("/sys/class/drm"))
    }

    /// Probe a specific sysfs DRM class directory. Split out for tests.
    #[must_use]
    pub fn detect_in(drm_root: &Path) -> Option<Self> {
        let mut first: Option<GpuProfile> = None;

        let read = fs::read_dir(drm_root).ok()?;
        let mut names: Vec<_> = read
            .filter_map(std::result::Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| is_card_name(n))
            .collect();
        names.sort();

        for name in names {
            let device = drm_root.join(&name).join("device");
            let Some(vendor_id) = read_hex_file(&device.join("vendor")) else {
                continue;
            };
            let Some(device_id) = read_hex_file(&device.join("device")) else {
                continue;
            };

            let mut profile = GpuProfile::from_ids(vendor_id, device_id);
            profile.vram_mb = read_vram_mb(&device);
            profile.driver_version = read_driver_version(vendor_id);

            if vendor_id == NVIDIA_VENDOR_ID {
                tracing::debug!(device_id = %format!("{device_id:#06x}"), arch = %profile.architecture, "detected NVIDIA GPU");
                return Some(profile);
            }
            first.get_or_insert(profile);
        }
        first
    }

    /// True for NVIDIA devices.
    #[must_use]
    pub fn is_nvidia(&self) -> bool {
        self.vendor_id == NVIDIA_VENDOR_ID
    }

    /// Whether caches from `other` can be reused on this GPU.
    ///
    /// Vendors must match; NVIDIA additionally requires the same
    /// architecture generation. Device ids are allowed to differ within
    /// one generation.
    #[must_use]
    pub fn is_compatible_with(&self, other: &GpuProfile) -> bool {
        if self.vendor_id != other.vendor_id {
            return false;
        }
        if self.vendor_id == NVIDIA_VENDOR_ID {
            return self.architecture == other.architecture;
        }
        true
    }
}

/// Whether any NVIDIA GPU is present on this host.
#[must_use]
pub fn is_nvidia_gpu() -> bool {
    GpuProfile::detect().is_some_and(|p| p.is_nvidia())
}

/// Map an NVIDIA PCI device id to its architecture generation.
///
/// Ranges cover the discrete GeForce/Quadro lines; ids outside them
/// report [`UNKNOWN_ARCH`].
#[must_use]
pub fn architecture_name(device_id: u32) -> &'static str {
    match device_id {
        0x2b00..=0x2fff => "Blackwell",
        0x2600..=0x2aff => "Ada Lovelace",
        0x2200..=0x25ff => "Ampere",
        0x1e00..=0x21ff => "Turing",
        0x1d80..=0x1dff => "Volta",
        0x1b00..=0x1d7f => "Pascal",
        0x1340..=0x1aff => "Maxwell",
        0x0fc0..=0x133f => "Kepler",
        _ => UNKNOWN_ARCH,
    }
}

// Primary nodes are `cardN`; connectors (`card0-DP-1`) and render nodes
// are skipped.
fn is_card_name(name: &str) -> bool {
    name.strip_prefix("card")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn read_hex_file(path: &Path) -> Option<u32> {
    let text = fs::read_to_string(path).ok()?;
    let trimmed = text.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u32::from_str_radix(hex, 16).ok()
}

fn read_vram_mb(device_dir: &Path) -> u32 {
    fs::read_to_string(device_dir.join("mem_info_vram_total"))
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map_or(0, |bytes| (bytes / (1024 * 1024)) as u32)
}

fn read_driver_version(vendor_id: u32) -> String {
    if vendor_id == NVIDIA_VENDOR_ID {
        if let Some(v) = nvidia_driver_version(Path::new("/proc/driver/nvidia/version")) {
            return v;
        }
    }
    String::new()
}

// First token that looks like a dotted version number after the
// "Kernel Module" marker, e.g. "... Kernel Module  550.120  Fri Sep ...".
fn nvidia_driver_version(proc_path: &Path) -> Option<String> {
    let text = fs::read_to_string(proc_path).ok()?;
    let line = text.lines().find(|l| l.contains("Kernel Module"))?;
    line.split_whitespace()
        .find(|tok| {
            tok.contains('.') && tok.bytes().all(|b| b.is_ascii_digit() || b == b'.')
        })
        .map(str::to_string)
}
