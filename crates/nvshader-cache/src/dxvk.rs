//! DXVK / vkd3d-proton state-cache codec.
//!
//! Both translation layers persist pipeline state in the same flat binary
//! layout:
//!
//! ```text
//! offset 0:   magic[4]       ASCII "DXVK"
//! offset 4:   version        u32 little-endian
//! offset 8:   entry_size     u32 little-endian
//! offset 12:  payload        entry_size * N bytes
//! ```
//!
//! Writes reproduce input byte-for-byte: the header is emitted
//! little-endian verbatim, followed by the unmodified payload.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use nvshader_core::{NvError, Result};

/// The four magic bytes every state-cache file starts with.
pub const DXVK_MAGIC: [u8; 4] = *b"DXVK";

/// Fixed header length in bytes.
pub const HEADER_LEN: u64 = 12;

/// Largest payload [`StateCacheFile::read`] will load into memory.
pub const MAX_PAYLOAD_BYTES: u64 = 1 << 32;

/// Parsed state-cache header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCacheHeader {
    pub version: u32,
    /// Size of one pipeline record; never zero in a valid file.
    pub entry_size: u32,
}

impl StateCacheHeader {
    /// Decode the 12-byte header, validating magic and entry size.
    pub fn parse(bytes: &[u8; 12], path: &Path) -> Result<Self> {
        if bytes[..4] != DXVK_MAGIC {
            return Err(NvError::invalid_cache(path, "bad magic"));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let entry_size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        if entry_size == 0 {
            return Err(NvError::invalid_cache(path, "zero entry size"));
        }
        Ok(Self {
            version,
            entry_size,
        })
    }

    /// Encode the header little-endian.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..4].copy_from_slice(&DXVK_MAGIC);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8..12].copy_from_slice(&self.entry_size.to_le_bytes());
        out
    }
}

/// Validate the header of the file at `path` without loading the
/// payload, returning the header and the record count.
///
/// Fails with [`NvError::InvalidCacheFile`] when the file is shorter
/// than the header, the magic is wrong, the entry size is zero, or the
/// payload is not a whole multiple of the entry size.
pub fn probe(path: &Path) -> Result<(StateCacheHeader, u32)> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len < HEADER_LEN {
        return Err(NvError::invalid_cache(path, "shorter than header"));
    }

    let mut header_bytes = [0u8; 12];
    file.read_exact(&mut header_bytes)?;
    let header = StateCacheHeader::parse(&header_bytes, path)?;

    let payload_len = file_len - HEADER_LEN;
    if payload_len % u64::from(header.entry_size) != 0 {
        return Err(NvError::invalid_cache(
            path,
            "payload is not a multiple of the entry size",
        ));
    }

    let entries = payload_len / u64::from(header.entry_size);
    let entries =
        u32::try_from(entries).map_err(|_| NvError::CacheTooLarge(payload_len))?;
    Ok((header, entries))
}

/// A fully loaded state-cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCacheFile {
    pub header: StateCacheHeader,
    pub payload: Vec<u8>,
}

impl StateCacheFile {
    /// Read and validate the file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let (header, _) = probe(path)?;

        let file_len = std::fs::metadata(path)?.len();
        let payload_len = file_len - HEADER_LEN;
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(NvError::CacheTooLarge(payload_len));
        }

        let mut file = File::open(path)?;
        let mut skip = [0u8; 12];
        file.read_exact(&mut skip)?;
        let mut payload = Vec::with_capacity(payload_len as usize);
        file.read_to_end(&mut payload)?;

        // The file may have grown or shrunk since the probe.
        if payload.len() as u64 % u64::from(header.entry_size) != 0 {
            return Err(NvError::invalid_cache(
                path,
                "payload is not a multiple of the entry size",
            ));
        }

        Ok(Self { header, payload })
    }

    /// Number of pipeline records in the payload.
    #[must_use]
    pub fn entry_count(&self) -> u32 {
        (self.payload.len() / self.header.entry_size as usize) as u32
    }

    /// Write header and payload to `path`, reproducing the source bytes.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(&self.header.to_bytes())?;
        file.write_all(&self.payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_cache(dir: &TempDir, name: &str, version: u32, entry_size: u32, payload: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let header = StateCacheHeader {
            version,
            entry_size,
        };
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(payload);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_probe_valid_file() {
        let dir = TempDir::new().unwrap();
        let path = write_cache(&dir, "elden.dxvk-cache", 8, 64, &[0u8; 64]);

        let (header, entries) = probe(&path).unwrap();
        assert_eq!(header.version, 8);
        assert_eq!(header.entry_size, 64);
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_header_only_file_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = write_cache(&dir, "empty.dxvk-cache", 8, 40, &[]);
        let (_, entries) = probe(&path).unwrap();
        assert_eq!(entries, 0);
    }

    #[test]
    fn test_short_file_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.dxvk-cache");
        fs::write(&path, b"DXVK\x01\x00").unwrap();
        assert!(matches!(
            probe(&path),
            Err(NvError::InvalidCacheFile { .. })
        ));
    }

    #[test]
    fn test_bad_magic_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.dxvk-cache");
        let mut bytes = b"VKDX".to_vec();
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&64u32.to_le_bytes());
        fs::write(&path, bytes).unwrap();
        assert!(probe(&path).is_err());
    }

    #[test]
    fn test_zero_entry_size_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zero.dxvk-cache");
        let mut bytes = DXVK_MAGIC.to_vec();
        bytes.extend_from_slice(&8u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        fs::write(&path, bytes).unwrap();
        assert!(probe(&path).is_err());
    }

    #[test]
    fn test_ragged_payload_is_invalid() {
        let dir = TempDir::new().unwrap();
        // 14 bytes total with entry_size 3: payload of 2 is not a multiple.
        let path = write_cache(&dir, "ragged.dxvk-cache", 8, 3, &[0u8; 2]);
        assert!(probe(&path).is_err());

        // 13 bytes with entry_size 1: payload of 1 divides evenly.
        let path = write_cache(&dir, "fine.dxvk-cache", 8, 1, &[0u8; 1]);
        let (_, entries) = probe(&path).unwrap();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_read_write_roundtrip() {
        let dir = TempDir::new().unwrap();
        let payload: Vec<u8> = (0..128u32).map(|i| (i % 251) as u8).collect();
        let path = write_cache(&dir, "rt.dxvk-cache", 8, 32, &payload);
        let original = fs::read(&path).unwrap();

        let cache = StateCacheFile::read(&path).unwrap();
        assert_eq!(cache.entry_count(), 4);

        let copy = dir.path().join("copy.dxvk-cache");
        cache.write(&copy).unwrap();
        assert_eq!(fs::read(&copy).unwrap(), original);
    }

    #[test]
    fn test_reference_header_bytes() {
        // "DXVK", version 8, entry_size 0x40, one 64-byte record.
        let dir = TempDir::new().unwrap();
        let mut bytes = vec![
            0x44, 0x58, 0x56, 0x4B, 0x08, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00,
        ];
        bytes.extend_from_slice(&[0xAA; 64]);
        let path = dir.path().join("elden.dxvk-cache");
        fs::write(&path, &bytes).unwrap();

        let (header, entries) = probe(&path).unwrap();
        assert_eq!(header.version, 8);
        assert_eq!(header.entry_size, 0x40);
        assert_eq!(entries, 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), 76);
    }
}
