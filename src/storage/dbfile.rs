//! Container file
//!
//! A mutable key→value map backed by one file. The whole map is loaded on
//! open, mutated in memory and written back atomically (temp file + rename)
//! when dirty.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "LDBM" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   ... repeated for each entry, in key order ...         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (8 bytes)                                        │
//! │   DataCRC: u32 (4) | Padding (4)                        │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::{LdbmError, Result};

use super::OpenMode;

/// Magic bytes identifying an ldbm container file
pub(crate) const MAGIC: &[u8; 4] = b"LDBM";

/// Current container format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + EntryCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: usize = 14;

/// Footer size: DataCRC (4) + Padding (4) = 8 bytes
pub(crate) const FOOTER_SIZE: usize = 8;

/// An open container
///
/// ## Concurrency:
/// - `data`: RwLock, many concurrent readers
/// - `write_lock`: serializes multi-key IDL updates on this container
/// - `dirty`: set on every mutation, cleared by `sync`
pub struct DbFile {
    name: String,
    path: PathBuf,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    dirty: AtomicBool,
    writable: AtomicBool,
    write_lock: Mutex<()>,
}

impl DbFile {
    /// Open a container file
    ///
    /// A missing file opened as a writer is created; opened as a reader it
    /// yields an empty, unpersisted container.
    pub fn open(path: &Path, name: &str, mode: OpenMode) -> Result<Self> {
        let data = if path.exists() {
            Self::load(path)?
        } else {
            BTreeMap::new()
        };

        let db = Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
            writable: AtomicBool::new(mode == OpenMode::Writer),
            write_lock: Mutex::new(()),
        };

        if mode == OpenMode::Writer && !path.exists() {
            db.write_file()?;
        }

        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Access
    // =========================================================================

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.data.write().insert(key.to_vec(), value.to_vec());
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Remove a key; returns whether it existed
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.check_writable()?;
        let existed = self.data.write().remove(key).is_some();
        if existed {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(existed)
    }

    /// All keys starting with `prefix`, in order
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Greatest key, if any
    pub fn last_key(&self) -> Option<Vec<u8>> {
        self.data.read().keys().next_back().cloned()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Serialize IDL mutations on this container
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    /// Let a reader-mode handle accept writes (pool best-effort upgrade)
    pub(crate) fn allow_writes(&self) {
        self.writable.store(true, Ordering::Release);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write back if dirty; returns whether anything was written
    pub fn sync(&self) -> Result<bool> {
        // Hold off IDL writers so the snapshot is not taken mid-split, and
        // other syncers so a clean result means the file is on disk
        let _guard = self.write_lock.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        if let Err(e) = self.write_file() {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        tracing::trace!(container = %self.name, "synced");
        Ok(true)
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(LdbmError::StorageUnavailable(format!(
                "container {} is open read-only",
                self.name
            )))
        }
    }

    /// Rewrite the whole file via a temp file and rename
    fn write_file(&self) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let data = self.data.read();

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| {
                LdbmError::StorageUnavailable(format!("create {}: {}", tmp.display(), e))
            })?;
        let mut writer = BufWriter::new(file);
        let mut hasher = crc32fast::Hasher::new();

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(data.len() as u64).to_le_bytes())?;

        for (key, value) in data.iter() {
            let key_len = (key.len() as u32).to_le_bytes();
            let val_len = (value.len() as u32).to_le_bytes();
            for part in [&key_len[..], &val_len[..], key.as_slice(), value.as_slice()] {
                writer.write_all(part)?;
                hasher.update(part);
            }
        }

        writer.write_all(&hasher.finalize().to_le_bytes())?;
        writer.write_all(&[0u8; 4])?;
        writer.flush()?;

        let file = writer.into_inner().map_err(|e| {
            LdbmError::StorageUnavailable(format!("flush {}: {}", tmp.display(), e))
        })?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| {
            LdbmError::StorageUnavailable(format!("rename {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }

    fn load(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut bytes))
            .map_err(|e| LdbmError::StorageUnavailable(format!("open {}: {}", path.display(), e)))?;

        if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(LdbmError::Corruption(format!(
                "{}: file too short ({} bytes)",
                path.display(),
                bytes.len()
            )));
        }

        if &bytes[0..4] != MAGIC {
            return Err(LdbmError::Corruption(format!(
                "{}: invalid magic {:?}",
                path.display(),
                &bytes[0..4]
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != VERSION {
            return Err(LdbmError::Corruption(format!(
                "{}: unsupported version {}",
                path.display(),
                version
            )));
        }

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[6..14]);
        let count = u64::from_le_bytes(count_bytes);

        let data_end = bytes.len() - FOOTER_SIZE;
        let data = &bytes[HEADER_SIZE..data_end];
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&bytes[data_end..data_end + 4]);
        let stored_crc = u32::from_le_bytes(crc_bytes);

        if crc32fast::hash(data) != stored_crc {
            return Err(LdbmError::Corruption(format!(
                "{}: data CRC mismatch",
                path.display()
            )));
        }

        let mut map = BTreeMap::new();
        let mut pos = 0;
        while pos < data.len() {
            let (key, value, next) = Self::parse_entry(data, pos).ok_or_else(|| {
                LdbmError::Corruption(format!("{}: truncated entry at {}", path.display(), pos))
            })?;
            map.insert(key, value);
            pos = next;
        }

        if map.len() as u64 != count {
            return Err(LdbmError::Corruption(format!(
                "{}: header count {} but {} entries",
                path.display(),
                count,
                map.len()
            )));
        }

        Ok(map)
    }

    /// Parse `[key_len][val_len][key][value]` at `pos`
    fn parse_entry(data: &[u8], pos: usize) -> Option<(Vec<u8>, Vec<u8>, usize)> {
        let header = data.get(pos..pos + 8)?;
        let key_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let val_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

        let key_start = pos + 8;
        let val_start = key_start + key_len;
        let end = val_start + val_len;

        let key = data.get(key_start..val_start)?.to_vec();
        let value = data.get(val_start..end)?.to_vec();
        Some((key, value, end))
    }
}

impl std::fmt::Debug for DbFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbFile")
            .field("name", &self.name)
            .field("entries", &self.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
