//! Collection snapshots on disk.
//!
//! Each collection is one file under `<data_dir>/collections/`: a
//! little-endian crc32 of the payload followed by the payload, a JSON array
//! of the collection's documents in insertion order. Files are replaced
//! atomically (write temp, fsync, rename).

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;

use crate::error::{classify_io_error, StoreError};

const SNAPSHOT_EXTENSION: &str = "snap";

/// Snapshot files of one data directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("collections"),
        }
    }

    /// Atomically replaces the snapshot of `collection`.
    pub fn flush(&self, collection: &str, documents: &[Value]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| classify_io_error(e, "Failed to create data directory"))?;

        let final_path = self.path_for(collection);
        let temp_path = final_path.with_extension(format!("{}.tmp", SNAPSHOT_EXTENSION));

        let payload = serde_json::to_vec(documents)
            .map_err(|e| StoreError::SerializationError(format!("Failed to encode {}: {}", collection, e)))?;
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let mut file = File::create(&temp_path)
            .map_err(|e| classify_io_error(e, "Failed to create temp file"))?;
        file.write_all(&checksum.to_le_bytes())
            .and_then(|_| file.write_all(&payload))
            .map_err(|e| classify_io_error(e, "Failed to write snapshot"))?;
        file.sync_all()
            .map_err(|e| classify_io_error(e, "Failed to sync snapshot"))?;

        fs::rename(&temp_path, &final_path)
            .map_err(|e| classify_io_error(e, "Failed to rename snapshot"))?;

        tracing::trace!(collection, documents = documents.len(), checksum, "Snapshot flushed");
        Ok(())
    }

    /// Loads every snapshot in the directory. A missing directory is an empty store.
    pub fn load_all(&self) -> Result<Vec<(String, Vec<Value>)>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(classify_io_error(e, "Failed to read data directory")),
        };

        let mut collections = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| classify_io_error(e, "Failed to read data directory"))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(name) = collection_name(&path) else {
                tracing::warn!(path = %path.display(), "Skipping snapshot with undecodable name");
                continue;
            };
            let documents = self.load(&path)?;
            collections.push((name, documents));
        }
        Ok(collections)
    }

    fn load(&self, path: &Path) -> Result<Vec<Value>, StoreError> {
        let mut data = Vec::new();
        File::open(path)
            .and_then(|mut file| file.read_to_end(&mut data))
            .map_err(|e| classify_io_error(e, "Failed to read snapshot"))?;

        let corruption = |reason: String| StoreError::DataCorruption {
            file: path.display().to_string(),
            reason,
        };
        if data.len() < 4 {
            return Err(corruption(format!("truncated to {} bytes", data.len())));
        }
        let (header, payload) = data.split_at(4);
        let stored = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let mut hasher = Hasher::new();
        hasher.update(payload);
        let actual = hasher.finalize();
        if stored != actual {
            return Err(corruption(format!(
                "checksum mismatch (stored {:08x}, computed {:08x})",
                stored, actual
            )));
        }

        serde_json::from_slice(payload).map_err(|e| corruption(e.to_string()))
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            utf8_percent_encode(collection, NON_ALPHANUMERIC),
            SNAPSHOT_EXTENSION
        ))
    }
}

fn collection_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    percent_decode_str(stem).decode_utf8().ok().map(|s| s.into_owned())
}
