//! Instance table snapshots.
//!
//! A snapshot is a JSON data file plus a `<file>.meta.json` sidecar carrying
//! its CRC32C checksum. Outbox contents are not part of a snapshot.

use crate::error::StorageError;
use crate::store::{MemoryStore, StoredInstance};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Snapshot metadata stored alongside the data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub instance_count: usize,
    pub created_at: i64,
    pub size_bytes: u64,
    pub checksum: String,
}

fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Writes `rows` to `path` and its metadata sidecar.
pub fn write_snapshot(
    path: impl AsRef<Path>,
    rows: &[StoredInstance],
) -> Result<SnapshotMeta, StorageError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let data = serde_json::to_vec_pretty(rows)?;
    let checksum = format!("{:08x}", crc32c::crc32c(&data));

    let mut file = File::create(path)?;
    file.write_all(&data)?;
    file.sync_all()?;

    let meta = SnapshotMeta {
        instance_count: rows.len(),
        created_at: chrono::Utc::now().timestamp_millis(),
        size_bytes: data.len() as u64,
        checksum,
    };

    let mut writer = BufWriter::new(File::create(meta_path(path))?);
    serde_json::to_writer_pretty(&mut writer, &meta)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    tracing::info!(
        "Wrote snapshot of {} instances to {}",
        meta.instance_count,
        path.display()
    );

    Ok(meta)
}

/// Reads a snapshot, verifying it against its metadata sidecar.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<Vec<StoredInstance>, StorageError> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    let meta: SnapshotMeta = serde_json::from_slice(&fs::read(meta_path(path))?)?;

    let actual = format!("{:08x}", crc32c::crc32c(&data));
    if actual != meta.checksum {
        return Err(StorageError::Corruption(format!(
            "snapshot {} checksum mismatch: expected {}, got {}",
            path.display(),
            meta.checksum,
            actual
        )));
    }

    let rows: Vec<StoredInstance> = serde_json::from_slice(&data)?;
    if rows.len() != meta.instance_count {
        return Err(StorageError::Corruption(format!(
            "snapshot {} holds {} instances, metadata says {}",
            path.display(),
            rows.len(),
            meta.instance_count
        )));
    }

    Ok(rows)
}

impl MemoryStore {
    /// Writes the committed instance table to `path`.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<SnapshotMeta, StorageError> {
        write_snapshot(path, &self.instances())
    }

    /// Replaces the instance table with the snapshot at `path`.
    ///
    /// Returns the number of restored instances. The store is left untouched
    /// if the snapshot fails verification.
    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<usize, StorageError> {
        let rows = read_snapshot(path)?;
        let count = rows.len();
        self.restore(rows);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StagedWrite;
    use corrflow_core::{InstanceKey, InstanceRecord};
    use tempfile::tempdir;

    fn populated() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .apply(
                &[
                    StagedWrite::Add(InstanceRecord::new(InstanceKey::new("c1", "order"), 0)),
                    StagedWrite::Add(InstanceRecord::new(InstanceKey::new("c2", "order"), 2)),
                ],
                &[],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_snapshot_restores_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instances.json");

        let meta = populated().save_snapshot(&path).unwrap();
        assert_eq!(meta.instance_count, 2);

        let restored = MemoryStore::new();
        assert_eq!(restored.load_snapshot(&path).unwrap(), 2);

        let row = restored.get(&InstanceKey::new("c2", "order")).unwrap();
        assert_eq!(row.record.state, 2);
        assert_eq!(row.record.version, 1);
    }

    #[test]
    fn test_metadata_sidecar_matches_returned_meta() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instances.json");

        let meta = populated().save_snapshot(&path).unwrap();
        let on_disk: SnapshotMeta =
            serde_json::from_slice(&fs::read(meta_path(&path)).unwrap()).unwrap();

        assert_eq!(on_disk, meta);
        assert_eq!(on_disk.size_bytes, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_snapshot_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/instances.json");

        populated().save_snapshot(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_tampered_snapshot_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instances.json");
        populated().save_snapshot(&path).unwrap();

        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("\"c2\"", "\"c3\"");
        fs::write(&path, tampered).unwrap();

        let store = MemoryStore::new();
        let err = store.load_snapshot(&path).unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
        assert_eq!(store.instance_count(), 0);
    }

    #[test]
    fn test_missing_metadata_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instances.json");
        populated().save_snapshot(&path).unwrap();
        fs::remove_file(meta_path(&path)).unwrap();

        assert!(matches!(
            read_snapshot(&path).unwrap_err(),
            StorageError::Io(_)
        ));
    }
}
