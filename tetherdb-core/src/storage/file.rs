// src/storage/file.rs
//! Local-directory storage backend.
//!
//! Stands in for the remote substrate on a single machine: every blob is one
//! JSON file below a root directory, the blob id is the file's root-relative
//! path. The properties store keeps its whole map in a single JSON file and
//! rewrites it on every change, mirroring how the remote properties service
//! behaves (no partial updates).

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Result, TetherDbError};
use crate::storage::traits::{BlobMetadata, BlobStorage, PropertiesStore};

/// Blob store rooted at a local directory.
pub struct FileBlobStorage {
    root: PathBuf,
}

impl FileBlobStorage {
    /// Open (and create if needed) a blob store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(FileBlobStorage {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn resolve(&self, id: &str) -> Result<PathBuf> {
        // Ids are root-relative paths; refuse anything that could escape.
        if id.is_empty() || id.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(TetherDbError::InvalidArgument(format!(
                "Malformed blob id '{}'",
                id
            )));
        }
        Ok(self.root.join(id))
    }

    fn map_io(id: &str, err: std::io::Error) -> TetherDbError {
        match err.kind() {
            ErrorKind::NotFound => TetherDbError::BlobNotFound(id.to_string()),
            ErrorKind::PermissionDenied => TetherDbError::PermissionDenied(id.to_string()),
            _ => TetherDbError::Io(err),
        }
    }
}

impl BlobStorage for FileBlobStorage {
    fn read(&self, id: &str) -> Result<Value> {
        let path = self.resolve(id)?;
        let raw = fs::read_to_string(&path).map_err(|e| Self::map_io(id, e))?;
        serde_json::from_str(&raw)
            .map_err(|e| TetherDbError::InvalidFormat(format!("blob '{}': {}", id, e)))
    }

    fn write(&self, id: &str, data: &Value) -> Result<()> {
        let path = self.resolve(id)?;
        if !path.is_file() {
            return Err(TetherDbError::BlobNotFound(id.to_string()));
        }
        let raw = serde_json::to_string(data)?;
        fs::write(&path, raw).map_err(|e| Self::map_io(id, e))
    }

    fn create(&self, name: &str, data: &Value, container_id: &str) -> Result<String> {
        if container_id.split('/').any(|part| part == "..") {
            return Err(TetherDbError::InvalidArgument(format!(
                "Malformed container id '{}'",
                container_id
            )));
        }
        let id = format!("{}/{}.json", container_id, Uuid::new_v4());
        let path = self.resolve(&id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string(data)?;
        fs::write(&path, raw).map_err(|e| Self::map_io(&id, e))?;
        crate::log_debug!("created blob '{}' as {}", name, id);
        Ok(id)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let path = self.resolve(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io(id, e)),
        }
    }

    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.resolve(id)?.is_file())
    }

    fn get_metadata(&self, id: &str) -> Result<BlobMetadata> {
        let path = self.resolve(id)?;
        let meta = fs::metadata(&path).map_err(|e| Self::map_io(id, e))?;

        let modified_time = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let created_time = meta
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified_time);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());

        Ok(BlobMetadata {
            id: id.to_string(),
            name,
            size: meta.len(),
            modified_time,
            created_time,
            content_type: "application/json".to_string(),
        })
    }
}

/// Properties store persisted as one JSON file.
pub struct FilePropertiesStore {
    path: PathBuf,
}

impl FilePropertiesStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(FilePropertiesStore {
            path: path.as_ref().to_path_buf(),
        })
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|e| {
            TetherDbError::InvalidFormat(format!(
                "properties file '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let raw = serde_json::to_string_pretty(map)?;
        fs::write(&self.path, raw).map_err(Into::into)
    }
}

impl PropertiesStore for FilePropertiesStore {
    fn get_property(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(key).cloned())
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.load()?;
        map.insert(key.to_string(), value.to_string());
        self.save(&map)
    }

    fn delete_property(&self, key: &str) -> Result<()> {
        let mut map = self.load()?;
        map.remove(key);
        self.save(&map)
    }
}
