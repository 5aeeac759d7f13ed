//! Local filesystem storage backend.

use super::{ObjectInfo, StorageBackend, StorageError};
use crate::naming::is_safe_name;
use actix_web::web::{self, Bytes};
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Local filesystem storage backend.
pub struct LocalStorage {
    /// Base path for file storage
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage backend.
    ///
    /// The `base_path` directory will be created if it doesn't exist.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        log::info!("LocalStorage initialized at {:?}", base_path);
        Ok(Self { base_path })
    }

    /// Get the full path for a file. Names are single path components.
    fn get_file_path(&self, filename: &str) -> Result<PathBuf, StorageError> {
        if !is_safe_name(filename) {
            return Err(StorageError::InvalidName(filename.to_string()));
        }
        Ok(self.base_path.join(filename))
    }
}

fn blocking_error(e: actix_web::error::BlockingError) -> StorageError {
    StorageError::Io(std::io::Error::other(e))
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn put_object(&self, data: Bytes, filename: &str) -> Result<(), StorageError> {
        let path = self.get_file_path(filename)?;
        log::debug!("LocalStorage: put_object: {:?}", path);

        // Use web::block for blocking file operations
        web::block(move || -> Result<(), StorageError> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;

            if let Err(err) = file.write_all(&data).and_then(|_| file.sync_all()) {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path) {
                    log::warn!("Could not remove partial file {:?}: {}", path, cleanup);
                }
                return Err(StorageError::Io(err));
            }

            Ok(())
        })
        .await
        .map_err(blocking_error)??;

        Ok(())
    }

    async fn stat(&self, filename: &str) -> Result<Option<ObjectInfo>, StorageError> {
        let path = self.get_file_path(filename)?;
        let metadata = web::block(move || fs::metadata(&path))
            .await
            .map_err(blocking_error)?;
        match metadata {
            Ok(metadata) if metadata.is_file() => Ok(Some(ObjectInfo {
                name: filename.to_string(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(Into::into),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn delete_object(&self, filename: &str) -> Result<(), StorageError> {
        let path = self.get_file_path(filename)?;
        log::debug!("LocalStorage: delete_object: {:?}", path);

        web::block(move || fs::remove_file(&path))
            .await
            .map_err(blocking_error)??;

        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<ObjectInfo>, StorageError> {
        let base_path = self.base_path.clone();

        let mut objects = web::block(move || -> Result<Vec<ObjectInfo>, StorageError> {
            let mut objects = Vec::new();
            for entry in fs::read_dir(&base_path)? {
                let entry = entry?;
                let name = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(_) => continue,
                };
                if name.starts_with('.') {
                    continue;
                }

                let metadata = entry.metadata()?;
                if !metadata.is_file() {
                    continue;
                }

                objects.push(ObjectInfo {
                    name,
                    size: metadata.len(),
                    modified: metadata.modified().ok().map(Into::into),
                });
            }
            Ok(objects)
        })
        .await
        .map_err(blocking_error)??;

        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_put_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage
            .put_object(Bytes::from_static(b"first"), "a.png")
            .await
            .unwrap();
        let err = storage
            .put_object(Bytes::from_static(b"second"), "a.png")
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(fs::read(dir.path().join("a.png")).unwrap(), b"first");
    }

    #[actix_rt::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("images")).unwrap();

        let err = storage
            .put_object(Bytes::from_static(b"x"), "../escape.png")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidName(_)));
        assert!(!dir.path().join("escape.png").exists());
    }

    #[actix_rt::test]
    async fn test_delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        let err = storage.delete_object("missing.png").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[actix_rt::test]
    async fn test_stat_reports_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        fs::write(dir.path().join("photo.webp"), b"12345").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let info = storage.stat("photo.webp").await.unwrap().unwrap();
        assert_eq!(info.name, "photo.webp");
        assert_eq!(info.size, 5);
        assert!(info.modified.is_some());

        assert!(storage.stat("nested").await.unwrap().is_none());
        assert!(storage.stat("gone.webp").await.unwrap().is_none());
        assert!(matches!(
            storage.stat("../photo.webp").await.unwrap_err(),
            StorageError::InvalidName(_)
        ));
    }

    #[actix_rt::test]
    async fn test_list_objects_reads_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage
            .put_object(Bytes::from_static(b"bb"), "b.png")
            .await
            .unwrap();
        // Placed by hand, not through the backend.
        fs::write(dir.path().join("a.jpg"), b"aaaa").unwrap();
        fs::write(dir.path().join(".hidden"), b"x").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let stat = storage.stat("b.png").await.unwrap().unwrap();
        assert_eq!(stat.size, 2);
        assert!(storage.exists("a.jpg").await.unwrap());
        assert!(!storage.exists("subdir").await.unwrap());
        assert!(storage.stat("missing.png").await.unwrap().is_none());

        let objects = storage.list_objects().await.unwrap();
        let names: Vec<_> = objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.png"]);
        assert_eq!(objects[0].size, 4);
        assert!(objects[0].modified.is_some());
    }
}
