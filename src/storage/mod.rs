//! Storage backend abstraction for image content.
//!
//! Only a local filesystem backend exists. Objects live flat in one directory
//! under their stored name, so the directory itself can be listed as the
//! source of truth for what is served.

pub mod local;

pub use local::LocalStorage;

use actix_web::web::Bytes;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Metadata for one stored object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Storage operation errors.
#[derive(Debug)]
pub enum StorageError {
    /// File not found
    NotFound(String),
    /// Refused to overwrite an existing file
    AlreadyExists(String),
    /// Name would escape the storage directory
    InvalidName(String),
    /// I/O error
    Io(std::io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::NotFound(msg) => write!(f, "Not found: {}", msg),
            StorageError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            StorageError::InvalidName(msg) => write!(f, "Invalid name: {}", msg),
            StorageError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(e.to_string()),
            std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(e.to_string()),
            _ => StorageError::Io(e),
        }
    }
}

/// Trait for storage backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a new object.
    ///
    /// Never overwrites: if `filename` is taken this fails with
    /// [`StorageError::AlreadyExists`]. A failed write leaves no partial file.
    async fn put_object(&self, data: Bytes, filename: &str) -> Result<(), StorageError>;

    /// Metadata for `filename`, or `None` if there is no such object.
    async fn stat(&self, filename: &str) -> Result<Option<ObjectInfo>, StorageError>;

    /// Check if an object exists.
    async fn exists(&self, filename: &str) -> Result<bool, StorageError> {
        Ok(self.stat(filename).await?.is_some())
    }

    /// Remove an object.
    async fn delete_object(&self, filename: &str) -> Result<(), StorageError>;

    /// Enumerate every object, sorted by name.
    async fn list_objects(&self) -> Result<Vec<ObjectInfo>, StorageError>;
}

/// Get MIME type from filename extension.
pub fn mime_type_for(filename: &str) -> &'static str {
    let ext = match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

/// Preferred extension (with dot) for an image MIME type.
pub fn extension_for(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/jpeg" => Some(".jpg"),
        "image/png" => Some(".png"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/svg+xml" => Some(".svg"),
        "image/bmp" => Some(".bmp"),
        "image/avif" => Some(".avif"),
        _ => None,
    }
}
