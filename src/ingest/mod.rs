//! Upload ingestion: hash, dedupe, transcode, name, store, index.
//!
//! One [`IngestPipeline`] owns the hash index and the upload lock registry and
//! is shared by every request through `web::Data`. Items of a batch are handled
//! one after another; separate requests run concurrently and coordinate only
//! through the index and the locks.

pub mod report;

use crate::app_config::{AppConfig, UploadConfig};
use crate::content_hash::ContentHash;
use crate::index::HashIndex;
use crate::naming::{is_safe_name, sanitized_extension, with_suffix, NamingStrategy};
use crate::storage::{extension_for, mime_type_for, LocalStorage, StorageBackend, StorageError};
use crate::transcode::{should_transcode, transcode, CompressionUpdate, TranscodeSettings};
use crate::upload_lock::{Clock, LockGuard, SystemClock, UploadLocks};
use actix_web::web::{self, Bytes};
use arc_swap::ArcSwap;
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub use report::{
    BatchReport, BatchStats, CleanupReport, CompressionStat, CompressionView, FailedFile,
    HealthReport, ListReport, ListedImage, SkippedFile, StoredFile,
};

/// URL prefix the content directory is served under.
pub const IMAGES_PREFIX: &str = "/images";
/// URL prefix the originals directory is served under.
pub const ORIGINALS_PREFIX: &str = "/originals";

/// A file received from a client, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Result of looking up a hash before processing it.
#[derive(Debug)]
pub enum Acquire {
    /// Already stored under this name.
    Hit(String),
    /// Another upload of the same content is in flight.
    Locked,
    /// Ours to process. The lock is released when the guard drops.
    New(LockGuard),
}

/// What happened to a single item.
#[derive(Debug)]
pub enum ItemOutcome {
    Stored {
        file: StoredFile,
        compression: Option<CompressionStat>,
    },
    Duplicate(StoredFile),
    Skipped(SkippedFile),
}

#[derive(Debug)]
pub enum IngestError {
    /// Rejected request: no files, bad type, too many files, bad name.
    Validation(String),
    /// A file is over the size cap.
    PayloadTooLarge(String),
    NotFound(String),
    /// Every suffixed variant of a generated name was taken.
    NameCollisionExhausted { name: String, attempts: u32 },
    Storage(StorageError),
    /// The hash index could not be written.
    Index(std::io::Error),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Validation(msg) => write!(f, "{}", msg),
            IngestError::PayloadTooLarge(msg) => write!(f, "{}", msg),
            IngestError::NotFound(name) => write!(f, "File not found: {}", name),
            IngestError::NameCollisionExhausted { name, attempts } => write!(
                f,
                "Could not find a free name for {} after {} attempts",
                name, attempts
            ),
            IngestError::Storage(e) => write!(f, "Storage error: {}", e),
            IngestError::Index(e) => write!(f, "Failed to save hash index: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<StorageError> for IngestError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => IngestError::NotFound(msg),
            StorageError::InvalidName(name) => {
                IngestError::Validation(format!("Invalid file name: {}", name))
            }
            other => IngestError::Storage(other),
        }
    }
}

/// Name of the untouched upload kept next to a transcoded file.
pub fn original_name(stored_name: &str) -> String {
    format!("orig_{}", stored_name)
}

fn image_url(name: &str) -> String {
    format!("{}/{}", IMAGES_PREFIX, name)
}

fn original_url(name: &str) -> String {
    format!("{}/{}", ORIGINALS_PREFIX, name)
}

fn full_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

pub struct IngestPipeline {
    index: Arc<HashIndex>,
    locks: Arc<UploadLocks>,
    store: Arc<dyn StorageBackend>,
    originals: Arc<dyn StorageBackend>,
    naming: NamingStrategy,
    max_name_attempts: u32,
    limits: UploadConfig,
    compression: ArcSwap<TranscodeSettings>,
}

impl IngestPipeline {
    pub fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    /// Like [`IngestPipeline::from_config`], with lock deadlines measured by `clock`.
    pub fn from_config_with_clock(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let store = LocalStorage::new(&config.storage.content_dir)?;
        let originals = LocalStorage::new(&config.storage.original_dir)?;
        Ok(Self::with_storage(
            config,
            Arc::new(store),
            Arc::new(originals),
            clock,
        ))
    }

    /// Builds a pipeline over caller-supplied backends for served files and originals.
    pub fn with_storage(
        config: &AppConfig,
        store: Arc<dyn StorageBackend>,
        originals: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        log::info!(
            "Ingest pipeline: naming={}, compression={}, dedup grace={:?}",
            config.naming.strategy,
            if config.compression.enabled { "on" } else { "off" },
            config.dedup.lock_grace()
        );

        Self {
            index: Arc::new(HashIndex::load(&config.storage.index_path)),
            locks: Arc::new(UploadLocks::with_clock(config.dedup.lock_grace(), clock)),
            store,
            originals,
            naming: config.naming.strategy,
            max_name_attempts: config.naming.max_attempts,
            limits: config.upload.clone(),
            compression: ArcSwap::from_pointee(config.compression.clone()),
        }
    }

    pub fn index(&self) -> &HashIndex {
        &self.index
    }

    pub fn locks(&self) -> &Arc<UploadLocks> {
        &self.locks
    }

    pub fn limits(&self) -> &UploadConfig {
        &self.limits
    }

    /// Decide what to do with content hashing to `hash`.
    ///
    /// An index entry whose file has vanished is dropped and the hash treated
    /// as new. The index is consulted again once the lock is taken, in case
    /// another request finished the same content in between.
    pub async fn acquire(&self, hash: &ContentHash) -> Result<Acquire, IngestError> {
        if let Some(name) = self.index.get(hash) {
            if self.store.exists(&name).await? {
                return Ok(Acquire::Hit(name));
            }
            log::warn!(
                "Index entry {} -> {} has no file, dropping it",
                hash.short(),
                name
            );
            self.index.remove_if_name(hash, &name);
        }

        let guard = match self.locks.try_acquire(hash) {
            Some(guard) => guard,
            None => return Ok(Acquire::Locked),
        };

        if let Some(name) = self.index.get(hash) {
            if self.store.exists(&name).await? {
                return Ok(Acquire::Hit(name));
            }
        }

        Ok(Acquire::New(guard))
    }

    /// Reject a batch before any hashing happens.
    pub fn validate_batch(&self, files: &[UploadedFile]) -> Result<(), IngestError> {
        if files.is_empty() {
            return Err(IngestError::Validation("No files uploaded".to_string()));
        }
        if files.len() > self.limits.max_files {
            return Err(IngestError::Validation(format!(
                "Too many files: {} (max {})",
                files.len(),
                self.limits.max_files
            )));
        }
        for file in files {
            if !self.limits.is_allowed(&file.mime_type) {
                return Err(IngestError::Validation(format!(
                    "Unsupported file type {} for {}",
                    file.mime_type, file.file_name
                )));
            }
            if file.data.is_empty() {
                return Err(IngestError::Validation(format!(
                    "Empty file: {}",
                    file.file_name
                )));
            }
            if file.data.len() > self.limits.max_file_size_bytes() {
                return Err(IngestError::PayloadTooLarge(format!(
                    "{} exceeds the {} MB limit",
                    file.file_name, self.limits.max_file_size_mb
                )));
            }
        }
        Ok(())
    }

    /// Process a whole upload request.
    ///
    /// Item failures are collected in the report. The request as a whole
    /// fails only on validation, when the index cannot be saved, or when
    /// every item failed with a storage error.
    pub async fn ingest_batch(
        &self,
        files: Vec<UploadedFile>,
        base_url: &str,
    ) -> Result<BatchReport, IngestError> {
        self.validate_batch(&files)?;

        let total = files.len();
        let mut report = BatchReport {
            success: true,
            files: Vec::with_capacity(total),
            skipped: Vec::new(),
            failed: Vec::new(),
            stats: BatchStats {
                total,
                ..BatchStats::default()
            },
        };
        let mut storage_failures = 0;
        let mut last_storage_error = None;

        for file in files {
            let name = file.file_name.clone();
            match self.ingest_one(file, base_url).await {
                Ok(ItemOutcome::Stored { file, compression }) => {
                    report.stats.uploaded += 1;
                    report.stats.compression.extend(compression);
                    report.files.push(file);
                }
                Ok(ItemOutcome::Duplicate(file)) => {
                    report.stats.duplicates += 1;
                    report.files.push(file);
                }
                Ok(ItemOutcome::Skipped(skipped)) => {
                    report.stats.skipped += 1;
                    report.skipped.push(skipped);
                }
                Err(err) => {
                    log::error!("Upload of {} failed: {}", name, err);
                    report.failed.push(FailedFile {
                        name,
                        error: err.to_string(),
                    });
                    report.stats.failed += 1;
                    if matches!(err, IngestError::Storage(_)) {
                        storage_failures += 1;
                        last_storage_error = Some(err);
                    }
                }
            }
        }

        self.persist_index().await?;

        if storage_failures == total {
            if let Some(err) = last_storage_error {
                return Err(err);
            }
        }

        log::info!(
            "Batch done: {} uploaded, {} duplicates, {} skipped, {} failed",
            report.stats.uploaded,
            report.stats.duplicates,
            report.stats.skipped,
            report.stats.failed
        );
        Ok(report)
    }

    /// Process one file. Does not persist the index.
    pub async fn ingest_one(
        &self,
        file: UploadedFile,
        base_url: &str,
    ) -> Result<ItemOutcome, IngestError> {
        let hash = ContentHash::of(&file.data);
        let original_size = file.data.len() as u64;

        let guard = match self.acquire(&hash).await? {
            Acquire::Hit(existing) => {
                log::info!(
                    "{} is a duplicate of {} ({})",
                    file.file_name,
                    existing,
                    hash.short()
                );
                let size = self
                    .store
                    .stat(&existing)
                    .await?
                    .map(|info| info.size)
                    .unwrap_or(original_size);
                let orig = original_name(&existing);
                let original_url = if self.originals.exists(&orig).await? {
                    Some(original_url(&orig))
                } else {
                    None
                };
                let url = image_url(&existing);
                return Ok(ItemOutcome::Duplicate(StoredFile {
                    name: file.file_name,
                    full_url: full_url(base_url, &url),
                    url,
                    original_url,
                    size,
                    original_size,
                    mime_type: mime_type_for(&existing).to_string(),
                    stored_name: existing,
                    is_duplicate: true,
                    compressed: false,
                    compression_ratio: None,
                    hash: hash.short().to_string(),
                }));
            }
            Acquire::Locked => {
                log::info!(
                    "{} ({}) is already being uploaded, skipping",
                    file.file_name,
                    hash.short()
                );
                return Ok(ItemOutcome::Skipped(SkippedFile {
                    name: file.file_name,
                    hash: hash.short().to_string(),
                    reason: "in_progress",
                }));
            }
            Acquire::New(guard) => guard,
        };

        let outcome = self.store_new(file, &hash, base_url).await;
        drop(guard);
        outcome
    }

    async fn store_new(
        &self,
        file: UploadedFile,
        hash: &ContentHash,
        base_url: &str,
    ) -> Result<ItemOutcome, IngestError> {
        let settings = self.compression.load_full();
        let original_size = file.data.len() as u64;

        let mut data = file.data.clone();
        let mut mime_type = file.mime_type.clone();
        // The stored extension decides the served Content-Type, so the client's
        // extension is only trusted when it maps back to the declared type.
        let mut extension = sanitized_extension(&file.file_name)
            .filter(|ext| mime_type_for(ext) == file.mime_type)
            .or_else(|| extension_for(&file.mime_type).map(str::to_string))
            .unwrap_or_default();
        let mut compressed = false;

        if settings.enabled && should_transcode(&file.mime_type, &file.data) {
            let input = file.data.clone();
            let job_settings = Arc::clone(&settings);
            match web::block(move || transcode(&input, &job_settings)).await {
                Ok(Ok(out)) if !out.resized && out.data.len() as u64 >= original_size => {
                    log::info!(
                        "Re-encoding {} would not shrink it ({} -> {} bytes), keeping original",
                        file.file_name,
                        original_size,
                        out.data.len()
                    );
                }
                Ok(Ok(out)) => {
                    log::info!(
                        "Compressed {}: {} -> {} bytes ({}x{})",
                        file.file_name,
                        original_size,
                        out.data.len(),
                        out.width,
                        out.height
                    );
                    data = Bytes::from(out.data);
                    mime_type = out.mime_type.to_string();
                    extension = out.extension.to_string();
                    compressed = true;
                }
                Ok(Err(err)) => {
                    log::warn!("Compression of {} failed, storing original: {}", file.file_name, err);
                }
                Err(err) => {
                    log::warn!("Compression of {} failed, storing original: {}", file.file_name, err);
                }
            }
        }

        let candidate = self.next_candidate(&extension);
        let stored_name = self.write_unique(data.clone(), &candidate).await?;

        let mut stored_original = None;
        if compressed && settings.save_original {
            let orig = original_name(&stored_name);
            match self.originals.put_object(file.data.clone(), &orig).await {
                Ok(()) => stored_original = Some(original_url(&orig)),
                Err(err) => log::warn!("Could not keep original {}: {}", orig, err),
            }
        }

        self.index.insert(hash.clone(), stored_name.clone());
        log::info!("Stored {} as {} ({})", file.file_name, stored_name, hash.short());

        let size = data.len() as u64;
        let compression = compressed.then(|| CompressionStat {
            original: file.file_name.clone(),
            original_size,
            compressed_size: size,
            ratio: report::compression_ratio(original_size, size),
        });
        let url = image_url(&stored_name);

        Ok(ItemOutcome::Stored {
            file: StoredFile {
                name: file.file_name,
                full_url: full_url(base_url, &url),
                url,
                original_url: stored_original,
                size,
                original_size,
                mime_type,
                stored_name,
                is_duplicate: false,
                compressed,
                compression_ratio: compression.as_ref().map(|c| c.ratio.clone()),
                hash: hash.short().to_string(),
            },
            compression,
        })
    }

    /// Fresh name from the configured strategy. `extension` has its dot.
    pub fn next_candidate(&self, extension: &str) -> String {
        self.naming
            .generate(extension, Utc::now(), &mut rand::thread_rng())
    }

    /// Write `data` under `candidate`, or under `candidate_1`, `candidate_2`, ...
    /// when taken. Returns the name actually used.
    pub async fn write_unique(&self, data: Bytes, candidate: &str) -> Result<String, IngestError> {
        for attempt in 0..=self.max_name_attempts {
            let name = with_suffix(candidate, attempt);
            if self.store.exists(&name).await? {
                continue;
            }
            match self.store.put_object(data.clone(), &name).await {
                Ok(()) => {
                    if attempt > 0 {
                        log::debug!("Name {} was taken, used {}", candidate, name);
                    }
                    return Ok(name);
                }
                // Taken between the check and the write.
                Err(StorageError::AlreadyExists(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(IngestError::NameCollisionExhausted {
            name: candidate.to_string(),
            attempts: self.max_name_attempts,
        })
    }

    /// Remove a stored image, its kept original and every index entry for it.
    pub async fn delete(&self, name: &str) -> Result<(), IngestError> {
        if !is_safe_name(name) {
            return Err(IngestError::Validation(format!("Invalid file name: {}", name)));
        }

        self.store.delete_object(name).await?;

        let orig = original_name(name);
        match self.originals.delete_object(&orig).await {
            Ok(()) => log::debug!("Deleted original {}", orig),
            Err(StorageError::NotFound(_)) => {}
            Err(err) => log::warn!("Could not delete original {}: {}", orig, err),
        }

        let removed = self.index.remove_by_name(name);
        self.persist_index().await?;

        log::info!("Deleted {} ({} index entries)", name, removed);
        Ok(())
    }

    /// Everything in the content directory, whether indexed or not.
    pub async fn list(&self, base_url: &str) -> Result<ListReport, IngestError> {
        let objects = self.store.list_objects().await?;
        let originals: HashSet<String> = self
            .originals
            .list_objects()
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect();

        let files: Vec<ListedImage> = objects
            .into_iter()
            .map(|info| {
                let orig = original_name(&info.name);
                let url = image_url(&info.name);
                ListedImage {
                    full_url: full_url(base_url, &url),
                    url,
                    original_url: originals.contains(&orig).then(|| original_url(&orig)),
                    size: info.size,
                    mime_type: mime_type_for(&info.name),
                    upload_time: info.modified,
                    name: info.name,
                }
            })
            .collect();

        Ok(ListReport {
            success: true,
            total_files: files.len(),
            total_hash_entries: self.index.len(),
            files,
            config: self.compression_view(),
        })
    }

    /// Drop index entries whose file is gone from the content directory.
    pub async fn cleanup_index(&self) -> Result<CleanupReport, IngestError> {
        let present: HashSet<String> = self
            .store
            .list_objects()
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect();

        let removed = self.index.retain_present(&present);
        if removed > 0 {
            self.persist_index().await?;
        }
        log::info!("Index cleanup removed {} stale entries", removed);

        Ok(CleanupReport {
            success: true,
            removed,
            remaining: self.index.len(),
        })
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            hash_entries: self.index.len(),
            uploads_locked: self.locks.active_count(),
            filename_strategy: self.naming.as_str(),
            deduplication: "blake3",
            compression: self.compression_view(),
        }
    }

    pub fn compression(&self) -> TranscodeSettings {
        TranscodeSettings::clone(&self.compression.load())
    }

    pub fn compression_view(&self) -> CompressionView {
        CompressionView::from(&**self.compression.load())
    }

    /// Apply a partial settings change for subsequent uploads.
    pub fn update_compression(&self, update: &CompressionUpdate) -> TranscodeSettings {
        self.compression
            .rcu(|current| Arc::new(current.apply(update)));
        let settings = self.compression();
        log::info!("Compression settings updated: {:?}", settings);
        settings
    }

    /// Purge expired upload locks.
    pub fn sweep_locks(&self) -> usize {
        self.locks.sweep()
    }

    /// Write the index on the blocking pool.
    pub async fn persist_index(&self) -> Result<(), IngestError> {
        let index = Arc::clone(&self.index);
        web::block(move || index.persist())
            .await
            .map_err(|e| IngestError::Index(std::io::Error::other(e)))?
            .map_err(IngestError::Index)
    }
}
