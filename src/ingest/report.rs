//! JSON shapes returned by the pipeline. Keys are camelCase.

use crate::transcode::{OutputFormat, TranscodeSettings};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One file in an upload response, either freshly stored or a duplicate hit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// Name the client uploaded the file under.
    pub name: String,
    pub stored_name: String,
    pub url: String,
    pub full_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    /// Size of what is served.
    pub size: u64,
    pub original_size: u64,
    pub mime_type: String,
    pub is_duplicate: bool,
    pub compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<String>,
    /// Short form of the content hash.
    pub hash: String,
}

/// An item not processed because the same content was already in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub name: String,
    pub hash: String,
    pub reason: &'static str,
}

/// An item that failed on its own without failing the batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedFile {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStat {
    pub original: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub ratio: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub uploaded: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total: usize,
    pub compression: Vec<CompressionStat>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub success: bool,
    /// Stored and duplicate items, in submission order.
    pub files: Vec<StoredFile>,
    pub skipped: Vec<SkippedFile>,
    pub failed: Vec<FailedFile>,
    pub stats: BatchStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedImage {
    pub name: String,
    pub url: String,
    pub full_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    pub size: u64,
    pub mime_type: &'static str,
    pub upload_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListReport {
    pub success: bool,
    pub files: Vec<ListedImage>,
    pub total_files: usize,
    pub total_hash_entries: usize,
    pub config: CompressionView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub success: bool,
    pub removed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub hash_entries: usize,
    pub uploads_locked: usize,
    pub filename_strategy: &'static str,
    pub deduplication: &'static str,
    pub compression: CompressionView,
}

/// Compression settings as the HTTP API shows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionView {
    pub enabled: bool,
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
    pub format: OutputFormat,
    pub save_original: bool,
}

impl From<&TranscodeSettings> for CompressionView {
    fn from(settings: &TranscodeSettings) -> Self {
        Self {
            enabled: settings.enabled,
            quality: settings.quality,
            max_width: settings.max_width,
            max_height: settings.max_height,
            format: settings.format,
            save_original: settings.save_original,
        }
    }
}

/// Percentage saved going from `original` to `compressed` bytes, e.g. `"61.30%"`.
pub fn compression_ratio(original: u64, compressed: u64) -> String {
    if original == 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", (1.0 - compressed as f64 / original as f64) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_ratio() {
        assert_eq!(compression_ratio(1000, 387), "61.30%");
        assert_eq!(compression_ratio(100, 100), "0.00%");
        assert_eq!(compression_ratio(100, 150), "-50.00%");
        assert_eq!(compression_ratio(0, 10), "0.00%");
    }

    #[test]
    fn test_stored_file_keys_are_camel_case() {
        let file = StoredFile {
            name: "a.png".to_string(),
            stored_name: "950414k3x118.webp".to_string(),
            url: "/images/950414k3x118.webp".to_string(),
            full_url: "http://localhost:3000/images/950414k3x118.webp".to_string(),
            original_url: None,
            size: 10,
            original_size: 20,
            mime_type: "image/webp".to_string(),
            is_duplicate: false,
            compressed: true,
            compression_ratio: Some("50.00%".to_string()),
            hash: "a3b9c2d1".to_string(),
        };
        let json = serde_json::to_value(&file).unwrap();

        assert_eq!(json["storedName"], "950414k3x118.webp");
        assert_eq!(json["isDuplicate"], false);
        assert_eq!(json["compressionRatio"], "50.00%");
        assert!(json.get("originalUrl").is_none());
    }
}
