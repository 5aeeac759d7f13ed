//! Deduplicating image host.
//!
//! Uploads are keyed by a hash of their raw bytes, stored under short generated
//! names and optionally transcoded on the way in.

pub mod app_config;
pub mod content_hash;
pub mod index;
pub mod ingest;
pub mod naming;
pub mod storage;
pub mod transcode;
pub mod upload_lock;
pub mod web;
