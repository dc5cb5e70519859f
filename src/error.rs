//! Error types for tile discovery and imagery downloads.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while selecting tiles, resolving assets or downloading them.
#[derive(Error, Debug)]
pub enum SentinelError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error while talking to the object store.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// Malformed tile metadata XML.
    #[error(transparent)]
    XmlError(#[from] quick_xml::Error),

    /// Malformed GeoJSON input (AOI or tile grid).
    #[error(transparent)]
    GeoJsonError(#[from] geojson::Error),

    /// Invalid user input, raised before any network activity.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A product folder name does not carry the expected acquisition timestamp.
    #[error("Cannot parse acquisition date from product prefix '{prefix}'")]
    Discovery {
        /// Offending remote prefix.
        prefix: String,
    },

    /// A quality metric is present in the metadata but could not be read.
    #[error("Invalid tile metadata: {0}")]
    Metadata(String),

    /// Unexpected response from the object store.
    #[error("Object store error: {0}")]
    Store(String),

    /// A single transfer attempt took too long.
    #[error("Transfer of {name} timed out after {after:?}")]
    Timeout {
        /// Remote object name.
        name: String,
        /// Configured limit.
        after: Duration,
    },

    /// General download failure (size or checksum mismatch, task failure).
    #[error("Download failed: {0}")]
    DownloadFailed(String),
}

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, SentinelError>;
