//! Object store access.
//!
//! The resolver and the scheduler only ever list by prefix and fetch by name,
//! so the store is a small capability trait. [`GcsStore`] talks to the public
//! bucket over HTTP; [`MemoryStore`] serves objects from memory.

mod gcs;
mod memory;

pub use gcs::GcsStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::FOLDER_MARKER_SUFFIX;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::BTreeSet;

/// Body of a download, yielded chunk by chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub size: Option<u64>,
    pub is_directory_marker: bool,
}

impl ObjectInfo {
    pub fn new(name: impl Into<String>, size: Option<u64>) -> Self {
        let name = name.into();
        let is_directory_marker = is_directory_marker(&name);
        Self {
            name,
            size,
            is_directory_marker,
        }
    }
}

/// Whether `name` is a zero-byte folder placeholder rather than real content.
pub fn is_directory_marker(name: &str) -> bool {
    name.ends_with(FOLDER_MARKER_SUFFIX) || name.ends_with('/')
}

/// An object being downloaded.
pub struct ObjectDownload {
    /// Advertised body length, if the store sent one.
    pub content_length: Option<u64>,
    /// Entity tag; a plain hex MD5 for non-composite objects.
    pub etag: Option<String>,
    pub body: ByteStream,
}

/// Listing and fetching primitives of a remote bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Immediate child prefixes of `prefix`, each ending with `delimiter`.
    async fn list_prefixes(&self, prefix: &str, delimiter: &str) -> Result<BTreeSet<String>>;

    /// Every object below `prefix`, recursively.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Starts downloading one object.
    async fn download(&self, name: &str) -> Result<ObjectDownload>;

    /// Downloads one object fully into memory.
    async fn fetch(&self, name: &str) -> Result<Bytes> {
        let mut download = self.download(name).await?;
        let mut buffer = Vec::with_capacity(download.content_length.unwrap_or(0) as usize);
        while let Some(chunk) = download.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buffer))
    }
}
