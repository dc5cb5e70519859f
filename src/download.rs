//! Single-object transfer.

use crate::error::{Result, SentinelError};
use crate::store::ObjectStore;
use futures_util::StreamExt;
use md5::{Digest, Md5};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Path the body is streamed to before it is moved into place.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Whether an entity tag is a plain MD5 digest (multipart and composite tags are not).
fn md5_etag(etag: Option<&str>) -> Option<&str> {
    etag.filter(|tag| tag.len() == 32 && tag.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Downloads one object to `target`, verifying its size and MD5.
///
/// The body is written to `<target>.part` and renamed once verified, so a
/// file at `target` is always complete.
///
/// # Arguments
///
/// * `store` - Object store holding the object
/// * `name` - Remote object name
/// * `target` - Final local path; parent directories are created
///
/// # Returns
///
/// The number of bytes written, or an error. On error no file is left at
/// `target` or at its `.part` path.
pub(crate) async fn download_object(
    store: &dyn ObjectStore,
    name: &str,
    target: &Path,
) -> Result<u64> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let part = partial_path(target);
    match write_verified(store, name, &part).await {
        Ok(written) => {
            tokio::fs::rename(&part, target).await?;
            Ok(written)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn write_verified(store: &dyn ObjectStore, name: &str, part: &Path) -> Result<u64> {
    let file_display_name = name.rsplit('/').next().unwrap_or(name);
    let mut download = store.download(name).await?;
    let mut file = BufWriter::new(tokio::fs::File::create(part).await?);

    let expected_md5 = md5_etag(download.etag.as_deref()).map(str::to_lowercase);
    let mut hasher = expected_md5.as_ref().map(|_| Md5::new());
    let mut written = 0u64;

    while let Some(piece) = download.body.next().await {
        let chunk = piece?;
        if let Some(ref mut h) = hasher {
            h.update(&chunk);
        }
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    match download.content_length {
        Some(expected) if expected != written => {
            return Err(SentinelError::DownloadFailed(format!(
                "File size mismatch for {}: expected {} bytes, got {} bytes",
                name, expected, written
            )));
        }
        Some(_) => {}
        None => warn!(
            "Content-Length was not present for {}. Cannot verify file size.",
            name
        ),
    }

    if let (Some(expected), Some(hasher)) = (expected_md5, hasher) {
        let computed = format!("{:x}", hasher.finalize());
        if computed != expected {
            return Err(SentinelError::DownloadFailed(format!(
                "MD5 mismatch for {}: expected {}, got {}",
                file_display_name, expected, computed
            )));
        }
        debug!("MD5 verified for {}", file_display_name);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_md5_etag_detection() {
        assert!(md5_etag(Some("9e107d9d372bb6826bd81d3542a419d6")).is_some());
        assert!(md5_etag(Some("9e107d9d372bb6826bd81d3542a419d6-4")).is_none());
        assert!(md5_etag(Some("CJ3X0Nq95/ECEAE=")).is_none());
        assert!(md5_etag(None).is_none());
    }

    #[tokio::test]
    async fn test_download_object_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("a/b/c.jp2", "payload");

        let target = dir.path().join("out").join("c.jp2");
        let written = download_object(&store, "a/b/c.jp2", &target).await.unwrap();
        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("c.jp2", "payload");
        store.set_etag("c.jp2", "00000000000000000000000000000000");

        let target = dir.path().join("c.jp2");
        let err = download_object(&store, "c.jp2", &target).await.unwrap_err();
        assert!(matches!(err, SentinelError::DownloadFailed(_)));
        assert!(!target.exists());
        assert!(!partial_path(&target).exists());
    }
}
