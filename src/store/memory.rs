//! In-memory object store.

use super::{ObjectDownload, ObjectInfo, ObjectStore};
use crate::error::{Result, SentinelError};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Object store backed by a map, with hooks for simulating failures.
///
/// Every download is counted, and the highest number of downloads observed
/// running at once is recorded.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    failing: Mutex<HashSet<String>>,
    etags: Mutex<HashMap<String, String>>,
    latency: Duration,
    downloads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every download waits this long before returning.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(name.into(), data.into());
        }
    }

    /// Makes every download of `name` fail.
    pub fn fail_on(&self, name: impl Into<String>) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(name.into());
        }
    }

    /// Advertises `etag` for `name` instead of the content MD5.
    pub fn set_etag(&self, name: impl Into<String>, etag: impl Into<String>) {
        if let Ok(mut etags) = self.etags.lock() {
            etags.insert(name.into(), etag.into());
        }
    }

    /// Number of download calls so far, failed ones included.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Highest number of downloads that were running at the same time.
    pub fn max_concurrent_downloads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn objects(&self) -> Result<MutexGuard<'_, BTreeMap<String, Bytes>>> {
        self.objects
            .lock()
            .map_err(|_| SentinelError::Store("object map lock poisoned".to_string()))
    }

    fn is_failing(&self, name: &str) -> bool {
        self.failing
            .lock()
            .map(|failing| failing.contains(name))
            .unwrap_or(false)
    }

    fn etag_for(&self, name: &str, data: &Bytes) -> String {
        self.etags
            .lock()
            .ok()
            .and_then(|etags| etags.get(name).cloned())
            .unwrap_or_else(|| format!("{:x}", Md5::digest(data)))
    }
}

/// Counts a running download until dropped, cancelled futures included.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let running = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(running, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_prefixes(&self, prefix: &str, delimiter: &str) -> Result<BTreeSet<String>> {
        let objects = self.objects()?;
        let prefixes = objects
            .range(prefix.to_string()..)
            .map(|(name, _)| name)
            .take_while(|name| name.starts_with(prefix))
            .filter_map(|name| {
                let rest = &name[prefix.len()..];
                rest.find(delimiter)
                    .map(|end| format!("{}{}", prefix, &rest[..end + delimiter.len()]))
            })
            .collect();
        Ok(prefixes)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let objects = self.objects()?;
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, data)| ObjectInfo::new(name.clone(), Some(data.len() as u64)))
            .collect())
    }

    async fn download(&self, name: &str) -> Result<ObjectDownload> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        {
            let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
        }

        if self.is_failing(name) {
            return Err(SentinelError::Store(format!("simulated failure for {}", name)));
        }
        let data = self
            .objects()?
            .get(name)
            .cloned()
            .ok_or_else(|| SentinelError::Store(format!("No such object: {}", name)))?;

        Ok(ObjectDownload {
            content_length: Some(data.len() as u64),
            etag: Some(self.etag_for(name, &data)),
            body: stream::once(async move { Ok(data) }).boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_prefixes_with_delimiter() {
        let store = MemoryStore::new();
        store.insert("tiles/36/U/YA/A.SAFE/manifest.safe", "a");
        store.insert("tiles/36/U/YA/A.SAFE/GRANULE/x/MTD_TL.xml", "b");
        store.insert("tiles/36/U/YA/B.SAFE/manifest.safe", "c");
        store.insert("tiles/36/U/YA/A.SAFE_$folder$", "");
        store.insert("tiles/36/U/YB/C.SAFE/manifest.safe", "d");

        let prefixes = store.list_prefixes("tiles/36/U/YA/", "/").await.unwrap();
        let expected: BTreeSet<String> = ["tiles/36/U/YA/A.SAFE/", "tiles/36/U/YA/B.SAFE/"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(prefixes, expected);

        let objects = store.list_objects("tiles/36/U/YA/A.SAFE/").await.unwrap();
        assert_eq!(objects.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_download_leaves_counter_balanced() {
        let store = MemoryStore::new().with_latency(Duration::from_millis(200));
        store.insert("a", "x");

        let cancelled = tokio::time::timeout(Duration::from_millis(10), store.download("a")).await;
        assert!(cancelled.is_err());
        assert_eq!(store.in_flight.load(Ordering::SeqCst), 0);

        assert!(store.download("a").await.is_ok());
        assert_eq!(store.max_concurrent_downloads(), 1);
    }

    #[tokio::test]
    async fn test_fetch_and_failures() {
        let store = MemoryStore::new();
        store.insert("a", "hello");
        store.insert("b", "world");
        store.fail_on("b");

        assert_eq!(store.fetch("a").await.unwrap(), Bytes::from("hello"));
        assert!(store.fetch("b").await.is_err());
        assert!(store.fetch("missing").await.is_err());
        assert_eq!(store.download_count(), 3);
    }
}
