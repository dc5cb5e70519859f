//! Public Google Cloud Storage bucket accessed over plain HTTP.

use super::{ObjectDownload, ObjectInfo, ObjectStore};
use crate::error::{Result, SentinelError};
use crate::types::DownloadConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::debug;

/// One page of the JSON listing API.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    prefixes: Vec<String>,
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

impl ListPage {
    /// Moves the page's entries into the accumulators, returning the next page token.
    fn absorb(
        self,
        prefixes: &mut BTreeSet<String>,
        objects: &mut Vec<ObjectInfo>,
    ) -> Option<String> {
        prefixes.extend(self.prefixes);
        objects.extend(self.items.into_iter().map(|item| {
            let size = item.size.and_then(|s| s.parse().ok());
            ObjectInfo::new(item.name, size)
        }));
        self.next_page_token
    }
}

#[derive(Deserialize, Debug)]
struct ListItem {
    name: String,
    /// Sizes are serialized as decimal strings.
    size: Option<String>,
}

/// Client for a publicly readable bucket.
#[derive(Debug, Clone)]
pub struct GcsStore {
    client: reqwest::Client,
    store_url: String,
    bucket: String,
}

impl GcsStore {
    pub fn new(store_url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            store_url: store_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
        }
    }

    pub fn from_config(config: &DownloadConfig) -> Self {
        Self::new(&config.store_url, &config.bucket)
    }

    /// Walks every page of a listing.
    async fn list(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<(BTreeSet<String>, Vec<ObjectInfo>)> {
        let url = format!("{}/storage/v1/b/{}/o", self.store_url, self.bucket);
        let mut prefixes = BTreeSet::new();
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, &str)> = vec![("prefix", prefix)];
            if let Some(delimiter) = delimiter {
                query.push(("delimiter", delimiter));
            }
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }

            let response = self.client.get(&url).query(&query).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(SentinelError::Store(format!(
                    "Listing {} failed: HTTP {}",
                    prefix, status
                )));
            }
            let page: ListPage = response.json().await?;

            page_token = page.absorb(&mut prefixes, &mut objects);
            if page_token.is_none() {
                break;
            }
        }

        debug!(
            "Listed {}: {} prefixes, {} objects",
            prefix,
            prefixes.len(),
            objects.len()
        );
        Ok((prefixes, objects))
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn list_prefixes(&self, prefix: &str, delimiter: &str) -> Result<BTreeSet<String>> {
        let (prefixes, _) = self.list(prefix, Some(delimiter)).await?;
        Ok(prefixes)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let (_, objects) = self.list(prefix, None).await?;
        Ok(objects)
    }

    async fn download(&self, name: &str) -> Result<ObjectDownload> {
        let url = format!("{}/{}/{}", self.store_url, self.bucket, name);
        let response = self.client.get(&url).send().await?.error_for_status()?;

        let content_length = response.content_length();
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(SentinelError::from))
            .boxed();

        Ok(ObjectDownload {
            content_length,
            etag,
            body,
        })
    }
}
