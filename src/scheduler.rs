//! Concurrent retrieval of resolved assets.

use crate::download::{download_object, partial_path};
use crate::error::{Result, SentinelError};
use crate::store::ObjectStore;
use crate::types::{Asset, DownloadConfig, DownloadOutcome, OutcomeStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Semaphore;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, error, info, warn};

const PROGRESS_TEMPLATE: &str = concat!(
    "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | ",
    "{elapsed_precise} elapsed, ETA {eta_precise}"
);

/// Downloads assets with a bounded number of concurrent transfers.
///
/// Each asset is handled independently: a failed transfer yields a failed
/// outcome for that asset only, and files already on disk are never
/// downloaded again.
pub struct DownloadScheduler {
    store: Arc<dyn ObjectStore>,
    config: DownloadConfig,
}

impl DownloadScheduler {
    pub fn new(store: Arc<dyn ObjectStore>, config: DownloadConfig) -> Result<Self> {
        if config.max_concurrent_downloads == 0 {
            return Err(SentinelError::Config(
                "At least one download worker is required".to_string(),
            ));
        }
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Fetches every asset into `output_dir`.
    ///
    /// Folder markers become directories and files already present are
    /// skipped with a refreshed modification time. At most
    /// `max_concurrent_downloads` transfers run at once.
    ///
    /// # Arguments
    ///
    /// * `assets` - Resolved assets; their relative paths are joined to `output_dir`
    /// * `output_dir` - Root directory for the local copies
    ///
    /// # Returns
    ///
    /// One outcome per asset, in input order. A failed transfer is reported
    /// in its outcome and never aborts the batch.
    pub async fn fetch(&self, assets: Vec<Asset>, output_dir: &Path) -> Vec<DownloadOutcome> {
        let pb = self.progress_bar(assets.len() as u64);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_downloads));

        let mut tasks = Vec::with_capacity(assets.len());
        for asset in assets {
            let name = asset.name.clone();
            let ctx = TransferContext {
                store: Arc::clone(&self.store),
                config: self.config.clone(),
                semaphore: Arc::clone(&semaphore),
                output_dir: output_dir.to_path_buf(),
            };
            let pb_clone = pb.clone();

            let task = tokio::spawn(async move {
                let outcome = fetch_one(ctx, asset).await;
                pb_clone.inc(1);
                outcome
            });
            tasks.push((name, task));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (name, task) in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!("Task join error for {}: {}", name, e);
                    outcomes.push(failed(name, format!("Task failed: {}", e)));
                }
            }
        }

        pb.finish_and_clear();
        outcomes
    }

    fn progress_bar(&self, len: u64) -> indicatif::ProgressBar {
        if !self.config.show_progress {
            return indicatif::ProgressBar::hidden();
        }
        let pb = indicatif::ProgressBar::new(len);
        let style = indicatif::ProgressStyle::default_bar().template(PROGRESS_TEMPLATE);
        if let Ok(style) = style {
            pb.set_style(style.progress_chars("█▓▒░ "));
        }
        pb.set_message(format!("📦 Downloading {} assets", len));
        pb
    }
}

/// Everything a transfer task owns.
struct TransferContext {
    store: Arc<dyn ObjectStore>,
    config: DownloadConfig,
    semaphore: Arc<Semaphore>,
    output_dir: PathBuf,
}

async fn fetch_one(ctx: TransferContext, asset: Asset) -> DownloadOutcome {
    let target = asset.local_path(&ctx.output_dir);

    if asset.is_directory_marker {
        return match tokio::fs::create_dir_all(&target).await {
            Ok(()) => DownloadOutcome {
                remote_name: asset.name,
                local_path: Some(target),
                status: OutcomeStatus::DirectoryCreated,
            },
            Err(e) => {
                error!("Cannot create directory {}: {}", target.display(), e);
                failed(asset.name, e.to_string())
            }
        };
    }

    if is_file(&target).await {
        info!("Asset exists: {}", target.display());
        if let Err(e) = touch(&target).await {
            warn!(
                "Failed to refresh modification time of {}: {}",
                target.display(),
                e
            );
        }
        return DownloadOutcome {
            remote_name: asset.name,
            local_path: Some(target),
            status: OutcomeStatus::Skipped,
        };
    }

    let _permit = match ctx.semaphore.acquire().await {
        Ok(permit) => permit,
        Err(e) => return failed(asset.name, e.to_string()),
    };
    debug!("Loading {} to {}", asset.name, target.display());

    match transfer(&ctx, &asset.name, &target).await {
        Ok(bytes) => {
            debug!("✅ {} ({} bytes)", target.display(), bytes);
            DownloadOutcome {
                remote_name: asset.name,
                local_path: Some(target),
                status: OutcomeStatus::Downloaded,
            }
        }
        Err(e) => {
            error!("❌ Error while loading {}: {}", asset.name, e);
            failed(asset.name, e.to_string())
        }
    }
}

/// One transfer with per-attempt timeout and fixed-interval retries.
async fn transfer(ctx: &TransferContext, name: &str, target: &Path) -> Result<u64> {
    let retry_strategy = tokio_retry2::strategy::FixedInterval::new(ctx.config.retry_interval)
        .take(ctx.config.retry_attempts);
    let timeout = ctx.config.transfer_timeout;

    Retry::spawn(retry_strategy, || {
        let store = Arc::clone(&ctx.store);
        let name = name.to_string();
        let target = target.to_path_buf();

        async move {
            let attempt = download_object(store.as_ref(), &name, &target);
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, attempt).await {
                    Ok(result) => result,
                    Err(_) => {
                        // The dropped transfer never got to clean up after itself
                        let _ = tokio::fs::remove_file(partial_path(&target)).await;
                        Err(SentinelError::Timeout {
                            name: name.clone(),
                            after: limit,
                        })
                    }
                },
                None => attempt.await,
            };
            match result {
                Ok(bytes) => Ok(bytes),
                Err(e) => {
                    warn!("Failed to download {} due to error: {}", name, e);
                    RetryError::to_transient(e)
                }
            }
        }
    })
    .await
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Refreshes the modification time so recency-based cache eviction keeps the file.
async fn touch(path: &Path) -> std::io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        // futimens only needs ownership, so read-only cache files work too
        let file = std::fs::File::open(&path)?;
        file.set_modified(SystemTime::now())
    })
    .await
    .map_err(|e| std::io::Error::other(format!("Task join error: {}", e)))?
}

fn failed(remote_name: String, reason: String) -> DownloadOutcome {
    DownloadOutcome {
        remote_name,
        local_path: None,
        status: OutcomeStatus::Failed(reason),
    }
}
