//! L1C → L2A conversion through the Sen2Cor `L2A_Process` binary.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info, warn};

/// Runs the atmospheric-correction processor on downloaded L1C products.
#[derive(Debug, Clone)]
pub struct Sen2CorConverter {
    binary: PathBuf,
}

impl Default for Sen2CorConverter {
    fn default() -> Self {
        Self::new("L2A_Process")
    }
}

impl Sen2CorConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Converts one product directory, returning whether the processor succeeded.
    ///
    /// A missing input is reported as `false`. Failing to launch the
    /// processor at all is an error.
    pub async fn convert_product(&self, input: &Path, output_dir: &Path) -> Result<bool> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            error!(
                "Check that your input tile directory exists: {}",
                input.display()
            );
            return Ok(false);
        }
        // Sen2Cor expects both folders inside the product
        tokio::fs::create_dir_all(input.join("AUX_DATA")).await?;
        tokio::fs::create_dir_all(input.join("HTML")).await?;

        info!("Started converting {}", input.display());
        let output = Command::new(&self.binary)
            .arg(format!("--output_dir={}", output_dir.display()))
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            info!(
                "✅ Successfully processed {}, results are stored at {}",
                input.display(),
                output_dir.display()
            );
            Ok(true)
        } else {
            error!(
                "❌ Conversion of {} failed ({}): {}",
                input.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Ok(false)
        }
    }

    /// Converts every entry of `input_dir`, returning the inputs that converted.
    pub async fn convert_all(&self, input_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let start_time = Instant::now();
        info!("Started converting L1C products into L2A products");
        tokio::fs::create_dir_all(output_dir).await?;

        if !tokio::fs::try_exists(input_dir).await.unwrap_or(false) {
            warn!(
                "Check that your input directory exists: {}",
                input_dir.display()
            );
            return Ok(Vec::new());
        }

        let mut inputs = Vec::new();
        let mut entries = tokio::fs::read_dir(input_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            inputs.push(entry.path());
        }
        inputs.sort();

        let mut converted = Vec::new();
        for input in inputs {
            if self.convert_product(&input, output_dir).await? {
                converted.push(input);
            }
        }

        let elapsed = Duration::from_secs(start_time.elapsed().as_secs());
        info!(
            "Finished converting {} product(s) in {}",
            converted.len(),
            humantime::format_duration(elapsed)
        );
        Ok(converted)
    }
}
