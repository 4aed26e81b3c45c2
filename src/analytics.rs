use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::offer::Offer;
use crate::{Error, Result};

/// Best-effort export of offers for later analysis.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Writes `offers` below `prefix` and returns where they landed.
    async fn write(&self, prefix: &str, offers: &[Offer]) -> Result<String>;
}

/// Writes one JSON-lines file per run to `{root}/{prefix}/{timestamp}.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    root: PathBuf,
}

impl JsonLinesSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl AnalyticsSink for JsonLinesSink {
    async fn write(&self, prefix: &str, offers: &[Offer]) -> Result<String> {
        let mut lines = String::new();
        for offer in offers {
            lines.push_str(&serde_json::to_string(offer)?);
            lines.push('\n');
        }

        let dir = self.root.join(prefix.trim_matches('/'));
        let file_name = format!(
            "{}.jsonl",
            Utc::now()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .replace(':', "-")
        );
        let path = dir.join(file_name);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::AnalyticsWrite(format!("{}: {e}", dir.display())))?;
        tokio::fs::write(&path, lines)
            .await
            .map_err(|e| Error::AnalyticsWrite(format!("{}: {e}", path.display())))?;

        info!(path = %path.display(), offers = offers.len(), "stored offers for analytics");
        Ok(path.display().to_string())
    }
}
