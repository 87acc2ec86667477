use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::media::selector::{self, SelectionError};
use crate::media::tool::MediaTool;
use crate::pipeline::task::{Task, TaskResult};

/// Terminal fetch failures; the display text is the reason reported to the user
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("no suitable formats found")]
    NoSuitableFormats,

    #[error("download failed: {0}")]
    Download(String),

    #[error("downloaded file not found")]
    FileNotFound,

    #[error("file too large: {size} exceeds {ceiling}")]
    TooLarge { size: u64, ceiling: u64 },

    #[error("local storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<SelectionError> for FetchError {
    fn from(_: SelectionError) -> Self {
        FetchError::NoSuitableFormats
    }
}

/// Turns a task into a downloaded file, or a failure reason
pub struct FetchExecutor {
    tool: Arc<dyn MediaTool>,
    download_dir: PathBuf,
    size_ceiling_bytes: u64,
}

impl FetchExecutor {
    pub fn new(tool: Arc<dyn MediaTool>, download_dir: impl Into<PathBuf>, size_ceiling_bytes: u64) -> Self {
        Self {
            tool,
            download_dir: download_dir.into(),
            size_ceiling_bytes,
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn size_ceiling_bytes(&self) -> u64 {
        self.size_ceiling_bytes
    }

    /// Run a task to exactly one terminal result
    pub async fn execute(&self, task: &Task) -> TaskResult {
        match self.fetch(task).await {
            Ok(path) => {
                info!("Task {} downloaded to {}", task.task_id, path.display());
                TaskResult::completed(task, path)
            }
            Err(e) => {
                warn!("Task {} failed: {}", task.task_id, e);
                TaskResult::failed(task, e.to_string())
            }
        }
    }

    async fn fetch(&self, task: &Task) -> Result<PathBuf, FetchError> {
        let listing = self
            .tool
            .list_renditions(&task.source_url)
            .await
            .map_err(|e| FetchError::Extraction(e.to_string()))?;

        let source_ratio = listing.source_aspect_ratio();
        let renditions = listing.muxed_renditions();
        if renditions.is_empty() {
            return Err(FetchError::NoSuitableFormats);
        }

        let chosen = selector::select(&renditions, source_ratio, self.size_ceiling_bytes)?;
        debug!(
            "Task {} selected format {} ({} candidates, source ratio {:?})",
            task.task_id,
            chosen.format_id,
            renditions.len(),
            source_ratio
        );

        let stem = Uuid::new_v4().to_string();
        let template = self.download_dir.join(format!("{}.%(ext)s", stem));

        if let Err(e) = self
            .tool
            .download_rendition(&task.source_url, &chosen.format_id, &template)
            .await
        {
            self.remove_by_stem(&stem).await;
            return Err(FetchError::Download(e.to_string()));
        }

        let path = self.find_by_stem(&stem).await?.ok_or(FetchError::FileNotFound)?;

        let size = tokio::fs::metadata(&path).await?.len();
        if size > self.size_ceiling_bytes {
            tokio::fs::remove_file(&path).await?;
            return Err(FetchError::TooLarge {
                size,
                ceiling: self.size_ceiling_bytes,
            });
        }

        Ok(path)
    }

    async fn find_by_stem(&self, stem: &str) -> std::io::Result<Option<PathBuf>> {
        Ok(self.matching_files(stem).await?.into_iter().next())
    }

    async fn matching_files(&self, stem: &str) -> std::io::Result<Vec<PathBuf>> {
        let mut matches = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.download_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let is_match = entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.starts_with(stem));
            if is_match && entry.file_type().await?.is_file() {
                matches.push(entry.path());
            }
        }

        matches.sort();
        Ok(matches)
    }

    // Partial downloads share the stem; nothing else in the directory does
    async fn remove_by_stem(&self, stem: &str) {
        let files = match self.matching_files(stem).await {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to scan {} for leftovers: {}", self.download_dir.display(), e);
                return;
            }
        };

        for file in files {
            match tokio::fs::remove_file(&file).await {
                Ok(()) => debug!("Removed partial download {}", file.display()),
                Err(e) => warn!("Failed to remove partial download {}: {}", file.display(), e),
            }
        }
    }
}
