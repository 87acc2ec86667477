use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::media::rendition::MediaListing;

/// Failure of the external extraction/download tool
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Exit {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("unreadable metadata: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Capability that lists and materializes renditions of remote media
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// List the renditions available for `url`
    async fn list_renditions(&self, url: &str) -> Result<MediaListing, ToolError>;

    /// Download `format_id` of `url` to `output_template`.
    ///
    /// The template's file name is `<stem>.%(ext)s`; the tool substitutes the
    /// extension, so callers locate the result by stem.
    async fn download_rendition(
        &self,
        url: &str,
        format_id: &str,
        output_template: &Path,
    ) -> Result<(), ToolError>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}
