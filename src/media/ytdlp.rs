use anyhow::{Context, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

use crate::media::rendition::MediaListing;
use crate::media::tool::{MediaTool, ToolError};

const BINARY: &str = "yt-dlp";

/// Longest stderr excerpt carried into a failure reason
const STDERR_LIMIT: usize = 500;

/// `yt-dlp` invoked as a child process
pub struct YtDlp {
    binary_path: PathBuf,
}

impl YtDlp {
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Use the configured path, or find `yt-dlp` on PATH
    pub fn locate(configured: Option<&Path>) -> Result<Self> {
        let binary_path = match configured {
            Some(path) => path.to_path_buf(),
            None => which::which(BINARY).context(format!("{} not found in PATH", BINARY))?,
        };
        debug!("Using {} at {}", BINARY, binary_path.display());
        Ok(Self::new(binary_path))
    }

    async fn run(&self, args: &[&OsStr]) -> Result<Output, ToolError> {
        let output = Command::new(&self.binary_path)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ToolError::Spawn {
                tool: BINARY.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolError::Exit {
                tool: BINARY.to_string(),
                status: output.status.to_string(),
                stderr: stderr_excerpt(&output.stderr),
            });
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaTool for YtDlp {
    async fn list_renditions(&self, url: &str) -> Result<MediaListing, ToolError> {
        let output = self
            .run(&[OsStr::new("--dump-json"), OsStr::new("--no-playlist"), OsStr::new(url)])
            .await?;

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn download_rendition(
        &self,
        url: &str,
        format_id: &str,
        output_template: &Path,
    ) -> Result<(), ToolError> {
        self.run(&[
            OsStr::new("-f"),
            OsStr::new(format_id),
            OsStr::new("-o"),
            output_template.as_os_str(),
            OsStr::new("--no-playlist"),
            OsStr::new(url),
        ])
        .await?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        BINARY
    }
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.chars().count() <= STDERR_LIMIT {
        return text.to_string();
    }
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_LIMIT - 1)
        .map_or(0, |(index, _)| index);
    format!("...{}", &text[start..])
}
