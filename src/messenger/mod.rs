pub mod telegram;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

pub use telegram::TelegramMessenger;

/// Failure to forward something to a conversation
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rejected by chat API ({status}): {description}")]
    Api { status: u16, description: String },

    #[error("cannot read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Conversation delivery capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text notice to `destination`
    async fn send_text(&self, destination: &str, text: &str) -> Result<(), DeliveryError>;

    /// Send the media file at `path` to `destination`
    async fn send_file(&self, destination: &str, path: &Path) -> Result<(), DeliveryError>;
}
