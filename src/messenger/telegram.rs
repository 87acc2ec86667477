use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::messenger::{DeliveryError, Messenger};

/// Error body returned by the Bot API
#[derive(Debug, Deserialize)]
struct ApiReply {
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API client
pub struct TelegramMessenger {
    client: Client,
    /// `<base>/bot<token>`; never logged
    endpoint: String,
}

impl TelegramMessenger {
    pub fn new(api_base_url: &str, bot_token: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", api_base_url.trim_end_matches('/'), bot_token),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    async fn check(response: Response) -> Result<(), DeliveryError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let description = match response.json::<ApiReply>().await {
            Ok(ApiReply { description: Some(text) }) => text,
            _ => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };

        Err(DeliveryError::Api {
            status: status.as_u16(),
            description,
        })
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, destination: &str, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": destination, "text": text }))
            .send()
            .await?;

        Self::check(response).await?;
        info!("Message sent to chat {}: {}", destination, text);
        Ok(())
    }

    async fn send_file(&self, destination: &str, path: &Path) -> Result<(), DeliveryError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| DeliveryError::File {
            path: path.display().to_string(),
            source,
        })?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        debug!("Uploading {} ({} bytes) to chat {}", file_name, bytes.len(), destination);

        let form = Form::new()
            .text("chat_id", destination.to_string())
            .part("video", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .send()
            .await?;

        Self::check(response).await?;
        info!("Video sent to chat {}: {}", destination, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn messenger(server: &MockServer) -> TelegramMessenger {
        TelegramMessenger::new(&server.uri(), "TOKEN", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_send_text_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_json(json!({"chat_id": "42", "text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        messenger(&server).send_text("42", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_rejection_carries_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let err = messenger(&server).send_text("0", "hello").await.unwrap_err();
        match err {
            DeliveryError::Api { status, description } => {
                assert_eq!(status, 400);
                assert_eq!(description, "Bad Request: chat not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_file_uploads_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendVideo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"not really a video").unwrap();

        messenger(&server).send_file("42", &file).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"chat_id\""));
        assert!(body.contains("filename=\"clip.mp4\""));
    }

    #[tokio::test]
    async fn test_missing_file_is_reported() {
        let server = MockServer::start().await;
        let err = messenger(&server)
            .send_file("42", Path::new("/nonexistent/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::File { .. }));
    }

    #[test]
    fn test_trailing_slash_in_base_url() {
        let messenger = TelegramMessenger::new("https://api.example.org/", "T", Duration::from_secs(1)).unwrap();
        assert_eq!(messenger.method_url("sendMessage"), "https://api.example.org/botT/sendMessage");
    }
}
