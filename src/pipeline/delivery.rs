use anyhow::Result;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

use crate::messenger::{DeliveryError, Messenger};
use crate::pipeline::task::{Outcome, TaskResult};
use crate::pipeline::Lanes;
use crate::storage::queue::WorkQueue;
use crate::utils::{MetricsCollector, Shutdown};

pub fn success_notice(task_id: &str) -> String {
    format!("Video for task {} successfully sent!", task_id)
}

pub fn failure_notice(task_id: &str, reason: &str) -> String {
    format!("Failed to download video for task {}: {}", task_id, reason)
}

pub fn unknown_notice(task_id: &str) -> String {
    format!("Unknown status for task {}. Please contact support.", task_id)
}

pub fn error_notice(task_id: &str, error: &str) -> String {
    format!("Error processing task {}: {}", task_id, error)
}

/// Consumes results and forwards them to their conversation
pub struct DeliveryStage {
    queue: Arc<dyn WorkQueue>,
    lanes: Lanes,
    messenger: Arc<dyn Messenger>,
    metrics: MetricsCollector,
    retry_delay: Duration,
}

impl DeliveryStage {
    pub fn new(queue: Arc<dyn WorkQueue>, lanes: Lanes, messenger: Arc<dyn Messenger>, retry_delay: Duration) -> Self {
        Self {
            queue,
            lanes,
            messenger,
            metrics: MetricsCollector::new("delivery"),
            retry_delay,
        }
    }

    /// Block for a result, forward it, repeat. Results are never re-enqueued.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<()> {
        info!("Delivery stage consuming {}", self.lanes.outbound);

        while !shutdown.is_requested() {
            // Dropping a BLPOP in flight can lose an item Redis already popped
            let payload = tokio::select! {
                _ = shutdown.requested() => break,
                item = self.queue.consume(&self.lanes.outbound) => item,
            };

            match payload {
                Ok(payload) => self.handle(&payload).await,
                Err(e) => {
                    error!("Error in delivery loop: {:#}", e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }

        info!("Delivery stage stopped. {}", self.metrics.get_metrics().await.summary());
        Ok(())
    }

    /// Forward one outbound payload; failures are logged, never propagated
    pub async fn handle(&self, payload: &str) {
        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                error!("Dropping unreadable result {:?}: {}", payload, e);
                self.metrics.record_malformed().await;
                return;
            }
        };

        match serde_json::from_value::<TaskResult>(value.clone()) {
            Ok(result) => {
                let span = info_span!("task", task_id = %result.task_id);
                self.deliver(&result).instrument(span).await;
            }
            Err(e) => {
                warn!("Malformed result {}: {}", value, e);
                self.metrics.record_malformed().await;
                self.notify_malformed(&value).await;
            }
        }
    }

    async fn deliver(&self, result: &TaskResult) {
        info!("Processing result for task {}, chat {}", result.task_id, result.destination);
        let timer = self.metrics.start_timer();

        match &result.outcome {
            Outcome::Completed { file_path } => {
                let bytes = tokio::fs::metadata(file_path).await.map(|m| m.len()).unwrap_or(0);
                let uploaded = self.messenger.send_file(&result.destination, file_path).await;
                remove_file(file_path).await;
                let sent = match uploaded {
                    Ok(()) => self.send_or_report(result, &success_notice(&result.task_id)).await,
                    Err(e) => {
                        self.report_error(result, &e).await;
                        false
                    }
                };
                let bytes = if sent { bytes } else { 0 };
                self.metrics.record(sent, timer.end(), bytes).await;
            }
            Outcome::Failed { reason } => {
                let notice = failure_notice(&result.task_id, reason);
                let sent = self.send_or_report(result, &notice).await;
                self.metrics.record_notice(sent, timer.end()).await;
            }
        }

        info!("{}", self.metrics.get_metrics().await.summary());
    }

    async fn send_or_report(&self, result: &TaskResult, text: &str) -> bool {
        match self.messenger.send_text(&result.destination, text).await {
            Ok(()) => true,
            Err(e) => {
                self.report_error(result, &e).await;
                false
            }
        }
    }

    // Best effort: the chat may be the thing that is failing
    async fn report_error(&self, result: &TaskResult, error: &DeliveryError) {
        error!("Error processing task {}: {}", result.task_id, error);

        let notice = error_notice(&result.task_id, &error.to_string());
        if let Err(e) = self.messenger.send_text(&result.destination, &notice).await {
            error!("Failed to notify chat {} about task {}: {}", result.destination, result.task_id, e);
        }
    }

    async fn notify_malformed(&self, value: &Value) {
        let Some(destination) = field(value, "destination").or_else(|| field(value, "chat_id")) else {
            error!("Result has no destination, nobody to notify: {}", value);
            return;
        };
        let task_id = field(value, "task_id").unwrap_or_else(|| "unknown".to_string());

        if let Err(e) = self.messenger.send_text(&destination, &unknown_notice(&task_id)).await {
            error!("Failed to notify chat {} about task {}: {}", destination, task_id, e);
        }
    }
}

/// String or integer field as text; chat ids are often numeric
fn field(value: &Value, name: &str) -> Option<String> {
    match value.get(name)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!("File deleted: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
}
