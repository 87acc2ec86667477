use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};

use crate::media::FetchExecutor;
use crate::pipeline::task::{Outcome, Task, TaskResult};
use crate::pipeline::Lanes;
use crate::storage::queue::{self, WorkQueue};
use crate::utils::{MetricsCollector, Shutdown};

/// Attempts at handing a result to the outbound lane before giving it up
const PUBLISH_ATTEMPTS: u32 = 5;

/// Consumes tasks, downloads them and publishes one result per task
pub struct FetchStage {
    queue: Arc<dyn WorkQueue>,
    lanes: Lanes,
    executor: FetchExecutor,
    metrics: MetricsCollector,
    retry_delay: Duration,
}

impl FetchStage {
    pub fn new(queue: Arc<dyn WorkQueue>, lanes: Lanes, executor: FetchExecutor, retry_delay: Duration) -> Self {
        Self {
            queue,
            lanes,
            executor,
            metrics: MetricsCollector::new("fetch"),
            retry_delay,
        }
    }

    /// Block for a task, process it to a terminal result, publish, repeat
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<()> {
        tokio::fs::create_dir_all(self.executor.download_dir()).await?;
        info!(
            "Fetch stage consuming {} -> {} (ceiling {} bytes)",
            self.lanes.inbound,
            self.lanes.outbound,
            self.executor.size_ceiling_bytes()
        );

        while !shutdown.is_requested() {
            // Dropping a BLPOP in flight can lose an item Redis already popped
            let payload = tokio::select! {
                _ = shutdown.requested() => break,
                item = self.queue.consume(&self.lanes.inbound) => item,
            };

            match payload {
                Ok(payload) => {
                    if let Err(e) = self.handle(&payload).await {
                        error!("Error in fetch loop: {:#}", e);
                    }
                }
                Err(e) => {
                    error!("Error in fetch loop: {:#}", e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }

        info!("Fetch stage stopped. {}", self.metrics.get_metrics().await.summary());
        Ok(())
    }

    /// Process one inbound payload.
    ///
    /// Returns the published result, or `None` when the payload was not a task.
    pub async fn handle(&self, payload: &str) -> Result<Option<TaskResult>> {
        let task: Task = match queue::decode(payload) {
            Ok(task) => task,
            Err(e) => {
                warn!("Dropping malformed task {:?}: {:#}", payload, e);
                self.metrics.record_malformed().await;
                return Ok(None);
            }
        };

        let span = info_span!("task", task_id = %task.task_id);
        let result = self.process(&task).instrument(span).await;

        if let Err(e) = self.publish_result(&result).await {
            // Unpublished, the file has no owner left
            if let Outcome::Completed { file_path } = &result.outcome {
                match tokio::fs::remove_file(file_path).await {
                    Ok(()) => info!("Removed undeliverable download {}", file_path.display()),
                    Err(remove_err) => warn!("Failed to remove {}: {}", file_path.display(), remove_err),
                }
            }
            return Err(e.context(format!("Result for task {} was not published", task.task_id)));
        }
        info!("Published result for task {}", task.task_id);

        Ok(Some(result))
    }

    async fn publish_result(&self, result: &TaskResult) -> Result<()> {
        let mut attempt = 1;
        loop {
            match queue::publish_json(self.queue.as_ref(), &self.lanes.outbound, result).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < PUBLISH_ATTEMPTS => {
                    warn!(
                        "Publishing result for task {} failed (attempt {}/{}): {:#}",
                        result.task_id, attempt, PUBLISH_ATTEMPTS, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn process(&self, task: &Task) -> TaskResult {
        info!("Processing task {} for URL: {}", task.task_id, task.source_url);
        let timer = self.metrics.start_timer();

        let result = self.executor.execute(task).await;

        let bytes = match &result.outcome {
            Outcome::Completed { file_path } => tokio::fs::metadata(file_path)
                .await
                .map(|meta| meta.len())
                .unwrap_or(0),
            Outcome::Failed { .. } => 0,
        };
        self.metrics.record(result.is_completed(), timer.end(), bytes).await;
        info!("{}", self.metrics.get_metrics().await.summary());

        result
    }
}
