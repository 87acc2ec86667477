use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::storage::queue::WorkQueue;

struct Lane {
    sender: mpsc::UnboundedSender<String>,
    receiver: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Lane {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

/// In-process queue with one unbounded FIFO channel per lane.
///
/// Lanes are created on first use and live as long as the queue.
#[derive(Default)]
pub struct MemoryQueue {
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lane(&self, name: &str) -> Arc<Lane> {
        let mut lanes = self.lanes.lock().await;
        lanes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Lane::new()))
            .clone()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn publish(&self, lane: &str, payload: &str) -> Result<()> {
        self.lane(lane)
            .await
            .sender
            .send(payload.to_string())
            .map_err(|_| anyhow::anyhow!("Lane {} is closed", lane))
    }

    async fn consume(&self, lane: &str) -> Result<String> {
        let lane_handle = self.lane(lane).await;
        let mut receiver = lane_handle.receiver.lock().await;
        receiver
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("Lane {} is closed", lane))
    }

    async fn pending(&self, lane: &str) -> Result<usize> {
        let lane_handle = self.lane(lane).await;
        // A consumer blocked in recv holds the receiver; its lane is empty by definition
        let pending = match lane_handle.receiver.try_lock() {
            Ok(receiver) => receiver.len(),
            Err(_) => 0,
        };
        Ok(pending)
    }
}
