use anyhow::{Result, Context};
use async_trait::async_trait;
use redis::{Client, FromRedisValue, RedisResult, aio::MultiplexedConnection};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};
use tokio::sync::Mutex;
use std::sync::Arc;

use crate::cli::config::{QueueBackend, QueueSettings};
use crate::storage::memory::MemoryQueue;

/// Durable FIFO lanes shared between stages.
///
/// `consume` blocks until an item is available and removes it. An item popped
/// by a consumer that then crashes is lost.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append an item to the tail of `lane`
    async fn publish(&self, lane: &str, payload: &str) -> Result<()>;

    /// Wait for the head of `lane`, remove it and return it
    async fn consume(&self, lane: &str) -> Result<String>;

    /// Number of items waiting in `lane`
    async fn pending(&self, lane: &str) -> Result<usize>;
}

/// Encode `item` as JSON and publish it
pub async fn publish_json<T: Serialize + Sync>(queue: &dyn WorkQueue, lane: &str, item: &T) -> Result<()> {
    let payload = serde_json::to_string(item)
        .context("Failed to serialize queue item")?;
    queue.publish(lane, &payload).await
}

/// Decode a consumed payload
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T> {
    serde_json::from_str(payload).context("Failed to deserialize queue item")
}

/// Open the configured queue backend
pub async fn open(settings: &QueueSettings) -> Result<Arc<dyn WorkQueue>> {
    match settings.backend {
        QueueBackend::Redis => Ok(Arc::new(RedisQueue::connect(&settings.redis_url).await?)),
        QueueBackend::Memory => Ok(Arc::new(MemoryQueue::new())),
    }
}

/// Redis list-backed queue: RPUSH to append, BLPOP to pop
pub struct RedisQueue {
    /// Redis client, used to reopen the connection after it breaks
    client: Client,

    /// Shared connection; a blocked BLPOP holds it until an item arrives.
    /// `None` after an I/O failure until the next command reconnects.
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisQueue {
    /// Connect to the Redis server at `redis_url`
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .context(format!("Failed to connect to Redis at {}", redis_url))?;

        let conn = client.get_multiplexed_async_connection().await
            .context("Failed to get Redis connection")?;

        debug!("Connected to Redis at {}", redis_url);

        Ok(Self {
            client,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Run `cmd`, reconnecting first if the previous connection broke
    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> RedisResult<T> {
        let mut slot = self.conn.lock().await;

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                let conn = self.client.get_multiplexed_async_connection().await?;
                info!("Reconnected to Redis");
                conn
            }
        };

        let result = cmd.query_async(&mut conn).await;
        match &result {
            Err(e) if e.is_io_error() || e.is_connection_dropped() => {
                warn!("Redis connection lost, reconnecting on next command: {}", e);
            }
            _ => *slot = Some(conn),
        }

        result
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn publish(&self, lane: &str, payload: &str) -> Result<()> {
        self.query::<()>(redis::cmd("RPUSH").arg(lane).arg(payload))
            .await
            .context(format!("Failed to push item to lane {}", lane))?;

        debug!("Pushed item to lane {}", lane);

        Ok(())
    }

    async fn consume(&self, lane: &str) -> Result<String> {
        // Timeout 0 blocks until an item arrives
        let (_key, payload): (String, String) = self
            .query(redis::cmd("BLPOP").arg(lane).arg(0))
            .await
            .context(format!("Failed to pop item from lane {}", lane))?;

        debug!("Popped item from lane {}", lane);

        Ok(payload)
    }

    async fn pending(&self, lane: &str) -> Result<usize> {
        let count: usize = self
            .query(redis::cmd("LLEN").arg(lane))
            .await
            .context("Failed to get lane length")?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::task::Task;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn count_commands(chunk: &[u8]) -> usize {
        (0..chunk.len())
            .filter(|&i| chunk[i] == b'*' && (i == 0 || chunk[..i].ends_with(b"\r\n")))
            .count()
    }

    /// Minimal RESP server answering `:1` to everything. The first connection
    /// is closed right after it answers an RPUSH, like a restarting server.
    async fn restarting_redis() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        let chunk = &buf[..n];
                        for _ in 0..count_commands(chunk) {
                            if socket.write_all(b":1\r\n").await.is_err() {
                                return;
                            }
                        }
                        if first && chunk.windows(5).any(|w| w == b"RPUSH") {
                            return;
                        }
                    }
                });
            }
        });

        (url, accepted)
    }

    #[tokio::test]
    async fn test_open_memory_backend() {
        let settings = QueueSettings {
            backend: QueueBackend::Memory,
            ..Default::default()
        };
        let queue = open(&settings).await.unwrap();

        queue.publish("lane", "item").await.unwrap();
        assert_eq!(queue.pending("lane").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let queue = MemoryQueue::new();
        let task = Task::new("https://example.com/v", "42");

        publish_json(&queue, "download_tasks", &task).await.unwrap();
        let payload = queue.consume("download_tasks").await.unwrap();
        let decoded: Task = decode(&payload).unwrap();

        assert_eq!(decoded, task);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode::<Task>("not json").is_err());
    }

    #[tokio::test]
    async fn test_invalid_redis_url() {
        assert!(RedisQueue::connect("not-a-url").await.is_err());
    }

    #[tokio::test]
    async fn test_redis_queue_reconnects_after_connection_loss() {
        let (url, accepted) = restarting_redis().await;
        let queue = RedisQueue::connect(&url).await.unwrap();

        queue.publish("lane", "item").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut recovered = false;
        for _ in 0..3 {
            if queue.publish("lane", "item").await.is_ok() {
                recovered = true;
                break;
            }
        }

        assert!(recovered);
        assert!(accepted.load(Ordering::SeqCst) >= 2);
    }
}
