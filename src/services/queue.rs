use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

pub const QUEUE_KEY: &str = "compression_queue";

/// Hand-off channel carrying bare job ids from producers to workers.
///
/// Ordering is not part of the contract. Duplicate ids are tolerated: a
/// worker only runs a job it can claim from `pending` in the store.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Destructively pop one id. Two concurrent calls never return the same
    /// entry.
    async fn dequeue(&self) -> Result<Option<Uuid>, QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    /// Distinct ids currently waiting. Malformed entries are skipped.
    async fn queued_ids(&self) -> Result<HashSet<Uuid>, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis list queue. Entries are pushed on the right and popped from the
/// left; `LPOP` provides the exclusivity.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
}

impl RedisQueue {
    /// Open the process-wide multiplexed connection.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(QUEUE_KEY, job_id.to_string()).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Uuid>, QueueError> {
        let mut conn = self.conn.clone();
        let entry: Option<String> = conn.lpop(QUEUE_KEY, None).await?;

        entry
            .map(|raw| Uuid::parse_str(raw.trim()).map_err(|_| QueueError::MalformedEntry(raw)))
            .transpose()
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }

    async fn queued_ids(&self) -> Result<HashSet<Uuid>, QueueError> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = conn.lrange(QUEUE_KEY, 0, -1).await?;
        Ok(entries
            .iter()
            .filter_map(|raw| Uuid::parse_str(raw.trim()).ok())
            .collect())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process FIFO used by tests and single-process runs.
#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<Uuid>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of queued ids, front first.
    pub fn snapshot(&self) -> Vec<Uuid> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().copied().collect()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job_id);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Uuid>, QueueError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.len() as u64)
    }

    async fn queued_ids(&self) -> Result<HashSet<Uuid>, QueueError> {
        Ok(self.snapshot().into_iter().collect())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The entry was already popped; it is reported so the caller can log it.
    #[error("Queue entry is not a job id: {0:?}")]
    MalformedEntry(String),
}
