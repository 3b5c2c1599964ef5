use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::{self, queries::PgJobStore, JobStore};
use crate::services::queue::{QueueError, RedisQueue, WorkQueue};

/// Process-wide connections to the job store and work queue.
///
/// Each binary creates exactly one of these in `main` and hands clones of the
/// trait objects to the components it runs.
pub struct Backends {
    pool: PgPool,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
}

impl Backends {
    /// Connect to PostgreSQL and Redis. With `migrate` set, pending schema
    /// migrations are applied first.
    pub async fn init(config: &AppConfig, migrate: bool) -> Result<Self, StartupError> {
        tracing::info!("Connecting to PostgreSQL database");
        let pool = db::init_pool(&config.database_url).await?;

        if migrate {
            tracing::info!("Running database migrations");
            db::run_migrations(&pool).await?;
        }

        tracing::info!("Connecting to Redis work queue");
        let queue = RedisQueue::connect(&config.redis_url).await?;

        Ok(Self {
            store: Arc::new(PgJobStore::new(pool.clone())),
            queue: Arc::new(queue),
            pool,
        })
    }

    /// Release the connection pools. Call once, after every user has stopped.
    pub async fn shutdown(self) {
        tracing::info!("Closing database pool");
        self.pool.close().await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

/// Shared gateway state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn WorkQueue>,
    pub upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>, upload_dir: PathBuf) -> Self {
        Self {
            store,
            queue,
            upload_dir: Arc::new(upload_dir),
        }
    }
}
