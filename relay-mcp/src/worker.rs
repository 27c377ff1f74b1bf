//! Per-user tool worker pool.
//!
//! Some deployments give each user a private tool-server instance (their
//! own credentials, their own subscriptions). The pool manages those
//! instances by user id: spawn on first use, evict after an idle hour,
//! cap the total. When a spawn fails the user degrades to the shared
//! catalog with a warning rather than losing the turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use relay_types::{McpError, ToolDescriptor};

/// Default idle eviction window.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default cap on live workers across all users.
pub const DEFAULT_MAX_WORKERS: usize = 64;

/// Spawns and tears down per-user tool workers.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Start a worker for `user_id` and return its tool catalog.
    async fn spawn(&self, user_id: &str) -> Result<Vec<ToolDescriptor>, McpError>;

    /// Stop the worker for `user_id`. Best-effort.
    async fn shutdown(&self, user_id: &str);
}

struct Worker {
    catalog: Vec<ToolDescriptor>,
    last_used: Instant,
}

/// Lifecycle-managed pool of per-user workers.
pub struct UserWorkerPool {
    spawner: Arc<dyn WorkerSpawner>,
    workers: Mutex<HashMap<String, Worker>>,
    idle_timeout: Duration,
    max_workers: usize,
}

impl UserWorkerPool {
    /// Build a pool with the default idle timeout and cap.
    #[must_use]
    pub fn new(spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self::with_limits(spawner, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_WORKERS)
    }

    /// Build a pool with explicit limits.
    #[must_use]
    pub fn with_limits(
        spawner: Arc<dyn WorkerSpawner>,
        idle_timeout: Duration,
        max_workers: usize,
    ) -> Self {
        Self {
            spawner,
            workers: Mutex::new(HashMap::new()),
            idle_timeout,
            max_workers,
        }
    }

    /// The user's private catalog, spawning a worker on first use.
    ///
    /// Returns `None` when the worker could not be spawned (pool full or
    /// spawn failure); the caller falls back to the shared catalog.
    pub async fn catalog_for(&self, user_id: &str) -> Option<Vec<ToolDescriptor>> {
        let mut workers = self.workers.lock().await;

        if let Some(worker) = workers.get_mut(user_id) {
            worker.last_used = Instant::now();
            return Some(worker.catalog.clone());
        }

        if workers.len() >= self.max_workers {
            self.evict_idle(&mut workers).await;
        }
        if workers.len() >= self.max_workers {
            tracing::warn!(user = user_id, "relay.mcp.worker_pool_full");
            return None;
        }

        match self.spawner.spawn(user_id).await {
            Ok(catalog) => {
                workers.insert(
                    user_id.to_string(),
                    Worker { catalog: catalog.clone(), last_used: Instant::now() },
                );
                Some(catalog)
            }
            Err(error) => {
                tracing::warn!(
                    user = user_id,
                    error = %error,
                    "relay.mcp.worker_spawn_failed"
                );
                None
            }
        }
    }

    /// Evict workers idle past the timeout. Returns how many were removed.
    pub async fn evict_idle_workers(&self) -> usize {
        let mut workers = self.workers.lock().await;
        self.evict_idle(&mut workers).await
    }

    async fn evict_idle(&self, workers: &mut HashMap<String, Worker>) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = workers
            .iter()
            .filter(|(_, w)| now.duration_since(w.last_used) >= self.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for user_id in &stale {
            workers.remove(user_id);
            self.spawner.shutdown(user_id).await;
        }
        stale.len()
    }

    /// Current live worker count.
    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Whether no workers are live.
    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSpawner {
        spawns: AtomicU32,
        shutdowns: AtomicU32,
        fail: bool,
    }

    impl CountingSpawner {
        fn new(fail: bool) -> Self {
            Self { spawns: AtomicU32::new(0), shutdowns: AtomicU32::new(0), fail }
        }
    }

    #[async_trait]
    impl WorkerSpawner for CountingSpawner {
        async fn spawn(&self, user_id: &str) -> Result<Vec<ToolDescriptor>, McpError> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(McpError::Orchestrator("spawn refused".into()));
            }
            Ok(vec![ToolDescriptor {
                id: format!("private.{user_id}"),
                server_id: "private".into(),
                name: user_id.into(),
                description: String::new(),
                input_schema: serde_json::json!({}),
                tags: vec![],
            }])
        }

        async fn shutdown(&self, _user_id: &str) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn spawns_once_per_user() {
        let spawner = Arc::new(CountingSpawner::new(false));
        let pool = UserWorkerPool::new(spawner.clone());

        let first = pool.catalog_for("u-1").await.unwrap();
        let second = pool.catalog_for("u-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(spawner.spawns.load(Ordering::SeqCst), 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn spawn_failure_degrades_to_none() {
        let pool = UserWorkerPool::new(Arc::new(CountingSpawner::new(true)));
        assert!(pool.catalog_for("u-1").await.is_none());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn pool_cap_refuses_new_workers() {
        let spawner = Arc::new(CountingSpawner::new(false));
        let pool =
            UserWorkerPool::with_limits(spawner.clone(), Duration::from_secs(3600), 1);

        assert!(pool.catalog_for("u-1").await.is_some());
        assert!(pool.catalog_for("u-2").await.is_none());
    }

    #[tokio::test]
    async fn idle_workers_are_evicted_and_shut_down() {
        let spawner = Arc::new(CountingSpawner::new(false));
        let pool = UserWorkerPool::with_limits(spawner.clone(), Duration::from_millis(20), 8);

        pool.catalog_for("u-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(pool.evict_idle_workers().await, 1);
        assert_eq!(spawner.shutdowns.load(Ordering::SeqCst), 1);
        assert!(pool.is_empty().await);
    }
}
