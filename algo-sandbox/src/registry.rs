//! Bounded worker pool and the async execution registry
//!
//! Every submission gets an id up front and an entry that moves
//! `Queued → Running → Completed`. Only the owning worker writes the result,
//! once; readers get clones, so a poll never observes a partial result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{config::QueuePolicy, error::Error, types::ExecutionResult, Result};

/// Fixed number of execution slots shared by the sync and async paths.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    waiting: Arc<AtomicUsize>,
}

struct WaitingGuard(Arc<AtomicUsize>);

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot. The slot is returned when the permit drops.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitingGuard(self.waiting.clone());
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::System(format!("Failed to acquire execution permit: {}", e)))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Callers currently blocked in [`WorkerPool::acquire`].
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

enum Entry {
    Queued { abort: AbortHandle },
    Running,
    Completed {
        result: ExecutionResult,
        completed_at: Instant,
    },
}

/// What a poll found.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Never issued, cancelled, or evicted
    Unknown,
    /// Waiting for a free worker
    Queued,
    /// Holding a worker
    Running,
    Completed(ExecutionResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub workers: usize,
    pub free_workers: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
}

#[derive(Clone)]
pub struct AsyncExecutionRegistry {
    pool: WorkerPool,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    policy: QueuePolicy,
    ttl: Duration,
}

impl AsyncExecutionRegistry {
    pub fn new(pool: WorkerPool, policy: QueuePolicy, ttl: Duration) -> Self {
        Self {
            pool,
            entries: Arc::new(RwLock::new(HashMap::new())),
            policy,
            ttl,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Schedule `job` and return its execution id without waiting for it.
    ///
    /// `job` receives the id so it can name its workspace after it.
    pub async fn submit<J, F>(&self, job: J) -> Result<String>
    where
        J: FnOnce(String) -> F + Send + 'static,
        F: Future<Output = ExecutionResult> + Send + 'static,
    {
        self.evict_expired().await;

        let mut entries = self.entries.write().await;
        if let QueuePolicy::Bounded(limit) = self.policy {
            let queued = entries
                .values()
                .filter(|entry| matches!(entry, Entry::Queued { .. }))
                .count();
            if queued >= limit && self.pool.available() == 0 {
                return Err(Error::QueueFull(queued));
            }
        }

        let execution_id = Uuid::new_v4().to_string();
        let task = tokio::spawn(Self::work(
            self.pool.clone(),
            self.entries.clone(),
            execution_id.clone(),
            job,
        ));
        // The worker cannot observe its entry before this insert: it needs
        // the write lock we are holding.
        entries.insert(
            execution_id.clone(),
            Entry::Queued {
                abort: task.abort_handle(),
            },
        );
        debug!("Queued execution {}", execution_id);
        Ok(execution_id)
    }

    async fn work<J, F>(
        pool: WorkerPool,
        entries: Arc<RwLock<HashMap<String, Entry>>>,
        execution_id: String,
        job: J,
    ) where
        J: FnOnce(String) -> F + Send + 'static,
        F: Future<Output = ExecutionResult> + Send + 'static,
    {
        let _permit = match pool.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        {
            let mut entries = entries.write().await;
            match entries.get_mut(&execution_id) {
                Some(entry) if matches!(entry, Entry::Queued { .. }) => *entry = Entry::Running,
                _ => {
                    debug!("Execution {} cancelled before start", execution_id);
                    return;
                }
            }
        }

        // Own task, so a panicking job still leaves a result behind.
        let result = match tokio::spawn(job(execution_id.clone())).await {
            Ok(result) => result,
            Err(e) => {
                error!("Execution {} failed: {}", execution_id, e);
                ExecutionResult::system_error(format!("Execution task failed: {}", e))
            }
        }
        .with_execution_id(execution_id.clone());

        let mut entries = entries.write().await;
        match entries.get_mut(&execution_id) {
            Some(entry) if matches!(entry, Entry::Running) => {
                *entry = Entry::Completed {
                    result,
                    completed_at: Instant::now(),
                };
                debug!("Stored result of execution {}", execution_id);
            }
            _ => info!(
                "Execution {} was cancelled while running, discarding result",
                execution_id
            ),
        }
    }

    pub async fn poll(&self, execution_id: &str) -> PollOutcome {
        self.evict_expired().await;
        let entries = self.entries.read().await;
        match entries.get(execution_id) {
            None => PollOutcome::Unknown,
            Some(Entry::Queued { .. }) => PollOutcome::Queued,
            Some(Entry::Running) => PollOutcome::Running,
            Some(Entry::Completed { result, .. }) => PollOutcome::Completed(result.clone()),
        }
    }

    /// Drop the entry for `execution_id`. A queued job is aborted before it
    /// takes a worker; a running container is left to its own timeout.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let removed = self.entries.write().await.remove(execution_id);
        match removed {
            None => false,
            Some(Entry::Queued { abort }) => {
                abort.abort();
                true
            }
            Some(Entry::Running) => {
                info!(
                    "Execution {} removed while running; container continues until it exits",
                    execution_id
                );
                true
            }
            Some(Entry::Completed { .. }) => true,
        }
    }

    /// Purge completed entries older than the TTL. Returns how many went.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| match entry {
            Entry::Completed { completed_at, .. } => completed_at.elapsed() < ttl,
            _ => true,
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("Evicted {} expired execution results", evicted);
        }
        evicted
    }

    pub async fn stats(&self) -> RegistryStats {
        let entries = self.entries.read().await;
        let mut stats = RegistryStats {
            workers: self.pool.size(),
            free_workers: self.pool.available(),
            queued: 0,
            running: 0,
            completed: 0,
        };
        for entry in entries.values() {
            match entry {
                Entry::Queued { .. } => stats.queued += 1,
                Entry::Running => stats.running += 1,
                Entry::Completed { .. } => stats.completed += 1,
            }
        }
        stats
    }
}
