//! Bounded worker pool
//!
//! Two operations make up the pool:
//!
//! - [`WorkerPool::submit`] forks a batch of tasks onto the runtime and joins
//!   all of them, invoke-all style.
//! - [`WorkerPool::run`] executes one unit of work while holding one of the
//!   pool's `capacity` permits.
//!
//! Permits bound the work itself and are never held while a task waits on
//! its own children, so a deep fork-join tree cannot starve the pool.

use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::core::errors::{BuildError, Result};

/// How a call to [`WorkerPool::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// All in-flight work finished inside the grace period
    Drained,
    /// The grace period elapsed with work still running
    TimedOut { in_flight: usize },
    /// The pool had already been shut down
    AlreadyShutDown,
}

struct PoolInner {
    capacity: usize,
    grace: Duration,
    permits: Semaphore,
    in_flight: AtomicUsize,
    idle: Notify,
    shut_down: AtomicBool,
}

/// Decrements the in-flight count even if the task panics.
struct InFlightGuard(Arc<PoolInner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Fixed-capacity pool shared by every build in the process.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub const DEFAULT_CAPACITY: usize = 3;
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

    pub fn new(capacity: usize, grace: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                capacity,
                grace,
                permits: Semaphore::new(capacity),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Permits not currently held by running work.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Submitted tasks and [`run`](Self::run) calls that have not finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Spawn every task and wait for all of them.
    ///
    /// Results come back in submission order. A task that panics or is
    /// cancelled shows up as an `Err(JoinError)` entry; the rest of the
    /// batch still runs to completion.
    pub async fn submit<F, T>(&self, tasks: Vec<F>) -> Result<Vec<std::result::Result<T, JoinError>>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shut_down() {
            return Err(BuildError::PoolShutdown);
        }
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Submitting batch of {} task(s)", tasks.len());
        let handles: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
                let guard = InFlightGuard(self.inner.clone());
                tokio::spawn(async move {
                    let _guard = guard;
                    task.await
                })
            })
            .collect();

        Ok(join_all(handles).await)
    }

    /// Run one unit of work under a pool permit.
    ///
    /// The work counts as in flight from the moment it queues for a permit,
    /// so [`shutdown`](Self::shutdown) waits for it like any submitted task.
    pub async fn run<F, T>(&self, work: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let _guard = InFlightGuard(self.inner.clone());
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| BuildError::PoolShutdown)?;
        Ok(work.await)
    }

    /// Stop accepting batches and wait up to the grace period for in-flight
    /// work. Running out of time is logged, not treated as an error.
    pub async fn shutdown(&self) -> ShutdownStatus {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            debug!("Worker pool already shut down");
            return ShutdownStatus::AlreadyShutDown;
        }

        info!(
            "Shutting down worker pool ({} task(s) in flight)",
            self.in_flight()
        );

        let drained = async {
            loop {
                let notified = self.inner.idle.notified();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        let status = match tokio::time::timeout(self.inner.grace, drained).await {
            Ok(()) => ShutdownStatus::Drained,
            Err(_) => {
                let in_flight = self.in_flight();
                let err = BuildError::ShutdownTimeout {
                    in_flight,
                    grace_ms: self.inner.grace.as_millis() as u64,
                };
                warn!("{}", err);
                ShutdownStatus::TimedOut { in_flight }
            }
        };

        self.inner.permits.close();
        info!("Worker pool shut down: {:?}", status);
        status
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_GRACE)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .field("in_flight", &self.in_flight())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_returns_results_in_order() {
        let pool = WorkerPool::default();
        let tasks: Vec<_> = (0..5u64)
            .map(|i| async move {
                tokio::time::sleep(Duration::from_millis(20 - i * 4)).await;
                i
            })
            .collect();

        let results = pool.submit(tasks).await.unwrap();
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn run_never_exceeds_capacity() {
        let pool = WorkerPool::new(2, WorkerPool::DEFAULT_GRACE);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    pool.run(async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(15)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                }
            })
            .collect();

        for result in pool.submit(tasks).await.unwrap() {
            result.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn panicking_task_does_not_abort_batch() {
        let pool = WorkerPool::default();
        let tasks: Vec<std::pin::Pin<Box<dyn Future<Output = u32> + Send>>> = vec![
            Box::pin(async { 1 }),
            Box::pin(async {
                if true {
                    panic!("boom");
                }
                2
            }),
            Box::pin(async { 3 }),
        ];

        let results = pool.submit(tasks).await.unwrap();
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(results[1].as_ref().unwrap_err().is_panic());
        assert_eq!(*results[2].as_ref().unwrap(), 3);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_twice_is_harmless() {
        let pool = WorkerPool::default();
        assert_eq!(pool.shutdown().await, ShutdownStatus::Drained);
        assert_eq!(pool.shutdown().await, ShutdownStatus::AlreadyShutDown);
        assert!(pool.is_shut_down());
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = WorkerPool::default();
        pool.shutdown().await;

        let err = pool.submit(vec![async { 1 }]).await.unwrap_err();
        assert!(matches!(err, BuildError::PoolShutdown));
        let err = pool.run(async { 1 }).await.unwrap_err();
        assert!(matches!(err, BuildError::PoolShutdown));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_reports_timeout_for_stuck_work() {
        let pool = WorkerPool::new(1, Duration::from_millis(50));
        let batch = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.submit(vec![tokio::time::sleep(Duration::from_millis(500))])
                    .await
            })
        };
        while pool.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let status = pool.shutdown().await;
        assert_eq!(status, ShutdownStatus::TimedOut { in_flight: 1 });
        batch.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_waits_for_work_holding_a_permit() {
        let pool = WorkerPool::new(2, Duration::from_secs(2));
        let finished = Arc::new(AtomicBool::new(false));
        let work = {
            let pool = pool.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                pool.run(async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    finished.store(true, Ordering::SeqCst);
                })
                .await
            })
        };
        while pool.available() == 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.in_flight(), 1);

        assert_eq!(pool.shutdown().await, ShutdownStatus::Drained);
        assert!(finished.load(Ordering::SeqCst));
        work.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_waits_for_in_flight_work() {
        let pool = WorkerPool::new(1, Duration::from_secs(2));
        let batch = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.submit(vec![tokio::time::sleep(Duration::from_millis(50))])
                    .await
            })
        };
        while pool.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.shutdown().await, ShutdownStatus::Drained);
        assert_eq!(pool.in_flight(), 0);
        batch.await.unwrap().unwrap();
    }
}
