//! Serialized control execution context.
//!
//! Camera control operations run one at a time, in posting order, on a single
//! task. Failures and panics inside an operation are logged and squashed so a
//! misbehaving device never takes the host down.

use crate::error::{Result, ScanError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

type Operation = (&'static str, BoxFuture<'static, Result<()>>);

/// Whether a posted operation will run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStatus {
    Queued,
    /// The context is shut down or its queue is full
    Discarded,
}

impl PostStatus {
    pub fn is_queued(&self) -> bool {
        matches!(self, PostStatus::Queued)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            PostStatus::Queued => Ok(()),
            PostStatus::Discarded => Err(ScanError::Discarded),
        }
    }
}

#[derive(Debug, Default)]
pub struct ControlStats {
    pub executed: AtomicU64,
    pub failed: AtomicU64,
    pub panicked: AtomicU64,
    pub discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlStatsSnapshot {
    pub executed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub discarded: u64,
}

impl ControlStats {
    pub fn snapshot(&self) -> ControlStatsSnapshot {
        ControlStatsSnapshot {
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Handle for posting operations onto the control task
#[derive(Clone)]
pub struct ControlContext {
    sender: mpsc::Sender<Operation>,
    cancellation_token: CancellationToken,
    stats: Arc<ControlStats>,
    runtime: Handle,
}

impl ControlContext {
    /// Spawn the control task on the current runtime.
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn spawn(queue_capacity: usize) -> (Self, JoinHandle<()>) {
        Self::spawn_on(Handle::current(), queue_capacity)
    }

    /// Spawn the control task on `runtime`
    pub fn spawn_on(runtime: Handle, queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let cancellation_token = CancellationToken::new();
        let stats = Arc::new(ControlStats::default());

        let handle = runtime.spawn(Self::run(
            receiver,
            cancellation_token.clone(),
            Arc::clone(&stats),
        ));

        (
            Self {
                sender,
                cancellation_token,
                stats,
                runtime,
            },
            handle,
        )
    }

    async fn run(
        mut receiver: mpsc::Receiver<Operation>,
        cancellation_token: CancellationToken,
        stats: Arc<ControlStats>,
    ) {
        debug!("Control context started");

        loop {
            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    debug!("Control context cancelled");
                    break;
                }
                operation = receiver.recv() => {
                    match operation {
                        Some((name, operation)) => Self::execute(name, operation, &stats).await,
                        None => break,
                    }
                }
            }
        }

        // Anything still queued is dropped unexecuted
        receiver.close();
        let mut dropped = 0u64;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            stats.discarded.fetch_add(dropped, Ordering::Relaxed);
            debug!("Discarded {} pending control operations", dropped);
        }

        info!("Control context stopped");
    }

    async fn execute(
        name: &'static str,
        operation: BoxFuture<'static, Result<()>>,
        stats: &ControlStats,
    ) {
        trace!("Running control operation '{}'", name);
        stats.executed.fetch_add(1, Ordering::Relaxed);

        match AssertUnwindSafe(operation).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_transient() => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                debug!("Control operation '{}' ignored: {}", name, e);
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Squashing failure in control operation '{}': {}", name, e);
            }
            Err(panic) => {
                stats.panicked.fetch_add(1, Ordering::Relaxed);
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Squashing panic in control operation '{}': {}", name, message);
            }
        }
    }

    /// Queue `operation` behind everything already posted
    pub fn post<F>(&self, name: &'static str, operation: F) -> PostStatus
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.cancellation_token.is_cancelled() {
            return self.discard(name, "context shut down");
        }

        match self.sender.try_send((name, operation.boxed())) {
            Ok(()) => PostStatus::Queued,
            Err(TrySendError::Full(_)) => self.discard(name, "queue full"),
            Err(TrySendError::Closed(_)) => self.discard(name, "context shut down"),
        }
    }

    /// Queue `operation` once `delay` has elapsed, unless shut down first.
    ///
    /// Safe to call from threads outside the runtime.
    pub fn post_delayed<F>(&self, name: &'static str, delay: Duration, operation: F) -> PostStatus
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.cancellation_token.is_cancelled() {
            return self.discard(name, "context shut down");
        }

        let context = self.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                _ = context.cancellation_token.cancelled() => {
                    trace!("Delayed control operation '{}' cancelled", name);
                }
                _ = tokio::time::sleep(delay) => {
                    context.post(name, operation);
                }
            }
        });

        PostStatus::Queued
    }

    /// Stop the control task; later posts are discarded
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn stats(&self) -> ControlStatsSnapshot {
        self.stats.snapshot()
    }

    fn discard(&self, name: &'static str, reason: &str) -> PostStatus {
        self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        debug!("Control operation '{}' discarded: {}", name, reason);
        PostStatus::Discarded
    }
}

impl std::fmt::Debug for ControlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlContext")
            .field("shutdown", &self.is_shutdown())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_operations_run_in_order() {
        let (context, _handle) = ControlContext::spawn(16);
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let log = Arc::clone(&log);
            let status = context.post("push", async move {
                tokio::task::yield_now().await;
                log.lock().push(i);
                Ok(())
            });
            assert_eq!(status, PostStatus::Queued);
        }

        let (tx, rx) = oneshot::channel();
        context.post("done", async move {
            let _ = tx.send(());
            Ok(())
        });
        rx.await.unwrap();

        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(context.stats().executed, 6);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_squashed() {
        let (context, _handle) = ControlContext::spawn(16);

        context.post("fail", async { Err(ScanError::system("boom")) });
        context.post("transient", async { Err(ScanError::teardown("surface gone")) });
        context.post("panic", async {
            if true {
                panic!("device exploded");
            }
            Ok(())
        });

        let (tx, rx) = oneshot::channel();
        context.post("still alive", async move {
            let _ = tx.send(());
            Ok(())
        });
        rx.await.unwrap();

        let stats = context.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.executed, 4);
    }

    #[tokio::test]
    async fn test_post_after_shutdown_is_discarded() {
        let (context, handle) = ControlContext::spawn(4);
        context.shutdown();
        handle.await.unwrap();

        let status = context.post("late", async { Ok(()) });
        assert_eq!(status, PostStatus::Discarded);
        assert!(matches!(status.into_result(), Err(ScanError::Discarded)));

        let status = context.post_delayed("late", Duration::from_millis(10), async { Ok(()) });
        assert_eq!(status, PostStatus::Discarded);
        assert_eq!(context.stats().discarded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_delayed() {
        let (context, _handle) = ControlContext::spawn(4);
        let (tx, mut rx) = oneshot::channel();

        context.post_delayed("later", Duration::from_secs(1), async move {
            let _ = tx.send(());
            Ok(())
        });

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert!(rx.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_delayed_operations() {
        let (context, handle) = ControlContext::spawn(4);
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);

        context.post_delayed("later", Duration::from_secs(1), async move {
            *flag.lock() = true;
            Ok(())
        });
        context.shutdown();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!*ran.lock());
    }
}
