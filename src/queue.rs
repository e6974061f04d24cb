//! Deferred execution.
//!
//! A [`WorkItem`] is a boxed async closure. [`TaskQueue`] has two
//! implementations:
//!
//! | Queue | `enqueue` | `dequeue` |
//! |-------|-----------|-----------|
//! | [`InProcessQueue`] | append to a FIFO, add one permit | wait for a permit or shutdown, pop the head |
//! | [`DirectInvokeQueue`] | spawn the item immediately | always fails |
//!
//! [`BackgroundWorker`] drains a queue with a single sequential loop. A
//! failing or panicking item is logged and the loop moves on; shutdown is
//! observed between items only.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{RagError, Result};

/// Cooperative shutdown flag shared by a worker and its items.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

/// Sender half of a [`ShutdownSignal`].
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested or the trigger is dropped.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

pub type WorkItem = Box<dyn FnOnce(ShutdownSignal) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Box an async closure as a [`WorkItem`].
pub fn work_item<F, Fut>(f: F) -> WorkItem
where
    F: FnOnce(ShutdownSignal) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |signal| Box::pin(f(signal)))
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, item: WorkItem) -> Result<()>;

    /// Wait for the next item. Returns `Ok(None)` once shutdown is requested.
    async fn dequeue(&self, shutdown: &ShutdownSignal) -> Result<Option<WorkItem>>;
}

/// Unbounded FIFO drained by a [`BackgroundWorker`].
pub struct InProcessQueue {
    items: Mutex<VecDeque<WorkItem>>,
    available: Semaphore,
}

impl InProcessQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    fn enqueue(&self, item: WorkItem) -> Result<()> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(item);
        self.available.add_permits(1);
        Ok(())
    }

    async fn dequeue(&self, shutdown: &ShutdownSignal) -> Result<Option<WorkItem>> {
        if shutdown.is_shutdown() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Ok(None),
            permit = self.available.acquire() => {
                let permit = permit.map_err(|_| RagError::Queue("queue closed".into()))?;
                permit.forget();
                let item = self
                    .items
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .pop_front();
                item.map(Some)
                    .ok_or_else(|| RagError::Queue("permit without a queued item".into()))
            }
        }
    }
}

/// Runs every item as soon as it is enqueued, for hosts whose trigger
/// runtime owns queueing and delivery.
pub struct DirectInvokeQueue {
    trigger: ShutdownTrigger,
}

impl DirectInvokeQueue {
    pub fn new() -> Self {
        let (trigger, _) = shutdown_channel();
        Self { trigger }
    }
}

impl Default for DirectInvokeQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for DirectInvokeQueue {
    fn enqueue(&self, item: WorkItem) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RagError::Queue(format!("no runtime to run the item on: {e}")))?;
        let fut = item(self.trigger.signal());
        runtime.spawn(async move {
            if let Err(e) = fut.await {
                tracing::error!(error = %format!("{:#}", e), "direct work item failed");
            }
        });
        Ok(())
    }

    async fn dequeue(&self, _shutdown: &ShutdownSignal) -> Result<Option<WorkItem>> {
        Err(RagError::Queue(
            "dequeue is not supported by the direct-invoke queue".into(),
        ))
    }
}

/// Counts kept by a worker over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
}

/// Single consumer loop for a [`TaskQueue`].
pub struct BackgroundWorker;

impl BackgroundWorker {
    /// Spawn the loop on the current runtime.
    pub fn start(queue: Arc<dyn TaskQueue>) -> WorkerHandle {
        let (trigger, signal) = shutdown_channel();
        let join = tokio::spawn(run(queue, signal));
        WorkerHandle { trigger, join }
    }
}

async fn run(queue: Arc<dyn TaskQueue>, signal: ShutdownSignal) -> WorkerStats {
    let mut stats = WorkerStats::default();
    tracing::info!("background worker started");

    while !signal.is_shutdown() {
        let item = match queue.dequeue(&signal).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "background worker cannot dequeue, stopping");
                break;
            }
        };

        match tokio::spawn(item(signal.clone())).await {
            Ok(Ok(())) => stats.completed += 1,
            Ok(Err(e)) => {
                stats.failed += 1;
                tracing::error!(error = %format!("{:#}", e), "work item failed");
            }
            Err(join_err) => {
                stats.failed += 1;
                tracing::error!(error = %join_err, "work item panicked");
            }
        }
    }

    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        "background worker stopped"
    );
    stats
}

pub struct WorkerHandle {
    trigger: ShutdownTrigger,
    join: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    /// Request shutdown, wait for the current item to finish, and return
    /// the worker's counts.
    pub async fn stop(self) -> WorkerStats {
        self.trigger.trigger();
        match self.join.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "background worker task failed");
                WorkerStats::default()
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
