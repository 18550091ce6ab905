//! Task queue worker.
//!
//! Request handlers enqueue [`ShareTask`]s through a [`TaskQueue`]. The
//! [`ShareWorker`] loop receives them over a bounded channel and executes
//! each as a [`SharingService`] run, several at a time:
//!
//! ```text
//! ShareWorkerHandle ──WorkerCommand──▶ ShareWorker ──spawn──▶ run (≤ N permits)
//!                                          │
//!                                          └──WorkerEvent──▶ observer
//! ```

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::sharing_service::SharingService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// An orchestration run requested for one share.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ShareTask {
    Approve { share_uri: String },
    Revoke { share_uri: String },
    Verify { share_uri: String },
    Reapply { share_uri: String },
}

impl ShareTask {
    pub fn share_uri(&self) -> &str {
        match self {
            ShareTask::Approve { share_uri }
            | ShareTask::Revoke { share_uri }
            | ShareTask::Verify { share_uri }
            | ShareTask::Reapply { share_uri } => share_uri,
        }
    }
}

impl fmt::Display for ShareTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self {
            ShareTask::Approve { .. } => "share.approve",
            ShareTask::Revoke { .. } => "share.revoke",
            ShareTask::Verify { .. } => "share.verify",
            ShareTask::Reapply { .. } => "share.reapply",
        };
        write!(f, "{action} {}", self.share_uri())
    }
}

/// Accepts share tasks for asynchronous execution.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: ShareTask) -> EngineResult<()>;
}

/// Records tasks without running them.
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<Vec<ShareTask>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<ShareTask> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Removes and returns every queued task.
    pub fn drain(&self) -> Vec<ShareTask> {
        std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, task: ShareTask) -> EngineResult<()> {
        debug!("queued {task}");
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).push(task);
        Ok(())
    }
}

/// Commands accepted by the worker loop.
#[derive(Debug)]
pub enum WorkerCommand {
    Run(ShareTask),
    /// Stop accepting tasks and wait for running ones.
    Shutdown,
}

/// Events emitted as tasks run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    TaskStarted { task: ShareTask },
    TaskCompleted { task: ShareTask, success: bool },
    TaskFailed { task: ShareTask, error: String },
}

/// Handle to enqueue tasks on a running worker.
#[derive(Clone)]
pub struct ShareWorkerHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
}

impl ShareWorkerHandle {
    pub async fn submit(&self, task: ShareTask) -> EngineResult<()> {
        self.command_tx
            .send(WorkerCommand::Run(task))
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Asks the worker to stop once its running tasks complete.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.command_tx
            .send(WorkerCommand::Shutdown)
            .await
            .map_err(|_| EngineError::QueueClosed)
    }
}

#[async_trait]
impl TaskQueue for ShareWorkerHandle {
    async fn enqueue(&self, task: ShareTask) -> EngineResult<()> {
        self.submit(task).await
    }
}

/// Executes share tasks against a [`SharingService`].
pub struct ShareWorker {
    service: Arc<SharingService>,
    permits: Arc<Semaphore>,
    event_tx: mpsc::Sender<WorkerEvent>,
}

impl ShareWorker {
    /// Runs until shutdown, then drains running tasks.
    pub async fn run(self, mut command_rx: mpsc::Receiver<WorkerCommand>) -> EngineResult<()> {
        let mut running: JoinSet<()> = JoinSet::new();
        info!("share worker started");

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(WorkerCommand::Run(task)) => {
                        let permit = self
                            .permits
                            .clone()
                            .acquire_owned()
                            .await
                            .map_err(|_| EngineError::QueueClosed)?;
                        let service = self.service.clone();
                        let events = self.event_tx.clone();
                        running.spawn(async move {
                            let _permit = permit;
                            execute(&service, &events, task).await;
                        });
                    }
                    Some(WorkerCommand::Shutdown) | None => {
                        info!("share worker shutting down, {} runs in flight", running.len());
                        break;
                    }
                },

                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!("share run aborted: {e}");
                    }
                }
            }
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!("share run aborted: {e}");
            }
        }
        info!("share worker stopped");
        Ok(())
    }
}

fn emit(events: &mpsc::Sender<WorkerEvent>, event: WorkerEvent) {
    if let Err(e) = events.try_send(event) {
        debug!("worker event dropped: {e}");
    }
}

async fn execute(service: &SharingService, events: &mpsc::Sender<WorkerEvent>, task: ShareTask) {
    info!("running {task}");
    emit(events, WorkerEvent::TaskStarted { task: task.clone() });
    let uri = task.share_uri();
    let result = match &task {
        ShareTask::Approve { .. } => service.approve_share(uri).await,
        ShareTask::Revoke { .. } => service.revoke_share(uri).await,
        ShareTask::Verify { .. } => service.verify_share(uri, None).await,
        ShareTask::Reapply { .. } => service.reapply_share(uri).await,
    };
    match result {
        Ok(success) => {
            if !success {
                warn!("{task} finished with failures");
            }
            emit(events, WorkerEvent::TaskCompleted { task, success });
        }
        Err(e) => {
            error!("{task} failed: {e}");
            emit(
                events,
                WorkerEvent::TaskFailed {
                    task,
                    error: e.to_string(),
                },
            );
        }
    }
}

/// Creates a worker and returns the pieces needed to run it.
pub fn create_worker(
    service: Arc<SharingService>,
    config: &EngineConfig,
) -> (
    ShareWorkerHandle,
    mpsc::Receiver<WorkerEvent>,
    mpsc::Receiver<WorkerCommand>,
    ShareWorker,
) {
    let capacity = config.worker_queue_capacity.max(1);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);

    let worker = ShareWorker {
        service,
        permits: Arc::new(Semaphore::new(config.worker_max_concurrent_runs.max(1))),
        event_tx,
    };
    (ShareWorkerHandle { command_tx }, event_rx, command_rx, worker)
}
