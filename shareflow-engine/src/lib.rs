//! Share orchestration engine for shareflow.
//!
//! Provides:
//! - State machines for share objects and share items
//! - Leased resource locks serializing runs per dataset and principal
//! - Per-resource-type share processors behind a registry
//! - [`SharingService`] runs (approve, revoke, verify, reapply)
//! - [`ShareObjectService`] request operations and the task queue worker
//! - Scheduled verifier, reapplier and expiration tasks
//!
//! # Architecture
//!
//! ```text
//! ShareObjectService ──ShareTask──▶ ShareWorker ──▶ SharingService
//!                                                     │  locks, ShareData
//!                                                     ▼
//!                                             ProcessorRegistry ──▶ shareflow-cloud
//! ```

pub mod config;
pub mod error;
pub mod expiry;
pub mod lock;
pub mod logging;
pub mod naming;
pub mod notifications;
pub mod principal;
pub mod processors;
pub mod retry;
pub mod share_data;
pub mod share_object_service;
pub mod sharing_service;
pub mod state_machine;
pub mod tasks;
pub mod worker;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use lock::{HeldLocks, ResourceLockManager};
pub use notifications::{LogNotifier, MemoryNotifier, NotificationKind, NotificationSink, ShareNotification};
pub use principal::{IamPrincipalResolver, PrincipalResolver};
pub use processors::{
    BatchOutcome, ItemOutcome, ProcessMode, ProcessorContext, ProcessorRegistry, ShareProcessor,
};
pub use retry::{retry_with_backoff, retry_with_backoff_blocking, Attempt, RetryError, RetryPolicy};
pub use share_data::ShareData;
pub use share_object_service::{CreateShareRequest, CreatedShare, RequestContext, ShareObjectService};
pub use sharing_service::{RunPhase, SharingService};
pub use state_machine::{ShareItemSM, ShareObjectSM};
pub use tasks::TaskReport;
pub use worker::{
    create_worker, MemoryTaskQueue, ShareTask, ShareWorker, ShareWorkerHandle, TaskQueue, WorkerCommand,
    WorkerEvent,
};
