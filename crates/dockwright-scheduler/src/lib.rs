//! Dockwright scheduler
//!
//! コマンドをジョブとして包み、固定サイズのワーカープールで実行します。
//!
//! ```text
//! ┌──────────────┐  enqueue   ┌─────────────────────────┐
//! │ BuildService │──────────▶│  Dispatch (mpsc queue)  │
//! └──────┬───────┘           └──────┬──────┬──────┬────┘
//!        │ wait                     │      │      │
//!        ▼                      ┌───▼──┐┌──▼───┐┌─▼────┐
//! ┌──────────────┐   run        │ W#0  ││ W#1  ││ W#n  │
//! │   BuildJob   │◀─────────────┴──────┴┴──────┴┴──────┘
//! └──────────────┘
//! ```
//!
//! 実行中のジョブ数はワーカー数を超えません。待機中のジョブ数に上限はありません。

pub mod dispatch;
pub mod error;
pub mod job;
pub mod worker;

pub use dispatch::{DEFAULT_NUM_WORKERS, Dispatch, Dispatcher};
pub use error::{JobError, Result, SchedulerError};
pub use job::{BuildJob, Command, DefaultJobFactory, Job, JobFactory};
pub use worker::{JobQueue, QueueWorker, QueueWorkerFactory, Worker, WorkerFactory};
