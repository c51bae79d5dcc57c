//! ディスパッチャー
//!
//! 固定数のワーカーと、上限なしの共有キューを持ちます。
//! `enqueue` はブロックせず、実行中ジョブ数はワーカー数で制限されます。

use crate::error::Result;
use crate::job::Job;
use crate::worker::{JobQueue, QueueWorkerFactory, WorkerFactory};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_NUM_WORKERS: usize = 1;

/// ジョブの投入口
pub trait Dispatcher: Send + Sync {
    fn enqueue(&self, job: Arc<dyn Job>);
}

#[derive(Default)]
struct Running {
    cancel: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Dispatch {
    num_workers: usize,
    worker_factory: Arc<dyn WorkerFactory>,
    sender: mpsc::UnboundedSender<Arc<dyn Job>>,
    queue: JobQueue,
    running: Mutex<Running>,
}

impl Dispatch {
    pub fn new(worker_factory: Arc<dyn WorkerFactory>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            worker_factory,
            sender,
            queue: Arc::new(tokio::sync::Mutex::new(receiver)),
            running: Mutex::new(Running::default()),
        }
    }

    /// ワーカー数を設定（1未満は1に切り上げ）
    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().cancel.is_some()
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Running> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// ワーカーを起動
    ///
    /// ブロックせずに戻ります。ワーカーの作成に失敗した場合は、
    /// 起動済みのワーカーを停止してからエラーを返します。
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let mut running = self.lock_running();
        if running.cancel.is_some() {
            tracing::warn!("Dispatcher already started");
            return Ok(());
        }

        let token = cancel.child_token();
        let mut handles = Vec::with_capacity(self.num_workers);

        for id in 0..self.num_workers {
            let mut worker = match self.worker_factory.create(id, self.queue.clone()) {
                Ok(worker) => worker,
                Err(e) => {
                    tracing::error!(worker = id, error = %e, "Failed to create worker");
                    token.cancel();
                    return Err(e);
                }
            };

            let token = token.clone();
            handles.push(tokio::spawn(async move { worker.start(token).await }));
        }

        tracing::info!(workers = self.num_workers, "Dispatcher started");
        running.cancel = Some(token);
        running.handles = handles;
        Ok(())
    }

    /// ワーカーを停止し、全ワーカーの終了を待つ
    ///
    /// 実行中のジョブは中断されず、完了してからワーカーが終了します。
    pub async fn stop(&self) {
        let (cancel, handles) = {
            let mut running = self.lock_running();
            (running.cancel.take(), std::mem::take(&mut running.handles))
        };

        let Some(cancel) = cancel else {
            return;
        };
        cancel.cancel();

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker task ended abnormally");
            }
        }

        tracing::info!("Dispatcher stopped");
    }
}

impl Default for Dispatch {
    fn default() -> Self {
        Self::new(Arc::new(QueueWorkerFactory))
    }
}

impl Dispatcher for Dispatch {
    fn enqueue(&self, job: Arc<dyn Job>) {
        if self.sender.send(job).is_err() {
            tracing::error!("Job queue is closed, dropping job");
        }
    }
}
