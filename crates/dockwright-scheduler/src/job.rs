//! ジョブ
//!
//! `BuildJob` は1つのコマンドを包み、完了シグナルとエラーシグナルを
//! それぞれ1回だけ送出します。`wait` はどちらか先に届いた方を返し、
//! 両方のチャネルを解放します。

use crate::error::JobError;
use async_trait::async_trait;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// ワーカー上で実行される作業単位
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, cancel: &CancellationToken) -> anyhow::Result<()>;
}

/// 非同期に完了を通知するジョブ
#[async_trait]
pub trait Job: Send + Sync {
    /// コマンドを呼び出し元のワーカーで実行し、結果をシグナルとして送出
    async fn run(&self, cancel: CancellationToken);

    /// 結果を待つ（1回のみ）
    async fn wait(&self) -> Result<(), JobError>;

    /// シグナルを解放する。何度呼んでもよい
    fn close(&self);
}

pub trait JobFactory: Send + Sync {
    fn create(&self, command: Box<dyn Command>) -> Arc<dyn Job>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultJobFactory;

impl JobFactory for DefaultJobFactory {
    fn create(&self, command: Box<dyn Command>) -> Arc<dyn Job> {
        Arc::new(BuildJob::new(command))
    }
}

type Receivers = (oneshot::Receiver<()>, oneshot::Receiver<anyhow::Error>);

pub struct BuildJob {
    command: Box<dyn Command>,
    done: Mutex<Option<oneshot::Sender<()>>>,
    err: Mutex<Option<oneshot::Sender<anyhow::Error>>>,
    receivers: Mutex<Option<Receivers>>,
    closed: AtomicBool,
}

impl BuildJob {
    pub fn new(command: Box<dyn Command>) -> Self {
        let (done_tx, done_rx) = oneshot::channel();
        let (err_tx, err_rx) = oneshot::channel();

        Self {
            command,
            done: Mutex::new(Some(done_tx)),
            err: Mutex::new(Some(err_tx)),
            receivers: Mutex::new(Some((done_rx, err_rx))),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

#[async_trait]
impl Job for BuildJob {
    async fn run(&self, cancel: CancellationToken) {
        let result = AssertUnwindSafe(self.command.execute(&cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(anyhow::anyhow!("コマンドの実行中にパニックが発生しました")));

        // 送らなかった側のシグナルも落とし、受信側が結果を取り違えないようにする
        let done = take(&self.done);
        let err = take(&self.err);

        match result {
            Ok(()) => {
                if done.is_some_and(|tx| tx.send(()).is_err()) {
                    tracing::debug!("Job finished after its waiter went away");
                }
            }
            Err(e) => match err {
                Some(tx) => {
                    if let Err(e) = tx.send(e) {
                        tracing::debug!(error = %e, "Job failed after its waiter went away");
                    }
                }
                None => tracing::debug!(error = %e, "Job failed after it was closed"),
            },
        }
    }

    async fn wait(&self) -> Result<(), JobError> {
        let Some((mut done_rx, mut err_rx)) = take(&self.receivers) else {
            return Err(JobError::AlreadyAwaited);
        };

        let outcome = tokio::select! {
            biased;
            Ok(()) = &mut done_rx => Ok(()),
            Ok(e) = &mut err_rx => Err(JobError::Command(e)),
            else => Err(JobError::Closed),
        };

        self.close();
        outcome
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(take(&self.done));
        drop(take(&self.err));
    }
}
