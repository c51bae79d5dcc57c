//! ワーカー

use crate::error::Result;
use crate::job::Job;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// 全ワーカーで共有するジョブキュー
pub type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<Arc<dyn Job>>>>;

#[async_trait]
pub trait Worker: Send {
    fn id(&self) -> usize;

    /// キャンセルされるかキューが閉じるまでジョブを取り出して実行
    async fn start(&mut self, cancel: CancellationToken);
}

pub trait WorkerFactory: Send + Sync {
    fn create(&self, id: usize, queue: JobQueue) -> Result<Box<dyn Worker>>;
}

/// キューからジョブを1つずつ取り出して実行するワーカー
pub struct QueueWorker {
    id: usize,
    queue: JobQueue,
}

impl QueueWorker {
    pub fn new(id: usize, queue: JobQueue) -> Self {
        Self { id, queue }
    }

    async fn next_job(&self) -> Option<Arc<dyn Job>> {
        self.queue.lock().await.recv().await
    }
}

#[async_trait]
impl Worker for QueueWorker {
    fn id(&self) -> usize {
        self.id
    }

    async fn start(&mut self, cancel: CancellationToken) {
        tracing::debug!(worker = self.id, "Worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                job = self.next_job() => job,
            };

            let Some(job) = job else {
                tracing::debug!(worker = self.id, "Job queue closed");
                break;
            };

            job.run(cancel.clone()).await;
        }

        tracing::debug!(worker = self.id, "Worker stopped");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueueWorkerFactory;

impl WorkerFactory for QueueWorkerFactory {
    fn create(&self, id: usize, queue: JobQueue) -> Result<Box<dyn Worker>> {
        Ok(Box::new(QueueWorker::new(id, queue)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BuildJob, Command};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Count(Arc<AtomicUsize>);

    #[async_trait]
    impl Command for Count {
        async fn execute(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_drains_queue_until_closed() {
        let (tx, rx) = mpsc::unbounded_channel::<Arc<dyn Job>>();
        let queue: JobQueue = Arc::new(Mutex::new(rx));
        let count = Arc::new(AtomicUsize::new(0));

        let mut jobs = Vec::new();
        for _ in 0..3 {
            let job: Arc<dyn Job> = Arc::new(BuildJob::new(Box::new(Count(count.clone()))));
            tx.send(job.clone()).unwrap();
            jobs.push(job);
        }
        drop(tx);

        let mut worker = QueueWorkerFactory.create(7, queue).unwrap();
        assert_eq!(worker.id(), 7);
        worker.start(CancellationToken::new()).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        for job in jobs {
            job.wait().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let (_tx, rx) = mpsc::unbounded_channel::<Arc<dyn Job>>();
        let queue: JobQueue = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let mut worker = QueueWorker::new(0, queue);
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.start(cancel).await })
        };

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after cancel")
            .unwrap();
    }
}
