//! プランのステップ
//!
//! 各ステップは親の数だけカウントするゲートを持ちます。親が完了を通知するたびに
//! カウントが減り、0 になるとステップが実行可能になります。

use dockwright_core::{Image, ImageKey};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

/// ステップの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    WaitingOnParents,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            StepState::Pending => "pending",
            StepState::WaitingOnParents => "waiting",
            StepState::Running => "running",
            StepState::Succeeded => "succeeded",
            StepState::Failed => "failed",
        };
        write!(f, "{}", state)
    }
}

/// 親ごとに1つずつ解放されるカウントダウンゲート
#[derive(Debug)]
pub struct Gate {
    remaining: watch::Sender<usize>,
}

impl Gate {
    fn new() -> Self {
        let (remaining, _) = watch::channel(0);
        Self { remaining }
    }

    fn acquire(&self) {
        self.remaining.send_modify(|n| *n += 1);
    }

    fn release(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // Sender はゲート自身が保持しているため閉じることはない
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

#[derive(Default)]
struct Subscribers {
    gates: Vec<Arc<Gate>>,
    notified: bool,
}

/// ビルドプランの1ノード
pub struct Step {
    image: Arc<Image>,
    gate: Arc<Gate>,
    subscribers: Mutex<Subscribers>,
    notified: AtomicBool,
    state: Mutex<StepState>,
}

impl Step {
    pub fn new(image: Arc<Image>) -> Self {
        Self {
            image,
            gate: Arc::new(Gate::new()),
            subscribers: Mutex::new(Subscribers::default()),
            notified: AtomicBool::new(false),
            state: Mutex::new(StepState::Pending),
        }
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn key(&self) -> ImageKey {
        self.image.key()
    }

    /// 子ステップのゲートを登録
    ///
    /// 子は、このステップが通知するまで `wait` でブロックされます。
    /// 既に通知済みの場合は何もしません。
    pub fn subscribe(&self, child: &Step) {
        let mut subscribers = lock(&self.subscribers);
        if subscribers.notified {
            return;
        }
        child.gate.acquire();
        subscribers.gates.push(child.gate.clone());
    }

    /// 全ての親が通知するまで待つ
    pub async fn wait(&self) {
        if self.gate.remaining() > 0 {
            self.set_state(StepState::WaitingOnParents);
            tracing::debug!(
                step = %self.key(),
                parents = self.gate.remaining(),
                "Waiting on parent steps"
            );
        }
        self.gate.wait().await;
    }

    /// 登録された全ての子ステップを解放する（1回のみ）
    pub fn notify(&self) {
        if self.notified.swap(true, Ordering::SeqCst) {
            return;
        }

        let gates = {
            let mut subscribers = lock(&self.subscribers);
            subscribers.notified = true;
            std::mem::take(&mut subscribers.gates)
        };

        for gate in gates {
            gate.release();
        }
    }

    /// ドロップ時に必ず `notify` するガード
    pub fn notify_guard(self: &Arc<Self>) -> NotifyGuard {
        NotifyGuard {
            step: Arc::clone(self),
        }
    }

    pub fn pending_parents(&self) -> usize {
        self.gate.remaining()
    }

    pub fn is_notified(&self) -> bool {
        self.notified.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> StepState {
        *lock(&self.state)
    }

    pub fn set_state(&self, state: StepState) {
        *lock(&self.state) = state;
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("image", &self.key().to_string())
            .field("pending_parents", &self.pending_parents())
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 早期 return やパニックでも子ステップを解放するためのガード
pub struct NotifyGuard {
    step: Arc<Step>,
}

impl Drop for NotifyGuard {
    fn drop(&mut self) {
        self.step.notify();
    }
}
