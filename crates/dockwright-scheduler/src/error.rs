use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("ワーカー #{id} の作成に失敗しました: {message}")]
    WorkerCreation { id: usize, message: String },

    #[error(transparent)]
    Job(#[from] JobError),
}

/// ジョブの待機結果
#[derive(Error, Debug)]
pub enum JobError {
    /// コマンドが返したエラー
    #[error(transparent)]
    Command(#[from] anyhow::Error),

    #[error("ジョブの結果は既に受け取られています")]
    AlreadyAwaited,

    #[error("ジョブは結果を返す前にクローズされました")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
