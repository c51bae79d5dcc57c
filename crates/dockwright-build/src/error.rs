use dockwright_config::ConfigError;
use dockwright_core::CoreError;
use dockwright_scheduler::{JobError, SchedulerError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("ビルドサービスに {0} が設定されていません")]
    MissingComponent(&'static str),

    #[error("カスケードプランでは {0} を指定できません（予測できない結果になる可能性があります）")]
    InvalidCascadeOptions(&'static str),

    #[error("{image} のビルドに失敗しました: {source}")]
    Step {
        image: String,
        #[source]
        source: Box<BuildError>,
    },

    #[error("ドライバーが見つかりません: {0}")]
    DriverNotFound(String),

    #[error("ビルドがキャンセルされました")]
    Cancelled,

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("Invalid tag: {tag}")]
    InvalidTag { tag: String },

    #[error("Authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("ビルドタスクが異常終了しました: {0}")]
    TaskPanicked(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// 失敗したステップのエラーとして包む
    pub fn for_step(image: impl Into<String>, source: BuildError) -> Self {
        BuildError::Step {
            image: image.into(),
            source: Box::new(source),
        }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::Step { image, source } => {
                format!("{} のビルドに失敗しました\n\n{}", image, source.user_message())
            }
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     解決方法:\n\
                     1. Dockerfileのパスを確認してください\n\
                     2. ビルダーの options で明示的にパスを指定してください:\n\
                        dockerfile: path/to/Dockerfile",
                    path.display()
                )
            }
            BuildError::BuildFailed(msg) => {
                format!(
                    "ビルドに失敗しました: {}\n\
                     \n\
                     Dockerfileの内容を確認してください。",
                    msg
                )
            }
            BuildError::ContextNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     ビルダーの context パスを確認してください。",
                    path.display()
                )
            }
            BuildError::InvalidCascadeOptions(option) => {
                format!(
                    "カスケードプランでは {} を指定できません。\n\
                     \n\
                     子イメージにも同じ値が適用されるため、単一プランで実行してください。",
                    option
                )
            }
            BuildError::DriverNotFound(driver) => {
                format!(
                    "ドライバーが見つかりません: {}\n\
                     \n\
                     ビルダーの driver を確認するか、DriverRegistry に登録してください。",
                    driver
                )
            }
            BuildError::AuthFailed { registry, message } => {
                format!(
                    "レジストリ {} の認証に失敗しました: {}\n\
                     \n\
                     docker login を実行するか、~/.docker/config.json を確認してください。",
                    registry, message
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
