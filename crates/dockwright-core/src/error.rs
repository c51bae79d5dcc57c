use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("イメージが見つかりません: {name} (バージョン: {versions:?})")]
    ImageNotFound { name: String, versions: Vec<String> },

    #[error("ビルダーが見つかりません: {0}")]
    BuilderNotFound(String),

    #[error("レジストリ '{0}' の認証情報が見つかりません")]
    CredentialsNotFound(String),

    #[error("レジストリ '{registry}' の認証情報を取得できません: {message}")]
    CredentialsUnavailable { registry: String, message: String },

    #[error("無効なイメージ定義: {0}")]
    InvalidImage(String),

    #[error("イメージが既に登録されています: {0}")]
    DuplicateImage(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
