//! ビルダー定義

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Docker Engine API でビルドするドライバー
pub const DOCKER_DRIVER: &str = "docker";
/// Ansible playbook でビルドするドライバー
pub const ANSIBLE_PLAYBOOK_DRIVER: &str = "ansible-playbook";
/// ドライバー未指定時・未登録時に使うドライバー
pub const DEFAULT_DRIVER: &str = "default";
/// 実際のビルドを行わないドライバー
pub const DRY_RUN_DRIVER: &str = "dry-run";

/// ビルダー定義
///
/// YAML形式：
/// ```yaml
/// name: php-builder
/// driver: docker
/// options:
///   context: ./images/php
///   dockerfile: Dockerfile.fpm
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub options: BuilderOptions,
}

fn default_driver() -> String {
    DEFAULT_DRIVER.to_string()
}

impl Builder {
    pub fn new(name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: driver.into(),
            options: BuilderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuilderOptions) -> Self {
        self.options = options;
        self
    }
}

/// ドライバー固有のオプション
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderOptions {
    /// ビルドコンテキストのディレクトリ
    #[serde(default)]
    pub context: Option<PathBuf>,
    /// コンテキストからの Dockerfile の相対パス
    #[serde(default)]
    pub dockerfile: Option<String>,
    /// playbook ドライバー用
    #[serde(default)]
    pub playbook: Option<String>,
    /// playbook ドライバー用
    #[serde(default)]
    pub inventory: Option<String>,
}

/// イメージから見たビルダーの指定方法
///
/// 名前で Builders ストアを参照するか、イメージ定義内に直接記述します。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuilderRef {
    Named(String),
    Inline(Builder),
}

impl From<&str> for BuilderRef {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<Builder> for BuilderRef {
    fn from(builder: Builder) -> Self {
        Self::Inline(builder)
    }
}
