//! ビルドドライバー
//!
//! ドライバーは1つのイメージを実際にビルドします。ドライバーは ID で
//! `DriverRegistry` に登録され、ビルダーの `driver` から選択されます。

mod ansible;
mod context;
mod docker;
mod dryrun;

pub use ansible::AnsiblePlaybookDriver;
pub use context::{ContextBuilder, DOCKERFILE_ENTRY};
pub use docker::DockerDriver;
pub use dryrun::DryRunDriver;

use crate::error::{BuildError, Result};
use crate::options::BuildDriverOptions;
use async_trait::async_trait;
use dockwright_core::{ANSIBLE_PLAYBOOK_DRIVER, DEFAULT_DRIVER, DOCKER_DRIVER, DRY_RUN_DRIVER, Image};
use std::collections::{BTreeMap, HashMap};
use std::io::IsTerminal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 親イメージの名前を受け取るビルド引数
pub const IMAGE_FROM_NAME_ARG: &str = "image_from_name";
pub const IMAGE_FROM_TAG_ARG: &str = "image_from_tag";
pub const IMAGE_FROM_REGISTRY_NAMESPACE_ARG: &str = "image_from_registry_namespace";
pub const IMAGE_FROM_REGISTRY_HOST_ARG: &str = "image_from_registry_host";
pub const IMAGE_FROM_FULLY_QUALIFIED_NAME_ARG: &str = "image_from_fully_qualified_name";

#[async_trait]
pub trait BuildDriver: Send + Sync {
    async fn build(
        &self,
        cancel: &CancellationToken,
        image: &Image,
        options: &BuildDriverOptions,
    ) -> Result<()>;
}

pub trait DriverFactory: Send + Sync {
    fn get(&self, id: &str) -> Result<Arc<dyn BuildDriver>>;
}

/// ID からドライバーを引くレジストリ
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn BuildDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// dry-run と ansible-playbook、Docker に接続できれば docker（default を兼ねる）を登録
    ///
    /// 標準出力が端末の場合だけ Docker ビルドの進捗を表示します。
    pub fn with_local_defaults() -> Self {
        Self::local_defaults(std::io::stdout().is_terminal())
    }

    fn local_defaults(show_progress: bool) -> Self {
        let mut registry = Self::new()
            .with_driver(DRY_RUN_DRIVER, Arc::new(DryRunDriver::new()))
            .with_driver(ANSIBLE_PLAYBOOK_DRIVER, Arc::new(AnsiblePlaybookDriver::new()));

        match DockerDriver::connect() {
            Ok(docker) => {
                let docker: Arc<dyn BuildDriver> = Arc::new(docker.with_progress(show_progress));
                registry.register(DOCKER_DRIVER, docker.clone());
                registry.register(DEFAULT_DRIVER, docker);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Docker is not available, docker builds will fail");
            }
        }

        registry
    }

    pub fn register(&mut self, id: impl Into<String>, driver: Arc<dyn BuildDriver>) {
        self.drivers.insert(id.into(), driver);
    }

    pub fn with_driver(mut self, id: impl Into<String>, driver: Arc<dyn BuildDriver>) -> Self {
        self.register(id, driver);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.drivers.contains_key(id)
    }
}

impl DriverFactory for DriverRegistry {
    fn get(&self, id: &str) -> Result<Arc<dyn BuildDriver>> {
        self.drivers
            .get(id)
            .cloned()
            .ok_or_else(|| BuildError::DriverNotFound(id.to_string()))
    }
}

/// 変数の値をビルド引数の文字列へ
pub(crate) fn arg_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// イメージから渡すビルド引数
///
/// 永続変数が優先され、通常の変数と親イメージの情報は未設定のキーだけを埋めます。
pub(crate) fn build_args(image: &Image) -> BTreeMap<String, String> {
    let mut args: BTreeMap<String, String> = image
        .persistent_vars
        .iter()
        .map(|(k, v)| (k.clone(), arg_value(v)))
        .collect();

    for (k, v) in &image.vars {
        args.entry(k.clone()).or_insert_with(|| arg_value(v));
    }

    if let Some(parent) = &image.parent {
        let parent_args = [
            (
                IMAGE_FROM_FULLY_QUALIFIED_NAME_ARG,
                parent.fully_qualified_name(),
            ),
            (IMAGE_FROM_NAME_ARG, parent.name.clone()),
            (IMAGE_FROM_TAG_ARG, parent.version.clone()),
            (
                IMAGE_FROM_REGISTRY_NAMESPACE_ARG,
                parent.registry_namespace.clone(),
            ),
            (IMAGE_FROM_REGISTRY_HOST_ARG, parent.registry_host.clone()),
        ];

        for (k, v) in parent_args {
            if !v.is_empty() {
                args.entry(k.to_string()).or_insert(v);
            }
        }
    }

    args
}

/// イメージに付けるラベル（永続ラベル優先）
pub(crate) fn labels(image: &Image) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = image
        .persistent_labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (k, v) in &image.labels {
        labels.entry(k.clone()).or_insert_with(|| v.clone());
    }

    labels
}
