use super::{BuildDriver, labels};
use crate::error::{BuildError, Result};
use crate::options::BuildDriverOptions;
use async_trait::async_trait;
use colored::Colorize;
use dockwright_core::Image;
use serde_json::{Map, Value};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const ANSIBLE_PLAYBOOK: &str = "ansible-playbook";

pub const IMAGE_NAME_VAR: &str = "image_name";
pub const IMAGE_TAG_VAR: &str = "image_tag";
pub const IMAGE_FULLY_QUALIFIED_NAME_VAR: &str = "image_fully_qualified_name";
pub const IMAGE_REGISTRY_NAMESPACE_VAR: &str = "image_registry_namespace";
pub const IMAGE_REGISTRY_HOST_VAR: &str = "image_registry_host";
pub const IMAGE_BUILDER_LABEL_VAR: &str = "image_builder_label";
pub const IMAGE_EXTRA_TAGS_VAR: &str = "image_extra_tags";
pub const PUSH_IMAGE_VAR: &str = "push_image";

/// `ansible-playbook` を実行してビルドするドライバー
///
/// イメージの情報と変数は `--extra-vars` の JSON として渡します。
/// 認証情報は渡しません。
#[derive(Debug, Clone)]
pub struct AnsiblePlaybookDriver {
    program: String,
}

impl Default for AnsiblePlaybookDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsiblePlaybookDriver {
    pub fn new() -> Self {
        Self {
            program: ANSIBLE_PLAYBOOK.to_string(),
        }
    }

    /// 実行するコマンドを差し替える
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// `ansible-playbook` に渡す引数
    pub fn command_args(image: &Image, options: &BuildDriverOptions) -> Result<Vec<String>> {
        let playbook = options
            .builder_options
            .playbook
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                BuildError::InvalidConfig(format!(
                    "{} のビルダーに playbook が定義されていません",
                    image.key()
                ))
            })?;

        let inventory = options
            .inventory_path
            .as_deref()
            .or(options.builder_options.inventory.as_deref())
            .filter(|i| !i.is_empty())
            .ok_or_else(|| {
                BuildError::InvalidConfig(format!(
                    "{} のビルダーに inventory が定義されていません",
                    image.key()
                ))
            })?;

        let mut args = vec!["--inventory".to_string(), inventory.to_string()];
        if let Some(limit) = options.limit.as_deref().filter(|l| !l.is_empty()) {
            args.extend(["--limit".to_string(), limit.to_string()]);
        }
        if options.connection_local {
            args.extend(["--connection".to_string(), "local".to_string()]);
        }

        let extra_vars = serde_json::to_string(&extra_vars(image, options))
            .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;
        args.extend(["--extra-vars".to_string(), extra_vars, playbook.to_string()]);

        Ok(args)
    }
}

/// playbook へ渡す変数
///
/// 先に入れたキーが優先されます。イメージ自体の情報、永続変数、変数、
/// ラベル、親イメージの情報の順です。
pub(crate) fn extra_vars(image: &Image, options: &BuildDriverOptions) -> Map<String, Value> {
    fn put(vars: &mut Map<String, Value>, key: &str, value: Value) {
        vars.entry(key.to_string()).or_insert(value);
    }

    let mut vars = Map::new();

    put(
        &mut vars,
        IMAGE_FULLY_QUALIFIED_NAME_VAR,
        Value::String(image.fully_qualified_name()),
    );
    put(&mut vars, IMAGE_NAME_VAR, Value::String(image.name.clone()));
    if !image.registry_namespace.is_empty() {
        put(
            &mut vars,
            IMAGE_REGISTRY_NAMESPACE_VAR,
            Value::String(image.registry_namespace.clone()),
        );
    }
    if !image.version.is_empty() {
        put(&mut vars, IMAGE_TAG_VAR, Value::String(image.version.clone()));
    }
    put(
        &mut vars,
        IMAGE_BUILDER_LABEL_VAR,
        Value::String(builder_label(image, options)),
    );
    if !image.registry_host.is_empty() {
        put(
            &mut vars,
            IMAGE_REGISTRY_HOST_VAR,
            Value::String(image.registry_host.clone()),
        );
    }

    for (k, v) in &image.persistent_vars {
        put(&mut vars, k, v.clone());
    }
    for (k, v) in &image.vars {
        put(&mut vars, k, v.clone());
    }
    if !image.tags.is_empty() {
        put(
            &mut vars,
            IMAGE_EXTRA_TAGS_VAR,
            Value::Array(image.tags.iter().cloned().map(Value::String).collect()),
        );
    }
    for (k, v) in labels(image) {
        put(&mut vars, &k, Value::String(v));
    }

    if let Some(parent) = &image.parent {
        let parent_vars = [
            (
                super::IMAGE_FROM_FULLY_QUALIFIED_NAME_ARG,
                parent.fully_qualified_name(),
            ),
            (super::IMAGE_FROM_NAME_ARG, parent.name.clone()),
            (
                super::IMAGE_FROM_REGISTRY_NAMESPACE_ARG,
                parent.registry_namespace.clone(),
            ),
            (
                super::IMAGE_FROM_REGISTRY_HOST_ARG,
                parent.registry_host.clone(),
            ),
            (super::IMAGE_FROM_TAG_ARG, parent.version.clone()),
        ];
        for (k, v) in parent_vars {
            if !v.is_empty() {
                put(&mut vars, k, Value::String(v));
            }
        }
    }

    if !options.push_image_after_build {
        put(&mut vars, PUSH_IMAGE_VAR, Value::Bool(false));
    }

    vars
}

/// 中間コンテナ名（未指定なら `builder_<namespace>_<name>_<version>`）
fn builder_label(image: &Image, options: &BuildDriverOptions) -> String {
    if !options.builder_name.is_empty() {
        return options.builder_name.clone();
    }

    let mut parts = vec!["builder", image.registry_namespace.as_str(), image.name.as_str()];
    parts.retain(|p| !p.is_empty());
    if !image.version.is_empty() {
        parts.push(image.version.as_str());
    }
    parts.join("_")
}

#[async_trait]
impl BuildDriver for AnsiblePlaybookDriver {
    async fn build(
        &self,
        cancel: &CancellationToken,
        image: &Image,
        options: &BuildDriverOptions,
    ) -> Result<()> {
        let args = Self::command_args(image, options)?;
        let prefix = image.key().to_string();

        tracing::info!(
            image = %image.fully_qualified_name(),
            driver = ANSIBLE_PLAYBOOK,
            inventory = ?options.inventory_path,
            limit = ?options.limit,
            connection_local = options.connection_local,
            "Running playbook"
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BuildError::BuildFailed(format!("{} を起動できません: {}", self.program, e))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let forward = async move {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("{} {}", prefix.dimmed(), line);
            }
        };
        let collect = async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        };
        let run = async {
            let (_, stderr, status) = tokio::join!(forward, collect, child.wait());
            (stderr, status)
        };

        let (stderr, status) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(image = %image.key(), "Playbook cancelled");
                return Err(BuildError::Cancelled);
            }
            result = run => result,
        };

        let status = status?;
        if !status.success() {
            return Err(BuildError::BuildFailed(format!(
                "{} exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            )));
        }

        tracing::info!(image = %image.fully_qualified_name(), "Playbook finished");
        Ok(())
    }
}
