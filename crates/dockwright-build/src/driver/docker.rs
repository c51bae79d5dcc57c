//! Docker Engine API によるビルド
//!
//! 親イメージの pull、ビルド、タグ付け、push、push 後のローカルイメージ削除を行います。

use super::{BuildDriver, ContextBuilder, DOCKERFILE_ENTRY, build_args, labels};
use crate::error::{BuildError, Result};
use crate::options::BuildDriverOptions;
use crate::progress::BuildProgress;
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::{BuildInfo, PushImageInfo};
use colored::Colorize;
use dockwright_core::{Image, ImageReference, UserPasswordAuth};
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub struct DockerDriver {
    docker: Docker,
    show_progress: bool,
}

impl DockerDriver {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            show_progress: false,
        }
    }

    /// ローカルの Docker デーモンに接続
    pub fn connect() -> Result<Self> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    /// ビルド出力の代わりにスピナーを表示
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn shows_progress(&self) -> bool {
        self.show_progress
    }

    async fn pull_parent(
        &self,
        cancel: &CancellationToken,
        parent: &ImageReference,
        auth: Option<&UserPasswordAuth>,
    ) -> Result<()> {
        let repository = repository_of(parent);
        let tag = if parent.version.is_empty() {
            "latest"
        } else {
            parent.version.as_str()
        };

        println!("  ↓ {}:{}", repository.cyan(), tag);
        let credentials = auth.map(|a| docker_credentials(a, &parent.registry_host));

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image: repository.as_str(),
            tag,
            ..Default::default()
        };

        #[allow(deprecated)]
        let mut stream = self.docker.create_image(Some(options), None, credentials);

        while let Some(info) = next_or_cancel(cancel, &mut stream).await? {
            match info {
                Ok(bollard::models::CreateImageInfo {
                    status: Some(status),
                    ..
                }) => {
                    tracing::debug!(image = %repository, tag, status = %status, "Pulling parent image");
                }
                Err(e) => {
                    return Err(BuildError::BuildFailed(format!(
                        "親イメージの pull に失敗しました: {}",
                        e
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    async fn build_image(
        &self,
        cancel: &CancellationToken,
        image: &Image,
        options: &BuildDriverOptions,
    ) -> Result<()> {
        let name = image.fully_qualified_name();

        let context = options.builder_options.context.clone().ok_or_else(|| {
            BuildError::InvalidConfig(format!(
                "{} のビルダーに context が指定されていません",
                name
            ))
        })?;
        let dockerfile = context.join(
            options
                .builder_options
                .dockerfile
                .as_deref()
                .unwrap_or("Dockerfile"),
        );
        let context_data = ContextBuilder::create_context(&context, &dockerfile)?;

        let args = build_args(image);
        let labels = labels(image);

        #[allow(deprecated)]
        let build_options = bollard::image::BuildImageOptions {
            dockerfile: DOCKERFILE_ENTRY,
            t: name.as_str(),
            buildargs: args
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            ..Default::default()
        };
        tracing::debug!(image = %name, args = ?args, "Build options prepared");

        // FROM の pull に使うレジストリ認証
        let registry_config = match (&image.parent, &options.pull_auth) {
            (Some(parent), Some(auth)) => {
                let host = registry_or_default(&parent.registry_host);
                Some(HashMap::from([(
                    host.to_string(),
                    docker_credentials(auth, &parent.registry_host),
                )]))
            }
            _ => None,
        };

        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(context_data));

        #[allow(deprecated)]
        let mut stream =
            self.docker
                .build_image(build_options, registry_config, Some(Either::Left(body)));

        let progress = self.show_progress.then(|| BuildProgress::new(&name));

        while let Some(msg) = next_or_cancel(cancel, &mut stream).await? {
            let output = msg.map_err(BuildError::DockerConnection);
            let result = output.and_then(|output| handle_build_output(output, progress.as_ref()));

            if let Err(e) = result {
                if let Some(progress) = &progress {
                    progress.finish_error(&e.to_string());
                }
                return Err(e);
            }
        }

        if let Some(progress) = &progress {
            progress.finish_success(&name);
        }
        Ok(())
    }

    async fn tag_image(&self, image: &Image, tag: &str) -> Result<()> {
        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions {
            repo: image.repository(),
            tag: tag.to_string(),
        };

        self.docker
            .tag_image(&image.fully_qualified_name(), Some(options))
            .await?;
        tracing::debug!(image = %image.fully_qualified_name(), tag, "Tagged image");
        Ok(())
    }

    async fn push(
        &self,
        cancel: &CancellationToken,
        image: &Image,
        tag: &str,
        auth: Option<&UserPasswordAuth>,
    ) -> Result<()> {
        validate_tag(tag)?;

        let repository = image.repository();
        println!("  → {}:{}", repository.cyan(), tag);

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: tag.to_string(),
        };
        let credentials = auth.map(|a| docker_credentials(a, &image.registry_host));

        #[allow(deprecated)]
        let mut stream = self
            .docker
            .push_image(&repository, Some(options), credentials);

        while let Some(result) = next_or_cancel(cancel, &mut stream).await? {
            match result {
                Ok(PushImageInfo {
                    error: Some(message),
                    ..
                }) => return Err(BuildError::PushFailed { message }),
                Ok(PushImageInfo {
                    status: Some(status),
                    ..
                }) if status == "Pushed" => {
                    println!("  {} Pushed", "✓".green());
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn remove(&self, image: &Image, tags: &[String]) {
        let repository = image.repository();
        for tag in tags {
            let name = format!("{}:{}", repository, tag);
            if let Err(e) = self
                .docker
                .remove_image(
                    &name,
                    None::<bollard::query_parameters::RemoveImageOptions>,
                    None,
                )
                .await
            {
                tracing::warn!(image = %name, error = %e, "Failed to remove local image");
            }
        }
    }
}

#[async_trait]
impl BuildDriver for DockerDriver {
    async fn build(
        &self,
        cancel: &CancellationToken,
        image: &Image,
        options: &BuildDriverOptions,
    ) -> Result<()> {
        let name = image.fully_qualified_name();
        tracing::info!(image = %name, driver = "docker", "Building image");

        if options.pull_parent_image
            && let Some(parent) = &image.parent
        {
            self.pull_parent(cancel, parent, options.pull_auth.as_ref())
                .await?;
        }

        self.build_image(cancel, image, options).await?;

        for tag in &image.tags {
            self.tag_image(image, tag).await?;
        }

        if options.push_image_after_build {
            let tags = push_tags(image);
            for tag in &tags {
                self.push(cancel, image, tag, options.push_auth.as_ref())
                    .await?;
            }

            if options.remove_image_after_push {
                self.remove(image, &tags).await;
            }
        }

        tracing::info!(image = %name, "Successfully built");
        Ok(())
    }
}

/// 次の要素を待つ。キャンセルされたら `Cancelled`
async fn next_or_cancel<S>(cancel: &CancellationToken, stream: &mut S) -> Result<Option<S::Item>>
where
    S: Stream + Unpin,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(BuildError::Cancelled),
        item = stream.next() => Ok(item),
    }
}

fn handle_build_output(output: BuildInfo, progress: Option<&BuildProgress>) -> Result<()> {
    if let Some(error) = output.error {
        return Err(BuildError::BuildFailed(error));
    }

    if let Some(error_detail) = output.error_detail {
        let message = error_detail
            .message
            .unwrap_or_else(|| "Unknown build error".to_string());
        return Err(BuildError::BuildFailed(message));
    }

    if let Some(stream) = output.stream {
        match progress {
            Some(progress) => progress.set_message(&stream),
            None => print!("{}", stream),
        }
    }

    if let Some(status) = output.status
        && progress.is_none()
    {
        println!("{}", status.cyan());
    }

    Ok(())
}

/// push するタグ（バージョン + 追加タグ、重複なし）
fn push_tags(image: &Image) -> Vec<String> {
    let version = if image.version.is_empty() {
        "latest".to_string()
    } else {
        image.version.clone()
    };

    let mut tags = vec![version];
    for tag in &image.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

fn repository_of(reference: &ImageReference) -> String {
    ImageReference {
        version: String::new(),
        ..reference.clone()
    }
    .fully_qualified_name()
}

fn registry_or_default(host: &str) -> &str {
    if host.is_empty() { "docker.io" } else { host }
}

fn docker_credentials(auth: &UserPasswordAuth, registry_host: &str) -> DockerCredentials {
    DockerCredentials {
        username: Some(auth.username.clone()),
        password: Some(auth.password.clone()),
        serveraddress: Some(registry_or_default(registry_host).to_string()),
        ..Default::default()
    }
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(BuildError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(BuildError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(BuildError::InvalidTag {
            tag: format!("Invalid character '{}' in tag: {}", c, tag),
        });
    }

    Ok(())
}
