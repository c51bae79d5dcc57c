use super::{BuildDriver, build_args, labels};
use crate::error::Result;
use crate::options::BuildDriverOptions;
use async_trait::async_trait;
use colored::Colorize;
use dockwright_core::Image;
use std::fmt::Write;
use tokio_util::sync::CancellationToken;

/// ビルドせずに、ビルドされる内容を表示するドライバー
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDriver;

impl DryRunDriver {
    pub fn new() -> Self {
        Self
    }

    /// 表示内容を組み立てる
    pub fn render(image: &Image, options: &BuildDriverOptions) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "{} {}", "▶".cyan(), image.fully_qualified_name().bold());
        if let Some(parent) = &image.parent {
            let _ = writeln!(out, "  parent: {}", parent.fully_qualified_name());
        }
        if !image.children.is_empty() {
            let children: Vec<String> = image.children.iter().map(|c| c.to_string()).collect();
            let _ = writeln!(out, "  children: {}", children.join(", "));
        }
        if !image.tags.is_empty() {
            let _ = writeln!(out, "  tags: {}", image.tags.join(", "));
        }

        let args = build_args(image);
        if !args.is_empty() {
            let _ = writeln!(out, "  build args:");
            for (k, v) in &args {
                let _ = writeln!(out, "    {}: {}", k, v);
            }
        }

        let labels = labels(image);
        if !labels.is_empty() {
            let _ = writeln!(out, "  labels:");
            for (k, v) in &labels {
                let _ = writeln!(out, "    {}: {}", k, v);
            }
        }

        let _ = writeln!(out, "  options:");
        let _ = writeln!(out, "    builder name: {}", options.builder_name);
        if let Some(context) = &options.builder_options.context {
            let _ = writeln!(out, "    context: {}", context.display());
        }
        if let Some(dockerfile) = &options.builder_options.dockerfile {
            let _ = writeln!(out, "    dockerfile: {}", dockerfile);
        }
        if let Some(playbook) = &options.builder_options.playbook {
            let _ = writeln!(out, "    playbook: {}", playbook);
        }
        if let Some(inventory) = options
            .inventory_path
            .as_ref()
            .or(options.builder_options.inventory.as_ref())
        {
            let _ = writeln!(out, "    inventory: {}", inventory);
        }
        if let Some(limit) = &options.limit {
            let _ = writeln!(out, "    limit: {}", limit);
        }
        if options.connection_local {
            let _ = writeln!(out, "    connection: local");
        }
        if let Some(auth) = &options.pull_auth {
            let _ = writeln!(out, "    pull auth: {}", auth.username);
        }
        if let Some(auth) = &options.push_auth {
            let _ = writeln!(out, "    push auth: {}", auth.username);
        }
        let _ = writeln!(out, "    pull parent image: {}", options.pull_parent_image);
        let _ = writeln!(out, "    push after build: {}", options.push_image_after_build);
        let _ = writeln!(out, "    remove after push: {}", options.remove_image_after_push);

        out
    }
}

#[async_trait]
impl BuildDriver for DryRunDriver {
    async fn build(
        &self,
        _cancel: &CancellationToken,
        image: &Image,
        options: &BuildDriverOptions,
    ) -> Result<()> {
        tracing::info!(image = %image.fully_qualified_name(), driver = "dry-run", "Dry run build");
        println!("{}", Self::render(image, options));
        Ok(())
    }
}
