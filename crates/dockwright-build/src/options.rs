//! ビルドオプション
//!
//! `ServiceOptions` は呼び出し単位の設定、`BuildDriverOptions` はステップごとに
//! 解決されてドライバーへ渡される設定です。

use crate::error::{BuildError, Result};
use dockwright_config::Settings;
use dockwright_core::{BuilderOptions, UserPasswordAuth};
use std::collections::HashMap;

/// ビルド呼び出しのオプション
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceOptions {
    /// ansible-playbook ドライバーをローカル接続で実行
    pub connection_local: bool,
    /// 中間コンテナ名（未指定時はイメージから導出）
    pub intermediate_container_name: Option<String>,
    pub inventory_path: Option<String>,
    pub limit: Option<String>,
    pub dry_run: bool,
    pub enable_semver_tags: bool,
    pub semver_tags_templates: Vec<String>,
    /// ビルドするイメージ名の上書き
    pub image_name: Option<String>,
    pub image_registry_host: Option<String>,
    pub image_registry_namespace: Option<String>,
    /// 親イメージの上書き
    pub image_from_name: Option<String>,
    pub image_from_version: Option<String>,
    pub image_from_registry_host: Option<String>,
    pub image_from_registry_namespace: Option<String>,
    pub labels: HashMap<String, String>,
    pub persistent_labels: HashMap<String, String>,
    pub vars: HashMap<String, serde_json::Value>,
    pub persistent_vars: HashMap<String, serde_json::Value>,
    pub pull_parent_image: bool,
    pub push_image_after_build: bool,
    pub remove_images_after_push: bool,
    pub tags: Vec<String>,
}

impl ServiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定ファイルの既定値を反映
    ///
    /// フラグは呼び出し側と設定のどちらかが有効なら有効になります。
    /// テンプレートは呼び出し側が空の場合のみ設定値を使います。
    pub fn with_defaults(mut self, settings: &Settings) -> Self {
        self.push_image_after_build |= settings.push_images;
        self.remove_images_after_push |= settings.remove_images_after_push;
        self.pull_parent_image |= settings.pull_parent_image;
        self.enable_semver_tags |= settings.enable_semver_tags;

        if self.semver_tags_templates.is_empty() {
            self.semver_tags_templates = settings.semver_tags_templates.clone();
        }

        self
    }

    /// `key=value` 形式のラベルを追加
    pub fn add_label(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = parse_assignment(assignment)?;
        self.labels.insert(key, value);
        Ok(())
    }

    pub fn add_persistent_label(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = parse_assignment(assignment)?;
        self.persistent_labels.insert(key, value);
        Ok(())
    }

    /// `key=value` 形式の変数を追加（値は文字列として扱う）
    pub fn add_var(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = parse_assignment(assignment)?;
        self.vars.insert(key, serde_json::Value::String(value));
        Ok(())
    }

    pub fn add_persistent_var(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = parse_assignment(assignment)?;
        self.persistent_vars
            .insert(key, serde_json::Value::String(value));
        Ok(())
    }
}

/// `key=value` を分解
///
/// 値には `=` を含めることができます。キーが空の場合はエラーです。
pub fn parse_assignment(assignment: &str) -> Result<(String, String)> {
    let (key, value) = assignment.split_once('=').ok_or_else(|| {
        BuildError::InvalidConfig(format!(
            "'{}' は key=value 形式ではありません",
            assignment
        ))
    })?;

    let key = key.trim();
    if key.is_empty() {
        return Err(BuildError::InvalidConfig(format!(
            "'{}' のキーが空です",
            assignment
        )));
    }

    Ok((key.to_string(), value.trim().to_string()))
}

/// ドライバーへ渡すオプション
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildDriverOptions {
    /// 中間コンテナ名
    pub builder_name: String,
    pub builder_options: BuilderOptions,
    pub connection_local: bool,
    pub inventory_path: Option<String>,
    pub limit: Option<String>,
    /// 親イメージの pull に使う認証情報
    pub pull_auth: Option<UserPasswordAuth>,
    /// push に使う認証情報
    pub push_auth: Option<UserPasswordAuth>,
    pub pull_parent_image: bool,
    pub push_image_after_build: bool,
    pub remove_image_after_push: bool,
}
