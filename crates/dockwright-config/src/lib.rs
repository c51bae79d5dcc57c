pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 設定ファイルパスを直接指定する環境変数
pub const CONFIG_ENV: &str = "DOCKWRIGHT_CONFIG";

/// semver タグのデフォルトテンプレート
pub const DEFAULT_SEMVER_TAGS_TEMPLATE: &str = "{{ .Major }}.{{ .Minor }}.{{ .Patch }}";

const CANDIDATES: [&str; 2] = ["dockwright.yaml", ".dockwright.yaml"];

/// 設定ファイルを探す
///
/// 以下の優先順位で設定ファイルを検索:
/// 1. 環境変数 DOCKWRIGHT_CONFIG (直接パス指定)
/// 2. カレントディレクトリ: dockwright.yaml, .dockwright.yaml
/// 3. ./.dockwright/ ディレクトリ内: dockwright.yaml
/// 4. ~/.config/dockwright/dockwright.yaml (グローバル設定)
pub fn find_config_file() -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points to a missing file", CONFIG_ENV);
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリで検索
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    // 3. ./.dockwright/ ディレクトリで検索
    let path = current_dir.join(".dockwright").join(CANDIDATES[0]);
    if path.exists() {
        return Ok(path);
    }

    // 4. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("dockwright").join(CANDIDATES[0]);
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

/// ビルドの既定値
///
/// YAML形式：
/// ```yaml
/// concurrency: 4
/// push_images: true
/// semver_tags_enabled: true
/// semver_tags_templates:
///   - "{{ .Major }}.{{ .Minor }}"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// ワーカー数
    pub concurrency: usize,
    pub push_images: bool,
    pub remove_images_after_push: bool,
    pub pull_parent_image: bool,
    #[serde(rename = "semver_tags_enabled")]
    pub enable_semver_tags: bool,
    pub semver_tags_templates: Vec<String>,
    /// Docker の config.json（未指定時は ~/.docker/config.json）
    pub docker_config_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            push_images: false,
            remove_images_after_push: false,
            pull_parent_image: false,
            enable_semver_tags: false,
            semver_tags_templates: vec![DEFAULT_SEMVER_TAGS_TEMPLATE.to_string()],
            docker_config_path: None,
        }
    }
}

/// CPU 数の 1/4（四捨五入、最低 1）
fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((cpus + 2) / 4).max(1)
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let settings: Settings =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// 設定ファイルがあれば読み込み、なければ既定値
    pub fn load_or_default() -> Result<Self> {
        match find_config_file() {
            Ok(path) => Self::load(path),
            Err(ConfigError::ConfigFileNotFound) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// 実際に起動するワーカー数
    ///
    /// dry-run では出力が混ざらないよう 1 に固定されます。
    pub fn effective_concurrency(&self, dry_run: bool) -> usize {
        if dry_run { 1 } else { self.concurrency.max(1) }
    }
}
