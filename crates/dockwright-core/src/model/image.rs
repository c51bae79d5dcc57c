//! イメージ定義

use super::builder::BuilderRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// ワイルドカードバージョンを表す記号
pub const WILDCARD_VERSION: &str = "*";

/// グラフ内でイメージを一意に識別するキー（name:version）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageKey {
    pub name: String,
    pub version: String,
}

impl ImageKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// 親イメージへの参照
///
/// pull 用の認証情報解決と、ドライバーへ渡すベースイメージ名に使用します。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub registry_host: String,
    #[serde(default)]
    pub registry_namespace: String,
}

impl ImageReference {
    /// 完全修飾名（host/namespace/name:version）
    pub fn fully_qualified_name(&self) -> String {
        qualified_name(
            &self.registry_host,
            &self.registry_namespace,
            &self.name,
            &self.version,
        )
    }
}

/// ビルド対象のイメージ定義
///
/// 定義の読み込み時に一度だけ構築され、ビルド中は読み取り専用として扱います。
/// サービスがイメージ名などを上書きする場合は clone したものを変更します。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub registry_host: String,
    #[serde(default)]
    pub registry_namespace: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// 呼び出し側の同名ラベルより優先されるラベル
    #[serde(default)]
    pub persistent_labels: HashMap<String, String>,
    #[serde(default)]
    pub vars: HashMap<String, serde_json::Value>,
    /// 呼び出し側の同名変数より優先される変数
    #[serde(default)]
    pub persistent_vars: HashMap<String, serde_json::Value>,
    /// ビルダー（名前参照またはインライン定義）
    #[serde(default)]
    pub builder: Option<BuilderRef>,
    /// 親イメージ
    #[serde(default)]
    pub parent: Option<ImageReference>,
    /// 子イメージ（宣言順）
    #[serde(default)]
    pub children: Vec<ImageKey>,
}

impl Image {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ImageKey {
        ImageKey::new(&self.name, &self.version)
    }

    /// このイメージを親として参照するための値
    pub fn reference(&self) -> ImageReference {
        ImageReference {
            name: self.name.clone(),
            version: self.version.clone(),
            registry_host: self.registry_host.clone(),
            registry_namespace: self.registry_namespace.clone(),
        }
    }

    /// 完全修飾名（host/namespace/name:version）
    ///
    /// 空の要素は省略されます。
    pub fn fully_qualified_name(&self) -> String {
        qualified_name(
            &self.registry_host,
            &self.registry_namespace,
            &self.name,
            &self.version,
        )
    }

    /// バージョンを除いたリポジトリ名（host/namespace/name）
    pub fn repository(&self) -> String {
        [
            self.registry_host.as_str(),
            self.registry_namespace.as_str(),
            self.name.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
    }

    /// ワイルドカードバージョン（`*`）の定義かどうか
    pub fn is_wildcard(&self) -> bool {
        self.version == WILDCARD_VERSION
    }
}

fn qualified_name(host: &str, namespace: &str, name: &str, version: &str) -> String {
    let mut full = [host, namespace, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");

    if !version.is_empty() {
        full.push(':');
        full.push_str(version);
    }

    full
}
