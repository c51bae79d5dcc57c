//! セマンティックバージョンのタグ生成
//!
//! `1.2.3` とテンプレート `["{{ .Major }}", "{{ .Major }}.{{ .Minor }}"]` から
//! `["1", "1.2"]` を生成します。

use crate::error::{BuildError, Result};
use regex::{Captures, Regex};
use ::semver::Version;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.?(\w+)\s*\}\}"));

pub trait SemverGenerator: Send + Sync {
    /// 各バージョンにテンプレートを適用したタグ一覧
    ///
    /// セマンティックバージョンとして解釈できないバージョンは無視します。
    fn generate(&self, versions: &[String], templates: &[String]) -> Result<Vec<String>>;
}

/// パース済みのバージョン
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemVer {
    version: Version,
}

impl SemVer {
    /// `v` 接頭辞と、マイナー・パッチの省略を許容してパース
    pub fn parse(version: &str) -> Option<Self> {
        let version = version.trim();
        let version = version.strip_prefix('v').unwrap_or(version);

        let core_end = version.find(['-', '+']).unwrap_or(version.len());
        let (core, suffix) = version.split_at(core_end);
        let padding = match core.matches('.').count() {
            0 => ".0.0",
            1 => ".0",
            _ => "",
        };

        Version::parse(&format!("{}{}{}", core, padding, suffix))
            .ok()
            .map(|version| Self { version })
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    fn field(&self, name: &str) -> Option<String> {
        let v = &self.version;
        match name {
            "Major" => Some(v.major.to_string()),
            "Minor" => Some(v.minor.to_string()),
            "Patch" => Some(v.patch.to_string()),
            "PreRelease" => Some(v.pre.to_string()),
            "Build" => Some(v.build.to_string()),
            _ => None,
        }
    }

    /// テンプレートを展開
    pub fn render(&self, template: &str) -> Result<String> {
        let re = PLACEHOLDER
            .as_ref()
            .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;

        if let Some(unknown) = re
            .captures_iter(template)
            .find(|caps| self.field(&caps[1]).is_none())
        {
            return Err(BuildError::InvalidConfig(format!(
                "semver テンプレート '{}' に不明なフィールドがあります: {}",
                template, &unknown[1]
            )));
        }

        Ok(re
            .replace_all(template, |caps: &Captures| {
                self.field(&caps[1]).unwrap_or_default()
            })
            .into_owned())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSemverGenerator;

impl DefaultSemverGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl SemverGenerator for DefaultSemverGenerator {
    fn generate(&self, versions: &[String], templates: &[String]) -> Result<Vec<String>> {
        let mut tags: Vec<String> = Vec::new();

        for version in versions {
            let Some(semver) = SemVer::parse(version) else {
                tracing::debug!(version = %version, "Not a semantic version, skipped");
                continue;
            };

            for template in templates {
                let tag = semver.render(template)?;
                if !tag.is_empty() && !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }

        Ok(tags)
    }
}
