//! ストアの契約とインメモリ実装
//!
//! ビルド中のストアは読み取り専用で、複数タスクから同時に参照されます。
//! そのため全ての契約は `Send + Sync` を要求します。

use crate::error::{CoreError, Result};
use crate::model::{Builder, Image, ImageKey, UserPasswordAuth};
use std::collections::HashMap;
use std::sync::Arc;

/// 解決済みイメージグラフの読み取り
pub trait ImagesStore: Send + Sync {
    /// name と version が一致するイメージ
    fn find(&self, name: &str, version: &str) -> Result<Arc<Image>>;

    /// name が一致する全バージョン（登録順）
    fn find_by_name(&self, name: &str) -> Result<Vec<Arc<Image>>>;

    fn get(&self, key: &ImageKey) -> Option<Arc<Image>>;
}

/// 名前付きビルダーの参照
pub trait BuildersStore: Send + Sync {
    fn find(&self, name: &str) -> Result<Builder>;
}

/// レジストリホストごとの認証情報
///
/// 登録がない場合は `CoreError::CredentialsNotFound` を返します。
pub trait CredentialsStore: Send + Sync {
    fn get(&self, registry_host: &str) -> Result<UserPasswordAuth>;
}

/// インメモリのイメージグラフ
#[derive(Debug, Default, Clone)]
pub struct ImageGraph {
    images: HashMap<ImageKey, Arc<Image>>,
    versions: HashMap<String, Vec<ImageKey>>,
}

impl ImageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// イメージを登録
    pub fn add(&mut self, image: Image) -> Result<ImageKey> {
        if image.name.is_empty() {
            return Err(CoreError::InvalidImage(
                "イメージ名が指定されていません".to_string(),
            ));
        }

        let key = image.key();
        if self.images.contains_key(&key) {
            return Err(CoreError::DuplicateImage(key.to_string()));
        }

        self.versions
            .entry(key.name.clone())
            .or_default()
            .push(key.clone());
        self.images.insert(key.clone(), Arc::new(image));

        Ok(key)
    }

    /// 親子関係を登録
    ///
    /// 子に親が未設定の場合は、この親を pull 元として記録します。
    /// 同じ辺を二度登録しても子リストは重複しません。
    pub fn link(&mut self, parent: &ImageKey, child: &ImageKey) -> Result<()> {
        let parent_ref = self
            .images
            .get(parent)
            .map(|image| image.reference())
            .ok_or_else(|| not_found(parent))?;

        let child_image = self.images.get_mut(child).ok_or_else(|| not_found(child))?;
        let child_image = Arc::make_mut(child_image);
        if child_image.parent.is_none() {
            child_image.parent = Some(parent_ref);
        }

        let parent_image = self.images.get_mut(parent).ok_or_else(|| not_found(parent))?;
        let parent_image = Arc::make_mut(parent_image);
        if !parent_image.children.contains(child) {
            parent_image.children.push(child.clone());
        }

        tracing::debug!(parent = %parent, child = %child, "Linked images");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn not_found(key: &ImageKey) -> CoreError {
    CoreError::ImageNotFound {
        name: key.name.clone(),
        versions: vec![key.version.clone()],
    }
}

impl ImagesStore for ImageGraph {
    fn find(&self, name: &str, version: &str) -> Result<Arc<Image>> {
        let key = ImageKey::new(name, version);
        self.images.get(&key).cloned().ok_or_else(|| not_found(&key))
    }

    fn find_by_name(&self, name: &str) -> Result<Vec<Arc<Image>>> {
        Ok(self
            .versions
            .get(name)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| self.images.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn get(&self, key: &ImageKey) -> Option<Arc<Image>> {
        self.images.get(key).cloned()
    }
}

/// インメモリのビルダーストア
#[derive(Debug, Default, Clone)]
pub struct BuildersIndex {
    builders: HashMap<String, Builder>,
}

impl BuildersIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, builder: Builder) {
        self.builders.insert(builder.name.clone(), builder);
    }
}

impl BuildersStore for BuildersIndex {
    fn find(&self, name: &str) -> Result<Builder> {
        self.builders
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::BuilderNotFound(name.to_string()))
    }
}

/// 固定の認証情報ストア
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    credentials: HashMap<String, UserPasswordAuth>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registry_host: impl Into<String>, auth: UserPasswordAuth) {
        self.credentials.insert(registry_host.into(), auth);
    }
}

impl CredentialsStore for StaticCredentials {
    fn get(&self, registry_host: &str) -> Result<UserPasswordAuth> {
        self.credentials
            .get(registry_host)
            .cloned()
            .ok_or_else(|| CoreError::CredentialsNotFound(registry_host.to_string()))
    }
}
