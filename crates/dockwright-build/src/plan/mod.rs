//! ビルドプラン
//!
//! 要求されたイメージ（とカスケード時はその子孫）をステップの集合に変換します。

mod cascade;
mod factory;
mod single;
mod step;

pub use cascade::CascadePlan;
pub use factory::{PlanFactory, PlanKind};
pub use single::SinglePlan;
pub use step::{Gate, NotifyGuard, Step, StepState};

use crate::error::Result;
use dockwright_core::{CoreError, Image, ImagesStore};
use std::fmt;
use std::sync::Arc;

/// ステップの生成
pub trait Planner: Send + Sync {
    fn plan(&self, name: &str, versions: &[String]) -> Result<Vec<Arc<Step>>>;
}

/// カスケードの深さ
///
/// ルートからの距離がこの値以下のイメージまでがプランに含まれます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    #[default]
    Unlimited,
    Limited(usize),
}

impl Depth {
    /// ルートからの距離 `distance` のイメージを含めるか
    pub fn allows(&self, distance: usize) -> bool {
        match self {
            Depth::Unlimited => true,
            Depth::Limited(depth) => distance <= *depth,
        }
    }
}

/// 負の値は無制限
impl From<i32> for Depth {
    fn from(depth: i32) -> Self {
        usize::try_from(depth)
            .map(Depth::Limited)
            .unwrap_or(Depth::Unlimited)
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Unlimited => write!(f, "unlimited"),
            Depth::Limited(depth) => write!(f, "{}", depth),
        }
    }
}

/// 要求に一致するイメージを検索
///
/// バージョン指定がなければ全バージョン、あれば指定されたものだけを返します。
/// 1件も見つからない場合は `ImageNotFound` です。
pub(crate) fn find_images(
    images: &dyn ImagesStore,
    name: &str,
    versions: &[String],
) -> Result<Vec<Arc<Image>>> {
    let found = if versions.is_empty() {
        images.find_by_name(name)?
    } else {
        versions
            .iter()
            .filter_map(|version| match images.find(name, version) {
                Ok(image) => Some(image),
                Err(e) => {
                    tracing::warn!(image = name, version = %version, error = %e, "Skipping unknown version");
                    None
                }
            })
            .collect()
    };

    if found.is_empty() {
        return Err(CoreError::ImageNotFound {
            name: name.to_string(),
            versions: versions.to_vec(),
        }
        .into());
    }

    Ok(found)
}
