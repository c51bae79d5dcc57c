use super::{CascadePlan, Depth, Planner, SinglePlan};
use crate::error::{BuildError, Result};
use crate::options::ServiceOptions;
use dockwright_core::ImagesStore;
use std::sync::Arc;

/// プランの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanKind {
    #[default]
    Single,
    Cascade {
        depth: Depth,
    },
}

/// オプションを検証してプランを作る
pub struct PlanFactory {
    images: Arc<dyn ImagesStore>,
}

impl PlanFactory {
    pub fn new(images: Arc<dyn ImagesStore>) -> Self {
        Self { images }
    }

    pub fn new_plan(&self, kind: PlanKind, options: &ServiceOptions) -> Result<Box<dyn Planner>> {
        match kind {
            PlanKind::Single => Ok(Box::new(SinglePlan::new(self.images.clone()))),
            PlanKind::Cascade { depth } => {
                validate_cascade_options(options)?;
                Ok(Box::new(CascadePlan::new(self.images.clone(), depth)))
            }
        }
    }
}

/// 複数イメージへ同じ値を適用すると結果が曖昧になるオプションを拒否
fn validate_cascade_options(options: &ServiceOptions) -> Result<()> {
    let ambiguous = [
        (
            options.intermediate_container_name.is_some(),
            "intermediate_container_name",
        ),
        (options.inventory_path.is_some(), "inventory_path"),
        (options.limit.is_some(), "limit"),
        (options.image_name.is_some(), "image_name"),
        (options.image_from_name.is_some(), "image_from_name"),
    ];

    match ambiguous.iter().find(|(set, _)| *set) {
        Some((_, option)) => Err(BuildError::InvalidCascadeOptions(*option)),
        None => Ok(()),
    }
}
