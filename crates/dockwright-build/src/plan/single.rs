use super::{Planner, Step, find_images};
use crate::error::Result;
use dockwright_core::ImagesStore;
use std::sync::Arc;

/// 要求されたイメージだけを対象にするプラン
pub struct SinglePlan {
    images: Arc<dyn ImagesStore>,
}

impl SinglePlan {
    pub fn new(images: Arc<dyn ImagesStore>) -> Self {
        Self { images }
    }
}

impl Planner for SinglePlan {
    fn plan(&self, name: &str, versions: &[String]) -> Result<Vec<Arc<Step>>> {
        let steps: Vec<Arc<Step>> = find_images(self.images.as_ref(), name, versions)?
            .into_iter()
            .map(|image| Arc::new(Step::new(image)))
            .collect();

        tracing::debug!(image = name, steps = steps.len(), "Planned single build");
        Ok(steps)
    }
}
