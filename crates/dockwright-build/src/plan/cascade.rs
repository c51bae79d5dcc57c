use super::{Depth, Planner, Step, find_images};
use crate::error::Result;
use dockwright_core::{Image, ImageKey, ImagesStore};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// 要求されたイメージと子孫を対象にするプラン
///
/// 子孫は幅優先で辿り、親子の辺ごとに子のゲートを親へ登録します。
/// 複数の親を持つ子は、全ての親の完了を待ってから実行されます。
/// ワイルドカードバージョンのイメージとその子孫は対象外です。
pub struct CascadePlan {
    images: Arc<dyn ImagesStore>,
    depth: Depth,
}

impl CascadePlan {
    pub fn new(images: Arc<dyn ImagesStore>, depth: Depth) -> Self {
        Self { images, depth }
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }
}

#[derive(Default)]
struct Steps {
    ordered: Vec<Arc<Step>>,
    by_key: HashMap<ImageKey, Arc<Step>>,
}

impl Steps {
    /// 既存のステップを返すか、新しく作る（作った場合は true）
    fn get_or_insert(&mut self, image: &Arc<Image>) -> (Arc<Step>, bool) {
        let key = image.key();
        if let Some(step) = self.by_key.get(&key) {
            return (step.clone(), false);
        }

        let step = Arc::new(Step::new(image.clone()));
        self.by_key.insert(key, step.clone());
        self.ordered.push(step.clone());
        (step, true)
    }
}

impl Planner for CascadePlan {
    fn plan(&self, name: &str, versions: &[String]) -> Result<Vec<Arc<Step>>> {
        let roots = find_images(self.images.as_ref(), name, versions)?;

        let mut steps = Steps::default();
        let mut edges: HashSet<(ImageKey, ImageKey)> = HashSet::new();
        let mut queue: VecDeque<(Arc<Image>, usize)> = VecDeque::new();

        for root in roots {
            if root.is_wildcard() {
                tracing::debug!(image = %root.key(), "Skipping wildcard image");
                continue;
            }
            let (_, created) = steps.get_or_insert(&root);
            if created {
                queue.push_back((root, 0));
            }
        }

        while let Some((image, distance)) = queue.pop_front() {
            // 深さの上限に達したノードは、既に計画済みの子への辺だけを結ぶ
            let expand = self.depth.allows(distance + 1);

            let parent_key = image.key();
            let Some(parent) = steps.by_key.get(&parent_key).cloned() else {
                continue;
            };

            for child_key in &image.children {
                if !expand && !steps.by_key.contains_key(child_key) {
                    continue;
                }

                let Some(child) = self.images.get(child_key) else {
                    tracing::warn!(parent = %parent_key, child = %child_key, "Child image is not defined");
                    continue;
                };

                if child.is_wildcard() {
                    tracing::debug!(child = %child_key, "Skipping wildcard image");
                    continue;
                }

                if !edges.insert((parent_key.clone(), child_key.clone())) {
                    continue;
                }

                let (child_step, created) = steps.get_or_insert(&child);
                parent.subscribe(&child_step);

                if created {
                    queue.push_back((child, distance + 1));
                }
            }
        }

        tracing::debug!(
            image = name,
            depth = %self.depth,
            steps = steps.ordered.len(),
            "Planned cascade build"
        );
        Ok(steps.ordered)
    }
}
