//! prev transform 变脏的节点登记表（进程级）。
//!
//! 节点在 app stage 上 transform 与 prev transform 出现差异时登记自己；
//! 每帧由 [`PandaNode::reset_all_prev_transform`](super::PandaNode::reset_all_prev_transform)
//! 统一 drain 并重置。

use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use super::PandaNode;

pub struct PrevTransformRegistry {
    dirty: Mutex<Vec<Weak<PandaNode>>>,
}

static REGISTRY: OnceLock<PrevTransformRegistry> = OnceLock::new();

/// 显式初始化；不调用也会在第一次使用时自动初始化。
pub fn init() -> &'static PrevTransformRegistry {
    registry()
}

pub fn registry() -> &'static PrevTransformRegistry {
    REGISTRY.get_or_init(|| PrevTransformRegistry {
        dirty: Mutex::new(Vec::new()),
    })
}

impl PrevTransformRegistry {
    pub(crate) fn register(&self, node: Weak<PandaNode>) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(node);
    }

    /// 取走当前所有仍然存活的节点，登记表清空。
    pub fn drain(&self) -> Vec<Arc<PandaNode>> {
        let taken = std::mem::take(&mut *self.dirty.lock().unwrap_or_else(PoisonError::into_inner));
        taken.into_iter().filter_map(|w| w.upgrade()).collect()
    }

    pub fn len(&self) -> usize {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
