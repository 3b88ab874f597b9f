//! 多 stage pipeline：每帧由外部调度器推进一次，各 stage 读自己的页面，互不加锁。

mod cow;
mod cycler;
mod update_seq;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

pub use cow::CopyOnWrite;
pub use cycler::{CycleData, CycleDataReader, CycleDataWriter, PipelineCycler};
pub use update_seq::UpdateSeq;

use crate::config::GraphConfig;
use crate::telemetry::{record_graph_event, GraphEventKind};

/// pipeline 在推进 stage 时对登记者的回调。
pub trait Cyclable: Send + Sync {
    /// 推进一格；返回 true 表示各 stage 仍有分叉，下一帧还需要继续推进。
    fn cycle(&self) -> bool;
}

// ─────────────────────────────────────────────────────────────────────────────

cfg_if::cfg_if! {
    if #[cfg(feature = "single-stage")] {
        /// 单 stage 编译下线程永远处于 stage 0。
        #[inline]
        pub fn current_stage() -> usize {
            0
        }

        fn set_current_stage(_stage: usize) -> usize {
            0
        }

        fn clamp_num_stages(requested: usize) -> usize {
            if requested > 1 {
                tracing::warn!(
                    target: "pipeline",
                    "single-stage build ignores request for {requested} stages"
                );
            }
            1
        }
    } else {
        use std::cell::Cell;

        thread_local! {
            static CURRENT_STAGE: Cell<usize> = const { Cell::new(0) };
        }

        /// 调用线程当前绑定的 stage，默认 0（app stage）。
        #[inline]
        pub fn current_stage() -> usize {
            CURRENT_STAGE.with(Cell::get)
        }

        fn set_current_stage(stage: usize) -> usize {
            CURRENT_STAGE.with(|c| c.replace(stage))
        }

        fn clamp_num_stages(requested: usize) -> usize {
            requested.max(1)
        }
    }
}

/// 把当前线程绑定到某个 stage，drop 时恢复之前的 stage。
#[must_use = "the stage binding ends when the guard is dropped"]
pub struct StageGuard {
    prev: usize,
}

impl StageGuard {
    pub fn enter(stage: usize) -> Self {
        StageGuard {
            prev: set_current_stage(stage),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        set_current_stage(self.prev);
    }
}

pub fn with_stage<R>(stage: usize, f: impl FnOnce() -> R) -> R {
    let _guard = StageGuard::enter(stage);
    f()
}

// ─────────────────────────────────────────────────────────────────────────────

/// 一条 pipeline：固定的 stage 数，以及这一帧被写脏、等待推进的 cycler 登记表。
pub struct Pipeline {
    name: String,
    num_stages: usize,
    dirty: Mutex<Vec<Weak<dyn Cyclable>>>,
    cycle_count: AtomicU64,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, num_stages: usize) -> Arc<Pipeline> {
        Arc::new(Pipeline {
            name: name.into(),
            num_stages: clamp_num_stages(num_stages),
            dirty: Mutex::new(Vec::new()),
            cycle_count: AtomicU64::new(0),
        })
    }

    /// 进程默认的 render pipeline，stage 数取自 [`GraphConfig`]。
    pub fn render() -> Arc<Pipeline> {
        static RENDER: OnceLock<Arc<Pipeline>> = OnceLock::new();
        Arc::clone(RENDER.get_or_init(|| Pipeline::new("render", GraphConfig::global().num_stages)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_stages(&self) -> usize {
        self.num_stages
    }

    /// 已经执行过的 [`cycle`](Self::cycle) 次数。
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Acquire)
    }

    pub fn num_dirty_cyclers(&self) -> usize {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(crate) fn add_dirty(&self, owner: Weak<dyn Cyclable>) {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(owner);
    }

    /// 推进所有脏 cycler 一格。只能在帧与帧之间、没有写入进行时调用。
    pub fn cycle(&self) {
        let pending = std::mem::take(&mut *self.dirty.lock().unwrap_or_else(PoisonError::into_inner));
        let total = pending.len();

        // 回调期间不持锁；仍然分叉的 owner 脏标记保持为 true，不会被重复登记
        let still_dirty: Vec<_> = pending
            .into_iter()
            .filter(|weak| match weak.upgrade() {
                Some(owner) => owner.cycle(),
                None => false,
            })
            .collect();

        let remaining = still_dirty.len();
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(still_dirty);
        let seq = self.cycle_count.fetch_add(1, Ordering::AcqRel) + 1;

        record_graph_event(
            GraphEventKind::PipelineCycle,
            format_args!("{} #{seq}: cycled {total}, {remaining} still dirty", self.name),
        );
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("num_stages", &self.num_stages)
            .field("cycle_count", &self.cycle_count())
            .finish()
    }
}
