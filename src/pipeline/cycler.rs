use std::fmt;
use std::ops::{Deref, DerefMut, RangeInclusive};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard, Weak};

use super::{current_stage, Cyclable, Pipeline};

/// 可以放进 [`PipelineCycler`] 的页面数据。
///
/// 复制页面就是 `Clone`；页面内部较大的列表再各自用 `CopyOnWrite` 共享，
/// 所以一次页面复制通常只是几次引用计数加一。
pub trait CycleData: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CycleData for T {}

/// 每个 pipeline stage 一页数据的版本化容器。
///
/// 不变式：stage `i+1` 的页面要么是 stage `i` 的别名（尚未分叉），要么是它的私有副本。
/// - 读：[`read_stage`](Self::read_stage) 拿到页面的 `Arc` 快照后立即放锁，
///   之后其他 stage 的写入不会影响这个快照；
/// - 写：[`write_stage`](Self::write_stage) 只锁住目标 stage，首次可变访问时若页面仍被共享就复制，
///   guard 释放时发布。
///
/// 前置条件：同一线程不得对同一 cycler 的同一 stage 同时持有两个写 guard（会死锁）。
pub struct PipelineCycler<T: CycleData> {
    pipeline: Arc<Pipeline>,
    pages: Box<[RwLock<Arc<T>>]>,
    dirty: AtomicBool,
    owner: Option<Weak<dyn Cyclable>>,
}

impl<T: CycleData> PipelineCycler<T> {
    /// 没有 owner 的 cycler 不会自动登记到 pipeline，需要手动 [`cycle`](Self::cycle)。
    pub fn new(pipeline: &Arc<Pipeline>, data: T) -> Self {
        Self::build(pipeline, data, None)
    }

    /// `owner` 在页面被写脏时登记到 pipeline，由 [`Pipeline::cycle`] 统一推进。
    pub fn with_owner(pipeline: &Arc<Pipeline>, data: T, owner: Weak<dyn Cyclable>) -> Self {
        Self::build(pipeline, data, Some(owner))
    }

    fn build(pipeline: &Arc<Pipeline>, data: T, owner: Option<Weak<dyn Cyclable>>) -> Self {
        let first = Arc::new(data);
        let pages = (0..pipeline.num_stages())
            .map(|_| RwLock::new(Arc::clone(&first)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            pipeline: Arc::clone(pipeline),
            pages,
            dirty: AtomicBool::new(false),
            owner,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn num_stages(&self) -> usize {
        self.pages.len()
    }

    /// 超出范围的 stage 落到最后一个 stage 上。
    #[inline]
    pub fn clamp_stage(&self, stage: usize) -> usize {
        stage.min(self.pages.len() - 1)
    }

    /// 调用线程当前 stage（已 clamp）。
    #[inline]
    pub fn current(&self) -> usize {
        self.clamp_stage(current_stage())
    }

    /// 当前 stage 及其所有上游 stage：`0..=current`。
    pub fn upstream_stages(&self) -> RangeInclusive<usize> {
        0..=self.current()
    }

    fn page(&self, stage: usize) -> Arc<T> {
        let guard = self.pages[stage]
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn read(&self) -> CycleDataReader<T> {
        self.read_stage(current_stage())
    }

    pub fn read_stage(&self, stage: usize) -> CycleDataReader<T> {
        let stage = self.clamp_stage(stage);
        CycleDataReader {
            data: self.page(stage),
            stage,
        }
    }

    pub fn write(&self) -> CycleDataWriter<'_, T> {
        self.writer(current_stage(), false)
    }

    pub fn write_stage(&self, stage: usize) -> CycleDataWriter<'_, T> {
        self.writer(stage, false)
    }

    /// 写当前 stage；`force_to_0` 时 guard 释放后所有上游 stage（`0..current`）都别名到写好的页面。
    /// 下游 stage 不受影响，照常等 cycle。
    pub fn write_upstream(&self, force_to_0: bool) -> CycleDataWriter<'_, T> {
        self.writer(current_stage(), force_to_0)
    }

    fn writer(&self, stage: usize, force_to_0: bool) -> CycleDataWriter<'_, T> {
        let stage = self.clamp_stage(stage);
        let guard = self.pages[stage]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        CycleDataWriter {
            cycler: self,
            guard: Some(guard),
            stage,
            force_to_0,
            modified: false,
        }
    }

    /// stage 的页面是否已经与上一个 stage 分叉。stage 0 总是唯一的。
    pub fn is_stage_unique(&self, stage: usize) -> bool {
        let stage = self.clamp_stage(stage);
        if stage == 0 {
            return true;
        }
        !Arc::ptr_eq(&self.page(stage), &self.page(stage - 1))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn mark_dirty(&self) {
        if self.pages.len() < 2 {
            return;
        }
        if !self.dirty.swap(true, Ordering::AcqRel) {
            if let Some(owner) = &self.owner {
                self.pipeline.add_dirty(owner.clone());
            }
        }
    }

    /// 把每个 stage 的页面向下游推进一格：`page[i] = page[i-1]`，从最后一个 stage 往前做。
    ///
    /// 返回推进之后各 stage 是否仍有分叉（仍需要下一次 cycle）。
    /// 只能在没有写入进行时调用（帧与帧之间）。
    pub fn cycle(&self) -> bool {
        #[cfg(feature = "single-stage")]
        {
            false
        }

        #[cfg(not(feature = "single-stage"))]
        {
            let n = self.pages.len();
            for i in (1..n).rev() {
                let upstream = self.page(i - 1);
                *self.pages[i].write().unwrap_or_else(PoisonError::into_inner) = upstream;
            }
            let still_dirty = (1..n).any(|i| self.is_stage_unique(i));
            self.dirty.store(still_dirty, Ordering::Release);
            still_dirty
        }
    }
}

impl<T: CycleData + fmt::Debug> fmt::Debug for PipelineCycler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCycler")
            .field("pipeline", &self.pipeline.name())
            .field("stages", &self.pages.len())
            .field("dirty", &self.is_dirty())
            .field("stage0", &self.page(0))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// 某个 stage 页面的只读快照，不持有任何锁。
pub struct CycleDataReader<T> {
    data: Arc<T>,
    stage: usize,
}

impl<T> CycleDataReader<T> {
    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn into_arc(self) -> Arc<T> {
        self.data
    }
}

impl<T> Deref for CycleDataReader<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

/// 某个 stage 页面的写 guard。
///
/// 首次 `deref_mut` 时才做写时复制；只读访问不会复制页面，也不会把 cycler 标脏。
pub struct CycleDataWriter<'a, T: CycleData> {
    cycler: &'a PipelineCycler<T>,
    guard: Option<RwLockWriteGuard<'a, Arc<T>>>,
    stage: usize,
    force_to_0: bool,
    modified: bool,
}

impl<T: CycleData> CycleDataWriter<'_, T> {
    pub fn stage(&self) -> usize {
        self.stage
    }

    fn slot(&self) -> &Arc<T> {
        match &self.guard {
            Some(guard) => &**guard,
            None => unreachable!("CycleDataWriter used after release"),
        }
    }
}

impl<T: CycleData> Deref for CycleDataWriter<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &**self.slot()
    }
}

impl<T: CycleData> DerefMut for CycleDataWriter<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.modified = true;
        match &mut self.guard {
            Some(guard) => Arc::make_mut(&mut **guard),
            None => unreachable!("CycleDataWriter used after release"),
        }
    }
}

impl<T: CycleData> Drop for CycleDataWriter<'_, T> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        if !self.modified && !self.force_to_0 {
            return;
        }
        let page = Arc::clone(&guard);
        // 先发布本 stage 再去碰其他 stage 的锁
        drop(guard);

        if self.force_to_0 {
            for slot in &self.cycler.pages[..self.stage] {
                *slot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&page);
            }
        }
        self.cycler.mark_dirty();
    }
}
