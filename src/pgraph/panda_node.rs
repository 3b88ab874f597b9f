//! PandaNode：场景图的节点。
//!
//! 所有会变的字段都放在按 stage 分页的 [`CData`] 里；节点本身只有名字、种类、
//! 路径组件登记表以及若干调试标志。
//!
//! 具体操作分散在子模块：
//! - `graph`：父子连接的增删改、stash、拷贝；
//! - `cached`：包围体与 net mask 的惰性重算；
//! - `paths`：NodePathComponent 的登记、查找与连接维护。

mod cached;
mod graph;
mod paths;

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use glam::Vec3;

use super::connection::{Down, Up};
use super::node_kind::{GeomNode, NodeKind, PlainNode, TypeHandle};
use super::prev_transform;
use super::{
    BoundingVolume, BoundsType, CollideMask, DrawMask, NodePathComponent, RenderAttrib,
    RenderEffect, RenderEffects, RenderState, TransformState,
};
use crate::contract;
use crate::cull::CullTraverserData;
use crate::error::{GraphError, GraphResult};
use crate::pipeline::{CopyOnWrite, Cyclable, Pipeline, PipelineCycler, UpdateSeq};

/// `fancy_bits`：标记节点带有哪些"非平凡"属性，traversal 可据此跳过检查。
pub mod fancy_bits {
    pub const TRANSFORM: u32 = 0x0001;
    pub const STATE: u32 = 0x0002;
    pub const EFFECTS: u32 = 0x0004;
    pub const TAG: u32 = 0x0010;
    pub const DRAW_MASK: u32 = 0x0020;
    pub const CULL_CALLBACK: u32 = 0x0040;
}

/// 调试用：被标记的变更在发生时按前置条件违反处理并拒绝执行。
pub mod unexpected_change {
    pub const PARENTS: u32 = 0x001;
    pub const CHILDREN: u32 = 0x002;
    pub const TRANSFORM: u32 = 0x004;
    pub const STATE: u32 = 0x008;
    pub const DRAW_MASK: u32 = 0x010;
}

pub type UserData = Arc<dyn Any + Send + Sync>;

/// 一个 stage 的节点数据。
#[derive(Clone)]
pub(crate) struct CData {
    pub(crate) transform: Arc<TransformState>,
    pub(crate) prev_transform: Arc<TransformState>,
    pub(crate) state: Arc<RenderState>,
    pub(crate) effects: Arc<RenderEffects>,
    pub(crate) tags: CopyOnWrite<BTreeMap<String, String>>,
    pub(crate) user_data: Option<UserData>,
    pub(crate) draw_control_mask: DrawMask,
    pub(crate) draw_show_mask: DrawMask,
    pub(crate) into_collide_mask: CollideMask,
    pub(crate) bounds_type: BoundsType,
    pub(crate) user_bounds: Option<BoundingVolume>,
    pub(crate) final_bounds: bool,
    pub(crate) fancy_bits: u32,

    // 节点自身的包围体缓存：mark 递增即失效
    pub(crate) internal_bounds: BoundingVolume,
    pub(crate) internal_vertices: usize,
    pub(crate) internal_bounds_mark: UpdateSeq,
    pub(crate) internal_bounds_computed: UpdateSeq,

    // 汇总缓存：last_update != next_update 即失效
    pub(crate) net_collide_mask: CollideMask,
    pub(crate) net_draw_control_mask: DrawMask,
    pub(crate) net_draw_show_mask: DrawMask,
    pub(crate) nested_vertices: usize,
    pub(crate) external_bounds: BoundingVolume,
    pub(crate) last_update: UpdateSeq,
    pub(crate) next_update: UpdateSeq,
    pub(crate) last_bounds_update: UpdateSeq,

    pub(crate) down: Down,
    pub(crate) stashed: Down,
    pub(crate) up: Up,
}

impl CData {
    fn new() -> Self {
        let seq = UpdateSeq::new();
        CData {
            transform: TransformState::identity(),
            prev_transform: TransformState::identity(),
            state: RenderState::empty(),
            effects: RenderEffects::empty(),
            tags: CopyOnWrite::default(),
            user_data: None,
            draw_control_mask: DrawMask::all_off(),
            draw_show_mask: DrawMask::all_on(),
            into_collide_mask: CollideMask::all_off(),
            bounds_type: BoundsType::Default,
            user_bounds: None,
            final_bounds: false,
            fancy_bits: 0,

            internal_bounds: BoundingVolume::Empty,
            internal_vertices: 0,
            internal_bounds_mark: seq.next(),
            internal_bounds_computed: seq,

            net_collide_mask: CollideMask::all_off(),
            net_draw_control_mask: DrawMask::all_off(),
            net_draw_show_mask: DrawMask::all_off(),
            nested_vertices: 0,
            external_bounds: BoundingVolume::Empty,
            last_update: seq,
            next_update: seq.next(),
            last_bounds_update: seq,

            down: Down::default(),
            stashed: Down::default(),
            up: Up::default(),
        }
    }

    fn set_fancy_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.fancy_bits |= bit;
        } else {
            self.fancy_bits &= !bit;
        }
    }

    /// 只复制会被持久化的字段；图结构与派生缓存重新开始。
    fn copy_properties_from(&mut self, other: &CData) {
        self.transform = Arc::clone(&other.transform);
        self.prev_transform = Arc::clone(&other.prev_transform);
        self.state = Arc::clone(&other.state);
        self.effects = Arc::clone(&other.effects);
        self.tags = other.tags.clone();
        self.user_data = other.user_data.clone();
        self.draw_control_mask = other.draw_control_mask;
        self.draw_show_mask = other.draw_show_mask;
        self.into_collide_mask = other.into_collide_mask;
        self.bounds_type = other.bounds_type;
        self.user_bounds = other.user_bounds;
        self.final_bounds = other.final_bounds;
        self.fancy_bits = other.fancy_bits;
        self.internal_bounds_mark.increment();
        self.next_update.increment();
    }
}

// ─────────────────────────────────────────────────────────────────────────────

pub struct PandaNode {
    name: RwLock<String>,
    kind: Box<dyn NodeKind>,
    cycler: PipelineCycler<CData>,
    /// 指向本节点的路径组件；弱引用，组件释放后在下一次加锁时清理。
    paths: Mutex<Vec<Weak<NodePathComponent>>>,
    dirty_prev_transform: AtomicBool,
    unexpected_change: AtomicU32,
    self_ref: Weak<PandaNode>,
}

impl PandaNode {
    pub fn new(name: impl Into<String>) -> Arc<PandaNode> {
        Self::build(name.into(), Box::new(PlainNode), &Pipeline::render())
    }

    pub fn with_kind(name: impl Into<String>, kind: impl NodeKind) -> Arc<PandaNode> {
        Self::build(name.into(), Box::new(kind), &Pipeline::render())
    }

    pub fn with_pipeline(
        name: impl Into<String>,
        kind: impl NodeKind,
        pipeline: &Arc<Pipeline>,
    ) -> Arc<PandaNode> {
        Self::build(name.into(), Box::new(kind), pipeline)
    }

    pub fn new_geom(name: impl Into<String>) -> Arc<PandaNode> {
        Self::with_kind(name, GeomNode::new())
    }

    fn build(name: String, kind: Box<dyn NodeKind>, pipeline: &Arc<Pipeline>) -> Arc<PandaNode> {
        Arc::new_cyclic(|weak: &Weak<PandaNode>| {
            let owner: Weak<dyn Cyclable> = weak.clone();
            PandaNode {
                name: RwLock::new(name),
                kind,
                cycler: PipelineCycler::with_owner(pipeline, CData::new(), owner),
                paths: Mutex::new(Vec::new()),
                dirty_prev_transform: AtomicBool::new(false),
                unexpected_change: AtomicU32::new(0),
                self_ref: weak.clone(),
            }
        })
    }

    /// 拿回自身的 `Arc`。节点只能通过 `Arc` 创建，这里总能成功，除非正在析构。
    pub(crate) fn self_arc(&self) -> Option<Arc<PandaNode>> {
        self.self_ref.upgrade()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        self.cycler.pipeline()
    }

    pub(crate) fn cycler(&self) -> &PipelineCycler<CData> {
        &self.cycler
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 名字与种类

    pub fn get_name(&self) -> String {
        self.name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name.into();
    }

    pub fn kind(&self) -> &dyn NodeKind {
        &*self.kind
    }

    pub fn type_handle(&self) -> TypeHandle {
        self.kind.type_handle()
    }

    pub fn is_of_kind<K: NodeKind>(&self) -> bool {
        self.kind.as_any().is::<K>()
    }

    pub fn kind_as<K: NodeKind>(&self) -> Option<&K> {
        self.kind.as_any().downcast_ref::<K>()
    }

    /// 与 [`kind_as`](Self::kind_as) 相同，但类型不符按前置条件违反处理。
    #[track_caller]
    pub fn dcast<K: NodeKind>(&self) -> GraphResult<&K> {
        match self.kind_as::<K>() {
            Some(k) => Ok(k),
            None => Err(contract::violated(GraphError::TypeMismatch {
                expected: std::any::type_name::<K>(),
                found: self.kind.type_handle().name(),
            })),
        }
    }

    pub fn is_renderable(&self) -> bool {
        self.kind.is_renderable()
    }

    pub fn has_cull_callback(&self) -> bool {
        self.kind.has_cull_callback()
            || self.cycler.read().fancy_bits & fancy_bits::CULL_CALLBACK != 0
    }

    /// 先跑特效的回调，再跑节点种类的回调；任一返回 false 即剪掉。
    pub fn cull_callback(&self, data: &mut CullTraverserData) -> bool {
        let effects = self.get_effects();
        for effect in effects.cull_effects() {
            if !effect.cull_callback(self, data) {
                return false;
            }
        }
        self.kind.cull_callback(self, data)
    }

    pub fn get_fancy_bits(&self) -> u32 {
        self.cycler.read().fancy_bits
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 调试标志

    pub fn set_unexpected_change(&self, flags: u32) {
        self.unexpected_change.fetch_or(flags, Ordering::AcqRel);
    }

    pub fn get_unexpected_change(&self, flags: u32) -> u32 {
        self.unexpected_change.load(Ordering::Acquire) & flags
    }

    pub fn clear_unexpected_change(&self, flags: u32) {
        self.unexpected_change.fetch_and(!flags, Ordering::AcqRel);
    }

    #[track_caller]
    pub(crate) fn check_unexpected(&self, flag: u32, what: &'static str) -> GraphResult<()> {
        crate::ensure_contract!(
            self.get_unexpected_change(flag) == 0,
            GraphError::UnexpectedChange {
                node: self.to_string(),
                what,
            }
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // transform / prev transform

    pub fn get_transform(&self) -> Arc<TransformState> {
        Arc::clone(&self.cycler.read().transform)
    }

    /// 写当前 stage 的 transform，使包围体失效并调用 `transform_changed`。
    pub fn set_transform(&self, transform: Arc<TransformState>) {
        if self.check_unexpected(unexpected_change::TRANSFORM, "transform").is_err() {
            return;
        }
        let stage = self.cycler.current();
        let prev_differs = {
            let mut cdata = self.cycler.write_stage(stage);
            let is_identity = transform.is_identity();
            cdata.set_fancy_bit(fancy_bits::TRANSFORM, !is_identity);
            cdata.transform = transform;
            cdata.prev_transform != cdata.transform
        };
        if stage == 0 && prev_differs {
            self.set_dirty_prev_transform();
        }
        self.mark_bounds_stale_at(stage);
        self.kind.transform_changed(self);
    }

    pub fn clear_transform(&self) {
        self.set_transform(TransformState::identity());
    }

    pub fn set_pos(&self, pos: Vec3) {
        self.set_transform(TransformState::make_pos(pos));
    }

    pub fn get_prev_transform(&self) -> Arc<TransformState> {
        Arc::clone(&self.cycler.read().prev_transform)
    }

    pub fn set_prev_transform(&self, transform: Arc<TransformState>) {
        let stage = self.cycler.current();
        let differs = {
            let mut cdata = self.cycler.write_stage(stage);
            cdata.prev_transform = transform;
            cdata.prev_transform != cdata.transform
        };
        if stage == 0 {
            if differs {
                self.set_dirty_prev_transform();
            } else {
                self.dirty_prev_transform.store(false, Ordering::Release);
            }
        }
    }

    /// 当前 stage 及其上游：每个 stage 的 prev transform 追上同一 stage 的 transform。
    ///
    /// 下游 stage 的页面不动，等 cycle 把结果带过去。
    pub fn reset_prev_transform(&self) {
        for stage in self.cycler.upstream_stages() {
            let cdata = self.cycler.read_stage(stage);
            if Arc::ptr_eq(&cdata.prev_transform, &cdata.transform) {
                continue;
            }
            let transform = Arc::clone(&cdata.transform);
            drop(cdata);
            self.cycler.write_stage(stage).prev_transform = transform;
        }
        self.dirty_prev_transform.store(false, Ordering::Release);
    }

    pub fn has_dirty_prev_transform(&self) -> bool {
        self.dirty_prev_transform.load(Ordering::Acquire)
    }

    fn set_dirty_prev_transform(&self) {
        if !self.dirty_prev_transform.swap(true, Ordering::AcqRel) {
            prev_transform::registry().register(self.self_ref.clone());
        }
    }

    /// 对本帧所有 prev transform 变脏的节点执行 [`reset_prev_transform`](Self::reset_prev_transform)。
    /// 返回实际重置的节点数。
    pub fn reset_all_prev_transform() -> usize {
        let mut count = 0;
        for node in prev_transform::registry().drain() {
            if node.has_dirty_prev_transform() {
                node.reset_prev_transform();
                count += 1;
            }
        }
        count
    }

    // ─────────────────────────────────────────────────────────────────────────
    // render state / effects

    pub fn get_state(&self) -> Arc<RenderState> {
        Arc::clone(&self.cycler.read().state)
    }

    pub fn set_state(&self, state: Arc<RenderState>) {
        if self.check_unexpected(unexpected_change::STATE, "state").is_err() {
            return;
        }
        {
            let mut cdata = self.cycler.write();
            cdata.set_fancy_bit(fancy_bits::STATE, !state.is_empty());
            cdata.state = state;
        }
        self.kind.state_changed(self);
    }

    pub fn clear_state(&self) {
        self.set_state(RenderState::empty());
    }

    pub fn set_attrib(&self, attrib: Arc<RenderAttrib>, override_: i32) {
        let state = self.get_state().add_attrib(attrib, override_);
        self.set_state(state);
    }

    pub fn get_attrib(&self, slot: &str) -> Option<Arc<RenderAttrib>> {
        self.cycler.read().state.get_attrib(slot).cloned()
    }

    pub fn has_attrib(&self, slot: &str) -> bool {
        self.cycler.read().state.has_attrib(slot)
    }

    pub fn clear_attrib(&self, slot: &str) {
        let current = self.get_state();
        if current.has_attrib(slot) {
            self.set_state(current.remove_attrib(slot));
        }
    }

    pub fn get_effects(&self) -> Arc<RenderEffects> {
        Arc::clone(&self.cycler.read().effects)
    }

    pub fn set_effects(&self, effects: Arc<RenderEffects>) {
        let mut cdata = self.cycler.write();
        cdata.set_fancy_bit(fancy_bits::EFFECTS, !effects.is_empty());
        cdata.set_fancy_bit(fancy_bits::CULL_CALLBACK, effects.has_cull_callback());
        cdata.effects = effects;
    }

    pub fn set_effect(&self, effect: Arc<RenderEffect>) {
        let effects = self.get_effects().add_effect(effect);
        self.set_effects(effects);
    }

    pub fn get_effect(&self, name: &str) -> Option<Arc<RenderEffect>> {
        self.cycler.read().effects.get_effect(name).cloned()
    }

    pub fn has_effect(&self, name: &str) -> bool {
        self.cycler.read().effects.has_effect(name)
    }

    pub fn clear_effect(&self, name: &str) {
        let current = self.get_effects();
        if current.has_effect(name) {
            self.set_effects(current.remove_effect(name));
        }
    }

    pub fn clear_effects(&self) {
        self.set_effects(RenderEffects::empty());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // tags / user data

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut cdata = self.cycler.write();
        cdata.tags.modify().insert(key.into(), value.into());
        cdata.set_fancy_bit(fancy_bits::TAG, true);
    }

    pub fn get_tag(&self, key: &str) -> Option<String> {
        self.cycler.read().tags.get(key).cloned()
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.cycler.read().tags.contains_key(key)
    }

    pub fn clear_tag(&self, key: &str) {
        if !self.has_tag(key) {
            return;
        }
        let mut cdata = self.cycler.write();
        cdata.tags.modify().remove(key);
        let any = !cdata.tags.is_empty();
        cdata.set_fancy_bit(fancy_bits::TAG, any);
    }

    pub fn has_tags(&self) -> bool {
        !self.cycler.read().tags.is_empty()
    }

    pub fn get_num_tags(&self) -> usize {
        self.cycler.read().tags.len()
    }

    pub fn get_tag_keys(&self) -> Vec<String> {
        self.cycler.read().tags.keys().cloned().collect()
    }

    /// 把 `other` 的 tag 合并进来，同名 key 以 `other` 为准。
    pub fn copy_tags(&self, other: &PandaNode) {
        if std::ptr::eq(self, other) {
            return;
        }
        let theirs = other.cycler.read().tags.snapshot();
        if theirs.is_empty() {
            return;
        }
        let mut cdata = self.cycler.write();
        let tags = cdata.tags.modify();
        for (k, v) in theirs.iter() {
            tags.insert(k.clone(), v.clone());
        }
        cdata.set_fancy_bit(fancy_bits::TAG, true);
    }

    pub fn list_tags(&self, separator: &str) -> String {
        self.get_tag_keys().join(separator)
    }

    /// tag 表的全序比较，用于合并相同节点时判断能否合并。
    pub fn compare_tags(&self, other: &PandaNode) -> std::cmp::Ordering {
        let mine = self.cycler.read().tags.snapshot();
        let theirs = other.cycler.read().tags.snapshot();
        mine.as_ref().cmp(theirs.as_ref())
    }

    pub fn set_user_data(&self, data: Option<UserData>) {
        self.cycler.write().user_data = data;
    }

    pub fn get_user_data(&self) -> Option<UserData> {
        self.cycler.read().user_data.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // draw mask / collide mask

    pub const fn overall_bit() -> DrawMask {
        DrawMask::bit(31)
    }

    pub fn all_camera_mask() -> DrawMask {
        !Self::overall_bit()
    }

    /// 调整可见性掩码：`show` 的位强制显示，`hide` 的位强制隐藏，
    /// `clear` 的位交还给父节点控制。
    pub fn adjust_draw_mask(&self, show_mask: DrawMask, hide_mask: DrawMask, clear_mask: DrawMask) {
        if self
            .check_unexpected(unexpected_change::DRAW_MASK, "draw mask")
            .is_err()
        {
            return;
        }
        let stage = self.cycler.current();
        let changed = {
            let mut cdata = self.cycler.write_stage(stage);
            let control = (cdata.draw_control_mask | hide_mask | show_mask) & !clear_mask;
            // 不受控的位默认为显示
            let show = ((cdata.draw_show_mask | show_mask) & !hide_mask) | !control;
            if control != cdata.draw_control_mask || show != cdata.draw_show_mask {
                cdata.draw_control_mask = control;
                cdata.draw_show_mask = show;
                cdata.set_fancy_bit(fancy_bits::DRAW_MASK, !control.is_zero());
                true
            } else {
                false
            }
        };
        if changed {
            self.mark_bounds_stale_at(stage);
            self.kind.draw_mask_changed(self);
        }
    }

    pub fn get_draw_control_mask(&self) -> DrawMask {
        self.cycler.read().draw_control_mask
    }

    pub fn get_draw_show_mask(&self) -> DrawMask {
        self.cycler.read().draw_show_mask
    }

    pub fn is_overall_hidden(&self) -> bool {
        let cdata = self.cycler.read();
        ((cdata.draw_show_mask | !cdata.draw_control_mask) & Self::overall_bit()).is_zero()
    }

    pub fn set_overall_hidden(&self, hidden: bool) {
        if hidden {
            self.adjust_draw_mask(DrawMask::all_off(), Self::overall_bit(), DrawMask::all_off());
        } else {
            self.adjust_draw_mask(DrawMask::all_off(), DrawMask::all_off(), Self::overall_bit());
        }
    }

    pub fn set_into_collide_mask(&self, mask: CollideMask) {
        let stage = self.cycler.current();
        let changed = {
            let mut cdata = self.cycler.write_stage(stage);
            if cdata.into_collide_mask != mask {
                cdata.into_collide_mask = mask;
                true
            } else {
                false
            }
        };
        if changed {
            self.mark_bounds_stale_at(stage);
        }
    }

    pub fn get_into_collide_mask(&self) -> CollideMask {
        self.cycler.read().into_collide_mask
    }

    pub fn get_legal_collide_mask(&self) -> CollideMask {
        self.kind.legal_collide_mask()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 拷贝

    /// 复制节点自身（种类与持久化属性），不含子节点。
    pub fn make_copy(&self) -> Arc<PandaNode> {
        let copy = Self::build(self.get_name(), self.kind.make_copy(), self.pipeline());
        copy.copy_all_properties(self);
        copy
    }

    /// 用 `other` 当前 stage 的持久化属性覆盖本节点（名字、种类、图结构不变）。
    pub fn copy_all_properties(&self, other: &PandaNode) {
        if std::ptr::eq(self, other) {
            return;
        }
        let theirs = other.cycler.read();
        let stage = self.cycler.current();
        {
            let mut cdata = self.cycler.write_stage(stage);
            cdata.copy_properties_from(&theirs);
        }
        self.mark_bounds_stale_at(stage);
        self.kind.transform_changed(self);
        self.kind.state_changed(self);
        self.kind.draw_mask_changed(self);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 输出

    /// 单个节点的详细信息（多行）。
    pub fn write(&self, out: &mut impl fmt::Write, indent: usize) -> fmt::Result {
        let cdata = self.cycler.read();
        write!(out, "{:indent$}{self}", "")?;
        if !cdata.tags.is_empty() {
            out.write_str(" [")?;
            for (i, (k, v)) in cdata.tags.iter().enumerate() {
                if i > 0 {
                    out.write_str(" ")?;
                }
                write!(out, "{k}={v}")?;
            }
            out.write_str("]")?;
        }
        if !cdata.transform.is_identity() {
            write!(out, " {}", cdata.transform)?;
        }
        if !cdata.state.is_empty() {
            write!(out, " {}", cdata.state)?;
        }
        if !cdata.effects.is_empty() {
            write!(out, " {}", cdata.effects)?;
        }
        if !cdata.draw_control_mask.is_zero() {
            write!(out, " (draw_control {})", cdata.draw_control_mask)?;
        }
        out.write_str("\n")
    }

    /// 以本节点为根列出整个子树，每层缩进两格；被 stash 的子节点单独计数。
    pub fn ls(&self) -> String {
        let mut out = String::new();
        // String 写入不会失败
        let _ = self.r_list_descendants(&mut out, 0);
        out
    }

    fn r_list_descendants(&self, out: &mut String, indent: usize) -> fmt::Result {
        self.write(out, indent)?;
        let cdata = self.cycler.read();
        for conn in cdata.down.iter() {
            conn.child().r_list_descendants(out, indent + 2)?;
        }
        let num_stashed = cdata.stashed.len();
        if num_stashed != 0 {
            use fmt::Write;
            writeln!(out, "{:width$}({num_stashed} stashed)", "", width = indent + 2)?;
        }
        Ok(())
    }
}

impl fmt::Display for PandaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.type_handle(), self.get_name())
    }
}

impl fmt::Debug for PandaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cdata = self.cycler.read();
        f.debug_struct("PandaNode")
            .field("type", &self.kind.type_handle().name())
            .field("name", &self.get_name())
            .field("children", &cdata.down.len())
            .field("stashed", &cdata.stashed.len())
            .field("parents", &cdata.up.len())
            .finish()
    }
}

impl Cyclable for PandaNode {
    fn cycle(&self) -> bool {
        self.cycler.cycle()
    }
}

impl Drop for PandaNode {
    fn drop(&mut self) {
        // 子节点的 up 里还记着本节点（弱引用），每个 stage 都要摘掉
        let this: &PandaNode = self;
        let mut seen = HashSet::new();
        let mut children = Vec::new();
        for stage in 0..this.cycler.num_stages() {
            let cdata = this.cycler.read_stage(stage);
            for conn in cdata.down.iter().chain(cdata.stashed.iter()) {
                if seen.insert(Arc::as_ptr(conn.child())) {
                    children.push(Arc::clone(conn.child()));
                }
            }
        }
        for child in children {
            for stage in 0..child.cycler.num_stages() {
                if child.cycler.read_stage(stage).up.find(this).is_some() {
                    child.cycler.write_stage(stage).up.modify().remove(this);
                }
            }
        }
    }
}
