//! 包围体与 net mask 的惰性缓存。
//!
//! 每个 stage 的 `CData` 带一对 `(last_update, next_update)`：
//! 不相等即表示汇总值过期。失效时只递增 `next_update` 并沿所有父路径向上传播，
//! 读取时自底向上重算，算好之后一次性通过写 guard 发布。

use std::sync::Arc;

use super::{CData, PandaNode};
use crate::pgraph::{BoundingVolume, BoundsType, CollideMask, DrawMask};
use crate::pipeline::UpdateSeq;
use crate::telemetry::{record_graph_event, GraphEventKind};

/// 某个 stage 上一次重算得到的汇总值。
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CachedAggregates {
    pub(crate) external_bounds: BoundingVolume,
    pub(crate) nested_vertices: usize,
    pub(crate) net_collide_mask: CollideMask,
    pub(crate) net_draw_control_mask: DrawMask,
    pub(crate) net_draw_show_mask: DrawMask,
    pub(crate) last_bounds_update: UpdateSeq,
}

impl CachedAggregates {
    fn from_cdata(cdata: &CData) -> Self {
        CachedAggregates {
            external_bounds: cdata.external_bounds,
            nested_vertices: cdata.nested_vertices,
            net_collide_mask: cdata.net_collide_mask,
            net_draw_control_mask: cdata.net_draw_control_mask,
            net_draw_show_mask: cdata.net_draw_show_mask,
            last_bounds_update: cdata.last_bounds_update,
        }
    }
}

enum Step {
    Enter(Arc<PandaNode>),
    Exit(Arc<PandaNode>),
}

impl PandaNode {
    // ─────────────────────────────────────────────────────────────────────────
    // 失效

    pub fn is_bounds_stale(&self) -> bool {
        self.is_bounds_stale_at(self.cycler.current())
    }

    pub(crate) fn is_bounds_stale_at(&self, stage: usize) -> bool {
        let cdata = self.cycler.read_stage(stage);
        cdata.last_update != cdata.next_update
    }

    /// 标记当前 stage 的汇总值过期。已经过期时什么也不做：
    /// 过期节点的所有祖先必然也已过期。
    pub fn mark_bounds_stale(&self) {
        self.mark_bounds_stale_at(self.cycler.current());
    }

    pub(crate) fn mark_bounds_stale_at(&self, stage: usize) {
        if !self.is_bounds_stale_at(stage) {
            self.force_bounds_stale_at(stage);
        }
    }

    /// 无条件递增本节点的 `next_update`，再沿每一条父路径向上传播，遇到已过期的祖先即停。
    pub(crate) fn force_bounds_stale_at(&self, stage: usize) {
        self.cycler.write_stage(stage).next_update.increment();

        let mut stack: Vec<Arc<PandaNode>> = self.parents_at(stage).iter().collect();
        while let Some(node) = stack.pop() {
            if node.is_bounds_stale_at(stage) {
                continue;
            }
            node.cycler.write_stage(stage).next_update.increment();
            stack.extend(node.parents_at(stage).iter());
        }
    }

    /// 节点自身的几何变了（例如 GeomNode 增删了几何体）。
    pub fn mark_internal_bounds_stale(&self) {
        for stage in self.cycler.upstream_stages().rev() {
            self.cycler.write_stage(stage).internal_bounds_mark.increment();
            self.mark_bounds_stale_at(stage);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 用户设置

    pub fn set_bounds_type(&self, bounds_type: BoundsType) {
        {
            let mut cdata = self.cycler.write();
            if cdata.bounds_type == bounds_type {
                return;
            }
            cdata.bounds_type = bounds_type;
        }
        self.mark_internal_bounds_stale();
    }

    pub fn get_bounds_type(&self) -> BoundsType {
        self.cycler.read().bounds_type
    }

    /// 用户指定的包围体替代节点自身计算出的内部包围体（子节点仍然参与合并）。
    pub fn set_bounds(&self, volume: BoundingVolume) {
        let stage = self.cycler.current();
        self.cycler.write_stage(stage).user_bounds = Some(volume);
        self.mark_bounds_stale_at(stage);
    }

    pub fn clear_bounds(&self) {
        let stage = self.cycler.current();
        {
            let mut cdata = self.cycler.write_stage(stage);
            if cdata.user_bounds.is_none() {
                return;
            }
            cdata.user_bounds = None;
        }
        self.mark_bounds_stale_at(stage);
    }

    pub fn get_user_bounds(&self) -> Option<BoundingVolume> {
        self.cycler.read().user_bounds
    }

    /// final 节点的包围体不再合并子节点。
    pub fn set_final(&self, flag: bool) {
        let stage = self.cycler.current();
        {
            let mut cdata = self.cycler.write_stage(stage);
            if cdata.final_bounds == flag {
                return;
            }
            cdata.final_bounds = flag;
        }
        self.mark_bounds_stale_at(stage);
    }

    pub fn is_final(&self) -> bool {
        self.cycler.read().final_bounds
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 读取

    /// 父节点坐标系下的外部包围体：自身内部包围体与所有子节点外部包围体的并，再乘上自身 transform。
    pub fn get_bounds(&self) -> BoundingVolume {
        self.update_cached(self.cycler.current()).external_bounds
    }

    pub(crate) fn get_bounds_at(&self, stage: usize) -> BoundingVolume {
        self.update_cached(stage).external_bounds
    }

    /// 只在真正重算时前进的序号。
    pub fn get_bounds_seq(&self) -> UpdateSeq {
        self.cycler.read().last_bounds_update
    }

    pub fn get_nested_vertices(&self) -> usize {
        self.update_cached(self.cycler.current()).nested_vertices
    }

    pub fn get_net_collide_mask(&self) -> CollideMask {
        self.update_cached(self.cycler.current()).net_collide_mask
    }

    pub fn get_net_draw_control_mask(&self) -> DrawMask {
        self.update_cached(self.cycler.current()).net_draw_control_mask
    }

    pub fn get_net_draw_show_mask(&self) -> DrawMask {
        self.update_cached(self.cycler.current()).net_draw_show_mask
    }

    /// 节点本地坐标下的内部包围体（用户包围体优先）。
    pub fn get_internal_bounds(&self) -> BoundingVolume {
        self.internal_bounds_at(self.cycler.current()).0
    }

    pub fn get_internal_vertices(&self) -> usize {
        self.internal_bounds_at(self.cycler.current()).1
    }

    fn internal_bounds_at(&self, stage: usize) -> (BoundingVolume, usize) {
        let cdata = self.cycler.read_stage(stage);
        let (internal, vertices) = if cdata.internal_bounds_computed == cdata.internal_bounds_mark {
            (cdata.internal_bounds, cdata.internal_vertices)
        } else {
            let mark = cdata.internal_bounds_mark;
            let computed = self
                .kind
                .compute_internal_bounds(self, cdata.bounds_type.resolve());
            let mut w = self.cycler.write_stage(stage);
            w.internal_bounds = computed.0;
            w.internal_vertices = computed.1;
            w.internal_bounds_computed = mark;
            computed
        };
        (cdata.user_bounds.unwrap_or(internal), vertices)
    }

    fn fresh_aggregates(&self, stage: usize) -> Option<CachedAggregates> {
        let cdata = self.cycler.read_stage(stage);
        (cdata.last_update == cdata.next_update).then(|| CachedAggregates::from_cdata(&cdata))
    }

    /// 确保 `stage` 上的汇总值是新的并返回它。
    ///
    /// 后序遍历所有过期的后代，显式栈；新鲜的子树整棵跳过。
    pub(crate) fn update_cached(&self, stage: usize) -> CachedAggregates {
        if let Some(fresh) = self.fresh_aggregates(stage) {
            return fresh;
        }

        let mut stack = Vec::new();
        self.push_children(stage, &mut stack);
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(node) => {
                    if node.fresh_aggregates(stage).is_some() {
                        continue;
                    }
                    // Exit 先入栈，等所有子节点弹出之后才轮到它
                    stack.push(Step::Exit(Arc::clone(&node)));
                    node.push_children(stage, &mut stack);
                }
                Step::Exit(node) => {
                    node.recompute(stage);
                }
            }
        }
        self.recompute(stage)
    }

    fn push_children(&self, stage: usize, stack: &mut Vec<Step>) {
        let cdata = self.cycler.read_stage(stage);
        stack.extend(cdata.down.iter().map(|c| Step::Enter(Arc::clone(c.child()))));
    }

    /// 假设子节点都已新鲜，重算本节点并发布。
    fn recompute(&self, stage: usize) -> CachedAggregates {
        let cdata = self.cycler.read_stage(stage);
        let observed = cdata.next_update;
        let (internal, internal_vertices) = self.internal_bounds_at(stage);

        let mut net_collide_mask = cdata.into_collide_mask;
        let (mut child_control, mut child_show) = if self.kind.is_renderable() {
            (cdata.draw_control_mask, cdata.draw_show_mask)
        } else {
            (DrawMask::all_off(), DrawMask::all_off())
        };
        let mut volumes = vec![internal];
        let mut nested_vertices = internal_vertices;

        for conn in cdata.down.iter() {
            let child = conn.child().cycler.read_stage(stage);
            net_collide_mask |= child.net_collide_mask;
            child_control |= child.net_draw_control_mask;
            child_show |= child.net_draw_show_mask;
            nested_vertices += child.nested_vertices;
            if !cdata.final_bounds {
                volumes.push(child.external_bounds);
            }
        }

        let control = cdata.draw_control_mask;
        let net_draw_control_mask = control | child_control;
        let net_draw_show_mask = (cdata.draw_show_mask & control) | (child_show & !control);

        let mut external_bounds = BoundingVolume::around(&volumes, cdata.bounds_type.resolve());
        if !cdata.transform.is_identity() {
            external_bounds = external_bounds.xform(&cdata.transform.get_mat());
        }

        let published = {
            let mut w = self.cycler.write_stage(stage);
            w.external_bounds = external_bounds;
            w.nested_vertices = nested_vertices;
            w.net_collide_mask = net_collide_mask;
            w.net_draw_control_mask = net_draw_control_mask;
            w.net_draw_show_mask = net_draw_show_mask;
            w.last_update = observed;
            w.last_bounds_update.increment();
            CachedAggregates::from_cdata(&w)
        };
        record_graph_event(
            GraphEventKind::BoundsRecompute,
            format_args!("{self} stage {stage}: {external_bounds}"),
        );
        published
    }
}
