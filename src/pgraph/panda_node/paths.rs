//! 节点一侧的路径组件 bookkeeping：登记、查找、创建，以及图修改之后的 next / length / collapse 维护。
//!
//! 锁的顺序：`paths` 锁只在单个节点上短暂持有，从不嵌套另一个节点的 `paths` 锁。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use super::PandaNode;
use crate::config::GraphConfig;
use crate::contract;
use crate::error::{GraphError, GraphResult};
use crate::pgraph::connection::{DownConnection, UpConnection};
use crate::pgraph::NodePathComponent;
use crate::telemetry::{record_graph_event, GraphEventKind};

impl PandaNode {
    /// 仍然存活的组件；顺带清掉已经释放的弱引用。
    pub(crate) fn live_paths(&self) -> Vec<Arc<NodePathComponent>> {
        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        paths.retain(|w| w.strong_count() > 0);
        paths.iter().filter_map(|w| w.upgrade()).collect()
    }

    pub(crate) fn register_path(&self, comp: &Arc<NodePathComponent>) {
        let mut paths = self.paths.lock().unwrap_or_else(PoisonError::into_inner);
        if !paths.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(comp))) {
            paths.push(Arc::downgrade(comp));
        }
    }

    pub(crate) fn unregister_path(&self, comp: &NodePathComponent) {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), comp));
    }

    pub(crate) fn find_top_component(&self, stage: usize) -> Option<Arc<NodePathComponent>> {
        self.live_paths()
            .into_iter()
            .find(|c| c.is_top_node_at(stage))
    }

    /// 本节点的顶层组件；`force` 时没有就新建一个。
    pub(crate) fn get_top_component(
        &self,
        force: bool,
        stage: usize,
    ) -> Option<Arc<NodePathComponent>> {
        if let Some(top) = self.find_top_component(stage) {
            return Some(top);
        }
        if !force {
            return None;
        }
        let comp = NodePathComponent::new(self.self_arc()?, None, stage);
        self.register_path(&comp);
        Some(comp)
    }

    /// `parent` 那一节下面、代表 `child` 的组件；没有时返回 None。
    pub(crate) fn find_component(
        parent: &Arc<NodePathComponent>,
        child: &PandaNode,
        stage: usize,
    ) -> Option<Arc<NodePathComponent>> {
        let parent = parent.uncollapse();
        child.live_paths().into_iter().find(|c| {
            c.next_at(stage)
                .is_some_and(|next| Arc::ptr_eq(&next, &parent))
        })
    }

    /// `parent` 那一节下面、代表 `child` 的组件，没有就新建。
    ///
    /// 前置条件：`child` 在 `stage` 上确实是 `parent` 节点的子节点（或被 stash）。
    /// 只在 `child` 自己的路径集合上串行化，不同子节点可以并发调用。
    #[track_caller]
    pub(crate) fn get_component(
        parent: &Arc<NodePathComponent>,
        child: &Arc<PandaNode>,
        stage: usize,
    ) -> GraphResult<Arc<NodePathComponent>> {
        let parent = parent.uncollapse();
        crate::ensure_contract!(
            parent.node().has_edge_to_at(child, stage),
            GraphError::NotAChild {
                parent: parent.node().to_string(),
                child: child.to_string(),
            }
        );

        let (comp, duplicates) = {
            let mut paths = child.paths.lock().unwrap_or_else(PoisonError::into_inner);
            paths.retain(|w| w.strong_count() > 0);
            let mut matching: Vec<_> = paths
                .iter()
                .filter_map(|w| w.upgrade())
                .filter(|c| {
                    c.next_at(stage)
                        .is_some_and(|next| Arc::ptr_eq(&next, &parent))
                })
                .collect();
            if matching.is_empty() {
                let comp = NodePathComponent::new(Arc::clone(child), Some(parent), stage);
                paths.push(Arc::downgrade(&comp));
                (comp, matching)
            } else {
                let first = matching.remove(0);
                (first, matching)
            }
        };

        // 之前的 collapse 可能让同一条边出现了两个组件
        if stage == 0 {
            for dup in duplicates {
                dup.collapse_into(&comp);
            }
        }
        Ok(comp)
    }

    /// 任意一条通往根的路径（沿每层的第一个父节点）。
    ///
    /// 节点被实例化时路径有歧义：默认只记 debug 日志；
    /// 配置了 `unambiguous_graph` 且 `accept_ambiguity` 为 false 时按前置条件违反处理。
    #[track_caller]
    pub(crate) fn get_generic_component(
        &self,
        accept_ambiguity: bool,
        stage: usize,
    ) -> GraphResult<Arc<NodePathComponent>> {
        let Some(this) = self.self_arc() else {
            return Err(contract::violated(GraphError::EmptyPath));
        };
        let mut chain = vec![this];
        loop {
            let Some(node) = chain.last() else {
                break;
            };
            let parents = node.parents_at(stage);
            if parents.len() > 1 {
                if !accept_ambiguity && GraphConfig::global().unambiguous_graph {
                    return Err(contract::violated(GraphError::AmbiguousPath {
                        node: node.to_string(),
                        num_parents: parents.len(),
                    }));
                }
                tracing::debug!(
                    target: "pgraph",
                    node = %node,
                    num_parents = parents.len(),
                    "ambiguous path to root, taking first parent"
                );
            }
            let first = parents.iter().next();
            match first {
                Some(parent) => chain.push(parent),
                None => break,
            }
        }

        let mut nodes = chain.into_iter().rev();
        let Some(root) = nodes.next() else {
            return Err(contract::violated(GraphError::EmptyPath));
        };
        let mut comp = match root.get_top_component(true, stage) {
            Some(top) => top,
            None => return Err(contract::violated(GraphError::EmptyPath)),
        };
        for node in nodes {
            comp = Self::get_component(&comp, &node, stage)?;
        }
        Ok(comp)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 图修改之后的维护

    /// 新边 self -> child 建好之后：child 的顶层组件都挂到 self 的通用组件下。
    pub(crate) fn new_connection(&self, child: &PandaNode, stage: usize) {
        let tops: Vec<_> = child
            .live_paths()
            .into_iter()
            .filter(|c| c.is_top_node_at(stage))
            .collect();
        if tops.is_empty() {
            return;
        }
        match self.get_generic_component(true, stage) {
            Ok(generic) => {
                for top in &tops {
                    top.set_next(Some(Arc::clone(&generic)), stage);
                }
            }
            Err(err) => {
                tracing::warn!(target: "pgraph", %err, "new connection left child paths at top");
                return;
            }
        }
        if stage == 0 {
            child.collapse_duplicate_paths(stage);
        }
        child.fix_path_lengths(stage);
    }

    /// 边 self -> child 断开之后：经由它的组件都变成顶层。
    pub(crate) fn sever_connection(&self, child: &PandaNode, stage: usize) {
        let mut any = false;
        for comp in child.live_paths() {
            let through_self = comp
                .next_at(stage)
                .is_some_and(|next| std::ptr::eq(Arc::as_ptr(next.node()), self));
            if through_self {
                comp.set_top_node(stage);
                any = true;
            }
        }
        if !any {
            return;
        }
        if stage == 0 {
            child.collapse_duplicate_paths(stage);
        }
        child.fix_path_lengths(stage);
    }

    /// 合并 next 相同的组件（顶层组件之间也算相同）。
    fn collapse_duplicate_paths(&self, stage: usize) {
        let mut seen: HashMap<usize, Arc<NodePathComponent>> = HashMap::new();
        for comp in self.live_paths() {
            let key = comp
                .next_at(stage)
                .map_or(0, |n| Arc::as_ptr(&n) as usize);
            match seen.get(&key) {
                Some(winner) => {
                    comp.collapse_into(winner);
                }
                None => {
                    seen.insert(key, comp);
                }
            }
        }
    }

    /// 自上而下修正组件长度；某个节点没有长度变化时不再深入它的子树。
    pub(crate) fn fix_path_lengths(&self, stage: usize) {
        let mut changed = false;
        for comp in self.live_paths() {
            changed |= comp.fix_length_at(stage);
        }
        if !changed {
            return;
        }
        let mut stack = self.children_and_stashed_at(stage);
        while let Some(node) = stack.pop() {
            let mut changed = false;
            for comp in node.live_paths() {
                changed |= comp.fix_length_at(stage);
            }
            if changed {
                stack.extend(node.children_and_stashed_at(stage));
            }
        }
    }

    fn children_and_stashed_at(&self, stage: usize) -> Vec<Arc<PandaNode>> {
        let cdata = self.cycler.read_stage(stage);
        cdata
            .down
            .iter()
            .chain(cdata.stashed.iter())
            .map(|c| Arc::clone(c.child()))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 以组件为单位的 attach / detach / reparent（NodePath 的实现基础）

    /// 把 `child_node` 挂到 `parent` 下，返回代表新位置的组件。
    ///
    /// 已经挂在那里时复用已有组件；否则取 `child_node` 的顶层组件（没有就新建）再 reparent。
    #[track_caller]
    pub(crate) fn attach(
        parent: &Arc<NodePathComponent>,
        child_node: &Arc<PandaNode>,
        sort: i32,
        stage: usize,
    ) -> GraphResult<Arc<NodePathComponent>> {
        let parent = parent.uncollapse();
        if parent.node().has_edge_to_at(child_node, stage) {
            return Self::get_component(&parent, child_node, stage);
        }
        let child = match child_node.get_top_component(true, stage) {
            Some(top) => top,
            None => return Err(contract::violated(GraphError::EmptyPath)),
        };
        Self::reparent(&parent, &child, sort, false, stage)?;
        Ok(child.uncollapse())
    }

    /// 断开 `child` 与它的 next 之间的边。顶层组件无事可做。
    ///
    /// `child` 记着的父子边在图里并不存在时按前置条件违反处理。
    #[track_caller]
    pub(crate) fn detach(child: &Arc<NodePathComponent>, stage: usize) -> GraphResult<()> {
        let child = child.uncollapse();
        let Some(next) = child.next_at(stage) else {
            return Ok(());
        };
        let parent_node = Arc::clone(next.node());
        let child_node = Arc::clone(child.node());
        crate::ensure_contract!(
            parent_node.has_edge_to_at(&child_node, stage),
            GraphError::DetachedComponent {
                parent: parent_node.to_string(),
                child: child_node.to_string(),
            }
        );
        parent_node.check_unexpected(super::unexpected_change::CHILDREN, "children")?;
        child_node.check_unexpected(super::unexpected_change::PARENTS, "parents")?;

        // 组件自身的 next 由 sever 一并改成顶层
        for s in (0..=stage).rev() {
            if parent_node.stage_remove_child(&child_node, s).is_some() {
                parent_node.sever_connection(&child_node, s);
                parent_node.force_bounds_stale_at(s);
            }
        }

        parent_node.kind.children_changed(&parent_node);
        child_node.kind.parents_changed(&child_node);
        record_graph_event(
            GraphEventKind::Detach,
            format_args!("{parent_node} -x- {child_node}"),
        );
        Ok(())
    }

    /// 把 `child` 移到 `new_parent` 下。
    ///
    /// 新父节点下已经有该节点的另一个实例时，不建第二条边：
    /// `child` collapse 到已有组件上并返回 `Ok(false)`。
    #[track_caller]
    pub(crate) fn reparent(
        new_parent: &Arc<NodePathComponent>,
        child: &Arc<NodePathComponent>,
        sort: i32,
        as_stashed: bool,
        stage: usize,
    ) -> GraphResult<bool> {
        let new_parent = new_parent.uncollapse();
        let parent_node = Arc::clone(new_parent.node());
        let child_node = Arc::clone(child.node());
        parent_node.check_can_connect(&child_node)?;

        let child = child.uncollapse();
        if !child.is_top_node_at(stage) {
            Self::detach(&child, stage)?;
        }
        let child = child.uncollapse();

        if parent_node.has_edge_to_at(&child_node, stage) {
            if stage == 0 {
                if let Some(existing) = Self::find_component(&new_parent, &child_node, stage) {
                    child.collapse_into(&existing);
                    // 挂在失败方下面的组件长度要按胜出方重算
                    for grandchild in child_node.children_and_stashed_at(stage) {
                        grandchild.fix_path_lengths(stage);
                    }
                }
            }
            return Ok(false);
        }

        let seq = crate::pgraph::connection::next_connection_seq();
        for s in (0..=stage).rev() {
            child.set_next(Some(Arc::clone(&new_parent)), s);
            {
                let mut cdata = parent_node.cycler.write_stage(s);
                let conn = DownConnection::with_seq(Arc::clone(&child_node), sort, seq);
                if as_stashed {
                    cdata.stashed.modify().insert(conn);
                } else {
                    cdata.down.modify().insert(conn);
                }
            }
            child_node
                .cycler
                .write_stage(s)
                .up
                .modify()
                .insert(UpConnection::new(Arc::downgrade(&parent_node)));
            child_node.fix_path_lengths(s);
            parent_node.force_bounds_stale_at(s);
        }
        child_node.register_path(&child);

        parent_node.kind.children_changed(&parent_node);
        child_node.kind.parents_changed(&child_node);
        record_graph_event(
            GraphEventKind::Reparent,
            format_args!(
                "{child} sort {sort}{}",
                if as_stashed { " (stashed)" } else { "" }
            ),
        );
        Ok(true)
    }
}
