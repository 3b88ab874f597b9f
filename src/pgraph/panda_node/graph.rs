//! 父子连接的结构性修改。
//!
//! 结构性修改作用于当前 stage 及其所有上游 stage（从下游往上游做），
//! 每个 stage 上 down/stashed 与 up 两侧成对修改，并同步维护路径组件与包围体失效。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{unexpected_change, PandaNode};
use crate::contract;
use crate::error::{GraphError, GraphResult};
use crate::pgraph::connection::{next_connection_seq, DownConnection, UpConnection};
use crate::pgraph::{Children, Parents};
use crate::telemetry::{record_graph_event, GraphEventKind};

impl PandaNode {
    // ─────────────────────────────────────────────────────────────────────────
    // 查询

    pub fn get_num_children(&self) -> usize {
        self.cycler.read().down.len()
    }

    pub fn get_child(&self, index: usize) -> Option<Arc<PandaNode>> {
        self.cycler.read().down.get(index).map(|c| Arc::clone(c.child()))
    }

    pub fn get_child_sort(&self, index: usize) -> Option<i32> {
        self.cycler.read().down.get(index).map(DownConnection::sort)
    }

    /// 当前 stage 子节点列表的快照。
    pub fn get_children(&self) -> Children {
        Children::new(self.cycler.read().down.snapshot())
    }

    pub fn find_child(&self, node: &PandaNode) -> Option<usize> {
        self.cycler.read().down.find(node)
    }

    pub fn get_num_stashed(&self) -> usize {
        self.cycler.read().stashed.len()
    }

    pub fn get_stashed(&self, index: usize) -> Option<Arc<PandaNode>> {
        self.cycler
            .read()
            .stashed
            .get(index)
            .map(|c| Arc::clone(c.child()))
    }

    pub fn get_stashed_sort(&self, index: usize) -> Option<i32> {
        self.cycler.read().stashed.get(index).map(DownConnection::sort)
    }

    pub fn get_stashed_children(&self) -> Children {
        Children::new(self.cycler.read().stashed.snapshot())
    }

    pub fn find_stashed(&self, node: &PandaNode) -> Option<usize> {
        self.cycler.read().stashed.find(node)
    }

    pub fn get_num_parents(&self) -> usize {
        self.cycler.read().up.len()
    }

    pub fn get_parent(&self, index: usize) -> Option<Arc<PandaNode>> {
        self.get_parents().get(index)
    }

    pub fn get_parents(&self) -> Parents {
        self.parents_at(self.cycler.current())
    }

    pub fn find_parent(&self, node: &PandaNode) -> Option<usize> {
        self.cycler.read().up.find(node)
    }

    pub(crate) fn children_at(&self, stage: usize) -> Children {
        Children::new(self.cycler.read_stage(stage).down.snapshot())
    }

    pub(crate) fn stashed_at(&self, stage: usize) -> Children {
        Children::new(self.cycler.read_stage(stage).stashed.snapshot())
    }

    pub(crate) fn parents_at(&self, stage: usize) -> Parents {
        Parents::new(self.cycler.read_stage(stage).up.snapshot())
    }

    /// `child` 在 `stage` 上是否挂在本节点下（含 stash）。
    pub(crate) fn has_edge_to_at(&self, child: &PandaNode, stage: usize) -> bool {
        child.cycler.read_stage(stage).up.find(self).is_some()
    }

    /// 本节点是否就是 `ancestor`，或者在 `stage` 上位于它的某条路径之下。
    pub(crate) fn is_under(&self, ancestor: &PandaNode, stage: usize) -> bool {
        if std::ptr::eq(self, ancestor) {
            return true;
        }
        let mut visited = HashSet::new();
        let mut stack: Vec<Arc<PandaNode>> = self.parents_at(stage).iter().collect();
        while let Some(node) = stack.pop() {
            if std::ptr::eq(&*node, ancestor) {
                return true;
            }
            if !visited.insert(Arc::as_ptr(&node)) {
                continue;
            }
            stack.extend(node.parents_at(stage).iter());
        }
        false
    }

    /// 包括自身在内、经由非 stash 边可达的节点数。实例化的节点按路径重复计数。
    pub fn count_num_descendants(&self) -> usize {
        let mut count = 1;
        let mut stack: Vec<Arc<PandaNode>> = self.get_children().iter().cloned().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.get_children().iter().cloned());
        }
        count
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 前置条件

    #[track_caller]
    pub(super) fn check_can_connect(&self, child: &PandaNode) -> GraphResult<()> {
        crate::ensure_contract!(
            Arc::ptr_eq(self.pipeline(), child.pipeline()),
            GraphError::PipelineMismatch {
                parent: self.to_string(),
                child: child.to_string(),
            }
        );
        self.check_unexpected(unexpected_change::CHILDREN, "children")?;
        child.check_unexpected(unexpected_change::PARENTS, "parents")?;
        for stage in self.cycler.upstream_stages() {
            crate::ensure_contract!(
                !self.is_under(child, stage),
                GraphError::Cycle {
                    parent: self.to_string(),
                    child: child.to_string(),
                }
            );
        }
        Ok(())
    }

    #[track_caller]
    fn index_error(what: &'static str, index: usize, len: usize) -> GraphError {
        contract::violated(GraphError::IndexOutOfRange { what, index, len })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 增

    /// 把 `child` 挂到本节点下。`child` 已经是子节点（或被 stash）时按新的 sort 重新插入。
    ///
    /// 会形成环、跨 pipeline、或命中 unexpected-change 标志时拒绝修改，图保持不变。
    #[track_caller]
    pub fn add_child(&self, child: &Arc<PandaNode>, sort: i32) -> GraphResult<()> {
        self.connect(child, sort, false)
    }

    /// 与 [`add_child`](Self::add_child) 相同，但直接挂进 stashed 列表。
    #[track_caller]
    pub fn add_stashed(&self, child: &Arc<PandaNode>, sort: i32) -> GraphResult<()> {
        self.connect(child, sort, true)
    }

    #[track_caller]
    fn connect(&self, child: &Arc<PandaNode>, sort: i32, stashed: bool) -> GraphResult<()> {
        self.check_can_connect(child)?;
        self.remove_child(child);

        let seq = next_connection_seq();
        for stage in self.cycler.upstream_stages().rev() {
            {
                let mut cdata = self.cycler.write_stage(stage);
                let conn = DownConnection::with_seq(Arc::clone(child), sort, seq);
                if stashed {
                    cdata.stashed.modify().insert(conn);
                } else {
                    cdata.down.modify().insert(conn);
                }
            }
            child
                .cycler
                .write_stage(stage)
                .up
                .modify()
                .insert(UpConnection::new(self.self_ref.clone()));
            self.new_connection(child, stage);
            self.force_bounds_stale_at(stage);
        }

        self.kind.children_changed(self);
        child.kind.parents_changed(child);
        record_graph_event(
            GraphEventKind::AddChild,
            format_args!(
                "{self} -> {child} sort {sort}{}",
                if stashed { " (stashed)" } else { "" }
            ),
        );
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 删

    /// 把 `child` 从 down 或 stashed 列表中摘掉。返回是否真的有连接被删除。
    pub fn remove_child(&self, child: &PandaNode) -> bool {
        if self
            .check_unexpected(unexpected_change::CHILDREN, "children")
            .is_err()
            || child
                .check_unexpected(unexpected_change::PARENTS, "parents")
                .is_err()
        {
            return false;
        }

        let mut any = false;
        for stage in self.cycler.upstream_stages().rev() {
            // 连接在 sever 之后才释放，子节点不会在 bookkeeping 中途析构
            if let Some(_conn) = self.stage_remove_child(child, stage) {
                any = true;
                self.sever_connection(child, stage);
                self.force_bounds_stale_at(stage);
            }
        }

        if any {
            self.kind.children_changed(self);
            child.kind.parents_changed(child);
            record_graph_event(GraphEventKind::RemoveChild, format_args!("{self} -x- {child}"));
        }
        any
    }

    #[track_caller]
    pub fn remove_child_at(&self, index: usize) -> GraphResult<()> {
        let child = self
            .get_child(index)
            .ok_or_else(|| Self::index_error("child", index, self.get_num_children()))?;
        self.remove_child(&child);
        Ok(())
    }

    #[track_caller]
    pub fn remove_stashed(&self, index: usize) -> GraphResult<()> {
        let child = self
            .get_stashed(index)
            .ok_or_else(|| Self::index_error("stashed", index, self.get_num_stashed()))?;
        self.remove_child(&child);
        Ok(())
    }

    /// 单个 stage 上删除一条边（两侧），返回被删掉的 down 连接。
    pub(super) fn stage_remove_child(&self, child: &PandaNode, stage: usize) -> Option<DownConnection> {
        if !self.has_edge_to_at(child, stage) {
            return None;
        }
        let removed = {
            let mut cdata = self.cycler.write_stage(stage);
            if let Some(i) = cdata.down.find(child) {
                Some(cdata.down.modify().remove(i))
            } else if let Some(i) = cdata.stashed.find(child) {
                Some(cdata.stashed.modify().remove(i))
            } else {
                None
            }
        };
        child.cycler.write_stage(stage).up.modify().remove(self);
        removed
    }

    pub fn remove_all_children(&self) {
        if self
            .check_unexpected(unexpected_change::CHILDREN, "children")
            .is_err()
        {
            return;
        }

        let mut released = Vec::new();
        for stage in self.cycler.upstream_stages().rev() {
            let (down, stashed) = {
                let cdata = self.cycler.read_stage(stage);
                if cdata.down.is_empty() && cdata.stashed.is_empty() {
                    continue;
                }
                let mut cdata = self.cycler.write_stage(stage);
                (std::mem::take(&mut cdata.down), std::mem::take(&mut cdata.stashed))
            };
            for conn in down.iter().chain(stashed.iter()) {
                let child = conn.child();
                child.cycler.write_stage(stage).up.modify().remove(self);
                self.sever_connection(child, stage);
            }
            self.force_bounds_stale_at(stage);
            released.push((down, stashed));
        }

        let Some((down, stashed)) = released.last() else {
            return;
        };
        for conn in down.iter().chain(stashed.iter()) {
            conn.child().kind.parents_changed(conn.child());
        }
        self.kind.children_changed(self);
        record_graph_event(
            GraphEventKind::RemoveChild,
            format_args!("{self} -x- all ({} + {} stashed)", down.len(), stashed.len()),
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 替换

    /// 原地把 `orig` 换成 `new_child`，保留原来的 sort 与位置（stash 的也一样）。
    ///
    /// `orig` 不是子节点时返回 `Ok(false)`；`orig` 与 `new_child` 相同时直接返回 `Ok(true)`。
    #[track_caller]
    pub fn replace_child(&self, orig: &PandaNode, new_child: &Arc<PandaNode>) -> GraphResult<bool> {
        if std::ptr::eq(orig, Arc::as_ptr(new_child)) {
            return Ok(true);
        }
        self.check_can_connect(new_child)?;
        orig.check_unexpected(unexpected_change::PARENTS, "parents")?;
        if !self.has_edge_to_at(orig, self.cycler.current()) {
            return Ok(false);
        }

        // new_child 已经在这里：先摘掉，保证替换后不出现重复边
        self.remove_child(new_child);

        let mut any = false;
        for stage in self.cycler.upstream_stages().rev() {
            let replaced = {
                let mut cdata = self.cycler.write_stage(stage);
                if let Some(i) = cdata.down.find(orig) {
                    cdata
                        .down
                        .modify()
                        .get_mut(i)
                        .map(|c| c.set_child(Arc::clone(new_child)))
                } else if let Some(i) = cdata.stashed.find(orig) {
                    cdata
                        .stashed
                        .modify()
                        .get_mut(i)
                        .map(|c| c.set_child(Arc::clone(new_child)))
                } else {
                    None
                }
            };
            let Some(old) = replaced else {
                continue;
            };
            any = true;

            old.cycler.write_stage(stage).up.modify().remove(self);
            new_child
                .cycler
                .write_stage(stage)
                .up
                .modify()
                .insert(UpConnection::new(self.self_ref.clone()));
            self.sever_connection(&old, stage);
            self.new_connection(new_child, stage);
            self.force_bounds_stale_at(stage);
        }

        if any {
            self.kind.children_changed(self);
            orig.kind.parents_changed(orig);
            new_child.kind.parents_changed(new_child);
            record_graph_event(
                GraphEventKind::ReplaceChild,
                format_args!("{self}: {orig} => {new_child}"),
            );
        }
        Ok(any)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // stash

    /// 把子节点移到 stashed 列表，保留 sort 与序号。不是（未 stash 的）子节点时返回 false。
    pub fn stash_child(&self, child: &PandaNode) -> bool {
        self.move_connection(child, true)
    }

    pub fn unstash_child(&self, child: &PandaNode) -> bool {
        self.move_connection(child, false)
    }

    #[track_caller]
    pub fn stash_child_at(&self, index: usize) -> GraphResult<()> {
        let child = self
            .get_child(index)
            .ok_or_else(|| Self::index_error("child", index, self.get_num_children()))?;
        self.stash_child(&child);
        Ok(())
    }

    #[track_caller]
    pub fn unstash_child_at(&self, index: usize) -> GraphResult<()> {
        let child = self
            .get_stashed(index)
            .ok_or_else(|| Self::index_error("stashed", index, self.get_num_stashed()))?;
        self.unstash_child(&child);
        Ok(())
    }

    fn move_connection(&self, child: &PandaNode, to_stashed: bool) -> bool {
        if self
            .check_unexpected(unexpected_change::CHILDREN, "children")
            .is_err()
        {
            return false;
        }

        let mut any = false;
        for stage in self.cycler.upstream_stages().rev() {
            let moved = {
                let mut guard = self.cycler.write_stage(stage);
                let found = if to_stashed {
                    guard.down.find(child)
                } else {
                    guard.stashed.find(child)
                };
                match found {
                    Some(i) => {
                        let cdata = &mut *guard;
                        let (from, to) = if to_stashed {
                            (&mut cdata.down, &mut cdata.stashed)
                        } else {
                            (&mut cdata.stashed, &mut cdata.down)
                        };
                        let conn = from.modify().remove(i);
                        to.modify().insert(conn);
                        true
                    }
                    None => false,
                }
            };
            if moved {
                any = true;
                self.force_bounds_stale_at(stage);
            }
        }

        if any {
            self.kind.children_changed(self);
            let kind = if to_stashed {
                GraphEventKind::Stash
            } else {
                GraphEventKind::Unstash
            };
            record_graph_event(kind, format_args!("{self}: {child}"));
        }
        any
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 批量

    /// 把 `other` 的所有子节点（含 stash）按原 sort 搬到本节点下。
    #[track_caller]
    pub fn steal_children(&self, other: &PandaNode) -> GraphResult<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let children = other.get_children();
        let stashed = other.get_stashed_children();
        for conn in children.connections() {
            self.add_child(conn.child(), conn.sort())?;
        }
        for conn in stashed.connections() {
            self.add_stashed(conn.child(), conn.sort())?;
        }
        other.remove_all_children();
        Ok(())
    }

    /// 把 `other` 的子节点（含 stash）也挂到本节点下，形成实例；已经挂着的跳过。
    #[track_caller]
    pub fn copy_children(&self, other: &PandaNode) -> GraphResult<()> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        let stage = self.cycler.current();
        for conn in other.get_children().connections() {
            if !self.has_edge_to_at(conn.child(), stage) {
                self.add_child(conn.child(), conn.sort())?;
            }
        }
        for conn in other.get_stashed_children().connections() {
            if !self.has_edge_to_at(conn.child(), stage) {
                self.add_stashed(conn.child(), conn.sort())?;
            }
        }
        Ok(())
    }

    /// 深拷贝以本节点为根的子图。子图内部的实例关系保留：
    /// 同一个源节点在拷贝里也只有一个对应节点。stash 的子节点拷贝后仍是 stash 的。
    pub fn copy_subgraph(&self) -> GraphResult<Arc<PandaNode>> {
        let mut inst_map = HashMap::new();
        self.r_copy_subgraph(&mut inst_map)
    }

    fn r_copy_subgraph(
        &self,
        inst_map: &mut HashMap<*const PandaNode, Arc<PandaNode>>,
    ) -> GraphResult<Arc<PandaNode>> {
        let copy = self.make_copy();
        let cdata = self.cycler.read();
        for (list, stashed) in [(&cdata.down, false), (&cdata.stashed, true)] {
            for conn in list.iter() {
                let key = Arc::as_ptr(conn.child());
                let child_copy = match inst_map.get(&key) {
                    Some(existing) => Arc::clone(existing),
                    None => {
                        let fresh = conn.child().r_copy_subgraph(inst_map)?;
                        inst_map.insert(key, Arc::clone(&fresh));
                        fresh
                    }
                };
                copy.connect(&child_copy, conn.sort(), stashed)?;
            }
        }
        Ok(copy)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::contract::{with_policy, ContractPolicy};

    fn names(children: &Children) -> Vec<String> {
        children.iter().map(|c| c.get_name()).collect()
    }

    #[test]
    fn equal_sort_keeps_insertion_order() {
        let root = PandaNode::new("root");
        for (name, sort) in [("a", 0), ("b", 5), ("c", 0), ("d", -1), ("e", 5)] {
            root.add_child(&PandaNode::new(name), sort).unwrap();
        }
        assert_eq!(names(&root.get_children()), ["d", "a", "c", "b", "e"]);
    }

    #[test]
    fn readding_moves_to_new_sort() {
        let root = PandaNode::new("root");
        let a = PandaNode::new("a");
        let b = PandaNode::new("b");
        root.add_child(&a, 0).unwrap();
        root.add_child(&b, 1).unwrap();
        root.add_child(&a, 2).unwrap();
        assert_eq!(names(&root.get_children()), ["b", "a"]);
        assert_eq!(a.get_num_parents(), 1);
    }

    #[test]
    fn self_parenting_is_refused() {
        let a = PandaNode::new("a");
        let err = with_policy(ContractPolicy::Report, || a.add_child(&a, 0));
        assert!(matches!(err, Err(GraphError::Cycle { .. })));
        assert_eq!(a.get_num_children(), 0);
    }

    #[test]
    fn replace_keeps_position() {
        let root = PandaNode::new("root");
        let a = PandaNode::new("a");
        let b = PandaNode::new("b");
        let x = PandaNode::new("x");
        root.add_child(&a, 0).unwrap();
        root.add_child(&b, 0).unwrap();
        assert!(root.replace_child(&a, &x).unwrap());
        assert_eq!(names(&root.get_children()), ["x", "b"]);
        assert_eq!(a.get_num_parents(), 0);
        assert_eq!(x.get_parent(0).map(|p| p.get_name()), Some("root".into()));
        assert!(!root.replace_child(&a, &x).unwrap());
    }

    #[test]
    fn stash_round_trip_restores_slot() {
        let root = PandaNode::new("root");
        let kids: Vec<_> = ["a", "b", "c"].into_iter().map(PandaNode::new).collect();
        for k in &kids {
            root.add_child(k, 0).unwrap();
        }
        assert!(root.stash_child(&kids[1]));
        assert!(!root.stash_child(&kids[1]));
        assert_eq!(names(&root.get_children()), ["a", "c"]);
        assert_eq!(root.find_stashed(&kids[1]), Some(0));
        assert!(root.unstash_child(&kids[1]));
        assert_eq!(names(&root.get_children()), ["a", "b", "c"]);
    }

    #[test]
    fn index_forms_report_out_of_range() {
        let root = PandaNode::new("root");
        let err = with_policy(ContractPolicy::Report, || root.remove_child_at(3));
        assert_eq!(
            err,
            Err(GraphError::IndexOutOfRange {
                what: "child",
                index: 3,
                len: 0
            })
        );
    }

    #[test]
    fn steal_children_moves_everything() {
        let from = PandaNode::new("from");
        let to = PandaNode::new("to");
        let a = PandaNode::new("a");
        let s = PandaNode::new("s");
        from.add_child(&a, 3).unwrap();
        from.add_stashed(&s, 1).unwrap();
        to.steal_children(&from).unwrap();
        assert_eq!(from.get_num_children() + from.get_num_stashed(), 0);
        assert_eq!(to.get_child_sort(0), Some(3));
        assert_eq!(to.get_stashed_sort(0), Some(1));
        assert_eq!(a.get_num_parents(), 1);
    }

    #[test]
    fn copy_subgraph_preserves_instancing() {
        let root = PandaNode::new("root");
        let a = PandaNode::new("a");
        let b = PandaNode::new("b");
        let shared = PandaNode::new("shared");
        root.add_child(&a, 0).unwrap();
        root.add_child(&b, 0).unwrap();
        a.add_child(&shared, 0).unwrap();
        b.add_child(&shared, 0).unwrap();

        let copy = root.copy_subgraph().unwrap();
        let ca = copy.get_child(0).unwrap();
        let cb = copy.get_child(1).unwrap();
        let s1 = ca.get_child(0).unwrap();
        let s2 = cb.get_child(0).unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
        assert!(!Arc::ptr_eq(&s1, &shared));
        assert_eq!(s1.get_num_parents(), 2);
        assert_eq!(copy.count_num_descendants(), root.count_num_descendants());
    }

    #[test]
    fn dropping_parent_clears_up_list() {
        let child = PandaNode::new("child");
        {
            let parent = PandaNode::new("parent");
            parent.add_child(&child, 0).unwrap();
            assert_eq!(child.get_num_parents(), 1);
        }
        assert_eq!(child.get_num_parents(), 0);
    }
}
