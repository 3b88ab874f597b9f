//! 实例路径上的一节：某个节点的一个实例，经由 `next` 指向父节点那一节，直到根。
//!
//! 同一个节点可以有多个组件（每条不同的入边路径一个）。图修改可能让两个组件在逻辑上变成同一个，
//! 这时其中一个被 collapse 到另一个上；所有读取都经过 [`uncollapse`](NodePathComponent::uncollapse)
//! （union-find 的 find，带路径压缩）。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::PandaNode;
use crate::contract;
use crate::error::{GraphError, GraphResult};
use crate::pipeline::{Cyclable, PipelineCycler};
use crate::telemetry::{record_graph_event, GraphEventKind};

/// 进程内唯一、只增不减；0 表示"尚未分配"。
static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
struct ComponentData {
    next: Option<Arc<NodePathComponent>>,
    length: usize,
}

pub struct NodePathComponent {
    node: Arc<PandaNode>,
    key: AtomicU64,
    cycler: PipelineCycler<ComponentData>,
    collapsed: Mutex<Option<Arc<NodePathComponent>>>,
}

impl NodePathComponent {
    /// 新建组件。调用方负责把它登记到 `node` 的路径集合里。
    pub(crate) fn new(
        node: Arc<PandaNode>,
        next: Option<Arc<NodePathComponent>>,
        stage: usize,
    ) -> Arc<NodePathComponent> {
        let length = next.as_ref().map_or(1, |n| n.length_at(stage) + 1);
        let pipeline = Arc::clone(node.pipeline());
        Arc::new_cyclic(|weak: &Weak<NodePathComponent>| {
            let owner: Weak<dyn Cyclable> = weak.clone();
            NodePathComponent {
                node,
                key: AtomicU64::new(0),
                cycler: PipelineCycler::with_owner(
                    &pipeline,
                    ComponentData { next, length },
                    owner,
                ),
                collapsed: Mutex::new(None),
            }
        })
    }

    pub fn node(&self) -> &Arc<PandaNode> {
        &self.node
    }

    /// 第一次调用时分配，之后永久不变；组件释放后也不会被复用。
    pub fn get_key(&self) -> u64 {
        let key = self.key.load(Ordering::Acquire);
        if key != 0 {
            return key;
        }
        let fresh = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
        match self
            .key
            .compare_exchange(0, fresh, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => fresh,
            Err(existing) => existing,
        }
    }

    pub fn has_key(&self) -> bool {
        self.key.load(Ordering::Acquire) != 0
    }

    // ─────────────────────────────────────────────────────────────────────────
    // collapse

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn get_collapsed(&self) -> Option<Arc<NodePathComponent>> {
        self.collapsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 沿 collapse 链走到终点；链上每一节都直接改指终点。对终点调用返回自身。
    pub fn uncollapse(self: &Arc<Self>) -> Arc<NodePathComponent> {
        let mut chain = Vec::new();
        let mut current = Arc::clone(self);
        while let Some(next) = current.get_collapsed() {
            chain.push(current);
            current = next;
        }
        if chain.len() > 1 {
            for comp in &chain[..chain.len() - 1] {
                *comp.collapsed.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&current));
            }
        }
        current
    }

    /// 把 `self` 合并进 `other`（两者必须代表同一个节点），返回胜出的组件。
    ///
    /// 失败方若已分配 key 而胜出方没有，key 随之转移；失败方从节点的路径集合里移除。
    pub(crate) fn collapse_into(self: &Arc<Self>, other: &Arc<Self>) -> Arc<NodePathComponent> {
        let loser = self.uncollapse();
        let winner = other.uncollapse();
        if Arc::ptr_eq(&loser, &winner) {
            return winner;
        }
        debug_assert!(Arc::ptr_eq(loser.node(), winner.node()));

        let key = loser.key.load(Ordering::Acquire);
        if key != 0 {
            let _ = winner
                .key
                .compare_exchange(0, key, Ordering::AcqRel, Ordering::Acquire);
        }
        *loser.collapsed.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&winner));
        loser.node.unregister_path(&loser);

        record_graph_event(GraphEventKind::Collapse, format_args!("{loser} into {winner}"));
        winner
    }

    // ─────────────────────────────────────────────────────────────────────────
    // next / length

    /// 父节点那一节（已解析 collapse）；解析结果写回本 stage 的页面。
    pub(crate) fn next_at(&self, stage: usize) -> Option<Arc<NodePathComponent>> {
        let next = self.cycler.read_stage(stage).next.clone()?;
        if !next.is_collapsed() {
            return Some(next);
        }
        let resolved = next.uncollapse();
        self.cycler.write_stage(stage).next = Some(Arc::clone(&resolved));
        Some(resolved)
    }

    /// 顶层组件没有 next，调用即违反前置条件。
    #[track_caller]
    pub fn get_next(&self) -> GraphResult<Arc<NodePathComponent>> {
        match self.next_at(self.cycler.current()) {
            Some(next) => Ok(next),
            None => Err(contract::violated(GraphError::TopNode {
                node: self.node.to_string(),
            })),
        }
    }

    pub fn is_top_node(&self) -> bool {
        self.is_top_node_at(self.cycler.current())
    }

    pub(crate) fn is_top_node_at(&self, stage: usize) -> bool {
        self.cycler.read_stage(stage).next.is_none()
    }

    pub(crate) fn set_next(&self, next: Option<Arc<NodePathComponent>>, stage: usize) {
        self.cycler.write_stage(stage).next = next;
    }

    pub(crate) fn set_top_node(&self, stage: usize) {
        self.set_next(None, stage);
    }

    pub fn get_length(&self) -> usize {
        self.length_at(self.cycler.current())
    }

    pub(crate) fn length_at(&self, stage: usize) -> usize {
        self.cycler.read_stage(stage).length
    }

    /// `length = next.length + 1`（顶层为 1）。返回长度是否被改动。
    pub fn fix_length(&self) -> bool {
        self.fix_length_at(self.cycler.current())
    }

    pub(crate) fn fix_length_at(&self, stage: usize) -> bool {
        let want = self.next_at(stage).map_or(1, |n| n.length_at(stage) + 1);
        if self.length_at(stage) == want {
            return false;
        }
        self.cycler.write_stage(stage).length = want;
        true
    }
}

impl Cyclable for NodePathComponent {
    fn cycle(&self) -> bool {
        self.cycler.cycle()
    }
}

impl fmt::Display for NodePathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = self.cycler.current();
        let mut names = vec![self.node.get_name()];
        let mut next = self.next_at(stage);
        while let Some(comp) = next {
            names.push(comp.node.get_name());
            next = comp.next_at(stage);
        }
        names.reverse();
        f.write_str(&names.join("/"))
    }
}

impl fmt::Debug for NodePathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePathComponent")
            .field("node", &self.node.get_name())
            .field("key", &self.key.load(Ordering::Relaxed))
            .field("length", &self.get_length())
            .field("collapsed", &self.is_collapsed())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::contract::{with_policy, ContractPolicy};

    #[test]
    fn keys_are_lazy_and_unique() {
        let n = PandaNode::new("n");
        let a = NodePathComponent::new(Arc::clone(&n), None, 0);
        let b = NodePathComponent::new(n, None, 0);
        assert!(!a.has_key());
        let ka = a.get_key();
        assert_ne!(ka, 0);
        assert_eq!(ka, a.get_key());
        assert_ne!(ka, b.get_key());
    }

    #[test]
    fn uncollapse_compresses_chain() {
        let n = PandaNode::new("n");
        let c: Vec<_> = (0..4)
            .map(|_| NodePathComponent::new(Arc::clone(&n), None, 0))
            .collect();
        let key = c[0].get_key();
        c[0].collapse_into(&c[1]);
        c[1].collapse_into(&c[2]);
        c[2].collapse_into(&c[3]);

        let end = c[0].uncollapse();
        assert!(Arc::ptr_eq(&end, &c[3]));
        assert!(Arc::ptr_eq(&c[0].get_collapsed().unwrap(), &c[3]));
        assert!(Arc::ptr_eq(&c[1].get_collapsed().unwrap(), &c[3]));
        assert!(Arc::ptr_eq(&c[3].uncollapse(), &c[3]));
        assert_eq!(c[3].get_key(), key);
    }

    #[test]
    fn fix_length_follows_next() {
        let top = NodePathComponent::new(PandaNode::new("root"), None, 0);
        let leaf = NodePathComponent::new(PandaNode::new("leaf"), Some(Arc::clone(&top)), 0);
        assert_eq!(leaf.get_length(), 2);
        assert!(!leaf.fix_length());
        assert_eq!(leaf.to_string(), "root/leaf");

        leaf.set_top_node(0);
        assert!(leaf.fix_length());
        assert_eq!(leaf.get_length(), 1);
        assert!(!leaf.fix_length());

        let err = with_policy(ContractPolicy::Report, || leaf.get_next());
        assert!(matches!(err, Err(GraphError::TopNode { .. })));
    }
}
