//! NodePath：用户手里的实例路径句柄。
//!
//! 句柄只持有路径最下面那一节组件（head）；整条路径沿 `next` 一路到根。
//! 结构性修改只能在 app stage（stage 0）上进行。

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use glam::Vec3;

use super::{
    BoundingVolume, DrawMask, NodePathComponent, PandaNode, PlainNode, RenderState,
    TransformState,
};
use crate::contract;
use crate::error::{GraphError, GraphResult};

/// 空 NodePath 的来由。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorType {
    #[default]
    Ok,
    NotFound,
    Removed,
    Fail,
}

#[derive(Clone, Default, Debug)]
pub struct NodePath {
    head: Option<Arc<NodePathComponent>>,
    error_type: ErrorType,
}

#[track_caller]
fn app_stage(node: &PandaNode) -> GraphResult<usize> {
    let stage = node.cycler().current();
    crate::ensure_contract!(stage == 0, GraphError::NotAppStage { stage });
    Ok(stage)
}

impl NodePath {
    // ─────────────────────────────────────────────────────────────────────────
    // 构造

    /// 新建一个普通节点，并返回以它为根的路径。
    pub fn new(name: impl Into<String>) -> NodePath {
        NodePath::from_node(&PandaNode::new(name))
    }

    /// 节点的顶层实例（节点没有父节点时就是它本身作为根）。
    pub fn from_node(node: &Arc<PandaNode>) -> NodePath {
        let stage = node.cycler().current();
        Self::from_head(node.get_top_component(true, stage))
    }

    /// 任意一条从根到 `node` 的路径。节点被实例化时取每层的第一个父节点。
    #[track_caller]
    pub fn any_path(node: &Arc<PandaNode>) -> GraphResult<NodePath> {
        let stage = node.cycler().current();
        let head = node.get_generic_component(false, stage)?;
        Ok(Self::from_head(Some(head)))
    }

    /// `parent` 路径下经由直接子节点 `child` 的路径。
    #[track_caller]
    pub fn from_parent(parent: &NodePath, child: &Arc<PandaNode>) -> GraphResult<NodePath> {
        let head = parent.head()?;
        let stage = child.cycler().current();
        let comp = PandaNode::get_component(&head, child, stage)?;
        Ok(Self::from_head(Some(comp)))
    }

    pub fn not_found() -> NodePath {
        Self::with_error(ErrorType::NotFound)
    }

    pub fn removed() -> NodePath {
        Self::with_error(ErrorType::Removed)
    }

    pub fn fail() -> NodePath {
        Self::with_error(ErrorType::Fail)
    }

    fn with_error(error_type: ErrorType) -> NodePath {
        NodePath {
            head: None,
            error_type,
        }
    }

    fn from_head(head: Option<Arc<NodePathComponent>>) -> NodePath {
        NodePath {
            head,
            error_type: ErrorType::Ok,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 内部

    fn resolved(&self) -> Option<Arc<NodePathComponent>> {
        self.head.as_ref().map(NodePathComponent::uncollapse)
    }

    #[track_caller]
    fn head(&self) -> GraphResult<Arc<NodePathComponent>> {
        self.resolved()
            .ok_or_else(|| contract::violated(GraphError::EmptyPath))
    }

    /// 从 head 到根的所有组件。
    fn components(&self) -> Vec<Arc<NodePathComponent>> {
        let Some(head) = self.resolved() else {
            return Vec::new();
        };
        let stage = head.node().cycler().current();
        let mut out = vec![Arc::clone(&head)];
        let mut next = head.next_at(stage);
        while let Some(comp) = next {
            next = comp.next_at(stage);
            out.push(comp);
        }
        out
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 查询

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn get_error_type(&self) -> ErrorType {
        self.error_type
    }

    pub fn node(&self) -> Option<Arc<PandaNode>> {
        self.resolved().map(|h| Arc::clone(h.node()))
    }

    pub fn get_num_nodes(&self) -> usize {
        self.resolved().map_or(0, |h| h.get_length())
    }

    pub fn is_singleton(&self) -> bool {
        self.get_num_nodes() == 1
    }

    /// 第 `index` 个节点，0 是 head（路径最下面的节点）。
    pub fn get_node(&self, index: usize) -> Option<Arc<PandaNode>> {
        self.components()
            .get(index)
            .map(|c| Arc::clone(c.node()))
    }

    /// 向上第 `index` 层的路径；越界返回空路径。
    pub fn get_ancestor(&self, index: usize) -> NodePath {
        match self.components().into_iter().nth(index) {
            Some(comp) => Self::from_head(Some(comp)),
            None => NodePath::not_found(),
        }
    }

    pub fn get_top(&self) -> NodePath {
        match self.components().pop() {
            Some(top) => Self::from_head(Some(top)),
            None => NodePath::default(),
        }
    }

    pub fn get_top_node(&self) -> Option<Arc<PandaNode>> {
        self.components().pop().map(|c| Arc::clone(c.node()))
    }

    /// 唯一标识这个实例的 key；空路径为 0。
    pub fn get_key(&self) -> u64 {
        self.resolved().map_or(0, |h| h.get_key())
    }

    pub fn has_parent(&self) -> bool {
        self.resolved().is_some_and(|h| !h.is_top_node())
    }

    pub fn get_parent(&self) -> NodePath {
        let Some(head) = self.resolved() else {
            return NodePath::default();
        };
        let stage = head.node().cycler().current();
        Self::from_head(head.next_at(stage))
    }

    /// 在父节点的 down（或 stashed）列表里的 sort；没有父节点时为 0。
    pub fn get_sort(&self) -> i32 {
        let (Some(node), Some(parent)) = (self.node(), self.get_parent().node()) else {
            return 0;
        };
        parent
            .find_child(&node)
            .and_then(|i| parent.get_child_sort(i))
            .or_else(|| {
                parent
                    .find_stashed(&node)
                    .and_then(|i| parent.get_stashed_sort(i))
            })
            .unwrap_or(0)
    }

    pub fn get_children(&self) -> Vec<NodePath> {
        self.child_paths(false)
    }

    pub fn get_stashed_children(&self) -> Vec<NodePath> {
        self.child_paths(true)
    }

    fn child_paths(&self, stashed: bool) -> Vec<NodePath> {
        let Some(head) = self.resolved() else {
            return Vec::new();
        };
        let node = head.node();
        let stage = node.cycler().current();
        let children = if stashed {
            node.stashed_at(stage)
        } else {
            node.children_at(stage)
        };
        children
            .iter()
            .filter_map(|child| PandaNode::get_component(&head, child, stage).ok())
            .map(|comp| Self::from_head(Some(comp)))
            .collect()
    }

    pub fn get_num_children(&self) -> usize {
        self.node().map_or(0, |n| n.get_num_children())
    }

    pub fn get_child(&self, index: usize) -> Option<NodePath> {
        let head = self.resolved()?;
        let child = head.node().get_child(index)?;
        let stage = child.cycler().current();
        PandaNode::get_component(&head, &child, stage)
            .ok()
            .map(|comp| Self::from_head(Some(comp)))
    }

    /// 不含自身的后代数。
    pub fn count_num_descendants(&self) -> usize {
        self.node().map_or(0, |n| n.count_num_descendants() - 1)
    }

    pub fn is_same_graph(&self, other: &NodePath) -> bool {
        match (self.get_top_node(), other.get_top_node()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            _ => false,
        }
    }

    /// `other` 的路径是否经过本路径的 head（包括两者相同）。
    pub fn is_ancestor_of(&self, other: &NodePath) -> bool {
        let Some(head) = self.resolved() else {
            return false;
        };
        other.components().iter().any(|c| Arc::ptr_eq(c, &head))
    }

    /// 两条路径最低的公共祖先；不在同一张图里时返回空路径。
    pub fn get_common_ancestor(&self, other: &NodePath) -> NodePath {
        let mine: HashSet<*const NodePathComponent> =
            self.components().iter().map(Arc::as_ptr).collect();
        other
            .components()
            .into_iter()
            .find(|c| mine.contains(&Arc::as_ptr(c)))
            .map_or_else(NodePath::not_found, |c| Self::from_head(Some(c)))
    }

    /// 本节点之下（含自身，不经过 stash 的边）第一条到 `node` 的路径。
    pub fn find_path_to(&self, node: &PandaNode) -> Option<NodePath> {
        self.find_paths(node, Some(1)).into_iter().next()
    }

    pub fn find_all_paths_to(&self, node: &PandaNode) -> Vec<NodePath> {
        self.find_paths(node, None)
    }

    fn find_paths(&self, target: &PandaNode, max: Option<usize>) -> Vec<NodePath> {
        let Some(head) = self.resolved() else {
            return Vec::new();
        };
        let stage = head.node().cycler().current();

        // (节点, 父项下标)；下标 0 是 head
        let mut arena: Vec<(Arc<PandaNode>, Option<usize>)> = vec![(Arc::clone(head.node()), None)];
        let mut stack = vec![0usize];
        let mut found = Vec::new();
        while let Some(i) = stack.pop() {
            let node = Arc::clone(&arena[i].0);
            if std::ptr::eq(&*node, target) {
                if let Some(path) = Self::materialize(&head, &arena, i, stage) {
                    found.push(path);
                    if max.is_some_and(|m| found.len() >= m) {
                        break;
                    }
                }
                continue;
            }
            let children = node.children_at(stage);
            for conn in children.connections().iter().rev() {
                arena.push((Arc::clone(conn.child()), Some(i)));
                stack.push(arena.len() - 1);
            }
        }
        found
    }

    fn materialize(
        head: &Arc<NodePathComponent>,
        arena: &[(Arc<PandaNode>, Option<usize>)],
        index: usize,
        stage: usize,
    ) -> Option<NodePath> {
        let mut chain = Vec::new();
        let mut at = index;
        while let (node, Some(parent)) = &arena[at] {
            chain.push(Arc::clone(node));
            at = *parent;
        }
        let mut comp = Arc::clone(head);
        for node in chain.iter().rev() {
            comp = PandaNode::get_component(&comp, node, stage).ok()?;
        }
        Some(Self::from_head(Some(comp)))
    }

    /// 路径上是否有某条边是 stash 的。
    pub fn is_stashed(&self) -> bool {
        let comps = self.components();
        comps
            .windows(2)
            .any(|pair| pair[1].node().find_stashed(pair[0].node()).is_some())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 结构修改（只在 app stage）

    /// 把这个实例移到 `other` 下面。已经有另一个实例挂在那里时与它合并。
    #[track_caller]
    pub fn reparent_to(&self, other: &NodePath, sort: i32) -> GraphResult<()> {
        self.move_to(other, sort, false)
    }

    #[track_caller]
    pub fn stash_to(&self, other: &NodePath, sort: i32) -> GraphResult<()> {
        self.move_to(other, sort, true)
    }

    #[track_caller]
    fn move_to(&self, other: &NodePath, sort: i32, as_stashed: bool) -> GraphResult<()> {
        let head = self.head()?;
        let parent = other.head()?;
        let stage = app_stage(head.node())?;
        head.node().reset_prev_transform();
        PandaNode::reparent(&parent, &head, sort, as_stashed, stage)?;
        Ok(())
    }

    /// 在 `other` 下新增本节点的一个实例，原来的路径不变。
    #[track_caller]
    pub fn instance_to(&self, other: &NodePath, sort: i32) -> GraphResult<NodePath> {
        let node = self.head()?.node().clone();
        other.attach_new_node(&node, sort)
    }

    #[track_caller]
    pub fn attach_new_node(&self, node: &Arc<PandaNode>, sort: i32) -> GraphResult<NodePath> {
        let head = self.head()?;
        let stage = app_stage(head.node())?;
        let comp = PandaNode::attach(&head, node, sort, stage)?;
        Ok(Self::from_head(Some(comp)))
    }

    #[track_caller]
    pub fn attach_new_node_named(&self, name: impl Into<String>) -> GraphResult<NodePath> {
        let head = self.head()?;
        let node = PandaNode::with_pipeline(name, PlainNode, head.node().pipeline());
        self.attach_new_node(&node, 0)
    }

    /// 深拷贝本节点的子图并挂到 `other` 下。
    #[track_caller]
    pub fn copy_to(&self, other: &NodePath, sort: i32) -> GraphResult<NodePath> {
        let copy = self.head()?.node().copy_subgraph()?;
        other.attach_new_node(&copy, sort)
    }

    /// 从父节点断开，本句柄变成 removed。
    #[track_caller]
    pub fn remove_node(&mut self) -> GraphResult<()> {
        if let Some(head) = self.resolved() {
            if !head.is_top_node() {
                let stage = app_stage(head.node())?;
                head.node().reset_prev_transform();
                PandaNode::detach(&head, stage)?;
            }
        }
        *self = NodePath::removed();
        Ok(())
    }

    /// 从父节点断开，本句柄保留并成为新子图的根。
    #[track_caller]
    pub fn detach_node(&self) -> GraphResult<()> {
        let head = self.head()?;
        if head.is_top_node() {
            return Ok(());
        }
        let stage = app_stage(head.node())?;
        head.node().reset_prev_transform();
        PandaNode::detach(&head, stage)
    }

    #[track_caller]
    pub fn stash(&self) -> GraphResult<()> {
        let head = self.head()?;
        app_stage(head.node())?;
        let parent = head.get_next()?;
        parent.node().stash_child(head.node());
        Ok(())
    }

    #[track_caller]
    pub fn unstash(&self) -> GraphResult<()> {
        let head = self.head()?;
        app_stage(head.node())?;
        let parent = head.get_next()?;
        parent.node().unstash_child(head.node());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 属性

    #[track_caller]
    pub fn set_transform(&self, transform: Arc<TransformState>) -> GraphResult<()> {
        self.head()?.node().set_transform(transform);
        Ok(())
    }

    #[track_caller]
    pub fn get_transform(&self) -> GraphResult<Arc<TransformState>> {
        Ok(self.head()?.node().get_transform())
    }

    #[track_caller]
    pub fn set_pos(&self, pos: Vec3) -> GraphResult<()> {
        self.head()?.node().set_pos(pos);
        Ok(())
    }

    #[track_caller]
    pub fn get_pos(&self) -> GraphResult<Vec3> {
        Ok(self.head()?.node().get_transform().get_pos())
    }

    /// 从根到 head 逐层合成的 transform。
    #[track_caller]
    pub fn get_net_transform(&self) -> GraphResult<Arc<TransformState>> {
        self.head()?;
        Ok(self
            .components()
            .iter()
            .rev()
            .fold(TransformState::identity(), |net, c| {
                net.compose(&c.node().get_transform())
            }))
    }

    #[track_caller]
    pub fn set_state(&self, state: Arc<RenderState>) -> GraphResult<()> {
        self.head()?.node().set_state(state);
        Ok(())
    }

    #[track_caller]
    pub fn get_state(&self) -> GraphResult<Arc<RenderState>> {
        Ok(self.head()?.node().get_state())
    }

    #[track_caller]
    pub fn get_net_state(&self) -> GraphResult<Arc<RenderState>> {
        self.head()?;
        Ok(self
            .components()
            .iter()
            .rev()
            .fold(RenderState::empty(), |net, c| net.compose(&c.node().get_state())))
    }

    #[track_caller]
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) -> GraphResult<()> {
        self.head()?.node().set_tag(key, value);
        Ok(())
    }

    pub fn get_tag(&self, key: &str) -> Option<String> {
        self.node()?.get_tag(key)
    }

    /// 对所有摄像机隐藏。
    #[track_caller]
    pub fn hide(&self) -> GraphResult<()> {
        self.hide_to(PandaNode::overall_bit())
    }

    #[track_caller]
    pub fn hide_to(&self, camera_mask: DrawMask) -> GraphResult<()> {
        self.head()?
            .node()
            .adjust_draw_mask(DrawMask::all_off(), camera_mask, DrawMask::all_off());
        Ok(())
    }

    /// 撤销 [`hide`](Self::hide)，把可见性交还给父节点。
    #[track_caller]
    pub fn show(&self) -> GraphResult<()> {
        self.show_to(PandaNode::overall_bit())
    }

    #[track_caller]
    pub fn show_to(&self, camera_mask: DrawMask) -> GraphResult<()> {
        self.head()?
            .node()
            .adjust_draw_mask(DrawMask::all_off(), DrawMask::all_off(), camera_mask);
        Ok(())
    }

    pub fn is_hidden(&self) -> bool {
        self.is_hidden_to(PandaNode::overall_bit())
    }

    /// 路径上是否有节点对 `camera_mask` 中的摄像机全部隐藏。
    pub fn is_hidden_to(&self, camera_mask: DrawMask) -> bool {
        self.components().iter().any(|c| {
            let node = c.node();
            ((node.get_draw_show_mask() | !node.get_draw_control_mask()) & camera_mask).is_zero()
        })
    }

    #[track_caller]
    pub fn get_bounds(&self) -> GraphResult<BoundingVolume> {
        Ok(self.head()?.node().get_bounds())
    }

    pub fn ls(&self) -> String {
        self.node().map(|n| n.ls()).unwrap_or_default()
    }
}

impl PartialEq for NodePath {
    fn eq(&self, other: &Self) -> bool {
        match (self.resolved(), other.resolved()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for NodePath {}

impl Hash for NodePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resolved()
            .map_or(std::ptr::null(), |h| Arc::as_ptr(&h))
            .hash(state);
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.resolved(), self.error_type) {
            (Some(head), _) => write!(f, "{head}"),
            (None, ErrorType::Ok) => f.write_str("**empty**"),
            (None, ErrorType::NotFound) => f.write_str("**not found**"),
            (None, ErrorType::Removed) => f.write_str("**removed**"),
            (None, ErrorType::Fail) => f.write_str("**error**"),
        }
    }
}
