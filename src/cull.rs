//! Cull 遍历：在某一个 pipeline stage 上自顶向下走图，累积 transform / state / draw mask，
//! 把可渲染的节点交给 [`CullHandler`]。
//!
//! 这里只是图核心的消费方：读 stage 快照、调用节点种类的 cull 回调，不做任何绘制。

use std::sync::Arc;

use crate::contract;
use crate::error::{GraphError, GraphResult};
use crate::pgraph::{BoundingVolume, DrawMask, NodePath, PandaNode, RenderState, TransformState};
use crate::pipeline::StageGuard;

/// 遍历中的路径：起点 NodePath 加上其下经过的节点。需要时才落成真正的 [`NodePath`]。
#[derive(Clone, Debug)]
pub struct WorkingNodePath {
    root: NodePath,
    below: Vec<Arc<PandaNode>>,
}

impl WorkingNodePath {
    fn new(root: NodePath) -> Self {
        WorkingNodePath {
            root,
            below: Vec::new(),
        }
    }

    fn child(&self, node: Arc<PandaNode>) -> Self {
        let mut below = self.below.clone();
        below.push(node);
        WorkingNodePath {
            root: self.root.clone(),
            below,
        }
    }

    pub fn get_num_nodes(&self) -> usize {
        self.root.get_num_nodes() + self.below.len()
    }

    /// 逐层取组件，构造出完整的 NodePath。
    pub fn get_node_path(&self) -> NodePath {
        let mut path = self.root.clone();
        for node in &self.below {
            path = match NodePath::from_parent(&path, node) {
                Ok(p) => p,
                Err(_) => return NodePath::fail(),
            };
        }
        path
    }
}

/// 传给 cull 回调与 handler 的当前节点状态。
pub struct CullTraverserData {
    pub node: Arc<PandaNode>,
    pub node_path: WorkingNodePath,
    pub net_transform: Arc<TransformState>,
    pub state: Arc<RenderState>,
    pub draw_mask: DrawMask,
}

pub trait CullHandler {
    fn record_object(&mut self, data: &CullTraverserData);
}

#[derive(Debug, Clone)]
pub struct CulledObject {
    pub node: Arc<PandaNode>,
    pub net_transform: Arc<TransformState>,
    pub state: Arc<RenderState>,
}

impl CullHandler for Vec<CulledObject> {
    fn record_object(&mut self, data: &CullTraverserData) {
        self.push(CulledObject {
            node: Arc::clone(&data.node),
            net_transform: Arc::clone(&data.net_transform),
            state: Arc::clone(&data.state),
        });
    }
}

// ─────────────────────────────────────────────────────────────────────────────

pub struct CullTraverser {
    camera_mask: DrawMask,
    view_volume: Option<BoundingVolume>,
    stage: usize,
    nodes_visited: usize,
    nodes_culled: usize,
}

impl Default for CullTraverser {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CullTraverser {
    pub fn new(stage: usize) -> Self {
        CullTraverser {
            camera_mask: PandaNode::all_camera_mask(),
            view_volume: None,
            stage,
            nodes_visited: 0,
            nodes_culled: 0,
        }
    }

    pub fn with_camera_mask(mut self, camera_mask: DrawMask) -> Self {
        self.camera_mask = camera_mask;
        self
    }

    /// 世界坐标下的视见体；不设置时不做视见体裁剪。
    pub fn with_view_volume(mut self, view_volume: BoundingVolume) -> Self {
        self.view_volume = Some(view_volume);
        self
    }

    pub fn get_nodes_visited(&self) -> usize {
        self.nodes_visited
    }

    pub fn get_nodes_culled(&self) -> usize {
        self.nodes_culled
    }

    /// 从 `root` 开始遍历。`root` 自身的 transform 与 state 之外，还会带上它祖先的合成值。
    #[track_caller]
    pub fn traverse(&mut self, root: &NodePath, handler: &mut impl CullHandler) -> GraphResult<()> {
        let Some(root_node) = root.node() else {
            return Err(contract::violated(GraphError::EmptyPath));
        };
        let _stage = StageGuard::enter(self.stage);

        let parent = root.get_parent();
        let (net_transform, state) = if parent.is_empty() {
            (TransformState::identity(), RenderState::empty())
        } else {
            (parent.get_net_transform()?, parent.get_net_state()?)
        };

        // (节点, 路径, 父节点的累积状态)
        let mut stack = vec![(
            root_node,
            WorkingNodePath::new(root.clone()),
            net_transform,
            state,
            DrawMask::all_on(),
        )];
        while let Some((node, node_path, parent_net, parent_state, parent_mask)) = stack.pop() {
            self.nodes_visited += 1;

            let control = node.get_draw_control_mask();
            let draw_mask = (parent_mask & !control) | (node.get_draw_show_mask() & control);
            if (draw_mask & PandaNode::overall_bit()).is_zero()
                || (draw_mask & self.camera_mask).is_zero()
            {
                self.nodes_culled += 1;
                continue;
            }

            if let Some(view) = &self.view_volume {
                let bounds = node.get_bounds_at(self.stage).xform(&parent_net.get_mat());
                if !bounds.intersects(view) {
                    self.nodes_culled += 1;
                    continue;
                }
            }

            let mut data = CullTraverserData {
                node: Arc::clone(&node),
                net_transform: parent_net.compose(&node.get_transform()),
                state: parent_state.compose(&node.get_state()),
                node_path,
                draw_mask,
            };
            if node.has_cull_callback() && !node.cull_callback(&mut data) {
                self.nodes_culled += 1;
                continue;
            }
            if node.is_renderable() {
                handler.record_object(&data);
            }

            let children = node.get_children();
            for conn in children.connections().iter().rev() {
                let child = Arc::clone(conn.child());
                stack.push((
                    Arc::clone(&child),
                    data.node_path.child(child),
                    Arc::clone(&data.net_transform),
                    Arc::clone(&data.state),
                    data.draw_mask,
                ));
            }
        }

        tracing::trace!(
            target: "pgraph",
            stage = self.stage,
            visited = self.nodes_visited,
            culled = self.nodes_culled,
            "cull traversal done"
        );
        Ok(())
    }
}
