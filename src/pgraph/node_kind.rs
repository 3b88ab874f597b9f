//! 节点种类：PandaNode 把"它是什么节点"委托给一个 [`NodeKind`] trait 对象。
//!
//! 图结构、缓存、pipeline 都在 PandaNode 上；种类只回答能力问题（能否渲染、是否需要 cull 回调、
//! 内部包围体怎么算）并接收变更通知。

use std::any::Any;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use glam::Vec3;

use super::{BoundingVolume, BoundsType, CollideMask, PandaNode};
use crate::cull::CullTraverserData;
use crate::error::GraphResult;

/// 运行时类型标识，用于输出和 downcast 报错。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle {
    name: &'static str,
}

impl TypeHandle {
    pub const fn new(name: &'static str) -> Self {
        TypeHandle { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub trait NodeKind: Any + Send + Sync + fmt::Debug {
    fn type_handle(&self) -> TypeHandle;

    /// 复制种类自身的数据（不含图结构）。
    fn make_copy(&self) -> Box<dyn NodeKind>;

    fn as_any(&self) -> &dyn Any;

    fn is_renderable(&self) -> bool {
        false
    }

    fn has_cull_callback(&self) -> bool {
        false
    }

    /// 返回 false 表示剪掉这个节点及其子树。
    fn cull_callback(&self, _node: &PandaNode, _data: &mut CullTraverserData) -> bool {
        true
    }

    /// 节点自身（不含子节点）的包围体及顶点数，坐标系为节点本地坐标。
    fn compute_internal_bounds(
        &self,
        _node: &PandaNode,
        _bounds_type: BoundsType,
    ) -> (BoundingVolume, usize) {
        (BoundingVolume::Empty, 0)
    }

    fn legal_collide_mask(&self) -> CollideMask {
        CollideMask::all_off()
    }

    fn transform_changed(&self, _node: &PandaNode) {}
    fn state_changed(&self, _node: &PandaNode) {}
    fn children_changed(&self, _node: &PandaNode) {}
    fn parents_changed(&self, _node: &PandaNode) {}
    fn draw_mask_changed(&self, _node: &PandaNode) {}
}

// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct PlainNode;

impl NodeKind for PlainNode {
    fn type_handle(&self) -> TypeHandle {
        TypeHandle::new("PandaNode")
    }

    fn make_copy(&self) -> Box<dyn NodeKind> {
        Box::new(PlainNode)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geom {
    pub vertices: Vec<Vec3>,
}

impl Geom {
    pub fn new(vertices: Vec<Vec3>) -> Self {
        Geom { vertices }
    }
}

/// 携带几何体的节点。几何数据不分 stage，修改后通过 internal bounds 失效传播。
#[derive(Debug, Default)]
pub struct GeomNode {
    geoms: RwLock<Vec<Arc<Geom>>>,
}

impl GeomNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// 给 `node`（必须是 GeomNode）追加一个几何体。
    pub fn add_geom(node: &PandaNode, geom: Geom) -> GraphResult<()> {
        let kind = node.dcast::<GeomNode>()?;
        kind.geoms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(geom));
        node.mark_internal_bounds_stale();
        Ok(())
    }

    pub fn remove_all_geoms(node: &PandaNode) -> GraphResult<()> {
        let kind = node.dcast::<GeomNode>()?;
        kind.geoms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        node.mark_internal_bounds_stale();
        Ok(())
    }

    pub fn get_num_geoms(&self) -> usize {
        self.geoms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn get_geom(&self, index: usize) -> Option<Arc<Geom>> {
        self.geoms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }
}

impl NodeKind for GeomNode {
    fn type_handle(&self) -> TypeHandle {
        TypeHandle::new("GeomNode")
    }

    fn make_copy(&self) -> Box<dyn NodeKind> {
        let geoms = self.geoms.read().unwrap_or_else(PoisonError::into_inner).clone();
        Box::new(GeomNode {
            geoms: RwLock::new(geoms),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn is_renderable(&self) -> bool {
        true
    }

    fn compute_internal_bounds(
        &self,
        _node: &PandaNode,
        bounds_type: BoundsType,
    ) -> (BoundingVolume, usize) {
        let geoms = self.geoms.read().unwrap_or_else(PoisonError::into_inner);
        let points: Vec<Vec3> = geoms
            .iter()
            .flat_map(|g| g.vertices.iter().copied())
            .collect();
        (BoundingVolume::from_points(&points, bounds_type), points.len())
    }

    fn legal_collide_mask(&self) -> CollideMask {
        CollideMask::all_on()
    }
}

// ─────────────────────────────────────────────────────────────────────────────

pub type CullFn = dyn Fn(&PandaNode, &mut CullTraverserData) -> bool + Send + Sync;

/// 由用户闭包决定 cull 行为的节点。
#[derive(Clone)]
pub struct CallbackNode {
    callback: Arc<CullFn>,
}

impl CallbackNode {
    pub fn new(
        callback: impl Fn(&PandaNode, &mut CullTraverserData) -> bool + Send + Sync + 'static,
    ) -> Self {
        CallbackNode {
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for CallbackNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CallbackNode")
    }
}

impl NodeKind for CallbackNode {
    fn type_handle(&self) -> TypeHandle {
        TypeHandle::new("CallbackNode")
    }

    fn make_copy(&self) -> Box<dyn NodeKind> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn has_cull_callback(&self) -> bool {
        true
    }

    fn cull_callback(&self, node: &PandaNode, data: &mut CullTraverserData) -> bool {
        (self.callback)(node, data)
    }
}
