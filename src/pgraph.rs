//! 场景图核心：PandaNode、父子连接、实例路径（NodePath / NodePathComponent）。

mod bounds;
mod connection;
mod masks;
mod node_kind;
mod node_path;
mod node_path_component;
mod panda_node;
pub mod prev_transform;
mod render_state;
mod transform_state;

// ─────────────────────────────────────────────────────────────────────────────

pub use bounds::{BoundingVolume, BoundsType};
pub use connection::{Children, DownConnection, DownList, Parents, UpConnection, UpList};
pub use masks::{BitMask32, CollideMask, DrawMask};
pub use node_kind::{CallbackNode, CullFn, Geom, GeomNode, NodeKind, PlainNode, TypeHandle};
pub use node_path::{ErrorType, NodePath};
pub use node_path_component::NodePathComponent;
pub use panda_node::{fancy_bits, unexpected_change, PandaNode};
pub use render_state::{AttribValue, RenderAttrib, RenderEffect, RenderEffects, RenderState};
pub use transform_state::TransformState;
