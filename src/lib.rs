//! 场景图 pipeline 核心。
//!
//! - [`pipeline`]：按 stage 分页的 [`PipelineCycler`]、写时复制容器与 pipeline 推进；
//! - [`pgraph`]：[`PandaNode`] 图（父子连接、环检测、惰性包围体与 net mask）以及
//!   [`NodePath`] / [`NodePathComponent`] 实例路径；
//! - [`cull`]：在某个 stage 上遍历图的最小 cull 遍历器。
//!
//! 前置条件总是检查，违反时的行为由 [`contract::ContractPolicy`] 决定。

// ─────────────────────────────────────────────────────────────────────────────

pub mod config;
pub mod contract;
pub mod cull;
pub mod error;
pub mod pgraph;
pub mod pipeline;
pub mod telemetry;

// ─────────────────────────────────────────────────────────────────────────────

pub use config::GraphConfig;
pub use contract::ContractPolicy;
pub use error::{GraphError, GraphResult};
pub use pgraph::{NodePath, NodePathComponent, PandaNode};
pub use pipeline::{Pipeline, PipelineCycler, StageGuard};

// 对外暴露的 glam 类型（Vec3 / Mat4 / Vec4）
pub use glam;
