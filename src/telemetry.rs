//! 图结构变更的观测工具，统一封装 tracing 事件名。

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphEventKind {
    AddChild,
    RemoveChild,
    ReplaceChild,
    Stash,
    Unstash,
    Reparent,
    Detach,
    Collapse,
    BoundsRecompute,
    PipelineCycle,
}

pub fn span_name(kind: GraphEventKind) -> &'static str {
    match kind {
        GraphEventKind::AddChild => "pgraph.add_child",
        GraphEventKind::RemoveChild => "pgraph.remove_child",
        GraphEventKind::ReplaceChild => "pgraph.replace_child",
        GraphEventKind::Stash => "pgraph.stash",
        GraphEventKind::Unstash => "pgraph.unstash",
        GraphEventKind::Reparent => "pgraph.reparent",
        GraphEventKind::Detach => "pgraph.detach",
        GraphEventKind::Collapse => "pgraph.collapse",
        GraphEventKind::BoundsRecompute => "pgraph.bounds_recompute",
        GraphEventKind::PipelineCycle => "pipeline.cycle",
    }
}

/// 记录一次图事件。`detail` 只在 trace 级别打开时才会被格式化。
pub fn record_graph_event(kind: GraphEventKind, detail: impl std::fmt::Display) {
    tracing::trace!(target: "pgraph", event = span_name(kind), "{detail}");
}
