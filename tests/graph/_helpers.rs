#![allow(dead_code)]

use std::sync::Arc;

use pgraph::contract::{self, ContractPolicy};
use pgraph::glam::Vec3;
use pgraph::pgraph::{Geom, GeomNode, PlainNode};
use pgraph::{PandaNode, Pipeline};

/// ════════════════════════════════════════════════════════════════════════
/// 测试里统一打开 tracing 输出（重复调用无害）。
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_target(true)
        .try_init();
}

/// ════════════════════════════════════════════════════════════════════════
/// 以 Report 策略执行，违反前置条件时拿到 `Err` 而不是 panic。
pub fn reporting<R>(f: impl FnOnce() -> R) -> R {
    contract::with_policy(ContractPolicy::Report, f)
}

/// ════════════════════════════════════════════════════════════════════════
/// 当前 stage 上子节点的名字，按 down list 顺序。
pub fn child_names(node: &PandaNode) -> Vec<String> {
    node.get_children().iter().map(|c| c.get_name()).collect()
}

pub fn stashed_names(node: &PandaNode) -> Vec<String> {
    node.get_stashed_children()
        .iter()
        .map(|c| c.get_name())
        .collect()
}

/// ════════════════════════════════════════════════════════════════════════
/// 沿 down 边（含 stash）能否从 `node` 走回它自己。
pub fn reaches_itself(node: &Arc<PandaNode>) -> bool {
    let mut stack: Vec<Arc<PandaNode>> = node
        .get_children()
        .iter()
        .chain(node.get_stashed_children().iter())
        .cloned()
        .collect();
    let mut visited: Vec<*const PandaNode> = Vec::new();
    while let Some(next) = stack.pop() {
        if Arc::ptr_eq(&next, node) {
            return true;
        }
        let ptr = Arc::as_ptr(&next);
        if visited.contains(&ptr) {
            continue;
        }
        visited.push(ptr);
        stack.extend(next.get_children().iter().cloned());
        stack.extend(next.get_stashed_children().iter().cloned());
    }
    false
}

/// ════════════════════════════════════════════════════════════════════════
/// 一个只含两个顶点的 GeomNode：包围体是以两点中点为心的球。
pub fn segment_geom(name: &str, a: Vec3, b: Vec3) -> Arc<PandaNode> {
    let node = PandaNode::new_geom(name);
    GeomNode::add_geom(&node, Geom::new(vec![a, b])).expect("new_geom builds a GeomNode");
    node
}

/// ════════════════════════════════════════════════════════════════════════
/// root -> n1 -> n2 -> ... -> n{depth}，返回 (root, 所有节点含 root)。
pub fn linear_chain(depth: usize) -> (Arc<PandaNode>, Vec<Arc<PandaNode>>) {
    let root = PandaNode::new("root");
    let mut nodes = vec![Arc::clone(&root)];
    for i in 0..depth {
        let node = PandaNode::new(format!("n{i}"));
        nodes
            .last()
            .expect("chain starts with root")
            .add_child(&node, 0)
            .expect("fresh chain has no cycles");
        nodes.push(node);
    }
    (root, nodes)
}

/// ════════════════════════════════════════════════════════════════════════
/// 在给定 pipeline 上建普通节点，用于多 stage 测试。
pub fn staged_node(name: &str, pipeline: &Arc<Pipeline>) -> Arc<PandaNode> {
    PandaNode::with_pipeline(name, PlainNode, pipeline)
}
