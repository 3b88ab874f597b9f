#![cfg(not(feature = "single-stage"))]

mod graph;

use pgraph::glam::Vec3;
use pgraph::pipeline::{with_stage, StageGuard};
use pgraph::{GraphError, NodePath, PandaNode, Pipeline, PipelineCycler};

use graph::_helpers::{child_names, init_tracing, reporting, staged_node};

/// 写 stage 1 不影响 stage 0 已经拿到的快照，也不影响 stage 0 本身。
#[test]
fn stage_write_does_not_leak_into_snapshot() {
    let pipeline = Pipeline::new("cow", 2);
    let cycler = PipelineCycler::new(&pipeline, vec![1u32, 2, 3]);

    let snapshot = cycler.read_stage(0);
    cycler.write_stage(1).push(4);

    assert_eq!(*snapshot, [1, 2, 3]);
    assert_eq!(*cycler.read_stage(0), [1, 2, 3]);
    assert_eq!(*cycler.read_stage(1), [1, 2, 3, 4]);
    assert!(cycler.is_stage_unique(1));
}

/// 只读的写 guard 不复制页面。
#[test]
fn untouched_writer_keeps_pages_shared() {
    let pipeline = Pipeline::new("cow", 3);
    let cycler = PipelineCycler::new(&pipeline, 7u64);
    {
        let guard = cycler.write_stage(2);
        assert_eq!(*guard, 7);
    }
    assert!(!cycler.is_stage_unique(1));
    assert!(!cycler.is_stage_unique(2));
    assert!(!cycler.is_dirty());
}

/// stage 0 上改 transform：绑定在 stage 1 的读者在 pipeline 推进之前看到的仍是旧值。
#[test]
fn transform_reaches_stage_one_after_cycle() {
    init_tracing();
    let pipeline = Pipeline::new("frames", 2);
    let node = staged_node("mover", &pipeline);

    node.set_pos(Vec3::new(3.0, 0.0, 0.0));
    assert_eq!(node.get_transform().get_pos(), Vec3::new(3.0, 0.0, 0.0));

    with_stage(1, || {
        assert!(node.get_transform().is_identity());
    });
    assert_eq!(pipeline.num_dirty_cyclers(), 1);

    pipeline.cycle();
    with_stage(1, || {
        assert_eq!(node.get_transform().get_pos(), Vec3::new(3.0, 0.0, 0.0));
    });
    assert_eq!(pipeline.num_dirty_cyclers(), 0);
}

/// 下游 stage 自己写的值在下一次 cycle 时被上游覆盖。
#[test]
fn downstream_write_is_overwritten_by_cycle() {
    let pipeline = Pipeline::new("frames", 2);
    let node = staged_node("n", &pipeline);

    with_stage(1, || node.set_pos(Vec3::Y));
    assert!(node.get_transform().is_identity());
    with_stage(1, || assert_eq!(node.get_transform().get_pos(), Vec3::Y));

    pipeline.cycle();
    with_stage(1, || assert!(node.get_transform().is_identity()));
}

/// app stage 上加的边要等 cycle 之后下游 stage 才看得到。
#[test]
fn structural_change_propagates_on_cycle() {
    let pipeline = Pipeline::new("frames", 3);
    let root = staged_node("root", &pipeline);
    let child = staged_node("child", &pipeline);

    root.add_child(&child, 0).unwrap();
    assert_eq!(child_names(&root), ["child"]);
    with_stage(1, || {
        assert_eq!(root.get_num_children(), 0);
        assert_eq!(child.get_num_parents(), 0);
    });

    pipeline.cycle();
    with_stage(1, || assert_eq!(child_names(&root), ["child"]));
    with_stage(2, || assert_eq!(root.get_num_children(), 0));

    pipeline.cycle();
    with_stage(2, || {
        assert_eq!(child_names(&root), ["child"]);
        assert_eq!(child.get_num_parents(), 1);
    });
    assert_eq!(pipeline.num_dirty_cyclers(), 0);
}

/// 下游 stage 上的包围体按该 stage 自己的数据计算。
#[test]
fn bounds_are_per_stage() {
    let pipeline = Pipeline::new("frames", 2);
    let root = staged_node("root", &pipeline);
    let geom = PandaNode::with_pipeline("geom", pgraph::pgraph::GeomNode::new(), &pipeline);
    pgraph::pgraph::GeomNode::add_geom(
        &geom,
        pgraph::pgraph::Geom::new(vec![Vec3::ZERO, Vec3::X]),
    )
    .unwrap();
    root.add_child(&geom, 0).unwrap();
    pipeline.cycle();

    geom.set_pos(Vec3::new(0.0, 0.0, 50.0));
    let app_bounds = root.get_bounds();
    let cull_bounds = with_stage(1, || root.get_bounds());

    assert!(app_bounds.contains_point(Vec3::new(0.5, 0.0, 50.0)));
    assert!(!cull_bounds.contains_point(Vec3::new(0.5, 0.0, 50.0)));
    assert!(cull_bounds.contains_point(Vec3::new(0.5, 0.0, 0.0)));
}

/// NodePath 的结构修改只允许在 app stage 上进行。
#[test]
fn node_path_mutation_requires_app_stage() {
    let pipeline = Pipeline::new("frames", 2);
    let root = NodePath::from_node(&staged_node("root", &pipeline));

    let err = reporting(|| {
        let _guard = StageGuard::enter(1);
        root.attach_new_node_named("late")
    })
    .unwrap_err();
    assert_eq!(err, GraphError::NotAppStage { stage: 1 });
    assert_eq!(root.get_num_children(), 0);

    let attached = root.attach_new_node_named("early").unwrap();
    assert_eq!(attached.to_string(), "root/early");
}

/// 两个节点在不同 pipeline 上时不能相连。
#[test]
fn cross_pipeline_edges_are_refused() {
    let a = staged_node("a", &Pipeline::new("one", 2));
    let b = staged_node("b", &Pipeline::new("two", 2));

    let err = reporting(|| a.add_child(&b, 0)).unwrap_err();
    assert!(matches!(err, GraphError::PipelineMismatch { .. }));
}

/// 重置 prev transform 只动当前 stage 及其上游，stage 1 在 cycle 之前仍是上一帧。
#[test]
fn prev_transform_reset_stays_on_app_stage() {
    init_tracing();
    let pipeline = Pipeline::new("frames", 2);
    let node = staged_node("mover", &pipeline);

    node.set_pos(Vec3::new(3.0, 0.0, 0.0));
    PandaNode::reset_all_prev_transform();
    // 登记表是进程级的，别的测试线程可能先 drain 走了这个节点
    node.reset_prev_transform();

    assert!(!node.has_dirty_prev_transform());
    assert_eq!(node.get_prev_transform().get_pos(), Vec3::new(3.0, 0.0, 0.0));
    with_stage(1, || {
        assert!(node.get_transform().is_identity());
        assert!(node.get_prev_transform().is_identity());
    });

    pipeline.cycle();
    with_stage(1, || {
        assert_eq!(node.get_transform().get_pos(), Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(node.get_prev_transform().get_pos(), Vec3::new(3.0, 0.0, 0.0));
    });
}

/// 重置 prev transform 不能把 app stage 的连接带到下游：stage 1 上父子两侧保持一致。
#[test]
fn prev_transform_reset_keeps_downstream_edges_consistent() {
    let pipeline = Pipeline::new("frames", 2);
    let parent = staged_node("parent", &pipeline);
    let child = staged_node("child", &pipeline);

    parent.add_child(&child, 0).unwrap();
    child.set_pos(Vec3::Z);
    PandaNode::reset_all_prev_transform();

    with_stage(1, || {
        assert_eq!(parent.get_num_children(), 0);
        assert_eq!(child.get_num_parents(), 0);
        assert!(child.get_transform().is_identity());
    });

    pipeline.cycle();
    with_stage(1, || {
        assert_eq!(child_names(&parent), ["child"]);
        assert_eq!(child.get_num_parents(), 1);
    });
}

/// NodePath 的 reparent 会重置 prev transform；下游 stage 在 cycle 之前仍看到旧位置与旧父节点。
#[test]
fn reparent_leaves_downstream_stage_alone() {
    let pipeline = Pipeline::new("frames", 2);
    let root = NodePath::from_node(&staged_node("root", &pipeline));
    let a = root.attach_new_node_named("a").unwrap();
    let b = root.attach_new_node_named("b").unwrap();
    let x = a.attach_new_node_named("x").unwrap();
    pipeline.cycle();

    x.set_pos(Vec3::Z).unwrap();
    x.reparent_to(&b, 0).unwrap();

    let a_node = a.node().unwrap();
    let b_node = b.node().unwrap();
    let x_node = x.node().unwrap();
    assert_eq!(child_names(&b_node), ["x"]);
    with_stage(1, || {
        assert!(x_node.get_transform().is_identity());
        assert_eq!(child_names(&a_node), ["x"]);
        assert_eq!(b_node.get_num_children(), 0);
    });

    pipeline.cycle();
    with_stage(1, || {
        assert_eq!(x_node.get_transform().get_pos(), Vec3::Z);
        assert_eq!(a_node.get_num_children(), 0);
        assert_eq!(child_names(&b_node), ["x"]);
    });
}
