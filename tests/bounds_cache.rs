mod graph;

use pgraph::glam::Vec3;
use pgraph::pgraph::{BoundingVolume, BoundsType, CollideMask, DrawMask};
use pgraph::PandaNode;

use graph::_helpers::{init_tracing, linear_chain, segment_geom};

/// 没有修改时第二次读取不会重算：结果相同，序号不前进。
#[test]
fn repeated_reads_do_not_recompute() {
    init_tracing();
    let root = PandaNode::new("root");
    root.add_child(&segment_geom("g", Vec3::ZERO, Vec3::X), 0).unwrap();

    let first = root.get_bounds();
    let seq = root.get_bounds_seq();
    assert!(!root.is_bounds_stale());

    let second = root.get_bounds();
    assert_eq!(first, second);
    assert_eq!(root.get_bounds_seq(), seq);
}

#[test]
fn child_transform_invalidates_ancestors() {
    let (root, nodes) = linear_chain(5);
    let geom = segment_geom("g", Vec3::ZERO, Vec3::X);
    nodes[5].add_child(&geom, 0).unwrap();

    let before = root.get_bounds();
    let seq = root.get_bounds_seq();
    assert!(before.contains_point(Vec3::new(0.5, 0.0, 0.0)));

    geom.set_pos(Vec3::new(0.0, 20.0, 0.0));
    assert!(nodes.iter().all(|n| n.is_bounds_stale()));

    let after = root.get_bounds();
    assert!(root.get_bounds_seq() > seq);
    assert!(after.contains_point(Vec3::new(0.5, 20.0, 0.0)));
    assert!(!after.contains_point(Vec3::new(0.5, 0.0, 0.0)));
    assert!(nodes.iter().all(|n| !n.is_bounds_stale()));
}

/// 实例化的节点变化时，每条父路径都要失效。
#[test]
fn instanced_change_reaches_every_parent() {
    let left = PandaNode::new("left");
    let right = PandaNode::new("right");
    let shared = segment_geom("shared", Vec3::ZERO, Vec3::Z);
    left.add_child(&shared, 0).unwrap();
    right.add_child(&shared, 0).unwrap();
    left.get_bounds();
    right.get_bounds();

    shared.set_pos(Vec3::new(5.0, 0.0, 0.0));
    assert!(left.is_bounds_stale());
    assert!(right.is_bounds_stale());
    assert!(right.get_bounds().contains_point(Vec3::new(5.0, 0.0, 0.5)));
}

#[test]
fn final_node_ignores_children() {
    let root = PandaNode::new("root");
    root.add_child(&segment_geom("g", Vec3::ZERO, Vec3::X), 0).unwrap();
    assert!(!root.get_bounds().is_empty());

    root.set_final(true);
    assert!(root.is_bounds_stale());
    assert!(root.get_bounds().is_empty());
    // 顶点数照常累计
    assert_eq!(root.get_nested_vertices(), 2);
}

#[test]
fn user_bounds_replace_internal_bounds() {
    let root = PandaNode::new("root");
    root.add_child(&segment_geom("g", Vec3::ZERO, Vec3::X), 0).unwrap();
    root.set_bounds(BoundingVolume::sphere(Vec3::ZERO, 100.0));

    assert_eq!(root.get_user_bounds(), Some(BoundingVolume::sphere(Vec3::ZERO, 100.0)));
    assert!(root.get_bounds().contains_point(Vec3::new(90.0, 0.0, 0.0)));

    root.clear_bounds();
    assert!(!root.get_bounds().contains_point(Vec3::new(90.0, 0.0, 0.0)));
}

#[test]
fn bounds_type_selects_volume_shape() {
    let geom = segment_geom("g", Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0));
    geom.set_bounds_type(BoundsType::Box);
    assert_eq!(
        geom.get_internal_bounds(),
        BoundingVolume::aabb(Vec3::ZERO, Vec3::new(2.0, 2.0, 2.0))
    );

    geom.set_bounds_type(BoundsType::Sphere);
    assert!(matches!(geom.get_internal_bounds(), BoundingVolume::Sphere { .. }));
}

#[test]
fn vertices_and_collide_masks_accumulate() {
    let root = PandaNode::new("root");
    let a = segment_geom("a", Vec3::ZERO, Vec3::X);
    let b = segment_geom("b", Vec3::ZERO, Vec3::Y);
    root.add_child(&a, 0).unwrap();
    root.add_child(&b, 0).unwrap();
    a.set_into_collide_mask(CollideMask::bit(3));
    b.set_into_collide_mask(CollideMask::bit(5));

    assert_eq!(root.get_nested_vertices(), 4);
    assert_eq!(root.get_internal_vertices(), 0);
    assert_eq!(
        root.get_net_collide_mask(),
        CollideMask::bit(3) | CollideMask::bit(5)
    );

    root.remove_child(&b);
    assert_eq!(root.get_nested_vertices(), 2);
    assert_eq!(root.get_net_collide_mask(), CollideMask::bit(3));
}

/// 只有一个可渲染子节点对相机位 1 隐藏时，父节点汇总为对该位隐藏；
/// 再加一个不受控的可渲染子节点后该位又可见。
#[test]
fn net_draw_masks_summarize_descendants() {
    let cam = DrawMask::bit(1);
    let root = PandaNode::new("root");
    let hidden = segment_geom("hidden", Vec3::ZERO, Vec3::X);
    hidden.adjust_draw_mask(DrawMask::all_off(), cam, DrawMask::all_off());
    root.add_child(&hidden, 0).unwrap();

    assert!(root.get_net_draw_control_mask().has_bits_in_common(cam));
    assert!(!root.get_net_draw_show_mask().has_bits_in_common(cam));

    root.add_child(&segment_geom("shown", Vec3::ZERO, Vec3::Y), 0).unwrap();
    assert!(root.get_net_draw_show_mask().has_bits_in_common(cam));
}

#[test]
fn overall_hidden_round_trip() {
    let node = PandaNode::new("n");
    assert!(!node.is_overall_hidden());
    node.set_overall_hidden(true);
    assert!(node.is_overall_hidden());
    assert!(node.get_draw_control_mask().has_bits_in_common(PandaNode::overall_bit()));
    node.set_overall_hidden(false);
    assert!(!node.is_overall_hidden());
    assert!(node.get_draw_control_mask().is_zero());
}
