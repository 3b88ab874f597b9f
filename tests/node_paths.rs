mod graph;

use std::collections::HashSet;
use std::sync::Arc;

use pgraph::glam::Vec3;
use pgraph::pgraph::ErrorType;
use pgraph::{NodePath, PandaNode};

use graph::_helpers::init_tracing;

/// 两个实例合并之后，拿着失败方句柄的代码与胜出方看到同一条路径。
#[test]
fn collapsed_instance_resolves_to_winner() {
    init_tracing();
    let render = NodePath::new("render");
    let left = render.attach_new_node_named("left").unwrap();
    let right = render.attach_new_node_named("right").unwrap();
    let model = left.attach_new_node_named("model").unwrap();
    let second = model.instance_to(&right, 0).unwrap();
    let hat = second.attach_new_node_named("hat").unwrap();
    assert_ne!(model, second);
    assert_eq!(hat.to_string(), "render/right/model/hat");

    second.reparent_to(&left, 0).unwrap();

    assert_eq!(second, model);
    assert_eq!(second.get_key(), model.get_key());
    assert_eq!(second.to_string(), "render/left/model");
    assert_eq!(second.get_parent(), left);
    assert_eq!(right.get_num_children(), 0);
    assert_eq!(left.get_num_children(), 1);
    assert_eq!(model.node().unwrap().get_num_parents(), 1);

    // 挂在失败方下面的路径也跟着解析过去
    assert_eq!(hat.to_string(), "render/left/model/hat");
    assert_eq!(hat.get_num_nodes(), 4);
    assert_eq!(hat.get_parent(), model);

    let mut keys = HashSet::new();
    keys.insert(model.clone());
    assert!(keys.contains(&second));
}

#[test]
fn lengths_follow_reparent() {
    let render = NodePath::new("render");
    let a = render.attach_new_node_named("a").unwrap();
    let b = a.attach_new_node_named("b").unwrap();
    let deep = render
        .attach_new_node_named("x")
        .unwrap()
        .attach_new_node_named("y")
        .unwrap();
    assert_eq!(b.get_num_nodes(), 3);
    let key = a.get_key();

    a.reparent_to(&deep, 0).unwrap();
    assert_eq!(b.to_string(), "render/x/y/a/b");
    assert_eq!(b.get_num_nodes(), 5);
    assert_eq!(a.get_key(), key);
    assert!(render.is_ancestor_of(&b));
    assert!(deep.is_ancestor_of(&a));
    assert!(!a.is_ancestor_of(&deep));
}

#[test]
fn keys_are_unique_per_instance() {
    let render = NodePath::new("render");
    let paths: Vec<NodePath> = (0..16)
        .map(|i| render.attach_new_node_named(format!("n{i}")).unwrap())
        .collect();
    let keys: HashSet<u64> = paths.iter().map(NodePath::get_key).collect();

    assert_eq!(keys.len(), 16);
    assert!(!keys.contains(&0));
    assert_eq!(NodePath::not_found().get_key(), 0);
}

#[test]
fn detach_node_makes_new_root() {
    let render = NodePath::new("render");
    let a = render.attach_new_node_named("a").unwrap();
    let b = a.attach_new_node_named("b").unwrap();

    a.detach_node().unwrap();
    assert!(!a.is_empty());
    assert!(!a.has_parent());
    assert_eq!(a.to_string(), "a");
    assert_eq!(b.to_string(), "a/b");
    assert_eq!(b.get_top(), a);
    assert!(!b.is_same_graph(&render));
    assert_eq!(render.get_num_children(), 0);

    // 已经是根时什么也不做
    a.detach_node().unwrap();
    assert!(!a.has_parent());
}

/// 直接在 PandaNode 上断开边，已有句柄随之变成顶层。
#[test]
fn node_level_removal_updates_handles() {
    let render = NodePath::new("render");
    let a = render.attach_new_node_named("a").unwrap();
    let root_node = render.node().unwrap();

    assert!(root_node.remove_child(&a.node().unwrap()));
    assert!(!a.has_parent());
    assert_eq!(a.get_num_nodes(), 1);

    root_node.add_child(&a.node().unwrap(), 0).unwrap();
    assert_eq!(a.to_string(), "render/a");
    assert_eq!(NodePath::from_parent(&render, &a.node().unwrap()).unwrap(), a);
}

#[test]
fn stash_hides_from_children() {
    let render = NodePath::new("render");
    let a = render.attach_new_node_named("a").unwrap();
    render.attach_new_node_named("b").unwrap();

    a.stash().unwrap();
    assert!(a.is_stashed());
    assert_eq!(render.get_num_children(), 1);
    assert_eq!(render.get_stashed_children(), vec![a.clone()]);
    assert!(render.find_path_to(&a.node().unwrap()).is_none());

    a.unstash().unwrap();
    assert!(!a.is_stashed());
    assert_eq!(render.get_children().len(), 2);
    assert_eq!(render.get_child(0), Some(a.clone()));
}

#[test]
fn common_ancestor_and_search() {
    let render = NodePath::new("render");
    let a = render.attach_new_node_named("a").unwrap();
    let b = a.attach_new_node_named("b").unwrap();
    let c = a.attach_new_node_named("c").unwrap();
    let d = c.attach_new_node_named("d").unwrap();

    assert_eq!(b.get_common_ancestor(&d), a);
    assert_eq!(d.get_ancestor(2), a);
    assert_eq!(d.get_ancestor(9).get_error_type(), ErrorType::NotFound);
    assert_eq!(render.find_path_to(&d.node().unwrap()), Some(d.clone()));
    assert_eq!(d.get_top_node().unwrap().get_name(), "render");
    assert!(Arc::ptr_eq(&d.get_node(1).unwrap(), &c.node().unwrap()));
}

#[test]
fn net_transform_composes_down_the_path() {
    let render = NodePath::new("render");
    let a = render.attach_new_node_named("a").unwrap();
    let b = a.attach_new_node_named("b").unwrap();
    a.set_pos(Vec3::new(1.0, 0.0, 0.0)).unwrap();
    b.set_pos(Vec3::new(0.0, 2.0, 0.0)).unwrap();

    assert_eq!(b.get_pos().unwrap(), Vec3::new(0.0, 2.0, 0.0));
    assert_eq!(
        b.get_net_transform().unwrap().get_pos(),
        Vec3::new(1.0, 2.0, 0.0)
    );
}

#[test]
fn hide_and_show_follow_path() {
    let render = NodePath::new("render");
    let a = render.attach_new_node_named("a").unwrap();
    let b = a.attach_new_node_named("b").unwrap();

    a.hide().unwrap();
    assert!(a.is_hidden());
    assert!(b.is_hidden());
    assert!(!render.is_hidden());

    a.show().unwrap();
    assert!(!b.is_hidden());
}

#[test]
fn copy_to_makes_independent_subtree() {
    let render = NodePath::new("render");
    let src = render.attach_new_node_named("src").unwrap();
    src.attach_new_node_named("leaf").unwrap();
    src.set_tag("kind", "prop").unwrap();
    let dest = render.attach_new_node_named("dest").unwrap();

    let copy = src.copy_to(&dest, 0).unwrap();
    assert_eq!(copy.to_string(), "render/dest/src");
    assert_eq!(copy.get_tag("kind").as_deref(), Some("prop"));
    assert_eq!(copy.count_num_descendants(), 1);
    assert!(!Arc::ptr_eq(&copy.node().unwrap(), &src.node().unwrap()));
}

#[test]
fn remove_node_invalidates_handle() {
    let render = NodePath::new("render");
    let mut a = render.attach_new_node_named("a").unwrap();
    let node: Arc<PandaNode> = a.node().unwrap();

    a.remove_node().unwrap();
    assert_eq!(a.get_error_type(), ErrorType::Removed);
    assert_eq!(node.get_num_parents(), 0);
    assert_eq!(render.get_num_children(), 0);
}
