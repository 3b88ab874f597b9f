mod graph;

use pgraph::{GraphError, PandaNode};

use graph::_helpers::{child_names, init_tracing, reporting, stashed_names};

/// root -> A, root -> B, A -> A1：按插入顺序查找，计数正确。
#[test]
fn build_and_find_children() {
    init_tracing();
    let root = PandaNode::new("root");
    let a = PandaNode::new("A");
    let b = PandaNode::new("B");
    let a1 = PandaNode::new("A1");

    root.add_child(&a, 0).unwrap();
    root.add_child(&b, 0).unwrap();
    a.add_child(&a1, 0).unwrap();

    assert_eq!(root.find_child(&a), Some(0));
    assert_eq!(root.find_child(&b), Some(1));
    assert_eq!(root.find_child(&a1), None);
    assert_eq!(root.get_num_children(), 2);
    assert_eq!(a1.get_num_parents(), 1);
    assert!(std::sync::Arc::ptr_eq(&a1.get_parent(0).unwrap(), &a));
    assert_eq!(root.count_num_descendants(), 4);
}

/// 后加入但 sort 更小的子节点排在前面。
#[test]
fn children_follow_sort_order() {
    let root = PandaNode::new("root");
    root.add_child(&PandaNode::new("X"), 10).unwrap();
    root.add_child(&PandaNode::new("Y"), 5).unwrap();

    assert_eq!(child_names(&root), ["Y", "X"]);
    assert_eq!(root.get_child_sort(0), Some(5));
    assert_eq!(root.get_child_sort(1), Some(10));
}

/// stash 使子节点从 down list 移到 stashed list，unstash 恢复原来的位置和 sort。
#[test]
fn stash_and_unstash_restore_order() {
    let root = PandaNode::new("root");
    let x = PandaNode::new("X");
    root.add_child(&PandaNode::new("first"), 0).unwrap();
    root.add_child(&x, 3).unwrap();
    root.add_child(&PandaNode::new("last"), 3).unwrap();
    let before: Vec<_> = (0..root.get_num_children())
        .map(|i| (root.get_child(i).unwrap().get_name(), root.get_child_sort(i)))
        .collect();

    assert!(root.stash_child(&x));
    assert_eq!(root.get_num_children(), 2);
    assert_eq!(root.get_num_stashed(), 1);
    assert_eq!(stashed_names(&root), ["X"]);
    assert_eq!(root.get_stashed_sort(0), Some(3));
    // stash 的子节点仍然记着父节点
    assert_eq!(x.get_num_parents(), 1);

    assert!(root.unstash_child(&x));
    let after: Vec<_> = (0..root.get_num_children())
        .map(|i| (root.get_child(i).unwrap().get_name(), root.get_child_sort(i)))
        .collect();
    assert_eq!(before, after);
    assert_eq!(root.get_num_stashed(), 0);

    // 不是子节点时什么也不做
    assert!(!root.unstash_child(&x));
    assert!(!root.stash_child(&PandaNode::new("stranger")));
}

#[test]
fn remove_child_updates_both_sides() {
    let root = PandaNode::new("root");
    let a = PandaNode::new("A");
    root.add_child(&a, 0).unwrap();

    assert!(root.remove_child(&a));
    assert_eq!(root.get_num_children(), 0);
    assert_eq!(a.get_num_parents(), 0);
    assert!(!root.remove_child(&a));
}

/// 同一节点挂在两个父节点下：删掉一条边不影响另一条。
#[test]
fn instanced_child_keeps_other_parent() {
    let left = PandaNode::new("left");
    let right = PandaNode::new("right");
    let shared = PandaNode::new("shared");
    left.add_child(&shared, 0).unwrap();
    right.add_child(&shared, 0).unwrap();
    assert_eq!(shared.get_num_parents(), 2);
    assert!(shared.find_parent(&right).is_some());

    assert!(left.remove_child(&shared));
    assert_eq!(shared.get_num_parents(), 1);
    assert_eq!(shared.find_parent(&right), Some(0));
    assert_eq!(child_names(&right), ["shared"]);
}

#[test]
fn replace_child_keeps_slot_and_sort() {
    let root = PandaNode::new("root");
    let a = PandaNode::new("A");
    let b = PandaNode::new("B");
    let c = PandaNode::new("C");
    root.add_child(&a, 1).unwrap();
    root.add_child(&b, 2).unwrap();

    assert_eq!(root.replace_child(&a, &c), Ok(true));
    assert_eq!(child_names(&root), ["C", "B"]);
    assert_eq!(root.get_child_sort(0), Some(1));
    assert_eq!(a.get_num_parents(), 0);
    assert_eq!(c.get_num_parents(), 1);

    // 原节点不是子节点时返回 false，图不变
    assert_eq!(root.replace_child(&a, &PandaNode::new("D")), Ok(false));
    assert_eq!(child_names(&root), ["C", "B"]);
}

#[test]
fn out_of_range_indices_are_reported() {
    let root = PandaNode::new("root");
    root.add_child(&PandaNode::new("only"), 0).unwrap();

    let err = reporting(|| root.remove_child_at(3)).unwrap_err();
    assert_eq!(
        err,
        GraphError::IndexOutOfRange {
            what: "child",
            index: 3,
            len: 1
        }
    );
    assert!(reporting(|| root.unstash_child_at(0)).is_err());
    assert_eq!(root.get_num_children(), 1);
    assert!(root.get_child(1).is_none());
}

#[test]
fn remove_all_children_releases_everything() {
    let root = PandaNode::new("root");
    let kids: Vec<_> = (0..4).map(|i| PandaNode::new(format!("k{i}"))).collect();
    for (i, kid) in kids.iter().enumerate() {
        if i % 2 == 0 {
            root.add_child(kid, 0).unwrap();
        } else {
            root.add_stashed(kid, 0).unwrap();
        }
    }
    assert_eq!(root.get_num_children(), 2);
    assert_eq!(root.get_num_stashed(), 2);

    root.remove_all_children();
    assert_eq!(root.get_num_children(), 0);
    assert_eq!(root.get_num_stashed(), 0);
    assert!(kids.iter().all(|k| k.get_num_parents() == 0));
}

/// unexpected-change 标志命中时拒绝修改。
#[test]
fn unexpected_change_flag_blocks_mutation() {
    use pgraph::pgraph::unexpected_change;

    let root = PandaNode::new("root");
    let a = PandaNode::new("A");
    root.set_unexpected_change(unexpected_change::CHILDREN);

    let err = reporting(|| root.add_child(&a, 0)).unwrap_err();
    assert!(matches!(err, GraphError::UnexpectedChange { .. }));
    assert_eq!(root.get_num_children(), 0);

    root.clear_unexpected_change(unexpected_change::CHILDREN);
    root.add_child(&a, 0).unwrap();
    assert_eq!(root.get_num_children(), 1);
}

#[test]
fn ls_lists_subtree() {
    let root = PandaNode::new("root");
    let a = PandaNode::new("A");
    root.add_child(&a, 0).unwrap();
    a.add_child(&PandaNode::new("A1"), 0).unwrap();
    root.add_stashed(&PandaNode::new("hidden"), 0).unwrap();

    let listing = root.ls();
    assert!(listing.contains("root"));
    assert!(listing.contains("A1"));
    assert!(listing.contains("(1 stashed)"));
    assert!(!listing.contains("hidden"));
}
