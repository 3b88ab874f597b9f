//! 父子连接列表。
//!
//! - down / stashed：按 (sort, 连接序号) 排序的子节点列表，持有子节点的强引用；
//! - up：按父节点地址排序、去重的父节点集合，只持有弱引用，父节点不会被子节点拉住。
//!
//! 两种列表都放在 [`CopyOnWrite`] 里，同一节点的多个 stage 页面共享同一份列表直到被修改。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use super::PandaNode;
use crate::pipeline::CopyOnWrite;

static NEXT_CONNECTION_SEQ: AtomicU64 = AtomicU64::new(1);

/// 新连接的序号。同 sort 的子节点按它排序，stash / unstash / replace 保留原序号。
pub(crate) fn next_connection_seq() -> u64 {
    NEXT_CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Debug)]
pub struct DownConnection {
    child: Arc<PandaNode>,
    sort: i32,
    seq: u64,
}

impl DownConnection {
    pub(crate) fn with_seq(child: Arc<PandaNode>, sort: i32, seq: u64) -> Self {
        DownConnection { child, sort, seq }
    }

    pub fn child(&self) -> &Arc<PandaNode> {
        &self.child
    }

    pub fn sort(&self) -> i32 {
        self.sort
    }

    /// 换掉子节点，保留 sort 与序号；返回原来的子节点。
    pub(crate) fn set_child(&mut self, child: Arc<PandaNode>) -> Arc<PandaNode> {
        std::mem::replace(&mut self.child, child)
    }

    fn key(&self) -> (i32, u64) {
        (self.sort, self.seq)
    }
}

/// 有序的子节点列表。同一个子节点在一个列表里最多出现一次（由 PandaNode 保证）。
#[derive(Clone, Debug, Default)]
pub struct DownList(Vec<DownConnection>);

impl DownList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DownConnection> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DownConnection> {
        self.0.iter()
    }

    /// 按 (sort, seq) 插入，返回插入位置。
    pub(crate) fn insert(&mut self, conn: DownConnection) -> usize {
        let key = conn.key();
        let at = self.0.partition_point(|c| c.key() <= key);
        self.0.insert(at, conn);
        at
    }

    pub(crate) fn remove(&mut self, index: usize) -> DownConnection {
        self.0.remove(index)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut DownConnection> {
        self.0.get_mut(index)
    }

    pub fn find(&self, node: &PandaNode) -> Option<usize> {
        self.0
            .iter()
            .position(|c| std::ptr::eq(Arc::as_ptr(&c.child), node))
    }
}

impl<'a> IntoIterator for &'a DownList {
    type Item = &'a DownConnection;
    type IntoIter = std::slice::Iter<'a, DownConnection>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct UpConnection {
    parent: Weak<PandaNode>,
}

impl UpConnection {
    pub(crate) fn new(parent: Weak<PandaNode>) -> Self {
        UpConnection { parent }
    }

    pub fn parent(&self) -> Option<Arc<PandaNode>> {
        self.parent.upgrade()
    }

    fn addr(&self) -> usize {
        Weak::as_ptr(&self.parent) as *const () as usize
    }
}

fn node_addr(node: &PandaNode) -> usize {
    node as *const PandaNode as *const () as usize
}

/// 父节点集合，按地址排序且不重复。大多数节点只有一个父节点。
#[derive(Clone, Debug, Default)]
pub struct UpList(SmallVec<[UpConnection; 2]>);

impl UpList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&UpConnection> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UpConnection> {
        self.0.iter()
    }

    /// 已存在时不插入，返回 false。
    pub(crate) fn insert(&mut self, conn: UpConnection) -> bool {
        let addr = conn.addr();
        match self.0.binary_search_by_key(&addr, UpConnection::addr) {
            Ok(_) => false,
            Err(at) => {
                self.0.insert(at, conn);
                true
            }
        }
    }

    pub(crate) fn remove(&mut self, parent: &PandaNode) -> bool {
        match self.find(parent) {
            Some(at) => {
                self.0.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn find(&self, parent: &PandaNode) -> Option<usize> {
        self.0
            .binary_search_by_key(&node_addr(parent), UpConnection::addr)
            .ok()
    }
}

pub type Down = CopyOnWrite<DownList>;
pub type Up = CopyOnWrite<UpList>;

// ─────────────────────────────────────────────────────────────────────────────

/// 某一时刻子节点列表的快照。之后图再怎么改，快照都不变。
#[derive(Clone, Debug)]
pub struct Children {
    down: Arc<DownList>,
}

impl Children {
    pub(crate) fn new(down: Arc<DownList>) -> Self {
        Children { down }
    }

    pub fn len(&self) -> usize {
        self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.down.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<PandaNode>> {
        self.down.get(index).map(DownConnection::child)
    }

    pub fn get_sort(&self, index: usize) -> Option<i32> {
        self.down.get(index).map(DownConnection::sort)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PandaNode>> + '_ {
        self.down.iter().map(DownConnection::child)
    }

    pub fn connections(&self) -> &DownList {
        &self.down
    }
}

/// 某一时刻父节点集合的快照。已经释放的父节点会被跳过。
#[derive(Clone, Debug)]
pub struct Parents {
    up: Arc<UpList>,
}

impl Parents {
    pub(crate) fn new(up: Arc<UpList>) -> Self {
        Parents { up }
    }

    pub fn len(&self) -> usize {
        self.up.len()
    }

    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Arc<PandaNode>> {
        self.up.get(index).and_then(UpConnection::parent)
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<PandaNode>> + '_ {
        self.up.iter().filter_map(UpConnection::parent)
    }
}
