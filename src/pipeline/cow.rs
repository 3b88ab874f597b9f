use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// 共享的不可变数据，写入前若仍被别人持有则先复制一份。
///
/// cycler 的各个 stage 页面之间、以及页面内部的子节点列表 / 父节点列表 / tag 表都用它共享；
/// 只有真正修改的那一方才付出复制的代价。
pub struct CopyOnWrite<T>(Arc<T>);

impl<T> CopyOnWrite<T> {
    pub fn new(value: T) -> Self {
        CopyOnWrite(Arc::new(value))
    }

    /// 共享一份只读快照，之后对 `self` 的修改不会影响它。
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.0)
    }

    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: Clone> CopyOnWrite<T> {
    /// 取得独占的可写引用，必要时复制。
    pub fn modify(&mut self) -> &mut T {
        Arc::make_mut(&mut self.0)
    }
}

impl<T> Clone for CopyOnWrite<T> {
    fn clone(&self) -> Self {
        CopyOnWrite(Arc::clone(&self.0))
    }
}

impl<T> Deref for CopyOnWrite<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Default> Default for CopyOnWrite<T> {
    fn default() -> Self {
        CopyOnWrite::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for CopyOnWrite<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn modify_copies_only_when_shared() {
        let mut a = CopyOnWrite::new(vec![1, 2]);
        let before = a.snapshot();
        assert!(a.is_shared());
        a.modify().push(3);
        assert_eq!(*before, vec![1, 2]);
        assert_eq!(*a, vec![1, 2, 3]);

        drop(before);
        assert!(!a.is_shared());
        let addr = &*a as *const Vec<i32>;
        a.modify().push(4);
        assert_eq!(addr, &*a as *const Vec<i32>);
    }

    #[test]
    fn clones_alias_until_written() {
        let a = CopyOnWrite::new(String::from("x"));
        let mut b = a.clone();
        assert!(CopyOnWrite::ptr_eq(&a, &b));
        b.modify().push('y');
        assert!(!CopyOnWrite::ptr_eq(&a, &b));
        assert_eq!(a.as_str(), "x");
    }
}
