use std::num::NonZeroU64;

/// 单调递增的代数计数器，用于判断缓存是否过期。
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct UpdateSeq(NonZeroU64);

impl UpdateSeq {
    pub fn new() -> UpdateSeq {
        UpdateSeq(NonZeroU64::MIN)
    }

    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    /// 返回递增之后的值，不改动自身。
    pub fn next(self) -> UpdateSeq {
        let mut n = self;
        n.increment();
        n
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl Default for UpdateSeq {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn increments_monotonically() {
        let mut s = UpdateSeq::new();
        let first = s;
        s.increment();
        assert!(s > first);
        assert_eq!(s.get(), 2);
        assert_eq!(first.next(), s);
    }
}
