//! 前置条件检查策略。
//!
//! 所有前置条件在 debug / release 下都会检查；违反时的行为由 [`ContractPolicy`] 决定：
//! - `Report`（默认）：error 级日志 + 返回 `Err`，本次变更被拒绝，图保持不变；
//! - `Panic`：直接 panic，相当于 debug assert。
//!
//! 进程级策略来自 [`GraphConfig`](crate::config::GraphConfig)，也可以用
//! [`set_policy`] 改写；[`with_policy`] 提供线程级覆盖，主要给测试用。

use std::cell::Cell;
use std::panic::Location;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::config::GraphConfig;
use crate::error::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContractPolicy {
    #[default]
    Report,
    Panic,
}

impl ContractPolicy {
    fn to_raw(self) -> u8 {
        match self {
            ContractPolicy::Report => 1,
            ContractPolicy::Panic => 2,
        }
    }

    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(ContractPolicy::Report),
            2 => Some(ContractPolicy::Panic),
            _ => None,
        }
    }
}

// 0 = 尚未初始化，首次读取时从 GraphConfig 取
static POLICY: AtomicU8 = AtomicU8::new(0);

thread_local! {
    static OVERRIDE: Cell<Option<ContractPolicy>> = const { Cell::new(None) };
}

/// 当前线程生效的策略。
pub fn policy() -> ContractPolicy {
    if let Some(p) = OVERRIDE.with(Cell::get) {
        return p;
    }
    match ContractPolicy::from_raw(POLICY.load(Ordering::Acquire)) {
        Some(p) => p,
        None => {
            let p = GraphConfig::global().contract_policy;
            // 其他线程可能已经 set_policy，这里只在仍未初始化时写入
            let _ = POLICY.compare_exchange(0, p.to_raw(), Ordering::AcqRel, Ordering::Acquire);
            ContractPolicy::from_raw(POLICY.load(Ordering::Acquire)).unwrap_or(p)
        }
    }
}

pub fn set_policy(policy: ContractPolicy) {
    POLICY.store(policy.to_raw(), Ordering::Release);
}

/// 在 `f` 执行期间把当前线程的策略临时改为 `policy`。
pub fn with_policy<R>(policy: ContractPolicy, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<ContractPolicy>);
    impl Drop for Restore {
        fn drop(&mut self) {
            OVERRIDE.with(|c| c.set(self.0));
        }
    }

    let _restore = Restore(OVERRIDE.with(|c| c.replace(Some(policy))));
    f()
}

/// 处理一次前置条件违反，返回错误本身以便 `return Err(..)`。
#[track_caller]
pub fn violated(err: GraphError) -> GraphError {
    let location = Location::caller();
    match policy() {
        ContractPolicy::Panic => panic!("contract violation at {location}: {err}"),
        ContractPolicy::Report => {
            tracing::error!(target: "pgraph", %location, "contract violation: {err}");
            err
        }
    }
}

/// `ensure_contract!(cond, err)`：条件不成立时按策略处理并 `return Err(err)`。
#[macro_export]
macro_rules! ensure_contract {
    ($cond:expr, $err:expr $(,)?) => {
        if !($cond) {
            return Err($crate::contract::violated($err));
        }
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn report_returns_error() {
        let err = with_policy(ContractPolicy::Report, || violated(GraphError::EmptyPath));
        assert_eq!(err, GraphError::EmptyPath);
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn panic_policy_panics() {
        with_policy(ContractPolicy::Panic, || violated(GraphError::EmptyPath));
    }

    #[test]
    fn override_is_restored() {
        with_policy(ContractPolicy::Panic, || {
            assert_eq!(policy(), ContractPolicy::Panic);
            with_policy(ContractPolicy::Report, || {
                assert_eq!(policy(), ContractPolicy::Report);
            });
            assert_eq!(policy(), ContractPolicy::Panic);
        });
    }

    #[test]
    fn ensure_macro_short_circuits() {
        fn checked(v: usize) -> Result<usize, GraphError> {
            ensure_contract!(
                v < 3,
                GraphError::IndexOutOfRange {
                    what: "child",
                    index: v,
                    len: 3
                }
            );
            Ok(v)
        }
        with_policy(ContractPolicy::Report, || {
            assert_eq!(checked(1), Ok(1));
            assert!(matches!(
                checked(5),
                Err(GraphError::IndexOutOfRange { index: 5, .. })
            ));
        });
    }
}
