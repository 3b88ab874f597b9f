//! 进程级配置。
//!
//! 所有开关只在第一次使用时读取 env 并缓存到 `OnceLock`，热路径上不再做字符串查找。
//! 宿主程序也可以在首次使用前用 [`GraphConfig::install`] 直接指定。
//!
//! | env                          | 含义                                   | 默认     |
//! |------------------------------|----------------------------------------|----------|
//! | `PGRAPH_PIPELINE_STAGES`     | render pipeline 的 stage 数            | 1        |
//! | `PGRAPH_CONTRACT_PANIC`      | 前置条件违反时 panic 而不是报告        | false    |
//! | `PGRAPH_UNAMBIGUOUS_GRAPH`   | 多父节点的歧义路径请求视为违反前置条件 | false    |
//! | `PGRAPH_BOUNDS_TYPE`         | `sphere` / `box` / `best`              | sphere   |

use std::sync::OnceLock;

use crate::contract::ContractPolicy;
use crate::error::{GraphError, GraphResult};
use crate::pgraph::BoundsType;

#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    pub num_stages: usize,
    pub contract_policy: ContractPolicy,
    pub unambiguous_graph: bool,
    /// `BoundsType::Default` 解析成的具体类型，不会是 `Default` 本身。
    pub default_bounds_type: BoundsType,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            num_stages: 1,
            contract_policy: ContractPolicy::Report,
            unambiguous_graph: false,
            default_bounds_type: BoundsType::Sphere,
        }
    }
}

static GLOBAL: OnceLock<GraphConfig> = OnceLock::new();

impl GraphConfig {
    pub fn from_env() -> Self {
        let mut cfg = GraphConfig::default();

        if let Some(stages) = env_usize("PGRAPH_PIPELINE_STAGES") {
            if stages == 0 {
                tracing::warn!(target: "pgraph", "PGRAPH_PIPELINE_STAGES=0 ignored, using 1");
            } else {
                cfg.num_stages = stages;
            }
        }
        if bool_lenient("PGRAPH_CONTRACT_PANIC") {
            cfg.contract_policy = ContractPolicy::Panic;
        }
        cfg.unambiguous_graph = bool_lenient("PGRAPH_UNAMBIGUOUS_GRAPH");

        if let Ok(raw) = std::env::var("PGRAPH_BOUNDS_TYPE") {
            match parse_bounds_type(&raw) {
                Some(bt) => cfg.default_bounds_type = bt,
                None => tracing::warn!(
                    target: "pgraph",
                    "PGRAPH_BOUNDS_TYPE={raw:?} not understood, keeping {:?}",
                    cfg.default_bounds_type
                ),
            }
        }
        cfg
    }

    /// 进程级配置；未 install 时读取 env。
    pub fn global() -> &'static GraphConfig {
        GLOBAL.get_or_init(GraphConfig::from_env)
    }

    /// 在首次使用之前指定配置。已经初始化过时返回 `Config` 错误。
    pub fn install(cfg: GraphConfig) -> GraphResult<()> {
        if cfg.num_stages == 0 {
            return Err(GraphError::Config("num_stages must be at least 1".into()));
        }
        if cfg.default_bounds_type == BoundsType::Default {
            return Err(GraphError::Config(
                "default_bounds_type must name a concrete bounds type".into(),
            ));
        }
        GLOBAL
            .set(cfg)
            .map_err(|_| GraphError::Config("GraphConfig already initialized".into()))
    }

    pub fn with_num_stages(mut self, num_stages: usize) -> Self {
        self.num_stages = num_stages;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────

/// 宽松布尔：`1/true/yes/on`（大小写不敏感）为真，其余一律为假。
fn bool_lenient(key: &str) -> bool {
    std::env::var(key).map(|v| parse_bool_lenient(&v)).unwrap_or(false)
}

fn parse_bool_lenient(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_usize(key: &str) -> Option<usize> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(err) => {
            tracing::warn!(target: "pgraph", "{key}={raw:?} ignored: {err}");
            None
        }
    }
}

fn parse_bounds_type(raw: &str) -> Option<BoundsType> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sphere" => Some(BoundsType::Sphere),
        "box" => Some(BoundsType::Box),
        "best" => Some(BoundsType::Best),
        _ => None,
    }
}
