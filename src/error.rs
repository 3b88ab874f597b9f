use thiserror::Error;

/// 图操作的错误类型。
///
/// 这里只收录"前置条件被违反"这一类错误；普通的"没找到"用 `Option` 表达。
/// 错误在返回之前都会先经过 [`crate::contract`] 的策略（记录日志或 panic）。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("adding {child} under {parent} would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: String, child: String },

    #[error("component for {node} is a top node and has no next component")]
    TopNode { node: String },

    #[error("component for {child} claims parent {parent} but the edge does not exist")]
    DetachedComponent { parent: String, child: String },

    #[error("expected node of type {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("operation on an empty NodePath")]
    EmptyPath,

    #[error("{node} has {num_parents} parents; path to root is ambiguous")]
    AmbiguousPath { node: String, num_parents: usize },

    #[error("structural NodePath edits must run on pipeline stage 0, not stage {stage}")]
    NotAppStage { stage: usize },

    #[error("{child} and {parent} belong to different pipelines")]
    PipelineMismatch { parent: String, child: String },

    #[error("unexpected {what} change on {node}")]
    UnexpectedChange { node: String, what: &'static str },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type GraphResult<T> = Result<T, GraphError>;
