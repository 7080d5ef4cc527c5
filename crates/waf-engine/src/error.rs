//! 规则引擎错误类型

use thiserror::Error;

/// 评估期错误
///
/// 每次评估要么返回一个动作，要么返回恰好一个错误码，不存在部分成功。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum EvalError {
    #[error("规则集未找到")]
    NoRule,

    #[error("规则集中的流程不可用")]
    InvalidFlow,

    #[error("规则集中的规则不可用")]
    InvalidRule,

    #[error("无效的调用参数")]
    InvalidCall,

    #[error("评估超时")]
    Timeout,

    #[error("内部错误")]
    Internal,
}

impl EvalError {
    /// 对外暴露的负数错误码
    pub fn code(&self) -> i32 {
        match self {
            Self::NoRule => -1,
            Self::InvalidFlow => -2,
            Self::InvalidRule => -3,
            Self::InvalidCall => -4,
            Self::Timeout => -5,
            Self::Internal => -6,
        }
    }

    /// 错误码名称，用于日志
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoRule => "PW_ERR_NORULE",
            Self::InvalidFlow => "PW_ERR_INVALID_FLOW",
            Self::InvalidRule => "PW_ERR_INVALID_RULE",
            Self::InvalidCall => "PW_ERR_INVALID_CALL",
            Self::Timeout => "PW_ERR_TIMEOUT",
            Self::Internal => "PW_ERR_INTERNAL",
        }
    }
}

/// 值树操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("目标不是容器类型: {0}")]
    NotAContainer(&'static str),

    #[error("数组元素不能带名称")]
    NamedArrayEntry,

    #[error("映射元素必须带名称")]
    UnnamedMapEntry,
}

pub type Result<T> = std::result::Result<T, EvalError>;
