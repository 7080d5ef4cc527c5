//! 匹配操作符、值变换与动作定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 过滤器操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// 正则表达式
    #[serde(rename = "@rx")]
    Regex,
    /// 短语列表匹配
    #[serde(rename = "@pm")]
    PhraseMatch,
    #[serde(rename = "@eq")]
    Eq,
    #[serde(rename = "@contains")]
    Contains,
    #[serde(rename = "@beginsWith")]
    BeginsWith,
    #[serde(rename = "@endsWith")]
    EndsWith,
    #[serde(rename = "@lt")]
    Lt,
    #[serde(rename = "@gt")]
    Gt,
    /// 目标存在即匹配
    #[serde(rename = "@exist")]
    Exist,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "@rx",
            Self::PhraseMatch => "@pm",
            Self::Eq => "@eq",
            Self::Contains => "@contains",
            Self::BeginsWith => "@beginsWith",
            Self::EndsWith => "@endsWith",
            Self::Lt => "@lt",
            Self::Gt => "@gt",
            Self::Exist => "@exist",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 匹配前作用在字符串上的变换
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transformation {
    Lowercase,
    RemoveNulls,
    CompressWhiteSpace,
    UrlDecode,
    Trim,
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lowercase => "lowercase",
            Self::RemoveNulls => "removeNulls",
            Self::CompressWhiteSpace => "compressWhiteSpace",
            Self::UrlDecode => "urlDecode",
            Self::Trim => "trim",
        };
        write!(f, "{}", s)
    }
}

/// 评估动作，按严重程度排序：GOOD < MONITOR < BLOCK
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    #[default]
    Good,
    Monitor,
    Block,
}

impl Action {
    /// 对外暴露的动作码
    pub fn code(&self) -> i32 {
        match self {
            Self::Good => 0,
            Self::Monitor => 1,
            Self::Block => 2,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => write!(f, "GOOD"),
            Self::Monitor => write!(f, "MONITOR"),
            Self::Block => write!(f, "BLOCK"),
        }
    }
}
