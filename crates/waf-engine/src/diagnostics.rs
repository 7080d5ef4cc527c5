//! 编译诊断报告
//!
//! 编译规则定义时遇到的每个问题都记录为一条诊断。除
//! [`DiagCode::MeaninglessStep`] 外，所有诊断都是致命的：出现任何一条，
//! 规则集就不会被视为可用。

use serde::{Serialize, Serializer};
use std::fmt;

/// 诊断码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagCode {
    ParsingJson,
    ParsingRule,
    ParsingRuleFilter,
    OperatorValue,
    DuplicateRule,
    ParsingFlow,
    ParsingFlowStep,
    MeaninglessStep,
    DuplicateFlow,
    DuplicateFlowStep,
}

impl DiagCode {
    /// 是否阻止规则集发布
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MeaninglessStep)
    }

    /// 是否属于规则（含过滤器、操作符）类问题；其余为流程类
    pub fn is_rule_related(&self) -> bool {
        matches!(
            self,
            Self::ParsingRule | Self::ParsingRuleFilter | Self::OperatorValue | Self::DuplicateRule
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParsingJson => "PWD_PARSING_JSON",
            Self::ParsingRule => "PWD_PARSING_RULE",
            Self::ParsingRuleFilter => "PWD_PARSING_RULE_FILTER",
            Self::OperatorValue => "PWD_OPERATOR_VALUE",
            Self::DuplicateRule => "PWD_DUPLICATE_RULE",
            Self::ParsingFlow => "PWD_PARSING_FLOW",
            Self::ParsingFlowStep => "PWD_PARSING_FLOW_STEP",
            Self::MeaninglessStep => "PWD_MEANINGLESS_STEP",
            Self::DuplicateFlow => "PWD_DUPLICATE_FLOW",
            Self::DuplicateFlowStep => "PWD_DUPLICATE_FLOW_STEP",
        }
    }
}

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// 报告与日志使用同一种拼写
impl Serialize for DiagCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 单条诊断
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: DiagCode,
    /// 问题在定义文档中的位置，如 `rules[0].filters[1]`
    pub location: String,
    pub message: String,
}

/// 诊断报告
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, code: DiagCode, location: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            code,
            location: location.into(),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// 某个诊断码出现的次数
    pub fn count(&self, code: DiagCode) -> usize {
        self.diagnostics.iter().filter(|d| d.code == code).count()
    }

    pub fn has_fatal(&self) -> bool {
        self.diagnostics.iter().any(|d| d.code.is_fatal())
    }

    /// 序列化为 JSON 报告
    pub fn to_json(&self) -> String {
        // 只含字符串与枚举字段，序列化不会失败
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.iter()
    }
}
