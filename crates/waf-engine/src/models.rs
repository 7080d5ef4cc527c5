//! 规则引擎领域模型
//!
//! 包括规则定义文档的反序列化结构，以及评估结果（判定与匹配证据）。

use crate::operators::{Action, Operator, Transformation};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 规则定义
///
/// 过滤器保持为原始 JSON，由编译器逐个解析，以便单个过滤器出错时
/// 能报告独立的诊断。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDef {
    pub rule_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub filters: Vec<JsonValue>,
}

/// 过滤器定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDef {
    pub operator: Operator,
    pub targets: Vec<TargetDef>,
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default)]
    pub transformations: Vec<Transformation>,
    #[serde(default)]
    pub options: FilterOptions,
}

/// 目标：顶层参数名，可选地用键路径进一步收窄
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetDef {
    Address(String),
    Path {
        address: String,
        #[serde(default)]
        key_path: Vec<String>,
    },
}

impl TargetDef {
    pub fn address(&self) -> &str {
        match self {
            Self::Address(address) => address,
            Self::Path { address, .. } => address,
        }
    }

    pub fn key_path(&self) -> &[String] {
        match self {
            Self::Address(_) => &[],
            Self::Path { key_path, .. } => key_path,
        }
    }
}

/// 过滤器选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(default = "default_case_sensitive")]
    pub case_sensitive: bool,
    #[serde(default)]
    pub min_length: usize,
}

fn default_case_sensitive() -> bool {
    true
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            case_sensitive: default_case_sensitive(),
            min_length: 0,
        }
    }
}

/// 流程定义，步骤同样逐个解析
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDef {
    pub name: String,
    pub steps: Vec<JsonValue>,
}

/// 流程步骤定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    pub id: String,
    pub rule_ids: Vec<String>,
    pub on_match: String,
    #[serde(default)]
    pub on_no_match: Option<String>,
}

/// 单个过滤器的匹配证据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterMatch {
    pub operator: Operator,
    pub operator_value: String,
    pub address: String,
    pub key_path: Vec<String>,
    pub resolved_value: String,
    pub match_status: String,
}

/// 一条规则命中的证据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatch {
    pub flow: String,
    pub step: String,
    pub rule: String,
    pub filters: Vec<FilterMatch>,
}

/// 评估判定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub action: Action,
    /// 匹配证据（JSON 数组），仅在动作不是 GOOD 时存在
    pub data: Option<String>,
}

impl Verdict {
    pub fn good() -> Self {
        Self {
            action: Action::Good,
            data: None,
        }
    }

    /// 对外暴露的动作码
    pub fn code(&self) -> i32 {
        self.action.code()
    }
}
