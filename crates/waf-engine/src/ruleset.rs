//! 编译后的规则集
//!
//! 规则集一经发布便不可变。替换规则集总是创建新对象，
//! 评估线程通过 `Arc` 共享同一份快照。

use crate::matcher::Matcher;
use crate::operators::{Action, Operator, Transformation};

/// 编译后的目标
#[derive(Debug, Clone)]
pub struct Target {
    pub address: String,
    pub key_path: Vec<String>,
}

/// 编译后的过滤器
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub operator: Operator,
    /// 操作符配置值的文本形式，用于匹配证据
    pub operator_value: String,
    pub matcher: Matcher,
    pub targets: Vec<Target>,
    pub transformations: Vec<Transformation>,
    pub min_length: usize,
}

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub name: Option<String>,
    pub filters: Vec<CompiledFilter>,
}

/// 步骤跳转
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 继续下一个步骤
    Next,
    /// 以给定动作结束当前流程
    Exit(Action),
    /// 跳转到同一流程中靠后的步骤
    Goto(usize),
}

/// 编译后的流程步骤
#[derive(Debug, Clone)]
pub struct Step {
    pub id: String,
    /// 规则在 [`RuleSet::rules`] 中的下标，按声明顺序
    pub rules: Vec<usize>,
    pub on_match: Transition,
    pub on_no_match: Transition,
}

/// 编译后的流程
#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub steps: Vec<Step>,
}

/// 规则集可用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSetStatus {
    Ready,
    InvalidRules,
    InvalidFlows,
}

/// 编译后的规则集
#[derive(Debug)]
pub struct RuleSet {
    name: String,
    rules: Vec<CompiledRule>,
    flows: Vec<Flow>,
    status: RuleSetStatus,
}

impl RuleSet {
    pub fn new(
        name: impl Into<String>,
        rules: Vec<CompiledRule>,
        flows: Vec<Flow>,
        status: RuleSetStatus,
    ) -> Self {
        Self {
            name: name.into(),
            rules,
            flows,
            status,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn status(&self) -> RuleSetStatus {
        self.status
    }

    pub fn rule(&self, index: usize) -> Option<&CompiledRule> {
        self.rules.get(index)
    }

    pub fn find_rule(&self, id: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.id == id)
    }
}
