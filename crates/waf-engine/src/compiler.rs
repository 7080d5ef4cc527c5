//! 规则编译器
//!
//! 将 JSON 规则定义解析并编译成不可变的 [`RuleSet`]，同时为遇到的每个
//! 问题生成一条诊断。只要出现致命诊断，编译即视为失败。
//!
//! 规则与流程严格按文档中的声明顺序编译，同一份定义多次编译得到的
//! 规则集行为完全一致。

use crate::diagnostics::{DiagCode, Diagnostics};
use crate::matcher::Matcher;
use crate::models::{FilterDef, FlowDef, RuleDef, StepDef};
use crate::operators::Action;
use crate::ruleset::{
    CompiledFilter, CompiledRule, Flow, RuleSet, RuleSetStatus, Step, Target, Transition,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument, warn};
use waf_shared::config::EngineConfig;

/// 编译结果
#[derive(Debug)]
pub struct CompileOutcome {
    /// 可发布的规则集；致命诊断存在且未开启 `publish_invalid` 时为空
    pub rule_set: Option<RuleSet>,
    pub diagnostics: Diagnostics,
}

impl CompileOutcome {
    /// 编译是否成功（没有致命诊断）
    pub fn is_success(&self) -> bool {
        !self.diagnostics.has_fatal()
    }
}

/// 规则编译器
#[derive(Debug, Clone, Default)]
pub struct RuleCompiler {
    config: EngineConfig,
}

/// 规则编译阶段的产物，供流程编译查询
struct RuleIndex {
    rules: Vec<CompiledRule>,
    /// 编译成功的规则 ID -> 下标
    by_id: HashMap<String, usize>,
}

impl RuleCompiler {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// 编译规则定义
    #[instrument(skip(self, definition), fields(rule_name = %name))]
    pub fn compile(&self, name: &str, definition: &str) -> CompileOutcome {
        let mut diagnostics = Diagnostics::new();

        let document: JsonValue = match serde_json::from_str(definition) {
            Ok(document) => document,
            Err(e) => {
                diagnostics.push(DiagCode::ParsingJson, "$", format!("JSON 解析失败: {}", e));
                return self.fail(name, diagnostics);
            }
        };

        let Some(root) = document.as_object() else {
            diagnostics.push(DiagCode::ParsingJson, "$", "规则定义顶层必须是对象");
            return self.fail(name, diagnostics);
        };

        let (rules_json, flows_json) = match (
            Self::section(root.get("rules")),
            Self::section(root.get("flows")),
        ) {
            (Some(rules), Some(flows)) => (rules, flows),
            (rules, _) => {
                let field = if rules.is_none() { "rules" } else { "flows" };
                diagnostics.push(
                    DiagCode::ParsingJson,
                    format!("$.{}", field),
                    format!("'{}' 必须是数组", field),
                );
                return self.fail(name, diagnostics);
            }
        };

        let index = self.compile_rules(rules_json, &mut diagnostics);
        let flows = self.compile_flows(flows_json, &index, &mut diagnostics);

        let status = if !diagnostics.has_fatal() {
            RuleSetStatus::Ready
        } else if diagnostics
            .iter()
            .any(|d| d.code.is_fatal() && d.code.is_rule_related())
        {
            RuleSetStatus::InvalidRules
        } else {
            RuleSetStatus::InvalidFlows
        };

        if status != RuleSetStatus::Ready && !self.config.publish_invalid {
            return self.fail(name, diagnostics);
        }

        for diagnostic in &diagnostics {
            warn!(
                code = %diagnostic.code,
                location = %diagnostic.location,
                "{}",
                diagnostic.message
            );
        }

        debug!(
            rules = index.rules.len(),
            flows = flows.len(),
            status = ?status,
            "规则集编译完成"
        );

        CompileOutcome {
            rule_set: Some(RuleSet::new(name, index.rules, flows, status)),
            diagnostics,
        }
    }

    fn fail(&self, name: &str, diagnostics: Diagnostics) -> CompileOutcome {
        for diagnostic in &diagnostics {
            warn!(
                code = %diagnostic.code,
                location = %diagnostic.location,
                "{}",
                diagnostic.message
            );
        }
        warn!(rule_name = %name, errors = diagnostics.len(), "规则集编译失败");

        CompileOutcome {
            rule_set: None,
            diagnostics,
        }
    }

    /// 缺省视为空数组，类型错误返回 None
    fn section(value: Option<&JsonValue>) -> Option<&[JsonValue]> {
        match value {
            None | Some(JsonValue::Null) => Some(&[] as &[JsonValue]),
            Some(JsonValue::Array(items)) => Some(items.as_slice()),
            Some(_) => None,
        }
    }

    /// 编译全部规则
    fn compile_rules(&self, entries: &[JsonValue], diagnostics: &mut Diagnostics) -> RuleIndex {
        let mut index = RuleIndex {
            rules: Vec::with_capacity(entries.len()),
            by_id: HashMap::new(),
        };
        let mut declared = HashSet::new();

        for (i, entry) in entries.iter().enumerate() {
            let path = format!("rules[{}]", i);

            let def = match RuleDef::deserialize(entry) {
                Ok(def) => def,
                Err(e) => {
                    diagnostics.push(DiagCode::ParsingRule, path, format!("规则格式错误: {}", e));
                    continue;
                }
            };

            if def.rule_id.is_empty() {
                diagnostics.push(DiagCode::ParsingRule, path, "规则 ID 不能为空");
                continue;
            }

            if !declared.insert(def.rule_id.clone()) {
                diagnostics.push(
                    DiagCode::DuplicateRule,
                    path,
                    format!("规则 ID '{}' 重复", def.rule_id),
                );
                continue;
            }

            if def.filters.is_empty() {
                diagnostics.push(
                    DiagCode::ParsingRule,
                    path,
                    format!("规则 '{}' 至少需要一个过滤器", def.rule_id),
                );
                continue;
            }

            let mut filters = Vec::with_capacity(def.filters.len());
            let mut valid = true;
            for (j, filter) in def.filters.iter().enumerate() {
                let filter_path = format!("{}.filters[{}]", path, j);
                match self.compile_filter(filter, &filter_path, diagnostics) {
                    Some(compiled) => filters.push(compiled),
                    None => valid = false,
                }
            }

            if valid {
                index.by_id.insert(def.rule_id.clone(), index.rules.len());
                index.rules.push(CompiledRule {
                    id: def.rule_id,
                    name: def.name,
                    filters,
                });
            }
        }

        index
    }

    /// 编译单个过滤器
    fn compile_filter(
        &self,
        entry: &JsonValue,
        path: &str,
        diagnostics: &mut Diagnostics,
    ) -> Option<CompiledFilter> {
        let def = match FilterDef::deserialize(entry) {
            Ok(def) => def,
            Err(e) => {
                diagnostics.push(
                    DiagCode::ParsingRuleFilter,
                    path,
                    format!("过滤器格式错误: {}", e),
                );
                return None;
            }
        };

        if def.targets.is_empty() {
            diagnostics.push(DiagCode::ParsingRuleFilter, path, "过滤器至少需要一个目标");
            return None;
        }

        if let Some(i) = def.targets.iter().position(|t| t.address().is_empty()) {
            diagnostics.push(
                DiagCode::ParsingRuleFilter,
                format!("{}.targets[{}]", path, i),
                "目标地址不能为空",
            );
            return None;
        }

        let matcher = match Matcher::compile(
            def.operator,
            &def.value,
            &def.options,
            self.config.max_regex_length,
        ) {
            Ok(matcher) => matcher,
            Err(reason) => {
                diagnostics.push(DiagCode::OperatorValue, format!("{}.value", path), reason);
                return None;
            }
        };

        let operator_value = match &def.value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Null => String::new(),
            other => other.to_string(),
        };

        Some(CompiledFilter {
            operator: def.operator,
            operator_value,
            matcher,
            targets: def
                .targets
                .iter()
                .map(|t| Target {
                    address: t.address().to_string(),
                    key_path: t.key_path().to_vec(),
                })
                .collect(),
            transformations: def.transformations,
            min_length: def.options.min_length,
        })
    }

    /// 编译全部流程
    fn compile_flows(
        &self,
        entries: &[JsonValue],
        index: &RuleIndex,
        diagnostics: &mut Diagnostics,
    ) -> Vec<Flow> {
        let mut flows = Vec::with_capacity(entries.len());
        let mut names = HashSet::new();

        for (i, entry) in entries.iter().enumerate() {
            let path = format!("flows[{}]", i);

            let def = match FlowDef::deserialize(entry) {
                Ok(def) => def,
                Err(e) => {
                    diagnostics.push(DiagCode::ParsingFlow, path, format!("流程格式错误: {}", e));
                    continue;
                }
            };

            if def.name.is_empty() {
                diagnostics.push(DiagCode::ParsingFlow, path, "流程名称不能为空");
                continue;
            }

            if !names.insert(def.name.clone()) {
                diagnostics.push(
                    DiagCode::DuplicateFlow,
                    path,
                    format!("流程名称 '{}' 重复", def.name),
                );
                continue;
            }

            if def.steps.is_empty() {
                diagnostics.push(
                    DiagCode::ParsingFlow,
                    path,
                    format!("流程 '{}' 至少需要一个步骤", def.name),
                );
                continue;
            }

            if let Some(steps) = self.compile_steps(&def, &path, index, diagnostics) {
                flows.push(Flow {
                    name: def.name,
                    steps,
                });
            }
        }

        flows
    }

    /// 编译流程中的步骤，任一步骤有致命问题时返回 None
    fn compile_steps(
        &self,
        flow: &FlowDef,
        flow_path: &str,
        index: &RuleIndex,
        diagnostics: &mut Diagnostics,
    ) -> Option<Vec<Step>> {
        // 第一遍：解析步骤并收集步骤 ID，供跳转解析
        let mut parsed: Vec<(String, StepDef)> = Vec::with_capacity(flow.steps.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut valid = true;

        for (j, entry) in flow.steps.iter().enumerate() {
            let path = format!("{}.steps[{}]", flow_path, j);

            let def = match StepDef::deserialize(entry) {
                Ok(def) => def,
                Err(e) => {
                    diagnostics.push(
                        DiagCode::ParsingFlowStep,
                        path,
                        format!("步骤格式错误: {}", e),
                    );
                    valid = false;
                    continue;
                }
            };

            if def.id.is_empty() {
                diagnostics.push(DiagCode::ParsingFlowStep, path, "步骤 ID 不能为空");
                valid = false;
                continue;
            }

            if def.rule_ids.is_empty() {
                diagnostics.push(
                    DiagCode::ParsingFlowStep,
                    path,
                    format!("步骤 '{}' 至少需要引用一条规则", def.id),
                );
                valid = false;
                continue;
            }

            if positions.contains_key(&def.id) {
                diagnostics.push(
                    DiagCode::DuplicateFlowStep,
                    path,
                    format!("步骤 ID '{}' 在流程 '{}' 中重复", def.id, flow.name),
                );
                valid = false;
                continue;
            }

            positions.insert(def.id.clone(), parsed.len());
            parsed.push((path, def));
        }

        // 第二遍：解析跳转与规则引用
        let mut steps = Vec::with_capacity(parsed.len());
        for (position, (path, def)) in parsed.iter().enumerate() {
            let on_match = match def.on_match.as_str() {
                "exit_block" => Some(Transition::Exit(Action::Block)),
                "exit_monitor" => Some(Transition::Exit(Action::Monitor)),
                target => Self::resolve_jump(target, position, &positions),
            };

            let on_no_match = match def.on_no_match.as_deref() {
                None | Some("next") => Some(Transition::Next),
                Some("exit") => Some(Transition::Exit(Action::Good)),
                Some(target) => Self::resolve_jump(target, position, &positions),
            };

            let (Some(on_match), Some(on_no_match)) = (on_match, on_no_match) else {
                diagnostics.push(
                    DiagCode::ParsingFlowStep,
                    path.as_str(),
                    format!("步骤 '{}' 的跳转目标不存在或不在当前步骤之后", def.id),
                );
                valid = false;
                continue;
            };

            let mut rules = Vec::with_capacity(def.rule_ids.len());
            for rule_id in &def.rule_ids {
                match index.by_id.get(rule_id) {
                    Some(&i) => rules.push(i),
                    None => warn!(
                        flow = %flow.name,
                        step = %def.id,
                        rule_id = %rule_id,
                        "步骤引用的规则不可用"
                    ),
                }
            }

            if rules.is_empty() {
                diagnostics.push(
                    DiagCode::MeaninglessStep,
                    path.as_str(),
                    format!("步骤 '{}' 引用的规则均不可用，永远不会命中", def.id),
                );
            }

            steps.push(Step {
                id: def.id.clone(),
                rules,
                on_match,
                on_no_match,
            });
        }

        if !valid {
            return None;
        }

        // 跳转只能向后，一次正向扫描即可求出可达步骤
        let mut reachable = vec![false; steps.len()];
        reachable[0] = true;
        for k in 0..steps.len() {
            if !reachable[k] {
                continue;
            }
            for transition in [steps[k].on_match, steps[k].on_no_match] {
                match transition {
                    Transition::Next if k + 1 < steps.len() => reachable[k + 1] = true,
                    Transition::Goto(target) => reachable[target] = true,
                    _ => {}
                }
            }
        }

        for (k, step) in steps.iter().enumerate() {
            if !reachable[k] {
                diagnostics.push(
                    DiagCode::MeaninglessStep,
                    parsed[k].0.as_str(),
                    format!("步骤 '{}' 无法从流程起点到达", step.id),
                );
            }
        }

        Some(steps)
    }

    /// 跳转目标必须是同一流程中靠后的步骤
    fn resolve_jump(
        target: &str,
        position: usize,
        positions: &HashMap<String, usize>,
    ) -> Option<Transition> {
        match positions.get(target) {
            Some(&t) if t > position => Some(Transition::Goto(t)),
            _ => None,
        }
    }
}
