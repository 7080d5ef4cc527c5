//! 规则执行器
//!
//! 在给定时间预算内对参数树执行规则集中的全部流程，返回判定与匹配证据。
//! 评估期间只读访问规则集，多个线程可以同时评估同一个快照。

use crate::error::{EvalError, Result};
use crate::matcher::{Subject, transform};
use crate::models::{FilterMatch, RuleMatch, Verdict};
use crate::operators::{Action, Operator};
use crate::ruleset::{CompiledFilter, CompiledRule, Flow, RuleSet, RuleSetStatus, Step, Target, Transition};
use crate::value::Value;
use std::borrow::Cow;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, trace};
use waf_shared::config::EngineConfig;

/// 单调时钟
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// 自某个固定起点以来的纳秒数，单调不减
    fn now_nanos(&self) -> i64;
}

static PROCESS_START: LazyLock<Instant> = LazyLock::new(Instant::now);

/// 基于 [`Instant`] 的单调时钟，起点为首次使用时刻
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> i64 {
        i64::try_from(PROCESS_START.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

/// 评估截止时间
struct Deadline<'c> {
    clock: &'c dyn Clock,
    at: i64,
}

impl<'c> Deadline<'c> {
    fn new(clock: &'c dyn Clock, budget_us: u64) -> Result<Self> {
        let budget_ns = i64::try_from(budget_us)
            .ok()
            .and_then(|us| us.checked_mul(1000))
            .ok_or(EvalError::InvalidCall)?;
        let at = clock
            .now_nanos()
            .checked_add(budget_ns)
            .ok_or(EvalError::Internal)?;
        Ok(Self { clock, at })
    }

    fn check(&self) -> Result<()> {
        if self.clock.now_nanos() >= self.at {
            Err(EvalError::Timeout)
        } else {
            Ok(())
        }
    }
}

/// 规则执行器
pub struct RuleExecutor<'a> {
    config: &'a EngineConfig,
    clock: &'a dyn Clock,
}

impl<'a> RuleExecutor<'a> {
    pub fn new(config: &'a EngineConfig, clock: &'a dyn Clock) -> Self {
        Self { config, clock }
    }

    /// 执行规则集
    ///
    /// 参数树顶层必须是映射。`budget_us` 为本次评估的时间预算（微秒），
    /// 超时后丢弃已收集的证据并返回 [`EvalError::Timeout`]。
    pub fn execute(&self, rule_set: &RuleSet, parameters: &Value, budget_us: u64) -> Result<Verdict> {
        if !matches!(parameters, Value::Map(_)) {
            debug!(value_type = %parameters.value_type(), "参数树顶层不是映射");
            return Err(EvalError::InvalidCall);
        }

        match rule_set.status() {
            RuleSetStatus::Ready => {}
            RuleSetStatus::InvalidRules => return Err(EvalError::InvalidRule),
            RuleSetStatus::InvalidFlows => return Err(EvalError::InvalidFlow),
        }

        let deadline = Deadline::new(self.clock, budget_us)?;

        let mut action = Action::Good;
        let mut evidence = Vec::new();

        for flow in rule_set.flows() {
            deadline.check()?;

            if let Some((flow_action, matches)) = self.run_flow(rule_set, flow, parameters, &deadline)? {
                trace!(flow = %flow.name, action = %flow_action, "流程结束");
                action = action.max(flow_action);
                evidence.extend(matches);

                if action == Action::Block {
                    break;
                }
            }
        }

        // 最后一个流程的工作同样计入预算
        deadline.check()?;

        debug!(rule_name = %rule_set.name(), action = %action, matches = evidence.len(), "评估完成");

        if action == Action::Good {
            return Ok(Verdict::good());
        }

        let data = serde_json::to_string(&evidence).map_err(|_| EvalError::Internal)?;
        Ok(Verdict {
            action,
            data: Some(data),
        })
    }

    /// 执行单个流程，以非 GOOD 动作退出时返回动作与证据
    fn run_flow(
        &self,
        rule_set: &RuleSet,
        flow: &Flow,
        parameters: &Value,
        deadline: &Deadline<'_>,
    ) -> Result<Option<(Action, Vec<RuleMatch>)>> {
        let mut pending = Vec::new();
        let mut position = 0;

        while let Some(step) = flow.steps.get(position) {
            deadline.check()?;

            let transition = match self.run_step(rule_set, flow, step, parameters, deadline)? {
                Some(fired) => {
                    pending.push(fired);
                    step.on_match
                }
                None => step.on_no_match,
            };

            match transition {
                Transition::Next => position += 1,
                Transition::Goto(target) => position = target,
                Transition::Exit(Action::Good) => return Ok(None),
                Transition::Exit(action) => return Ok(Some((action, pending))),
            }
        }

        Ok(None)
    }

    /// 按声明顺序执行步骤中的规则，第一条命中的规则决定结果
    fn run_step(
        &self,
        rule_set: &RuleSet,
        flow: &Flow,
        step: &Step,
        parameters: &Value,
        deadline: &Deadline<'_>,
    ) -> Result<Option<RuleMatch>> {
        for &index in &step.rules {
            deadline.check()?;

            let rule = rule_set.rule(index).ok_or(EvalError::Internal)?;
            if let Some(filters) = self.run_rule(rule, parameters, deadline)? {
                trace!(flow = %flow.name, step = %step.id, rule = %rule.id, "规则命中");
                return Ok(Some(RuleMatch {
                    flow: flow.name.clone(),
                    step: step.id.clone(),
                    rule: rule.id.clone(),
                    filters,
                }));
            }
        }

        Ok(None)
    }

    /// 所有过滤器都命中时规则才命中
    fn run_rule(
        &self,
        rule: &CompiledRule,
        parameters: &Value,
        deadline: &Deadline<'_>,
    ) -> Result<Option<Vec<FilterMatch>>> {
        let mut matches = Vec::with_capacity(rule.filters.len());

        for filter in &rule.filters {
            deadline.check()?;

            match self.run_filter(filter, parameters, deadline)? {
                Some(found) => matches.push(found),
                None => return Ok(None),
            }
        }

        Ok(Some(matches))
    }

    /// 任一目标下任一叶子值满足操作符即命中
    fn run_filter(
        &self,
        filter: &CompiledFilter,
        parameters: &Value,
        deadline: &Deadline<'_>,
    ) -> Result<Option<FilterMatch>> {
        let mut walker = LeafWalker {
            filter,
            config: self.config,
            deadline,
            inspected: 0,
            path: Vec::new(),
        };

        for target in &filter.targets {
            let Some(node) = resolve(parameters, target) else {
                continue;
            };

            if filter.operator == Operator::Exist {
                return Ok(Some(walker.evidence(target, String::new(), String::new())));
            }

            walker.path.clear();
            walker.path.extend(target.key_path.iter().cloned());
            if let Some(found) = walker.visit(target, node, 0)? {
                return Ok(Some(found));
            }
        }

        Ok(None)
    }
}

/// 沿地址与键路径定位目标节点
fn resolve<'v>(parameters: &'v Value, target: &Target) -> Option<&'v Value> {
    let mut node = parameters.get(target.address.as_bytes())?;
    for key in &target.key_path {
        node = node.get(key.as_bytes())?;
    }
    Some(node)
}

/// 深度优先遍历目标下的叶子值
struct LeafWalker<'a, 'd> {
    filter: &'a CompiledFilter,
    config: &'a EngineConfig,
    deadline: &'a Deadline<'d>,
    inspected: u32,
    /// 当前叶子相对参数顶层的键路径
    path: Vec<String>,
}

impl LeafWalker<'_, '_> {
    fn visit(&mut self, target: &Target, node: &Value, depth: usize) -> Result<Option<FilterMatch>> {
        self.tick()?;

        match node {
            Value::Invalid => Ok(None),
            Value::Signed(n) => self.inspect_number(target, i128::from(*n)),
            Value::Unsigned(n) => self.inspect_number(target, i128::from(*n)),
            Value::String(bytes) => self.inspect_text(target, bytes),
            Value::Array(items) => {
                if depth >= self.config.max_depth {
                    return Ok(None);
                }
                for (i, item) in items.iter().take(self.config.max_container_size).enumerate() {
                    self.path.push(i.to_string());
                    let found = self.visit(target, item, depth + 1)?;
                    self.path.pop();
                    if found.is_some() {
                        return Ok(found);
                    }
                }
                Ok(None)
            }
            Value::Map(entries) => {
                if depth >= self.config.max_depth {
                    return Ok(None);
                }
                for entry in entries.iter().take(self.config.max_container_size) {
                    self.path.push(String::from_utf8_lossy(&entry.name).into_owned());
                    let found = self.visit(target, &entry.value, depth + 1)?;
                    self.path.pop();
                    if found.is_some() {
                        return Ok(found);
                    }
                }
                Ok(None)
            }
        }
    }

    /// 每访问若干个节点（容器与叶子）采样一次时钟
    fn tick(&mut self) -> Result<()> {
        self.inspected = self.inspected.wrapping_add(1);
        if self.inspected % self.config.timeout_check_interval.max(1) == 0 {
            self.deadline.check()?;
        }
        Ok(())
    }

    fn inspect_number(&mut self, target: &Target, number: i128) -> Result<Option<FilterMatch>> {
        if self.filter.matcher.is_numeric() {
            return Ok(self
                .filter
                .matcher
                .matches(Subject::Number(number))
                .map(|fragment| self.evidence(target, number.to_string(), fragment)));
        }
        self.inspect_text(target, number.to_string().as_bytes())
    }

    fn inspect_text(&mut self, target: &Target, bytes: &[u8]) -> Result<Option<FilterMatch>> {
        let bytes = &bytes[..bytes.len().min(self.config.max_string_length)];
        let transformed: Cow<'_, [u8]> = transform(bytes, &self.filter.transformations);
        if transformed.len() < self.filter.min_length {
            return Ok(None);
        }

        Ok(self
            .filter
            .matcher
            .matches(Subject::Text(&transformed))
            .map(|fragment| {
                let resolved = String::from_utf8_lossy(&transformed).into_owned();
                self.evidence(target, resolved, fragment)
            }))
    }

    fn evidence(&self, target: &Target, resolved_value: String, match_status: String) -> FilterMatch {
        let key_path = if self.path.is_empty() {
            target.key_path.clone()
        } else {
            self.path.clone()
        };
        FilterMatch {
            operator: self.filter.operator,
            operator_value: self.filter.operator_value.clone(),
            address: target.address.clone(),
            key_path,
            resolved_value,
            match_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use serde_json::json;

    fn compile(definition: serde_json::Value) -> RuleSet {
        RuleCompiler::new(EngineConfig::default())
            .compile("test", &definition.to_string())
            .rule_set
            .unwrap()
    }

    fn single_rule(filter: serde_json::Value, on_match: &str) -> RuleSet {
        compile(json!({
            "rules": [{"rule_id": "1", "filters": [filter]}],
            "flows": [{"name": "flow", "steps": [{"id": "start", "rule_ids": ["1"], "on_match": on_match}]}]
        }))
    }

    fn params(entries: Vec<(&str, Value)>) -> Value {
        let mut map = Value::map();
        for (name, value) in entries {
            map.add_to_map(name.as_bytes(), name.len(), value).unwrap();
        }
        map
    }

    fn run(set: &RuleSet, parameters: &Value) -> Result<Verdict> {
        let config = EngineConfig::default();
        RuleExecutor::new(&config, &MonotonicClock).execute(set, parameters, 1_000_000)
    }

    fn frozen_clock() -> MockClock {
        let mut clock = MockClock::new();
        clock.expect_now_nanos().returning(|| 0);
        clock
    }

    #[test]
    fn test_block_with_evidence() {
        let set = single_rule(
            json!({"operator": "@eq", "targets": ["param"], "value": "attack"}),
            "exit_block",
        );

        let verdict = run(&set, &params(vec![("param", Value::from("attack"))])).unwrap();
        assert_eq!(verdict.action, Action::Block);

        let data: serde_json::Value = serde_json::from_str(verdict.data.as_deref().unwrap()).unwrap();
        assert_eq!(data[0]["rule"], "1");
        assert_eq!(data[0]["flow"], "flow");
        assert_eq!(data[0]["filters"][0]["address"], "param");
        assert_eq!(data[0]["filters"][0]["resolved_value"], "attack");
    }

    #[test]
    fn test_no_match_is_good() {
        let set = single_rule(
            json!({"operator": "@eq", "targets": ["param"], "value": "attack"}),
            "exit_block",
        );

        let verdict = run(&set, &params(vec![("param", Value::from("hello"))])).unwrap();
        assert_eq!(verdict, Verdict::good());
    }

    #[test]
    fn test_top_level_must_be_map() {
        let set = single_rule(json!({"operator": "@exist", "targets": ["param"]}), "exit_block");
        assert_eq!(run(&set, &Value::array()), Err(EvalError::InvalidCall));
        assert_eq!(run(&set, &Value::from("x")), Err(EvalError::InvalidCall));
    }

    #[test]
    fn test_nested_leaves_and_key_path() {
        let set = single_rule(
            json!({
                "operator": "@contains",
                "targets": [{"address": "headers", "key_path": ["user-agent"]}],
                "value": "sqlmap",
                "transformations": ["lowercase"]
            }),
            "exit_monitor",
        );

        let mut agents = Value::array();
        agents.add_to_array(Value::from("Mozilla")).unwrap();
        agents.add_to_array(Value::from("SQLMap/1.0")).unwrap();
        let headers = params(vec![("user-agent", agents)]);

        let verdict = run(&set, &params(vec![("headers", headers)])).unwrap();
        assert_eq!(verdict.action, Action::Monitor);

        let data: serde_json::Value = serde_json::from_str(verdict.data.as_deref().unwrap()).unwrap();
        assert_eq!(data[0]["filters"][0]["key_path"], json!(["user-agent", "1"]));
        assert_eq!(data[0]["filters"][0]["match_status"], "sqlmap");
    }

    #[test]
    fn test_numeric_leaves() {
        let set = single_rule(json!({"operator": "@gt", "targets": ["size"], "value": 100}), "exit_block");

        assert_eq!(run(&set, &params(vec![("size", Value::uint(101))])).unwrap().action, Action::Block);
        assert_eq!(run(&set, &params(vec![("size", Value::int(-5))])).unwrap().action, Action::Good);
        assert_eq!(run(&set, &params(vec![("size", Value::from("512"))])).unwrap().action, Action::Block);

        // 文本操作符把数值格式化为十进制文本
        let set = single_rule(json!({"operator": "@beginsWith", "targets": ["id"], "value": "42"}), "exit_block");
        assert_eq!(run(&set, &params(vec![("id", Value::int(4200))])).unwrap().action, Action::Block);
    }

    #[test]
    fn test_exist() {
        let set = single_rule(json!({"operator": "@exist", "targets": ["cookie"]}), "exit_monitor");

        assert_eq!(run(&set, &params(vec![("cookie", Value::map())])).unwrap().action, Action::Monitor);
        assert_eq!(run(&set, &params(vec![("other", Value::map())])).unwrap().action, Action::Good);
    }

    #[test]
    fn test_all_filters_must_match() {
        let set = compile(json!({
            "rules": [{"rule_id": "1", "filters": [
                {"operator": "@eq", "targets": ["a"], "value": "x"},
                {"operator": "@eq", "targets": ["b"], "value": "y"}
            ]}],
            "flows": [{"name": "f", "steps": [{"id": "s", "rule_ids": ["1"], "on_match": "exit_block"}]}]
        }));

        let both = params(vec![("a", Value::from("x")), ("b", Value::from("y"))]);
        let one = params(vec![("a", Value::from("x")), ("b", Value::from("n"))]);
        assert_eq!(run(&set, &both).unwrap().action, Action::Block);
        assert_eq!(run(&set, &one).unwrap().action, Action::Good);
    }

    #[test]
    fn test_limits_are_respected() {
        let config = EngineConfig {
            max_depth: 1,
            max_container_size: 2,
            max_string_length: 4,
            ..Default::default()
        };
        let set = single_rule(json!({"operator": "@eq", "targets": ["p"], "value": "deep"}), "exit_block");
        let executor = RuleExecutor::new(&config, &MonotonicClock);

        // 第二层容器不再展开
        let mut inner = Value::array();
        inner.add_to_array(Value::from("deep")).unwrap();
        let mut outer = Value::array();
        outer.add_to_array(inner).unwrap();
        let verdict = executor.execute(&set, &params(vec![("p", outer)]), 1_000_000).unwrap();
        assert_eq!(verdict.action, Action::Good);

        // 超出容器大小的元素被忽略
        let mut list = Value::array();
        for item in ["a", "b", "deep"] {
            list.add_to_array(Value::from(item)).unwrap();
        }
        let verdict = executor.execute(&set, &params(vec![("p", list)]), 1_000_000).unwrap();
        assert_eq!(verdict.action, Action::Good);

        // 超长字符串截断后参与匹配
        let verdict = executor
            .execute(&set, &params(vec![("p", Value::from("deeper"))]), 1_000_000)
            .unwrap();
        assert_eq!(verdict.action, Action::Block);
    }

    #[test]
    fn test_jump_keeps_pending_evidence() {
        let set = compile(json!({
            "rules": [
                {"rule_id": "1", "filters": [{"operator": "@eq", "targets": ["a"], "value": "x"}]},
                {"rule_id": "2", "filters": [{"operator": "@eq", "targets": ["b"], "value": "y"}]},
                {"rule_id": "3", "filters": [{"operator": "@eq", "targets": ["c"], "value": "z"}]}
            ],
            "flows": [{"name": "f", "steps": [
                {"id": "first", "rule_ids": ["1"], "on_match": "third", "on_no_match": "exit"},
                {"id": "second", "rule_ids": ["2"], "on_match": "exit_block"},
                {"id": "third", "rule_ids": ["3"], "on_match": "exit_monitor"}
            ]}]
        }));

        let hit = params(vec![("a", Value::from("x")), ("c", Value::from("z"))]);
        let verdict = run(&set, &hit).unwrap();
        assert_eq!(verdict.action, Action::Monitor);
        let data: serde_json::Value = serde_json::from_str(verdict.data.as_deref().unwrap()).unwrap();
        assert_eq!(data.as_array().unwrap().len(), 2);
        assert_eq!(data[0]["rule"], "1");
        assert_eq!(data[1]["step"], "third");

        // 跳转后流程无动作结束，证据被丢弃
        let miss = params(vec![("a", Value::from("x"))]);
        assert_eq!(run(&set, &miss).unwrap(), Verdict::good());
    }

    #[test]
    fn test_max_action_over_flows() {
        let set = compile(json!({
            "rules": [
                {"rule_id": "1", "filters": [{"operator": "@exist", "targets": ["a"]}]},
                {"rule_id": "2", "filters": [{"operator": "@exist", "targets": ["b"]}]}
            ],
            "flows": [
                {"name": "monitor", "steps": [{"id": "s", "rule_ids": ["1"], "on_match": "exit_monitor"}]},
                {"name": "block", "steps": [{"id": "s", "rule_ids": ["2"], "on_match": "exit_block"}]}
            ]
        }));

        let verdict = run(&set, &params(vec![("a", Value::int(1)), ("b", Value::int(1))])).unwrap();
        assert_eq!(verdict.action, Action::Block);
        let data: serde_json::Value = serde_json::from_str(verdict.data.as_deref().unwrap()).unwrap();
        assert_eq!(data.as_array().unwrap().len(), 2);

        let verdict = run(&set, &params(vec![("a", Value::int(1))])).unwrap();
        assert_eq!(verdict.action, Action::Monitor);
    }

    #[test]
    fn test_invalid_status() {
        let set = RuleSet::new("bad", vec![], vec![], RuleSetStatus::InvalidRules);
        assert_eq!(run(&set, &Value::map()), Err(EvalError::InvalidRule));

        let set = RuleSet::new("bad", vec![], vec![], RuleSetStatus::InvalidFlows);
        assert_eq!(run(&set, &Value::map()), Err(EvalError::InvalidFlow));
    }

    #[test]
    fn test_zero_budget_times_out() {
        let set = single_rule(json!({"operator": "@exist", "targets": ["a"]}), "exit_block");
        let config = EngineConfig::default();
        let clock = frozen_clock();

        let result = RuleExecutor::new(&config, &clock).execute(&set, &params(vec![]), 0);
        assert_eq!(result, Err(EvalError::Timeout));
    }

    #[test]
    fn test_frozen_clock_never_times_out() {
        let set = single_rule(json!({"operator": "@exist", "targets": ["a"]}), "exit_block");
        let config = EngineConfig::default();
        let clock = frozen_clock();

        let verdict = RuleExecutor::new(&config, &clock)
            .execute(&set, &params(vec![("a", Value::int(1))]), 1)
            .unwrap();
        assert_eq!(verdict.action, Action::Block);
    }

    #[test]
    fn test_timeout_while_walking_leaves() {
        let set = single_rule(json!({"operator": "@eq", "targets": ["list"], "value": "never"}), "exit_block");
        let config = EngineConfig {
            timeout_check_interval: 4,
            ..Default::default()
        };

        // 每次采样前进 100ns，读数到达 1000ns 时预算耗尽
        let mut clock = MockClock::new();
        let mut now = 0;
        clock.expect_now_nanos().returning(move || {
            let current = now;
            now += 100;
            current
        });

        let mut list = Value::array();
        for i in 0..200 {
            list.add_to_array(Value::from(format!("item-{}", i).as_str())).unwrap();
        }

        let result = RuleExecutor::new(&config, &clock).execute(&set, &params(vec![("list", list)]), 1);
        assert_eq!(result, Err(EvalError::Timeout));
    }

    #[test]
    fn test_timeout_while_walking_empty_containers() {
        let set = single_rule(json!({"operator": "@eq", "targets": ["p"], "value": "never"}), "exit_block");
        let config = EngineConfig {
            timeout_check_interval: 4,
            ..Default::default()
        };

        let mut clock = MockClock::new();
        let mut now = 0;
        clock.expect_now_nanos().returning(move || {
            let current = now;
            now += 100;
            current
        });

        // 只有容器、没有任何叶子值
        let mut nested = Value::array();
        for _ in 0..64 {
            let mut inner = Value::array();
            inner.add_to_array(Value::map()).unwrap();
            nested.add_to_array(inner).unwrap();
        }

        let result = RuleExecutor::new(&config, &clock).execute(&set, &params(vec![("p", nested)]), 1);
        assert_eq!(result, Err(EvalError::Timeout));
    }

    #[test]
    fn test_deadline_checked_after_last_flow() {
        let set = single_rule(json!({"operator": "@eq", "targets": ["a"], "value": "x"}), "exit_block");
        let config = EngineConfig::default();

        // 前 5 次采样（起点、流程、步骤、规则、过滤器）都在预算内，之后超时
        let mut clock = MockClock::new();
        let mut calls = 0;
        clock.expect_now_nanos().returning(move || {
            calls += 1;
            if calls <= 5 { 0 } else { 10_000 }
        });

        let result = RuleExecutor::new(&config, &clock).execute(&set, &params(vec![]), 1);
        assert_eq!(result, Err(EvalError::Timeout));
    }

    #[test]
    fn test_budget_overflow() {
        let set = single_rule(json!({"operator": "@exist", "targets": ["a"]}), "exit_block");
        let config = EngineConfig::default();

        let clock = frozen_clock();
        let result = RuleExecutor::new(&config, &clock).execute(&set, &params(vec![]), u64::MAX);
        assert_eq!(result, Err(EvalError::InvalidCall));

        let mut clock = MockClock::new();
        clock.expect_now_nanos().returning(|| i64::MAX - 10);
        let result = RuleExecutor::new(&config, &clock).execute(&set, &params(vec![]), 1);
        assert_eq!(result, Err(EvalError::Internal));
    }
}
