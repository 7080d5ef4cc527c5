//! 引擎门面
//!
//! 把编译器、注册表与执行器组合成对外的初始化、清理与评估接口。
//! 进程级实例见 crate 根部的自由函数；需要多个相互独立的引擎时
//! 直接构造 [`Waf`]。

use crate::compiler::RuleCompiler;
use crate::diagnostics::Diagnostics;
use crate::error::{EvalError, Result};
use crate::executor::{Clock, MonotonicClock, RuleExecutor};
use crate::models::Verdict;
use crate::store::RuleRegistry;
use crate::value::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use waf_shared::config::EngineConfig;

/// 规则引擎
pub struct Waf {
    config: EngineConfig,
    compiler: RuleCompiler,
    registry: RuleRegistry,
    clock: Arc<dyn Clock>,
}

impl Waf {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    /// 使用指定时钟创建引擎
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            compiler: RuleCompiler::new(config.clone()),
            config,
            registry: RuleRegistry::new(),
            clock,
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// 编译并发布规则集，返回是否成功
    pub fn initialize(&self, name: &str, definition: &str) -> bool {
        self.initialize_with_diag(name, definition).is_ok()
    }

    /// 编译并发布规则集，同时返回诊断报告
    ///
    /// 成功时 `Ok` 中只可能含提示性诊断；失败时 `Err` 携带全部诊断，
    /// 该名称下原有的规则集保持不变（除非开启了 `publish_invalid`）。
    #[instrument(skip(self, definition), fields(rule_name = %name))]
    pub fn initialize_with_diag(
        &self,
        name: &str,
        definition: &str,
    ) -> std::result::Result<Diagnostics, Diagnostics> {
        let outcome = self.compiler.compile(name, definition);
        let success = outcome.is_success();

        if let Some(rule_set) = outcome.rule_set {
            if !success {
                warn!("规则集带有致命诊断，按配置仍然发布: {}", name);
            }
            self.registry.publish(rule_set);

            let stats = self.registry.stats();
            debug!(
                rule_sets = stats.rule_sets,
                rules = stats.rules,
                flows = stats.flows,
                "注册表已更新"
            );
        }

        if success {
            Ok(outcome.diagnostics)
        } else {
            Err(outcome.diagnostics)
        }
    }

    /// 删除规则集
    pub fn clear_rule(&self, name: &str) -> bool {
        self.registry.remove(name)
    }

    /// 删除全部规则集
    pub fn clear_all(&self) {
        self.registry.clear();
    }

    /// 评估参数树
    ///
    /// 规则集快照在整个评估期间被持有，返回时释放。
    pub fn run(&self, name: &str, parameters: &Value, time_left_us: u64) -> Result<Verdict> {
        let Some(rule_set) = self.registry.acquire(name) else {
            debug!(rule_name = %name, "规则集未找到");
            return Err(EvalError::NoRule);
        };

        let result = RuleExecutor::new(&self.config, self.clock.as_ref()).execute(
            &rule_set,
            parameters,
            time_left_us,
        );

        if let Err(e) = &result {
            debug!(rule_name = %name, code = e.code(), "评估失败: {}", e.name());
        }
        result
    }
}

impl Default for Waf {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagCode;
    use crate::operators::Action;

    const DEFINITION: &str = r#"{
        "rules": [
            {"rule_id": "1", "filters": [{"operator": "@eq", "targets": ["param"], "value": "attack"}]}
        ],
        "flows": [
            {"name": "flow", "steps": [{"id": "start", "rule_ids": ["1"], "on_match": "exit_block"}]}
        ]
    }"#;

    fn request(value: &str) -> Value {
        let mut map = Value::map();
        map.add_to_map(b"param", 5, Value::from(value)).unwrap();
        map
    }

    #[test]
    fn test_initialize_and_run() {
        let waf = Waf::default();
        assert!(waf.initialize("r1", DEFINITION));

        let verdict = waf.run("r1", &request("attack"), 1_000_000).unwrap();
        assert_eq!(verdict.action, Action::Block);
        assert_eq!(verdict.code(), 2);

        let verdict = waf.run("r1", &request("benign"), 1_000_000).unwrap();
        assert_eq!(verdict.action, Action::Good);
    }

    #[test]
    fn test_unknown_rule() {
        let waf = Waf::default();
        assert_eq!(waf.run("missing", &Value::map(), 1000), Err(EvalError::NoRule));
    }

    #[test]
    fn test_failed_initialize_keeps_previous_set() {
        let waf = Waf::default();
        assert!(waf.initialize("r1", DEFINITION));

        let diagnostics = waf.initialize_with_diag("r1", "not json").unwrap_err();
        assert_eq!(diagnostics.count(DiagCode::ParsingJson), 1);

        let verdict = waf.run("r1", &request("attack"), 1_000_000).unwrap();
        assert_eq!(verdict.action, Action::Block);
    }

    #[test]
    fn test_publish_invalid_reports_error_code() {
        let config = EngineConfig {
            publish_invalid: true,
            ..Default::default()
        };
        let waf = Waf::new(config);
        let definition = r#"{"rules": [{"rule_id": "1", "filters": [{"operator": "@rx", "targets": ["a"], "value": "("}]}]}"#;

        assert!(!waf.initialize("bad", definition));
        assert!(waf.registry().contains("bad"));
        assert_eq!(waf.run("bad", &Value::map(), 1000), Err(EvalError::InvalidRule));
    }

    #[test]
    fn test_registry_stats_follow_publish() {
        let waf = Waf::default();
        waf.initialize("a", DEFINITION);
        waf.initialize("b", DEFINITION);
        assert!(!waf.initialize("c", "not json"));

        let stats = waf.registry().stats();
        assert_eq!(stats.rule_sets, 2);
        assert_eq!(stats.rules, 2);
        assert_eq!(stats.flows, 2);

        waf.clear_rule("a");
        assert_eq!(waf.registry().stats().rule_sets, 1);
    }

    #[test]
    fn test_clear() {
        let waf = Waf::default();
        waf.initialize("a", DEFINITION);
        waf.initialize("b", DEFINITION);

        assert!(waf.clear_rule("a"));
        assert!(!waf.clear_rule("a"));
        assert_eq!(waf.run("a", &request("attack"), 1000), Err(EvalError::NoRule));

        waf.clear_all();
        assert!(waf.registry().is_empty());
        assert_eq!(waf.run("b", &request("attack"), 1000), Err(EvalError::NoRule));
    }
}
