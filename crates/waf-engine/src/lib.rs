//! 运行时安全过滤引擎
//!
//! 在宿主进程内按名称加载可热替换的检测规则，对任意嵌套的参数树
//! 在严格的时间预算内给出 GOOD / MONITOR / BLOCK 判定与匹配证据。
//!
//! - 参数树：[`value::Value`]
//! - 规则编译与诊断：[`compiler`]、[`diagnostics`]
//! - 规则集注册表：[`store`]
//! - 评估执行：[`executor`]
//! - 日志回调：[`logging`]
//!
//! crate 根部的自由函数操作一个进程级引擎实例，配置在首次使用时通过
//! [`WafConfig::load`] 加载。

pub mod compiler;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod executor;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod operators;
pub mod ruleset;
pub mod store;
pub mod value;

pub use diagnostics::{DiagCode, Diagnostic, Diagnostics};
pub use engine::Waf;
pub use error::{EvalError, Result, ValueError};
pub use logging::{LogCallback, LogLevel, LogRecord, SinkLayer, set_sink};
pub use models::{FilterMatch, RuleMatch, Verdict};
pub use operators::{Action, Operator, Transformation};
pub use value::{MapEntry, Value, ValueType};

use std::sync::LazyLock;
use tracing::warn;
use waf_shared::config::WafConfig;

static ENGINE: LazyLock<Waf> = LazyLock::new(|| {
    let config = WafConfig::load().unwrap_or_else(|e| {
        warn!("加载配置失败，使用默认配置: {}", e);
        WafConfig::default()
    });
    Waf::new(config.engine)
});

/// 进程级引擎实例
pub fn global() -> &'static Waf {
    &ENGINE
}

/// 语义化版本号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

/// 当前运行的引擎版本
pub fn version() -> Version {
    Version {
        major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0),
        minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0),
        patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0),
    }
}

/// 编译并发布规则集，返回是否成功
pub fn initialize(name: &str, definition: &str) -> bool {
    ENGINE.initialize(name, definition)
}

/// 编译并发布规则集，同时返回诊断报告
pub fn initialize_with_diag(
    name: &str,
    definition: &str,
) -> std::result::Result<Diagnostics, Diagnostics> {
    ENGINE.initialize_with_diag(name, definition)
}

/// 删除一个规则集
pub fn clear_rule(name: &str) -> bool {
    ENGINE.clear_rule(name)
}

/// 删除全部规则集
pub fn clear_all() {
    ENGINE.clear_all()
}

/// 评估参数树，`time_left_us` 为时间预算（微秒）
pub fn run(name: &str, parameters: &Value, time_left_us: u64) -> Result<Verdict> {
    ENGINE.run(name, parameters, time_left_us)
}
