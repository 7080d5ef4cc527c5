//! 统一日志初始化模块
//!
//! 宿主进程通过单一入口点配置 tracing 日志输出。规则引擎内部只通过
//! `tracing` 宏发出事件，由宿主决定事件的去向。

pub mod tracing;

pub use self::tracing::{init, init_with_layer};
pub use crate::config::ObservabilityConfig;
