//! 配置管理模块
//!
//! 支持 TOML 配置文件加载、环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "WAF_CONFIG";

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 遍历参数树时跟随的最大容器嵌套深度
    pub max_depth: usize,
    /// 每个数组/映射最多检查的子节点数
    pub max_container_size: usize,
    /// 单个字符串参与匹配的最大字节数
    pub max_string_length: usize,
    /// `@rx` 正则表达式的最大长度
    pub max_regex_length: usize,
    /// 过滤器内部两次采样时钟之间检查的叶子节点数
    pub timeout_check_interval: u32,
    /// 存在致命诊断时仍发布规则集（标记为不可用）
    pub publish_invalid: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 20,
            max_container_size: 256,
            max_string_length: 4096,
            max_regex_length: 4096,
            timeout_check_interval: 16,
            publish_invalid: false,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 日志级别（如 "info", "debug"），`RUST_LOG` 优先
    pub log_level: String,
    /// 是否启用 JSON 格式日志
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WafConfig {
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl WafConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. 内置默认值
    /// 2. `WAF_CONFIG` 指向的 TOML 文件（未设置时跳过）
    /// 3. 环境变量（WAF_ 前缀，`__` 分隔层级，如 WAF_ENGINE__MAX_DEPTH -> engine.max_depth）
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::from(Path::new(&path)).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix("WAF")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// 从 TOML 字符串加载配置（嵌入场景与测试使用）
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
