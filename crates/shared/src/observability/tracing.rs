//! tracing 订阅者初始化
//!
//! 组合 fmt 日志层（pretty 或 JSON）与调用方提供的附加层。
//! 环境过滤器只作用于 fmt 层，附加层（例如规则引擎的日志回调层）
//! 始终能看到全部事件，由其自身决定过滤级别。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::Identity, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// 初始化全局 tracing 订阅者（仅日志输出）
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    init_with_layer(config, Identity::new())
}

/// 初始化全局 tracing 订阅者，并挂载一个附加层
///
/// # Example
///
/// ```ignore
/// use waf_shared::config::WafConfig;
/// use waf_shared::observability;
///
/// let config = WafConfig::load()?;
/// observability::init_with_layer(&config.observability, waf_engine::logging::SinkLayer)?;
/// ```
pub fn init_with_layer<L>(config: &ObservabilityConfig, layer: L) -> Result<()>
where
    L: Layer<Registry> + Send + Sync + 'static,
{
    let env_filter = build_filter(config);

    let fmt_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(fmt_layer)
        .try_init()?;

    ::tracing::info!(
        log_level = %config.log_level,
        json_logs = config.json_logs,
        "Observability initialized"
    );

    Ok(())
}

/// 构建环境过滤器：`RUST_LOG` 优先，其次是配置的级别，最后回退到 info
fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
