//! 日志回调
//!
//! 宿主通过 [`set_sink`] 注册一个进程级回调，引擎经由 `tracing` 产生的
//! 事件在达到最低级别时被转发给它。转发由 [`SinkLayer`] 完成：已有全局
//! 订阅者的宿主把它挂到自己的订阅者上，否则首次注册回调时自动安装。

use arc_swap::ArcSwapOption;
use std::fmt::{self, Write as _};
use std::sync::{Arc, LazyLock, Once};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// 日志级别，按严重程度递增排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        if level == Level::ERROR {
            Self::Error
        } else if level == Level::WARN {
            Self::Warn
        } else if level == Level::INFO {
            Self::Info
        } else if level == Level::DEBUG {
            Self::Debug
        } else {
            Self::Trace
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 交给回调的一条日志
///
/// 所有字段只在回调期间有效。
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub level: LogLevel,
    /// 产生日志的组件（事件 target，默认是模块路径）
    pub function: &'a str,
    pub file: &'a str,
    pub line: u32,
    /// 已渲染的 UTF-8 消息，附带结构化字段
    pub message: &'a str,
}

/// 日志回调
pub type LogCallback = Arc<dyn Fn(&LogRecord<'_>) + Send + Sync>;

struct SinkState {
    callback: LogCallback,
    min_level: LogLevel,
}

static SINK: LazyLock<ArcSwapOption<SinkState>> = LazyLock::new(ArcSwapOption::empty);
static INSTALL: Once = Once::new();

/// 注册或移除日志回调
///
/// `callback` 为 `None` 时停止转发。与另一个并发的重新配置竞争失败时
/// 返回 false，此时生效的是对方的配置。
pub fn set_sink(callback: Option<LogCallback>, min_level: LogLevel) -> bool {
    let enable = callback.is_some();
    let current = SINK.load_full();
    let next = callback.map(|callback| Arc::new(SinkState { callback, min_level }));

    if !install(&SINK, &current, next) {
        return false;
    }

    if enable {
        INSTALL.call_once(|| {
            // 宿主已有全局订阅者时安装失败，需由宿主自行挂载 SinkLayer
            let _ = tracing_subscriber::registry().with(SinkLayer).try_init();
        });
    }
    true
}

/// 当前是否注册了回调
pub fn has_sink() -> bool {
    SINK.load().is_some()
}

/// 仅当槽位仍是 `expected` 时换成 `next`，否则保留对方写入的状态
fn install(
    slot: &ArcSwapOption<SinkState>,
    expected: &Option<Arc<SinkState>>,
    next: Option<Arc<SinkState>>,
) -> bool {
    let previous = slot.compare_and_swap(expected, next);
    same_state(&previous, expected)
}

fn same_state(a: &Option<Arc<SinkState>>, b: &Option<Arc<SinkState>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// 把 tracing 事件转发给已注册回调的订阅层
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkLayer;

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let guard = SINK.load();
        let Some(state) = &*guard else {
            return;
        };

        let metadata = event.metadata();
        let level = LogLevel::from(*metadata.level());
        if level < state.min_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord {
            level,
            function: metadata.target(),
            file: metadata.file().unwrap_or(""),
            line: metadata.line().unwrap_or(0),
            message: &visitor.message,
        };
        (state.callback)(&record);
    }
}

/// 把消息与其余字段渲染成一行文本
#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl MessageVisitor {
    fn separate(&mut self) {
        if !self.message.is_empty() {
            self.message.push(' ');
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.record_debug(field, &format_args!("{}", value));
            return;
        }
        self.separate();
        let _ = write!(self.message, "{}={}", field.name(), value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            // 消息放在最前面，字段随后
            let rendered = format!("{:?}", value);
            if self.message.is_empty() {
                self.message = rendered;
            } else {
                self.message.insert_str(0, &format!("{} ", rendered));
            }
            return;
        }
        self.separate();
        let _ = write!(self.message, "{}={:?}", field.name(), value);
    }
}
