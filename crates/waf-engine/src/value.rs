//! 参数值树
//!
//! 与宿主语言无关的带类型递归容器。宿主适配层把原生对象转换成
//! [`Value`] 树后交给评估引擎。容器拥有所有加入其中的子节点，
//! 子节点的插入顺序会影响匹配的先后。

use crate::error::ValueError;
use std::fmt;
use thiserror::Error;

/// 值类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Invalid,
    Signed,
    Unsigned,
    String,
    Array,
    Map,
}

impl ValueType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Signed => "signed",
            Self::Unsigned => "unsigned",
            Self::String => "string",
            Self::Array => "array",
            Self::Map => "map",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 映射中的一个带名称条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntry {
    pub name: Vec<u8>,
    pub value: Value,
}

/// 参数值
///
/// 字符串按字节存储，可以包含 NUL；数值宽度固定为 64 位。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Invalid,
    Signed(i64),
    Unsigned(u64),
    String(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<MapEntry>),
}

/// 加入容器失败时把子节点交还给调用方，容器保持不变
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct RejectedChild {
    pub reason: ValueError,
    pub child: Value,
}

impl Value {
    /// 无效值，表示“没有值”或宿主侧解析失败的占位
    pub fn invalid() -> Self {
        Self::Invalid
    }

    /// 复制全部字节构造字符串
    pub fn string(bytes: impl AsRef<[u8]>) -> Self {
        Self::String(bytes.as_ref().to_vec())
    }

    /// 复制前 `length` 个字节构造字符串（超出部分按实际长度截断）
    pub fn string_with_length(bytes: &[u8], length: usize) -> Self {
        let length = length.min(bytes.len());
        Self::String(bytes[..length].to_vec())
    }

    pub fn int(value: i64) -> Self {
        Self::Signed(value)
    }

    pub fn uint(value: u64) -> Self {
        Self::Unsigned(value)
    }

    pub fn array() -> Self {
        Self::Array(Vec::new())
    }

    pub fn map() -> Self {
        Self::Map(Vec::new())
    }

    /// 获取类型标签
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Invalid => ValueType::Invalid,
            Self::Signed(_) => ValueType::Signed,
            Self::Unsigned(_) => ValueType::Unsigned,
            Self::String(_) => ValueType::String,
            Self::Array(_) => ValueType::Array,
            Self::Map(_) => ValueType::Map,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Map(_))
    }

    /// 条目数：容器返回子节点数，字符串返回字节长度，其余为 0
    pub fn len(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            Self::Array(items) => items.len(),
            Self::Map(entries) => entries.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// 按名称查找映射的第一个条目
    pub fn get(&self, name: &[u8]) -> Option<&Value> {
        match self {
            Self::Map(entries) => entries.iter().find(|e| e.name == name).map(|e| &e.value),
            _ => None,
        }
    }

    /// 向容器追加子节点
    ///
    /// 数组只接受无名子节点，映射只接受有名子节点。失败时容器不变，
    /// 子节点通过 [`RejectedChild`] 交还。
    pub fn add_child(&mut self, name: Option<&[u8]>, child: Value) -> Result<(), RejectedChild> {
        match (self, name) {
            (Self::Array(items), None) => {
                items.push(child);
                Ok(())
            }
            (Self::Array(_), Some(_)) => Err(RejectedChild {
                reason: ValueError::NamedArrayEntry,
                child,
            }),
            (Self::Map(entries), Some(name)) => {
                entries.push(MapEntry {
                    name: name.to_vec(),
                    value: child,
                });
                Ok(())
            }
            (Self::Map(_), None) => Err(RejectedChild {
                reason: ValueError::UnnamedMapEntry,
                child,
            }),
            (other, _) => Err(RejectedChild {
                reason: ValueError::NotAContainer(other.value_type().name()),
                child,
            }),
        }
    }

    /// 向数组追加子节点
    pub fn add_to_array(&mut self, child: Value) -> Result<(), RejectedChild> {
        match self {
            Self::Array(_) => self.add_child(None, child),
            other => Err(RejectedChild {
                reason: ValueError::NotAContainer(other.value_type().name()),
                child,
            }),
        }
    }

    /// 向映射追加带名称的子节点
    ///
    /// `name_length` 为 0 时名称取到第一个 NUL 为止（没有 NUL 则取整个切片），
    /// 否则取前 `name_length` 个字节。
    pub fn add_to_map(
        &mut self,
        name: &[u8],
        name_length: usize,
        child: Value,
    ) -> Result<(), RejectedChild> {
        let name = if name_length == 0 {
            let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
            &name[..end]
        } else {
            &name[..name_length.min(name.len())]
        };

        match self {
            Self::Map(_) => self.add_child(Some(name), child),
            other => Err(RejectedChild {
                reason: ValueError::NotAContainer(other.value_type().name()),
                child,
            }),
        }
    }

    /// 释放节点持有的数据
    ///
    /// 总是递归释放子节点与字符串内容；`free_self` 为 false 时节点本身保留
    /// 原类型（变为空容器或空字符串），为 true 时节点变回 [`Value::Invalid`]。
    /// 对无效值调用是空操作。
    pub fn free(&mut self, free_self: bool) {
        match self {
            Self::Invalid => return,
            Self::String(s) => *s = Vec::new(),
            Self::Array(items) => *items = Vec::new(),
            Self::Map(entries) => *entries = Vec::new(),
            Self::Signed(_) | Self::Unsigned(_) => {}
        }

        if free_self {
            *self = Self::Invalid;
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Signed(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Unsigned(value)
    }
}
