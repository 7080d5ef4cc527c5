//! 操作符匹配
//!
//! 编译期把操作符与配置值预编译为 [`Matcher`]，评估期只做匹配。
//! 字符串一律按字节处理，不要求合法 UTF-8。

use crate::models::FilterOptions;
use crate::operators::{Operator, Transformation};
use regex::bytes::{Regex, RegexBuilder};
use serde_json::Value as JsonValue;
use std::borrow::Cow;

/// 匹配对象
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Text(&'a [u8]),
    Number(i128),
}

/// 预编译的操作符
#[derive(Debug, Clone)]
pub enum Matcher {
    Regex(Regex),
    Phrases(Regex),
    EqText(Needle),
    EqNumber(i128),
    Contains(Needle),
    BeginsWith(Needle),
    EndsWith(Needle),
    Lt(i128),
    Gt(i128),
    Exist,
}

/// 文本类操作符的比较串
///
/// 不区分大小写时比较串在编译期转成小写，匹配时按 ASCII 忽略大小写比较。
#[derive(Debug, Clone)]
pub struct Needle {
    bytes: Vec<u8>,
    fold_case: bool,
}

impl Needle {
    fn new(value: &str, options: &FilterOptions) -> Self {
        let fold_case = !options.case_sensitive;
        let bytes = if fold_case {
            value.as_bytes().to_ascii_lowercase()
        } else {
            value.as_bytes().to_vec()
        };
        Self { bytes, fold_case }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn equals(&self, candidate: &[u8]) -> bool {
        if self.fold_case {
            candidate.eq_ignore_ascii_case(&self.bytes)
        } else {
            candidate == self.bytes.as_slice()
        }
    }

    fn found_in(&self, text: &[u8]) -> bool {
        if self.fold_case {
            find_bytes(&text.to_ascii_lowercase(), &self.bytes).is_some()
        } else {
            find_bytes(text, &self.bytes).is_some()
        }
    }

    fn prefix_of(&self, text: &[u8]) -> bool {
        text.len() >= self.len() && self.equals(&text[..self.len()])
    }

    fn suffix_of(&self, text: &[u8]) -> bool {
        text.len() >= self.len() && self.equals(&text[text.len() - self.len()..])
    }
}

impl Matcher {
    /// 编译操作符，失败时返回可读的原因
    pub fn compile(
        operator: Operator,
        value: &JsonValue,
        options: &FilterOptions,
        max_regex_length: usize,
    ) -> Result<Self, String> {
        match operator {
            Operator::Regex => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| format!("{} 操作符需要字符串值", operator))?;
                if pattern.len() > max_regex_length {
                    return Err(format!(
                        "正则表达式长度 {} 超过上限 {}",
                        pattern.len(),
                        max_regex_length
                    ));
                }
                RegexBuilder::new(pattern)
                    .case_insensitive(!options.case_sensitive)
                    .build()
                    .map(Self::Regex)
                    .map_err(|e| format!("正则表达式无效: {}", e))
            }
            Operator::PhraseMatch => {
                let list = value
                    .as_array()
                    .ok_or_else(|| format!("{} 操作符需要字符串数组", operator))?;
                if list.is_empty() {
                    return Err(format!("{} 操作符的短语列表不能为空", operator));
                }
                let mut phrases = Vec::with_capacity(list.len());
                for item in list {
                    match item.as_str() {
                        Some(s) if !s.is_empty() => phrases.push(regex::escape(s)),
                        _ => return Err(format!("{} 操作符的短语必须是非空字符串", operator)),
                    }
                }
                RegexBuilder::new(&phrases.join("|"))
                    .case_insensitive(!options.case_sensitive)
                    .build()
                    .map(Self::Phrases)
                    .map_err(|e| format!("短语列表无法编译: {}", e))
            }
            Operator::Eq => match value {
                JsonValue::String(s) => Ok(Self::EqText(Needle::new(s, options))),
                JsonValue::Number(_) => json_integer(value)
                    .map(Self::EqNumber)
                    .ok_or_else(|| format!("{} 操作符只支持整数", operator)),
                _ => Err(format!("{} 操作符需要字符串或整数值", operator)),
            },
            Operator::Contains | Operator::BeginsWith | Operator::EndsWith => {
                let needle = match value.as_str() {
                    Some(s) if !s.is_empty() => Needle::new(s, options),
                    _ => return Err(format!("{} 操作符需要非空字符串值", operator)),
                };
                Ok(match operator {
                    Operator::Contains => Self::Contains(needle),
                    Operator::BeginsWith => Self::BeginsWith(needle),
                    _ => Self::EndsWith(needle),
                })
            }
            Operator::Lt | Operator::Gt => {
                let bound = json_integer(value)
                    .ok_or_else(|| format!("{} 操作符需要整数值", operator))?;
                Ok(if operator == Operator::Lt {
                    Self::Lt(bound)
                } else {
                    Self::Gt(bound)
                })
            }
            Operator::Exist => Ok(Self::Exist),
        }
    }

    /// 是否按数值比较
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::EqNumber(_) | Self::Lt(_) | Self::Gt(_))
    }

    /// 匹配成功时返回命中的片段
    pub fn matches(&self, subject: Subject<'_>) -> Option<String> {
        match (self, subject) {
            (Self::Regex(re) | Self::Phrases(re), Subject::Text(text)) => {
                re.find(text).map(|m| lossy(m.as_bytes()))
            }
            (Self::EqText(expected), Subject::Text(text)) => {
                expected.equals(text).then(|| lossy(text))
            }
            (Self::Contains(needle), Subject::Text(text)) => {
                needle.found_in(text).then(|| lossy(&needle.bytes))
            }
            (Self::BeginsWith(prefix), Subject::Text(text)) => {
                prefix.prefix_of(text).then(|| lossy(&prefix.bytes))
            }
            (Self::EndsWith(suffix), Subject::Text(text)) => {
                suffix.suffix_of(text).then(|| lossy(&suffix.bytes))
            }
            (Self::EqNumber(_) | Self::Lt(_) | Self::Gt(_), Subject::Text(text)) => {
                let number = parse_integer(text)?;
                self.matches(Subject::Number(number))
            }
            (Self::EqNumber(expected), Subject::Number(n)) => {
                (n == *expected).then(|| n.to_string())
            }
            (Self::Lt(bound), Subject::Number(n)) => (n < *bound).then(|| n.to_string()),
            (Self::Gt(bound), Subject::Number(n)) => (n > *bound).then(|| n.to_string()),
            (Self::Exist, _) => Some(String::new()),
            // 文本类操作符遇到数值时由调用方先格式化成文本
            (_, Subject::Number(_)) => None,
        }
    }
}

/// 依次应用变换，不需要改动时借用原输入
pub fn transform<'a>(input: &'a [u8], transformations: &[Transformation]) -> Cow<'a, [u8]> {
    let mut current = Cow::Borrowed(input);
    for transformation in transformations {
        current = match transformation {
            Transformation::Lowercase => {
                if current.iter().any(u8::is_ascii_uppercase) {
                    Cow::Owned(current.to_ascii_lowercase())
                } else {
                    current
                }
            }
            Transformation::RemoveNulls => {
                if current.contains(&0) {
                    Cow::Owned(current.iter().copied().filter(|&b| b != 0).collect())
                } else {
                    current
                }
            }
            Transformation::CompressWhiteSpace => Cow::Owned(compress_whitespace(&current)),
            Transformation::UrlDecode => {
                if current.iter().any(|&b| b == b'%' || b == b'+') {
                    // 表单编码中的 '+' 先还原为空格，无效的转义序列原样保留
                    let spaced: Vec<u8> = current
                        .iter()
                        .map(|&b| if b == b'+' { b' ' } else { b })
                        .collect();
                    Cow::Owned(urlencoding::decode_binary(&spaced).into_owned())
                } else {
                    current
                }
            }
            Transformation::Trim => {
                let trimmed = current.trim_ascii();
                if trimmed.len() == current.len() {
                    current
                } else {
                    Cow::Owned(trimmed.to_vec())
                }
            }
        };
    }
    current
}

fn compress_whitespace(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut in_space = false;
    for &b in input {
        if b.is_ascii_whitespace() {
            if !in_space {
                out.push(b' ');
            }
            in_space = true;
        } else {
            out.push(b);
            in_space = false;
        }
    }
    out
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_integer(text: &[u8]) -> Option<i128> {
    std::str::from_utf8(text).ok()?.trim().parse().ok()
}

fn json_integer(value: &JsonValue) -> Option<i128> {
    value
        .as_i64()
        .map(i128::from)
        .or_else(|| value.as_u64().map(i128::from))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
