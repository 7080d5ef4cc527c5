//! 规则集注册表
//!
//! 以名称为键保存已发布的规则集。发布总是整体替换，评估线程通过
//! [`RuleRegistry::acquire`] 拿到 `Arc` 快照后即可在不持锁的情况下
//! 使用；被替换或删除的规则集在最后一个持有者释放时才会回收。

use crate::ruleset::RuleSet;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// 规则集注册表
#[derive(Clone, Default)]
pub struct RuleRegistry {
    /// 规则集名称 -> 当前发布的规则集
    sets: Arc<DashMap<String, Arc<RuleSet>>>,
}

impl RuleRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// 发布规则集，同名的旧规则集被替换
    ///
    /// 返回是否替换了已有规则集。
    #[instrument(skip(self, rule_set), fields(rule_name = %rule_set.name()))]
    pub fn publish(&self, rule_set: RuleSet) -> bool {
        let name = rule_set.name().to_string();
        // 旧快照在分片锁释放之后才被丢弃
        let previous = self.sets.insert(name.clone(), Arc::new(rule_set));
        let replaced = previous.is_some();
        drop(previous);

        if replaced {
            info!("规则集已替换: {}", name);
        } else {
            info!("规则集已发布: {}", name);
        }
        replaced
    }

    /// 获取规则集快照
    ///
    /// 查找与引用计数递增在同一个分片锁内完成，不会拿到已被回收的规则集。
    pub fn acquire(&self, name: &str) -> Option<Arc<RuleSet>> {
        self.sets.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// 删除规则集
    #[instrument(skip(self))]
    pub fn remove(&self, name: &str) -> bool {
        if self.sets.remove(name).is_some() {
            info!("规则集已删除: {}", name);
            true
        } else {
            warn!("删除不存在的规则集: {}", name);
            false
        }
    }

    /// 清空所有规则集
    ///
    /// 逐个移除而不是整体清空，被移除的规则集在分片锁释放之后才被丢弃。
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let names: Vec<String> = self.sets.iter().map(|e| e.key().clone()).collect();
        let mut count = 0;
        for name in names {
            if let Some((_, removed)) = self.sets.remove(&name) {
                drop(removed);
                count += 1;
            }
        }
        info!("已清空 {} 个规则集", count);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    /// 所有已发布的规则集名称（按名称排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// 注册表统计信息
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            rule_sets: 0,
            rules: 0,
            flows: 0,
        };
        for entry in self.sets.iter() {
            stats.rule_sets += 1;
            stats.rules += entry.value().rules().len();
            stats.flows += entry.value().flows().len();
        }
        stats
    }
}

/// 注册表统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub rule_sets: usize,
    pub rules: usize,
    pub flows: usize,
}
