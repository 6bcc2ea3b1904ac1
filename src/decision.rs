// 该文件是 Shulin （树林） 项目的一部分。
// src/decision.rs - 决策记录
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  collections::BTreeMap,
  sync::{PoisonError, RwLock},
};

use tracing::info;

/// 用户对每棵树的决定，只保存在内存中，进程重启后丢失
#[derive(Debug, Default)]
pub struct DecisionStore {
  decisions: RwLock<BTreeMap<String, String>>,
}

impl DecisionStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// 记录决定，覆盖同一棵树之前的决定
  pub fn record(&self, tree_id: impl Into<String>, decision: impl Into<String>) {
    let (tree_id, decision) = (tree_id.into(), decision.into());
    info!("记录决定: {} -> {}", tree_id, decision);
    self
      .decisions
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(tree_id, decision);
  }

  pub fn get(&self, tree_id: &str) -> Option<String> {
    self
      .decisions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(tree_id)
      .cloned()
  }

  pub fn all(&self) -> BTreeMap<String, String> {
    self
      .decisions
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn later_decision_overrides_earlier() {
    let store = DecisionStore::new();
    store.record("tree_1", "keep");
    store.record("tree_2", "cut");
    store.record("tree_1", "cut");

    assert_eq!(store.get("tree_1").as_deref(), Some("cut"));
    assert_eq!(store.get("tree_3"), None);
    assert_eq!(store.all().len(), 2);
  }
}
