// 该文件是 Biaoji （标记） 项目的一部分。
// src/weights.rs - 权重来源解析
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

//! 权重来源解析
//!
//! 每个来源是一条具名策略 `(类别, 上下文) -> Option<路径>`，按固定顺序依次尝试，
//! 第一个在磁盘上存在的候选即为结果。新增来源只需在顺序表中加一行。

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::registry::WeightsMap;

pub const WEIGHTS_EXT: &str = "pt";
pub const BEST_WEIGHTS: &str = "best.pt";

/// 训练输出中最优权重的位置：`<model_root>/train/weights/best.pt`
pub fn trained_weights_path(model_root: &Path) -> PathBuf {
  model_root.join("train").join("weights").join(BEST_WEIGHTS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
  Trained,
  Registry,
  ModelMap,
  PretrainedRoot,
  PretrainedModel,
  Missing,
}

impl Provenance {
  pub fn as_str(&self) -> &'static str {
    match self {
      Provenance::Trained => "trained",
      Provenance::Registry => "registry",
      Provenance::ModelMap => "model_map",
      Provenance::PretrainedRoot => "pretrained_root",
      Provenance::PretrainedModel => "pretrained_model",
      Provenance::Missing => "missing",
    }
  }

  /// 训练产物或登记表中的权重可以直接复用而跳过训练
  pub fn is_reusable_training_output(&self) -> bool {
    matches!(self, Provenance::Trained | Provenance::Registry)
  }
}

impl fmt::Display for Provenance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 除训练产物以外的可选权重来源
#[derive(Debug, Clone, Default)]
pub struct WeightsSources {
  pub registry: Option<WeightsMap>,
  pub model_map: Option<WeightsMap>,
  pub pretrained_root: Option<PathBuf>,
  pub pretrained_model: Option<PathBuf>,
}

impl WeightsSources {
  pub fn with_registry(mut self, registry: WeightsMap) -> Self {
    self.registry = Some(registry);
    self
  }

  pub fn with_model_map(mut self, model_map: WeightsMap) -> Self {
    self.model_map = Some(model_map);
    self
  }

  pub fn with_pretrained_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.pretrained_root = Some(root.into());
    self
  }

  pub fn with_pretrained_model(mut self, model: impl Into<PathBuf>) -> Self {
    self.pretrained_model = Some(model.into());
    self
  }
}

pub struct ResolveContext<'a> {
  pub model_root: &'a Path,
  pub sources: &'a WeightsSources,
}

pub struct Strategy {
  pub provenance: Provenance,
  pub find: fn(&str, &ResolveContext<'_>) -> Option<PathBuf>,
}

fn find_trained(_category: &str, ctx: &ResolveContext<'_>) -> Option<PathBuf> {
  let best = trained_weights_path(ctx.model_root);
  best.exists().then_some(best)
}

fn find_in_registry(category: &str, ctx: &ResolveContext<'_>) -> Option<PathBuf> {
  ctx.sources.registry.as_ref()?.resolve(category)
}

fn find_in_model_map(category: &str, ctx: &ResolveContext<'_>) -> Option<PathBuf> {
  ctx.sources.model_map.as_ref()?.resolve(category)
}

fn find_in_pretrained_root(category: &str, ctx: &ResolveContext<'_>) -> Option<PathBuf> {
  let root = ctx.sources.pretrained_root.as_deref()?;
  let dir = root.join(category);
  [
    root.join(format!("{}.{}", category, WEIGHTS_EXT)),
    dir.join(BEST_WEIGHTS),
    trained_weights_path(&dir),
    dir.join("weights").join(BEST_WEIGHTS),
  ]
  .into_iter()
  .find(|candidate| candidate.exists())
}

fn find_pretrained_model(_category: &str, ctx: &ResolveContext<'_>) -> Option<PathBuf> {
  let model = ctx.sources.pretrained_model.as_deref()?;
  model.exists().then(|| model.to_path_buf())
}

const TRAINED: Strategy = Strategy {
  provenance: Provenance::Trained,
  find: find_trained,
};
const REGISTRY: Strategy = Strategy {
  provenance: Provenance::Registry,
  find: find_in_registry,
};
const MODEL_MAP: Strategy = Strategy {
  provenance: Provenance::ModelMap,
  find: find_in_model_map,
};
const PRETRAINED_ROOT: Strategy = Strategy {
  provenance: Provenance::PretrainedRoot,
  find: find_in_pretrained_root,
};
const PRETRAINED_MODEL: Strategy = Strategy {
  provenance: Provenance::PretrainedModel,
  find: find_pretrained_model,
};

pub static DEFAULT_ORDER: [Strategy; 5] = [TRAINED, REGISTRY, MODEL_MAP, PRETRAINED_ROOT, PRETRAINED_MODEL];
pub static PREFER_PRETRAINED_ORDER: [Strategy; 5] =
  [MODEL_MAP, PRETRAINED_ROOT, PRETRAINED_MODEL, REGISTRY, TRAINED];

pub fn strategy_order(prefer_pretrained: bool) -> &'static [Strategy; 5] {
  if prefer_pretrained {
    &PREFER_PRETRAINED_ORDER
  } else {
    &DEFAULT_ORDER
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWeights {
  pub path: Option<PathBuf>,
  pub provenance: Provenance,
}

impl ResolvedWeights {
  pub fn missing() -> Self {
    Self {
      path: None,
      provenance: Provenance::Missing,
    }
  }

  pub fn is_found(&self) -> bool {
    self.path.is_some()
  }
}

/// 按优先级解析类别使用的权重
///
/// 默认顺序：trained > registry > model_map > pretrained_root > pretrained_model；
/// `prefer_pretrained` 时：model_map > pretrained_root > pretrained_model > registry > trained。
/// 结果只取决于调用时的文件系统状态。
pub fn resolve_weights(
  category: &str,
  model_root: &Path,
  sources: &WeightsSources,
  prefer_pretrained: bool,
) -> ResolvedWeights {
  let ctx = ResolveContext {
    model_root,
    sources,
  };

  for strategy in strategy_order(prefer_pretrained) {
    if let Some(path) = (strategy.find)(category, &ctx) {
      debug!("[{}] 权重来源 {}: {}", category, strategy.provenance, path.display());
      return ResolvedWeights {
        path: Some(path),
        provenance: strategy.provenance,
      };
    }
  }

  debug!("[{}] 未找到任何可用权重", category);
  ResolvedWeights::missing()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"weights").unwrap();
  }

  #[test]
  fn provenance_strings() {
    assert_eq!(Provenance::PretrainedRoot.to_string(), "pretrained_root");
    assert_eq!(Provenance::Missing.to_string(), "missing");
    assert!(Provenance::Registry.is_reusable_training_output());
    assert!(!Provenance::ModelMap.is_reusable_training_output());
  }

  #[test]
  fn orders_cover_every_source_once() {
    for order in [&DEFAULT_ORDER, &PREFER_PRETRAINED_ORDER] {
      let mut seen: Vec<_> = order.iter().map(|s| s.provenance).collect();
      seen.sort_by_key(|p| p.as_str());
      seen.dedup();
      assert_eq!(seen.len(), 5);
      assert!(!seen.contains(&Provenance::Missing));
    }
  }

  #[test]
  fn pretrained_root_candidates_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("pretrained");
    let sources = WeightsSources::default().with_pretrained_root(&root);
    let model_root = tmp.path().join("models");

    touch(&root.join("foo/weights/best.pt"));
    let r = resolve_weights("foo", &model_root, &sources, false);
    assert_eq!(r.path, Some(root.join("foo/weights/best.pt")));

    touch(&root.join("foo/train/weights/best.pt"));
    let r = resolve_weights("foo", &model_root, &sources, false);
    assert_eq!(r.path, Some(root.join("foo/train/weights/best.pt")));

    touch(&root.join("foo/best.pt"));
    let r = resolve_weights("foo", &model_root, &sources, false);
    assert_eq!(r.path, Some(root.join("foo/best.pt")));

    touch(&root.join("foo.pt"));
    let r = resolve_weights("foo", &model_root, &sources, false);
    assert_eq!(r.path, Some(root.join("foo.pt")));
    assert_eq!(r.provenance, Provenance::PretrainedRoot);
  }

  #[test]
  fn dangling_pretrained_model_is_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let sources = WeightsSources::default().with_pretrained_model(tmp.path().join("nope.pt"));
    let r = resolve_weights("foo", tmp.path(), &sources, false);
    assert_eq!(r, ResolvedWeights::missing());
  }
}
