// 该文件是 Biaoji （标记） 项目的一部分。
// src/registry.rs - 类别权重登记表
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

//! 类别名称 → 权重路径 的映射文件
//!
//! 登记表（registry）与模型映射（model map）格式相同，都是扁平的 YAML 映射：
//!
//! ```yaml
//! pointer: shared/pointer/train/weights/best.pt
//! oil_level: /data/models/oil_level.pt
//! ```
//!
//! 相对路径相对于映射文件所在目录解析。登记表在训练成功后整体重写，
//! 模型映射只读。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml_ng::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RegistryError {
  #[error("映射文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("读写映射文件 {0} 失败: {1}")]
  Io(PathBuf, std::io::Error),
  #[error("解析映射文件 {0} 失败: {1}")]
  Parse(PathBuf, serde_yaml_ng::Error),
  #[error("映射文件格式无效（应为 类别: 路径 的映射）: {0}")]
  NotAMapping(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightsMap {
  entries: BTreeMap<String, String>,
  origin: Option<PathBuf>,
}

fn scalar_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

impl WeightsMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// 加载映射文件，文件不存在时返回空映射（登记表语义）
  pub fn load(path: &Path) -> Result<Self, RegistryError> {
    if !path.exists() {
      debug!("映射文件不存在，视为空: {}", path.display());
      return Ok(Self {
        entries: BTreeMap::new(),
        origin: Some(path.to_path_buf()),
      });
    }
    Self::load_required(path)
  }

  /// 加载映射文件，文件不存在时报错（模型映射语义）
  pub fn load_required(path: &Path) -> Result<Self, RegistryError> {
    if !path.exists() {
      return Err(RegistryError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| RegistryError::Io(path.to_path_buf(), e))?;
    let mut map = Self::parse(&text, path)?;
    map.origin = Some(path.to_path_buf());
    info!("已加载 {} 条权重映射: {}", map.len(), path.display());
    Ok(map)
  }

  fn parse(text: &str, path: &Path) -> Result<Self, RegistryError> {
    if text.trim().is_empty() {
      return Ok(Self::new());
    }
    let value: Value =
      serde_yaml_ng::from_str(text).map_err(|e| RegistryError::Parse(path.to_path_buf(), e))?;
    let mapping = match value {
      Value::Null => return Ok(Self::new()),
      Value::Mapping(mapping) => mapping,
      _ => return Err(RegistryError::NotAMapping(path.to_path_buf())),
    };

    let mut entries = BTreeMap::new();
    for (key, weights) in mapping.iter() {
      let (Some(key), Some(weights)) = (scalar_to_string(key), scalar_to_string(weights)) else {
        if !key.is_null() && !weights.is_null() {
          warn!("忽略无法识别的映射条目: {:?} -> {:?}", key, weights);
        }
        continue;
      };
      entries.insert(key, weights);
    }

    Ok(Self {
      entries,
      origin: None,
    })
  }

  pub fn from_yaml_str(text: &str) -> Result<Self, RegistryError> {
    Self::parse(text, Path::new("<inline>"))
  }

  pub fn origin(&self) -> Option<&Path> {
    self.origin.as_deref()
  }

  pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
    self.origin = Some(origin.into());
    self
  }

  pub fn get(&self, category: &str) -> Option<&str> {
    self.entries.get(category).map(String::as_str)
  }

  pub fn insert(&mut self, category: impl Into<String>, weights: impl Into<String>) {
    self.entries.insert(category.into(), weights.into());
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// 查找类别对应的权重文件，只返回磁盘上存在的路径
  pub fn resolve(&self, category: &str) -> Option<PathBuf> {
    let value = self.get(category)?;
    if value.is_empty() {
      return None;
    }

    let path = Path::new(value);
    if path.is_absolute() {
      return path.exists().then(|| path.to_path_buf());
    }

    let candidate = match self.origin.as_deref().and_then(Path::parent) {
      Some(base) => base.join(path),
      None => path.to_path_buf(),
    };
    std::fs::canonicalize(candidate).ok()
  }

  /// 按键排序整体写回文件
  pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|e| RegistryError::Io(parent.to_path_buf(), e))?;
    }
    let text = serde_yaml_ng::to_string(&self.entries)
      .map_err(|e| RegistryError::Parse(path.to_path_buf(), e))?;
    std::fs::write(path, text).map_err(|e| RegistryError::Io(path.to_path_buf(), e))?;
    Ok(())
  }
}

/// 训练成功后更新登记表中的一条记录
///
/// 每次都重新读取文件，只覆盖当前类别，其余条目保持不变。
/// 权重路径以绝对路径写入，避免相对于登记表目录解析时失效。
pub fn update_registry_for_category(
  registry_path: &Path,
  category: &str,
  weights: &Path,
) -> Result<(), RegistryError> {
  let weights =
    std::path::absolute(weights).map_err(|e| RegistryError::Io(weights.to_path_buf(), e))?;
  let mut registry = WeightsMap::load(registry_path)?;
  registry.insert(category, weights.to_string_lossy());
  registry.save(registry_path)?;
  info!(
    "[{}] 登记表已更新: {} -> {}",
    category,
    registry_path.display(),
    weights.display()
  );
  Ok(())
}
