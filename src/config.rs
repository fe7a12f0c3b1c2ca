// 该文件是 Biaoji （标记） 项目的一部分。
// src/config.rs - 流程配置
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

//! 流程配置
//!
//! 配置文件为 YAML 格式，分为四个部分：
//!
//! ```yaml
//! training:
//!   model_type: yolov8
//!   model_size: n
//!   epochs: 100
//! validation:
//!   split_ratio: 0.2
//!   shuffle: true
//!   random_seed: 42
//! paths:
//!   registry: models/model_registry.yaml
//! auto_annotation:
//!   confidence_threshold: 0.6
//!   review_threshold: 0.5
//! ```
//!
//! 所有字段都有默认值，缺失的部分按默认值补全；加载时统一校验一次。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// 高置信度分档的固定下限
pub const HIGH_CONFIDENCE: f32 = 0.7;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("配置文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("读取配置文件 {0} 失败: {1}")]
  Io(PathBuf, std::io::Error),
  #[error("解析配置文件 {0} 失败: {1}")]
  Parse(PathBuf, serde_yaml_ng::Error),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

impl ConfigError {
  fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    ConfigError::Invalid {
      field,
      reason: reason.into(),
    }
  }
}

/// 训练参数，原样传递给外部训练器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
  pub model_type: String,
  pub model_size: String,
  pub pretrained: bool,
  pub epochs: u32,
  pub batch_size: u32,
  pub img_size: u32,
  pub device: String,
  pub workers: u32,
  pub patience: u32,
  pub save_period: i32,
}

impl Default for TrainingConfig {
  fn default() -> Self {
    Self {
      model_type: "yolov8".to_string(),
      model_size: "n".to_string(),
      pretrained: true,
      epochs: 100,
      batch_size: 16,
      img_size: 640,
      device: "0".to_string(),
      workers: 8,
      patience: 50,
      save_period: 10,
    }
  }
}

impl TrainingConfig {
  /// 没有初始权重时使用的基础模型名称，例如 `yolov8n.pt`
  pub fn base_model_name(&self) -> String {
    let ext = if self.pretrained { "pt" } else { "yaml" };
    format!("{}{}.{}", self.model_type, self.model_size, ext)
  }
}

/// 训练集/验证集划分参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
  pub split_ratio: f64,
  pub shuffle: bool,
  pub random_seed: u64,
}

impl Default for ValidationConfig {
  fn default() -> Self {
    Self {
      split_ratio: 0.2,
      shuffle: true,
      random_seed: 42,
    }
  }
}

/// 路径相关的默认值，命令行参数优先
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
  pub registry: Option<PathBuf>,
  pub shared_model_root: Option<PathBuf>,
  pub pretrained_root: Option<PathBuf>,
  pub pretrained_model: Option<PathBuf>,
}

/// 自动标注参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub max_det: u32,
  pub review_threshold: f32,
}

impl Default for AnnotationConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.6,
      iou_threshold: 0.45,
      max_det: 300,
      review_threshold: 0.5,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub training: TrainingConfig,
  pub validation: ValidationConfig,
  pub paths: PathsConfig,
  pub auto_annotation: AnnotationConfig,
}

impl PipelineConfig {
  /// 从 YAML 文件加载并校验配置
  pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
    if !path.exists() {
      return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let config = Self::from_yaml_str(&text).map_err(|e| match e {
      ConfigError::Parse(_, err) => ConfigError::Parse(path.to_path_buf(), err),
      other => other,
    })?;
    info!("已加载配置文件: {}", path.display());
    debug!("配置内容: {:?}", config);
    Ok(config)
  }

  /// 加载配置；路径未显式指定且默认文件不存在时使用默认配置
  pub fn load_or_default(path: &Path, explicit: bool) -> Result<Self, ConfigError> {
    if !explicit && !path.exists() {
      info!("未找到配置文件 {}，使用默认配置", path.display());
      return Ok(Self::default());
    }
    Self::from_path(path)
  }

  pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = if text.trim().is_empty() {
      PipelineConfig::default()
    } else {
      serde_yaml_ng::from_str(text).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?
    };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let ratio = self.validation.split_ratio;
    if !(0.0..=1.0).contains(&ratio) {
      return Err(ConfigError::invalid(
        "validation.split_ratio",
        format!("必须在 [0, 1] 区间内，实际为 {}", ratio),
      ));
    }

    let annotation = &self.auto_annotation;
    for (field, value) in [
      ("auto_annotation.confidence_threshold", annotation.confidence_threshold),
      ("auto_annotation.iou_threshold", annotation.iou_threshold),
      ("auto_annotation.review_threshold", annotation.review_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid(
          field,
          format!("必须在 [0, 1] 区间内，实际为 {}", value),
        ));
      }
    }
    if annotation.review_threshold > HIGH_CONFIDENCE {
      return Err(ConfigError::invalid(
        "auto_annotation.review_threshold",
        format!("不能高于高置信度下限 {}", HIGH_CONFIDENCE),
      ));
    }
    if annotation.max_det == 0 {
      return Err(ConfigError::invalid("auto_annotation.max_det", "必须大于 0"));
    }

    if self.training.model_type.is_empty() {
      return Err(ConfigError::invalid("training.model_type", "不能为空"));
    }
    if self.training.epochs == 0 {
      return Err(ConfigError::invalid("training.epochs", "必须大于 0"));
    }

    Ok(())
  }
}
