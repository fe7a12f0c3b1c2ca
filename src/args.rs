// 该文件是 Biaoji （标记） 项目的一部分。
// src/args.rs - 命令行公共参数
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

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::info;
use url::Url;

use crate::config::{ConfigError, PipelineConfig, TrainingConfig};
use crate::registry::{RegistryError, WeightsMap};
use crate::weights::WeightsSources;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";
pub const DEFAULT_REGISTRY_PATH: &str = "models/model_registry.yaml";

/// 各个命令共用的参数
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
  /// 配置文件路径（默认 config/config.yaml，不存在时使用内置默认值）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 同时把日志追加写入该文件
  #[arg(long, value_name = "FILE")]
  pub log_file: Option<PathBuf>,

  /// 训练/推理后端
  /// 支持格式:
  /// - yolo://                      使用 PATH 中的 yolo 命令
  /// - yolo:///path/to/yolo?device=cpu&workers=2
  #[arg(long, value_name = "BACKEND", default_value = "yolo://")]
  pub backend: Url,
}

impl CommonArgs {
  pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
    match &self.config {
      Some(path) => PipelineConfig::load_or_default(path, true),
      None => PipelineConfig::load_or_default(Path::new(DEFAULT_CONFIG_PATH), false),
    }
  }
}

/// 权重来源参数，命令行优先于配置文件
#[derive(Args, Debug, Clone, Default)]
pub struct WeightsArgs {
  /// 共享模型目录，模型保存在 <root>/<category>/ 以便复用
  #[arg(long, value_name = "DIR")]
  pub shared_model_root: Option<PathBuf>,

  /// 类别权重登记表，用于解析与回写
  #[arg(long, value_name = "FILE")]
  pub registry: Option<PathBuf>,

  /// 只读的类别到权重映射文件 {category: /path/to/weights.pt}
  #[arg(long, value_name = "FILE")]
  pub model_map: Option<PathBuf>,

  /// 按类别存放预训练权重的目录
  #[arg(long, value_name = "DIR")]
  pub pretrained_root: Option<PathBuf>,

  /// 所有类别共用的单个预训练权重
  #[arg(long, value_name = "FILE")]
  pub pretrained_model: Option<PathBuf>,

  /// 同时存在时优先使用预训练来源
  #[arg(long)]
  pub prefer_pretrained: bool,
}

impl WeightsArgs {
  pub fn registry_path(&self, config: &PipelineConfig) -> PathBuf {
    self
      .registry
      .clone()
      .or_else(|| config.paths.registry.clone())
      .unwrap_or_else(|| PathBuf::from(DEFAULT_REGISTRY_PATH))
  }

  pub fn shared_model_root(&self, config: &PipelineConfig) -> Option<PathBuf> {
    self
      .shared_model_root
      .clone()
      .or_else(|| config.paths.shared_model_root.clone())
  }

  /// 组装除登记表以外的权重来源；指定了映射文件但文件不存在时报错
  pub fn sources(&self, config: &PipelineConfig) -> Result<WeightsSources, RegistryError> {
    let mut sources = WeightsSources::default();
    if let Some(path) = &self.model_map {
      let map = WeightsMap::load_required(path)?;
      info!("已加载模型映射 {}，共 {} 项", path.display(), map.len());
      sources = sources.with_model_map(map);
    }
    if let Some(root) = self
      .pretrained_root
      .clone()
      .or_else(|| config.paths.pretrained_root.clone())
    {
      sources = sources.with_pretrained_root(root);
    }
    if let Some(model) = self
      .pretrained_model
      .clone()
      .or_else(|| config.paths.pretrained_model.clone())
    {
      sources = sources.with_pretrained_model(model);
    }
    Ok(sources)
  }
}

/// 覆盖配置文件中的训练参数
#[derive(Args, Debug, Clone, Default)]
pub struct TrainingOverrides {
  /// 训练轮数
  #[arg(long, value_name = "N")]
  pub epochs: Option<u32>,

  /// 批大小
  #[arg(long, value_name = "N")]
  pub batch_size: Option<u32>,

  /// 训练设备，例如 cpu、0、0,1
  #[arg(long, value_name = "DEVICE")]
  pub device: Option<String>,
}

impl TrainingOverrides {
  pub fn apply(&self, training: &mut TrainingConfig) {
    if let Some(epochs) = self.epochs {
      training.epochs = epochs;
    }
    if let Some(batch_size) = self.batch_size {
      training.batch_size = batch_size;
    }
    if let Some(device) = &self.device {
      training.device = device.clone();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn command_line_overrides_config_paths() {
    let mut config = PipelineConfig::default();
    config.paths.registry = Some(PathBuf::from("cfg/registry.yaml"));
    config.paths.pretrained_root = Some(PathBuf::from("cfg/pretrained"));

    let args = WeightsArgs::default();
    assert_eq!(args.registry_path(&config), Path::new("cfg/registry.yaml"));
    assert_eq!(
      args.registry_path(&PipelineConfig::default()),
      Path::new(DEFAULT_REGISTRY_PATH)
    );

    let args = WeightsArgs {
      registry: Some(PathBuf::from("cli.yaml")),
      pretrained_root: Some(PathBuf::from("cli/pretrained")),
      ..Default::default()
    };
    assert_eq!(args.registry_path(&config), Path::new("cli.yaml"));
    let sources = args.sources(&config).unwrap();
    assert_eq!(
      sources.pretrained_root.as_deref(),
      Some(Path::new("cli/pretrained"))
    );
  }

  #[test]
  fn training_overrides_only_touch_given_fields() {
    let mut training = TrainingConfig::default();
    TrainingOverrides::default().apply(&mut training);
    assert_eq!(training, TrainingConfig::default());

    let overrides = TrainingOverrides {
      epochs: Some(3),
      device: Some("cpu".to_string()),
      ..Default::default()
    };
    overrides.apply(&mut training);
    assert_eq!((training.epochs, training.device.as_str()), (3, "cpu"));
    assert_eq!(training.batch_size, TrainingConfig::default().batch_size);

    let mut config = PipelineConfig::default();
    TrainingOverrides {
      epochs: Some(0),
      ..Default::default()
    }
    .apply(&mut config.training);
    assert!(config.validate().is_err());
  }

  #[test]
  fn missing_model_map_is_an_error() {
    let args = WeightsArgs {
      model_map: Some(PathBuf::from("/no/such/model_map.yaml")),
      ..Default::default()
    };
    assert!(args.sources(&PipelineConfig::default()).is_err());
  }
}
