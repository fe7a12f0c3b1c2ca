// 该文件是 Biaoji （标记） 项目的一部分。
// src/model.rs - 外部训练/推理接口
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

use crate::config::{AnnotationConfig, TrainingConfig};

/// 单个检测结果，坐标为相对图像宽高归一化的中心点与宽高
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub x_center: f32,
  pub y_center: f32,
  pub width: f32,
  pub height: f32,
  pub confidence: f32,
}

impl Detection {
  /// `<class_id> <x_center> <y_center> <width> <height>`
  pub fn to_label_line(&self) -> String {
    format!(
      "{} {:.6} {:.6} {:.6} {:.6}",
      self.class_id, self.x_center, self.y_center, self.width, self.height
    )
  }

  /// 解析 `<class_id> <x> <y> <w> <h> <conf>`，格式不符时返回 `None`
  pub fn parse_prediction_line(line: &str) -> Option<Self> {
    let mut parts = line.split_whitespace();
    let class_id = parts.next()?.parse().ok()?;
    let mut values = [0f32; 5];
    for value in values.iter_mut() {
      *value = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
      return None;
    }
    let [x_center, y_center, width, height, confidence] = values;
    Some(Self {
      class_id,
      x_center,
      y_center,
      width,
      height,
      confidence,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageDetections {
  pub image: PathBuf,
  pub detections: Vec<Detection>,
}

impl ImageDetections {
  pub fn max_confidence(&self) -> Option<f32> {
    self
      .detections
      .iter()
      .map(|d| d.confidence)
      .fold(None, |acc, c| Some(acc.map_or(c, |m: f32| m.max(c))))
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  pub fn to_label_text(&self) -> String {
    let mut text = String::new();
    for detection in &self.detections {
      text.push_str(&detection.to_label_line());
      text.push('\n');
    }
    text
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictOptions {
  pub confidence: f32,
  pub iou: f32,
  pub max_det: u32,
}

impl From<&AnnotationConfig> for PredictOptions {
  fn from(config: &AnnotationConfig) -> Self {
    Self {
      confidence: config.confidence_threshold,
      iou: config.iou_threshold,
      max_det: config.max_det,
    }
  }
}

pub struct TrainRequest<'a> {
  pub dataset_config: &'a Path,
  pub model_root: &'a Path,
  /// 热启动权重，为空时从基础模型开始
  pub init_weights: Option<&'a Path>,
  pub training: &'a TrainingConfig,
}

pub trait Trainer {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 训练并返回最优权重路径
  fn train(&self, request: &TrainRequest<'_>) -> Result<PathBuf, Self::Error>;
}

pub trait Predictor {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 每张输入图片对应一个结果，顺序与输入一致
  fn predict(
    &self,
    images: &[PathBuf],
    options: &PredictOptions,
  ) -> Result<Vec<ImageDetections>, Self::Error>;
}

pub trait LoadPredictor {
  type Predictor: Predictor;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load_predictor(&self, weights: &Path) -> Result<Self::Predictor, Self::Error>;
}

#[cfg(feature = "command_backend")]
mod command;
#[cfg(feature = "command_backend")]
pub use self::command::{CommandBackend, CommandError, CommandPredictor};
