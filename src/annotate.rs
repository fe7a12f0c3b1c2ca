// 该文件是 Biaoji （标记） 项目的一部分。
// src/annotate.rs - 自动标注输出
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

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::config::{AnnotationConfig, HIGH_CONFIDENCE};
use crate::model::{ImageDetections, PredictOptions, Predictor};

mod triage;
mod yolo;

pub use self::yolo::{AUTO_LABEL_REPORT, YoloOptions, YoloReport};
pub use self::triage::STATISTICS_FILE;

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("图片目录不存在: {0}")]
  MissingImagesDir(PathBuf),
  #[error("I/O 错误 {0}: {1}")]
  Io(PathBuf, std::io::Error),
  #[error("推理失败: {0}")]
  Predict(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("推理结果数量 {got} 与图片数量 {expected} 不一致")]
  ResultMismatch { expected: usize, got: usize },
  #[error("写入统计文件失败: {0}")]
  Report(#[from] serde_json::Error),
}

/// 自动标注结果的目录组织方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputLayout {
  /// 按置信度分到 `labels/{high_conf,medium_conf,low_conf}`
  #[default]
  Triage,
  /// 与图片同名的 `*.txt` 平铺在输出目录
  Yolo,
}

impl OutputLayout {
  pub fn as_str(&self) -> &'static str {
    match self {
      OutputLayout::Triage => "triage",
      OutputLayout::Yolo => "yolo",
    }
  }
}

impl fmt::Display for OutputLayout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OutputLayout {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "triage" => Ok(OutputLayout::Triage),
      "yolo" => Ok(OutputLayout::Yolo),
      other => Err(format!("不支持的输出布局: {}", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfidenceBucket {
  High,
  Medium,
  Low,
}

impl ConfidenceBucket {
  /// 按最高置信度分档：`>= 0.7` 为高，`[review, 0.7)` 为中，其余（含无检测）为低
  pub fn classify(max_confidence: Option<f32>, review_threshold: f32) -> Self {
    match max_confidence {
      Some(c) if c >= HIGH_CONFIDENCE => ConfidenceBucket::High,
      Some(c) if c >= review_threshold => ConfidenceBucket::Medium,
      _ => ConfidenceBucket::Low,
    }
  }

  pub fn dir_name(&self) -> &'static str {
    match self {
      ConfidenceBucket::High => "high_conf",
      ConfidenceBucket::Medium => "medium_conf",
      ConfidenceBucket::Low => "low_conf",
    }
  }
}

/// 各置信度分档的图片数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketCounts {
  pub total: usize,
  pub high_conf: usize,
  pub medium_conf: usize,
  pub low_conf: usize,
}

impl BucketCounts {
  pub fn add(&mut self, bucket: ConfidenceBucket) {
    self.total += 1;
    match bucket {
      ConfidenceBucket::High => self.high_conf += 1,
      ConfidenceBucket::Medium => self.medium_conf += 1,
      ConfidenceBucket::Low => self.low_conf += 1,
    }
  }
}

impl fmt::Display for BucketCounts {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "共 {} 张，高置信度 {}，中置信度 {}，低置信度 {}",
      self.total, self.high_conf, self.medium_conf, self.low_conf
    )
  }
}

pub struct AutoAnnotator<P> {
  predictor: P,
  options: PredictOptions,
  review_threshold: f32,
  weights: Option<PathBuf>,
}

impl<P: Predictor> AutoAnnotator<P> {
  pub fn new(predictor: P, config: &AnnotationConfig) -> Self {
    Self {
      predictor,
      options: PredictOptions::from(config),
      review_threshold: config.review_threshold,
      weights: None,
    }
  }

  /// 记录在报告中的权重路径
  pub fn with_weights(mut self, weights: impl Into<PathBuf>) -> Self {
    self.weights = Some(weights.into());
    self
  }

  pub fn classify(&self, result: &ImageDetections) -> ConfidenceBucket {
    ConfidenceBucket::classify(result.max_confidence(), self.review_threshold)
  }

  fn predict(&self, images: &[PathBuf]) -> Result<Vec<ImageDetections>, AnnotateError> {
    let results = self
      .predictor
      .predict(images, &self.options)
      .map_err(|e| AnnotateError::Predict(Box::new(e)))?;
    if results.len() != images.len() {
      return Err(AnnotateError::ResultMismatch {
        expected: images.len(),
        got: results.len(),
      });
    }
    Ok(results)
  }
}

/// 目录下的待标注图片；同名（去扩展名后）的图片会写到同一个标签文件，只保留排序后的第一张
fn list_images(images_dir: &Path) -> Result<Vec<PathBuf>, AnnotateError> {
  if !images_dir.is_dir() {
    return Err(AnnotateError::MissingImagesDir(images_dir.to_path_buf()));
  }
  let images = crate::dataset::list_image_files(images_dir)
    .map_err(|e| AnnotateError::Io(images_dir.to_path_buf(), e))?;

  let mut seen = HashSet::new();
  Ok(
    images
      .into_iter()
      .filter(|image| {
        let unique = seen.insert(label_file_name(image));
        if !unique {
          warn!("图片 {} 与已有图片同名，跳过", image.display());
        }
        unique
      })
      .collect(),
  )
}

fn create_dir(dir: &Path) -> Result<(), AnnotateError> {
  std::fs::create_dir_all(dir).map_err(|e| AnnotateError::Io(dir.to_path_buf(), e))
}

fn label_file_name(image: &Path) -> String {
  format!(
    "{}.txt",
    image
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default()
  )
}

fn write_text(path: &Path, text: &str) -> Result<(), AnnotateError> {
  std::fs::write(path, text).map_err(|e| AnnotateError::Io(path.to_path_buf(), e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AnnotateError> {
  let text = serde_json::to_string_pretty(value)?;
  write_text(path, &text)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn buckets_follow_thresholds() {
    assert_eq!(ConfidenceBucket::classify(Some(0.7), 0.5), ConfidenceBucket::High);
    assert_eq!(ConfidenceBucket::classify(Some(0.69), 0.5), ConfidenceBucket::Medium);
    assert_eq!(ConfidenceBucket::classify(Some(0.5), 0.5), ConfidenceBucket::Medium);
    assert_eq!(ConfidenceBucket::classify(Some(0.49), 0.5), ConfidenceBucket::Low);
    assert_eq!(ConfidenceBucket::classify(None, 0.5), ConfidenceBucket::Low);
  }

  #[test]
  fn layout_parses_from_text() {
    assert_eq!("yolo".parse::<OutputLayout>().unwrap(), OutputLayout::Yolo);
    assert_eq!("triage".parse::<OutputLayout>().unwrap(), OutputLayout::Triage);
    assert!("coco".parse::<OutputLayout>().is_err());
  }
}
