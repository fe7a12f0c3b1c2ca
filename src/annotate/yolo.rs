// 该文件是 Biaoji （标记） 项目的一部分。
// src/annotate/yolo.rs - 平铺的 YOLO 标签输出
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

use chrono::Local;
use serde::Serialize;
use tracing::{debug, info};

use super::{
  AnnotateError, AutoAnnotator, BucketCounts, create_dir, label_file_name,
  list_images, write_json, write_text,
};
use crate::model::Predictor;

pub const AUTO_LABEL_REPORT: &str = "_auto_label_report.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YoloOptions {
  /// 已存在同名标签的图片不再推理
  pub skip_existing: bool,
  /// 没有检测结果时写入空文件
  pub write_empty: bool,
  pub report_path: Option<PathBuf>,
}

impl Default for YoloOptions {
  fn default() -> Self {
    Self {
      skip_existing: true,
      write_empty: true,
      report_path: None,
    }
  }
}

impl YoloOptions {
  /// 报告写在输出目录下的 `_auto_label_report.json`
  pub fn with_default_report(mut self, output_dir: &Path) -> Self {
    self.report_path = Some(output_dir.join(AUTO_LABEL_REPORT));
    self
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct YoloReport {
  pub total: usize,
  pub annotated: usize,
  pub skipped_existing: usize,
  pub empty: usize,
  pub high_conf: usize,
  pub medium_conf: usize,
  pub low_conf: usize,
  pub weights: Option<PathBuf>,
  pub images_dir: PathBuf,
  /// RFC 3339
  pub started_at: String,
  pub finished_at: String,
}

impl YoloReport {
  pub fn buckets(&self) -> BucketCounts {
    BucketCounts {
      total: self.high_conf + self.medium_conf + self.low_conf,
      high_conf: self.high_conf,
      medium_conf: self.medium_conf,
      low_conf: self.low_conf,
    }
  }
}

impl<P: Predictor> AutoAnnotator<P> {
  /// 标注 `images_dir` 下的图片，标签直接写入 `<output_dir>/<stem>.txt`
  pub fn annotate_images_yolo(
    &self,
    images_dir: &Path,
    output_dir: &Path,
    options: &YoloOptions,
  ) -> Result<YoloReport, AnnotateError> {
    let started_at = Local::now().to_rfc3339();
    let images = list_images(images_dir)?;
    create_dir(output_dir)?;

    let (pending, skipped): (Vec<PathBuf>, Vec<PathBuf>) = images
      .iter()
      .cloned()
      .partition(|image| !(options.skip_existing && output_dir.join(label_file_name(image)).exists()));
    info!(
      "找到 {} 张图片，其中 {} 张已有标签被跳过",
      images.len(),
      skipped.len()
    );

    let mut counts = BucketCounts::default();
    let mut annotated = 0;
    let mut empty = 0;
    for result in self.predict(&pending)? {
      counts.add(self.classify(&result));
      let path = output_dir.join(label_file_name(&result.image));
      if result.is_empty() {
        empty += 1;
        if options.write_empty {
          write_text(&path, "")?;
        } else {
          debug!("无检测结果，不写入: {}", result.image.display());
        }
        continue;
      }
      write_text(&path, &result.to_label_text())?;
      annotated += 1;
    }

    let report = YoloReport {
      total: images.len(),
      annotated,
      skipped_existing: skipped.len(),
      empty,
      high_conf: counts.high_conf,
      medium_conf: counts.medium_conf,
      low_conf: counts.low_conf,
      weights: self.weights.clone(),
      images_dir: images_dir.to_path_buf(),
      started_at,
      finished_at: Local::now().to_rfc3339(),
    };

    if let Some(report_path) = &options.report_path {
      if let Some(parent) = report_path.parent() {
        create_dir(parent)?;
      }
      write_json(report_path, &report)?;
      info!("标注报告已写入: {}", report_path.display());
    }
    info!(
      "自动标注完成: 共 {} 张，写入 {}，空 {}，跳过 {}",
      report.total, report.annotated, report.empty, report.skipped_existing
    );
    Ok(report)
  }
}
