// 该文件是 Biaoji （标记） 项目的一部分。
// src/annotate/triage.rs - 按置信度分档输出
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

use std::path::Path;

use tracing::info;

use super::{
  AnnotateError, AutoAnnotator, BucketCounts, ConfidenceBucket, create_dir, label_file_name,
  list_images, write_json, write_text,
};
use crate::model::Predictor;

pub const STATISTICS_FILE: &str = "statistics.json";

const BUCKETS: [ConfidenceBucket; 3] = [
  ConfidenceBucket::High,
  ConfidenceBucket::Medium,
  ConfidenceBucket::Low,
];

fn remove_stale_labels(labels_dir: &Path, file_name: &str) -> Result<(), AnnotateError> {
  for bucket in BUCKETS {
    let path = labels_dir.join(bucket.dir_name()).join(file_name);
    if path.is_file() {
      std::fs::remove_file(&path).map_err(|e| AnnotateError::Io(path.clone(), e))?;
    }
  }
  Ok(())
}

impl<P: Predictor> AutoAnnotator<P> {
  /// 标注 `images_dir` 下的全部图片
  ///
  /// 标签写入 `<output_dir>/labels/<档位>/<stem>.txt`，没有检测结果的图片只计入低置信度，
  /// 不生成文件。统计写入 `<output_dir>/statistics.json`。
  /// 重复运行时先删除本次图片在各档位下的旧标签，每张图片最多出现在一个档位。
  pub fn annotate_images(
    &self,
    images_dir: &Path,
    output_dir: &Path,
  ) -> Result<BucketCounts, AnnotateError> {
    let images = list_images(images_dir)?;
    info!("找到 {} 张待标注图片", images.len());

    let labels_dir = output_dir.join("labels");
    for bucket in BUCKETS {
      create_dir(&labels_dir.join(bucket.dir_name()))?;
    }

    let mut counts = BucketCounts::default();
    for result in self.predict(&images)? {
      let bucket = self.classify(&result);
      counts.add(bucket);
      let file_name = label_file_name(&result.image);
      remove_stale_labels(&labels_dir, &file_name)?;
      if result.is_empty() {
        continue;
      }
      let path = labels_dir.join(bucket.dir_name()).join(&file_name);
      write_text(&path, &result.to_label_text())?;
    }

    write_json(&output_dir.join(STATISTICS_FILE), &counts)?;
    info!("自动标注完成: {}", counts);
    Ok(counts)
  }
}
