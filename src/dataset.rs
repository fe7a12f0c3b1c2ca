// 该文件是 Biaoji （标记） 项目的一部分。
// src/dataset.rs - 数据集整理与划分
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

//! 数据集整理
//!
//! 从原始 图片/标签 目录中取出同名（去扩展名后）的配对，按固定种子打乱后划分为
//! `train/` 与 `val/`，复制到数据根目录下，并生成训练器使用的数据集描述文件。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
pub const LABEL_EXTENSION: &str = "txt";
pub const DATASET_CONFIG_NAME: &str = "dataset_config.yaml";

#[derive(Error, Debug)]
pub enum DatasetError {
  #[error("目录不存在: {0}")]
  MissingDirectory(PathBuf),
  #[error("划分比例必须在 [0, 1] 区间内，实际为 {0}")]
  InvalidRatio(f64),
  #[error("I/O 错误 {0}: {1}")]
  Io(PathBuf, std::io::Error),
  #[error("写入数据集描述失败: {0}")]
  Descriptor(#[from] serde_yaml_ng::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DatasetError + '_ {
  move |e| DatasetError::Io(path.to_path_buf(), e)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

fn list_files_with(dir: &Path, extensions: &[&str]) -> std::io::Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let path = entry?.path();
    if path.is_file() && has_extension(&path, extensions) {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}

/// 目录下（不递归）的图片文件，按路径排序，扩展名不区分大小写
pub fn list_image_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
  list_files_with(dir, &IMAGE_EXTENSIONS)
}

pub fn list_label_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
  list_files_with(dir, &[LABEL_EXTENSION])
}

/// 目录下是否直接包含图片文件
pub fn has_image_files(dir: &Path) -> bool {
  list_image_files(dir).is_ok_and(|files| !files.is_empty())
}

pub fn file_stem(path: &Path) -> Option<String> {
  path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

fn stem_index(files: Vec<PathBuf>) -> HashMap<String, PathBuf> {
  files
    .into_iter()
    .filter_map(|path| file_stem(&path).map(|stem| (stem, path)))
    .collect()
}

/// 计算训练集与验证集成员
///
/// 输入先排序，保证结果与目录遍历顺序无关；`shuffle` 时用 `seed` 打乱。
/// 前 `floor(n * (1 - split_ratio))` 个进入训练集，其余进入验证集。
pub fn plan_split(
  mut stems: Vec<String>,
  split_ratio: f64,
  shuffle: bool,
  seed: u64,
) -> Result<(Vec<String>, Vec<String>), DatasetError> {
  if !(0.0..=1.0).contains(&split_ratio) {
    return Err(DatasetError::InvalidRatio(split_ratio));
  }

  stems.sort();
  if shuffle {
    let mut rng = StdRng::seed_from_u64(seed);
    stems.shuffle(&mut rng);
  }

  let split_idx = ((stems.len() as f64) * (1.0 - split_ratio)).floor() as usize;
  let split_idx = split_idx.min(stems.len());
  let val = stems.split_off(split_idx);
  Ok((stems, val))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SplitCounts {
  pub train: usize,
  pub val: usize,
}

/// 训练器使用的数据集描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
  pub path: PathBuf,
  pub train: String,
  pub val: String,
  pub nc: usize,
  pub names: BTreeMap<i64, String>,
}

impl DatasetDescriptor {
  pub fn new(data_root: PathBuf, class_ids: &BTreeSet<i64>) -> Self {
    Self {
      path: data_root,
      train: "train/images".to_string(),
      val: "val/images".to_string(),
      nc: class_ids.len(),
      names: class_ids
        .iter()
        .map(|id| (*id, format!("class{}", id)))
        .collect(),
    }
  }

  pub fn load(path: &Path) -> Result<Self, DatasetError> {
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    Ok(serde_yaml_ng::from_str(&text)?)
  }

  pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
    let text = serde_yaml_ng::to_string(self)?;
    std::fs::write(path, text).map_err(io_err(path))
  }
}

/// 收集标签文件中每个非空行开头的类别编号，无法解析的行记录警告后跳过
pub fn collect_class_ids<'a>(label_files: impl IntoIterator<Item = &'a Path>) -> BTreeSet<i64> {
  let mut class_ids = BTreeSet::new();
  for label in label_files {
    let text = match std::fs::read_to_string(label) {
      Ok(text) => text,
      Err(e) => {
        warn!("读取标签文件 {} 失败: {}", label.display(), e);
        continue;
      }
    };
    for (line_no, line) in text.lines().enumerate() {
      let Some(first) = line.split_whitespace().next() else {
        continue;
      };
      match first.parse::<i64>() {
        Ok(id) => {
          class_ids.insert(id);
        }
        Err(_) => warn!(
          "标签文件 {} 第 {} 行类别编号无效: {:?}",
          label.display(),
          line_no + 1,
          first
        ),
      }
    }
  }
  class_ids
}

pub struct DatasetOrganizer {
  data_root: PathBuf,
}

impl DatasetOrganizer {
  pub fn new(data_root: impl Into<PathBuf>) -> Self {
    Self {
      data_root: data_root.into(),
    }
  }

  pub fn data_root(&self) -> &Path {
    &self.data_root
  }

  pub fn descriptor_path(&self) -> PathBuf {
    self.data_root.join(DATASET_CONFIG_NAME)
  }

  /// 使用 `raw_dir/images` 与 `raw_dir/labels`
  pub fn split_dataset_from_raw(
    &self,
    raw_dir: &Path,
    split_ratio: f64,
    shuffle: bool,
    seed: u64,
  ) -> Result<SplitCounts, DatasetError> {
    self.split_dataset(
      &raw_dir.join("images"),
      &raw_dir.join("labels"),
      split_ratio,
      shuffle,
      seed,
    )
  }

  pub fn split_dataset(
    &self,
    images_dir: &Path,
    labels_dir: &Path,
    split_ratio: f64,
    shuffle: bool,
    seed: u64,
  ) -> Result<SplitCounts, DatasetError> {
    for dir in [images_dir, labels_dir] {
      if !dir.is_dir() {
        return Err(DatasetError::MissingDirectory(dir.to_path_buf()));
      }
    }

    let images = stem_index(list_image_files(images_dir).map_err(io_err(images_dir))?);
    let labels = stem_index(list_label_files(labels_dir).map_err(io_err(labels_dir))?);
    info!("找到 {} 张图片, {} 个标签", images.len(), labels.len());

    let matched: Vec<String> = images
      .keys()
      .filter(|stem| labels.contains_key(*stem))
      .cloned()
      .collect();
    let unmatched = images.len() + labels.len() - 2 * matched.len();
    info!("匹配的图片/标签对: {}，未匹配文件: {}", matched.len(), unmatched);
    if matched.is_empty() {
      warn!("没有任何匹配的图片/标签对，将生成空的数据集划分");
    }

    let (train, val) = plan_split(matched, split_ratio, shuffle, seed)?;
    info!("训练集: {}, 验证集: {}", train.len(), val.len());

    std::fs::create_dir_all(&self.data_root).map_err(io_err(&self.data_root))?;
    self.copy_split(&train, &images, &labels, "train")?;
    self.copy_split(&val, &images, &labels, "val")?;

    let train_labels: Vec<&Path> = train
      .iter()
      .filter_map(|stem| labels.get(stem).map(PathBuf::as_path))
      .collect();
    let class_ids = collect_class_ids(train_labels);
    let root = std::fs::canonicalize(&self.data_root).map_err(io_err(&self.data_root))?;
    let descriptor = DatasetDescriptor::new(root, &class_ids);
    let descriptor_path = self.descriptor_path();
    descriptor.save(&descriptor_path)?;
    info!(
      "数据集描述已保存: {} ({} 个类别)",
      descriptor_path.display(),
      descriptor.nc
    );

    Ok(SplitCounts {
      train: train.len(),
      val: val.len(),
    })
  }

  fn copy_split(
    &self,
    stems: &[String],
    images: &HashMap<String, PathBuf>,
    labels: &HashMap<String, PathBuf>,
    split: &str,
  ) -> Result<(), DatasetError> {
    let split_root = self.data_root.join(split);
    if split_root.exists() {
      std::fs::remove_dir_all(&split_root).map_err(io_err(&split_root))?;
    }

    for (source, kind) in [(images, "images"), (labels, "labels")] {
      let dst = split_root.join(kind);
      std::fs::create_dir_all(&dst).map_err(io_err(&dst))?;
      for stem in stems {
        let Some(src) = source.get(stem) else {
          continue;
        };
        let Some(name) = src.file_name() else {
          continue;
        };
        std::fs::copy(src, dst.join(name)).map_err(io_err(src))?;
      }
    }
    Ok(())
  }
}
