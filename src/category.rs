// 该文件是 Biaoji （标记） 项目的一部分。
// src/category.rs - 类别输入输出目录
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

/// 一个类别的全部输入输出位置，只做路径计算，不访问磁盘
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryIo {
  pub category_name: String,
  pub raw_images_dir: PathBuf,
  pub raw_labels_dir: PathBuf,
  pub unlabeled_images_dir: PathBuf,
  /// 训练集/验证集划分输出
  pub data_root: PathBuf,
  pub model_root: PathBuf,
  pub output_root: PathBuf,
  pub dataset_config_path: PathBuf,
}

impl CategoryIo {
  pub fn has_labeled_data(&self) -> bool {
    self.raw_images_dir.is_dir() && self.raw_labels_dir.is_dir()
  }

  pub fn unlabeled_dir_if_exists(&self) -> Option<&Path> {
    let dir = self.unlabeled_images_dir.as_path();
    dir.is_dir().then_some(dir)
  }
}

/// 展开开头的 `~`
pub fn expand_home(path: &Path) -> PathBuf {
  let Ok(rest) = path.strip_prefix("~") else {
    return path.to_path_buf();
  };
  match std::env::var_os("HOME") {
    Some(home) => PathBuf::from(home).join(rest),
    None => path.to_path_buf(),
  }
}

/// 展开 `~` 并转换为绝对路径（相对于当前工作目录），不要求路径存在
pub fn absolute_path(path: &Path) -> PathBuf {
  let expanded = expand_home(path);
  std::path::absolute(&expanded).unwrap_or(expanded)
}

/// 计算类别的目录布局
///
/// `use_pre_prefix` 时已标注数据位于 `pre_images/` 与 `pre_labels/`，待标注图片位于 `images/`；
/// 否则已标注数据位于 `images/` 与 `labels/`，待标注图片位于同级的 `<name>_unlabeled/images`。
/// 指定共享模型目录时模型放在 `<shared>/<name>`，以便跨站点复用。
/// 模型目录总是绝对路径，训练得到的权重路径写入登记表后与工作目录无关。
pub fn build_category_io(
  name: &str,
  root: &Path,
  use_pre_prefix: bool,
  shared_model_root: Option<&Path>,
) -> CategoryIo {
  let (raw_images_dir, raw_labels_dir, unlabeled_images_dir) = if use_pre_prefix {
    (
      root.join("pre_images"),
      root.join("pre_labels"),
      root.join("images"),
    )
  } else {
    let parent = root.parent().unwrap_or(root);
    (
      root.join("images"),
      root.join("labels"),
      parent.join(format!("{}_unlabeled", name)).join("images"),
    )
  };

  let model_root = match shared_model_root {
    Some(shared) => absolute_path(shared).join(name),
    None => absolute_path(&root.join("models")),
  };

  CategoryIo {
    category_name: name.to_string(),
    raw_images_dir,
    raw_labels_dir,
    unlabeled_images_dir,
    data_root: root.join("category"),
    model_root,
    output_root: root.join("labels"),
    dataset_config_path: root.join("dataset_config.yaml"),
  }
}
