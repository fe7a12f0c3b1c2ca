// 该文件是 Biaoji （标记） 项目的一部分。
// src/station.rs - 站点目录扫描
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

//! # 站点目录扫描
//!
//! 站点数据的常见组织方式：
//!
//! ```text
//! stations_root/
//!   <station>/
//!     det/                       （可选）
//!       <category>/
//!         pre_images/ pre_labels/  已标注数据
//!         images/                  待标注图片
//!     <category>/                （有的站点只有散放的图片）
//!       *.jpg
//! ```
//!
//! 每个类别目录归入三种布局之一，见 [`Layout`]。扫描只读、结果按名称排序，
//! 已识别的类别目录不会再向内递归。

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::dataset::has_image_files;

/// 站点根目录下不会被识别为类别的保留目录名
pub const DEFAULT_IGNORE_DIRS: [&str; 13] = [
  "cls",
  "det",
  "models",
  "dataset",
  "config",
  "category",
  "output",
  "logs",
  "images",
  "labels",
  "pre_images",
  "pre_labels",
  "__pycache__",
];

pub const DET_DIR: &str = "det";

#[derive(Error, Debug)]
pub enum StationError {
  #[error("站点根目录不存在: {0}")]
  RootNotFound(PathBuf),
  #[error("读取目录 {0} 失败: {1}")]
  Io(PathBuf, std::io::Error),
  #[error("未知的目录布局: {0}")]
  UnknownLayout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
  /// 含 `images/`，待标注
  DirImages,
  /// 含 `pre_images/` 与 `pre_labels/`，可训练
  PreLabeled,
  /// 目录内直接散放图片，没有划分结构
  FlatImages,
}

impl Layout {
  pub fn as_str(&self) -> &'static str {
    match self {
      Layout::DirImages => "dir_images",
      Layout::PreLabeled => "pre_labeled",
      Layout::FlatImages => "flat_images",
    }
  }
}

impl fmt::Display for Layout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Layout {
  type Err = StationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "dir_images" => Ok(Layout::DirImages),
      "pre_labeled" => Ok(Layout::PreLabeled),
      "flat_images" => Ok(Layout::FlatImages),
      other => Err(StationError::UnknownLayout(other.to_string())),
    }
  }
}

/// 判断目录的布局，不是类别目录时返回 `None`
pub fn classify_dir(dir: &Path) -> Option<Layout> {
  if dir.join("images").is_dir() {
    Some(Layout::DirImages)
  } else if has_pre_labeled(dir) {
    Some(Layout::PreLabeled)
  } else if has_image_files(dir) {
    Some(Layout::FlatImages)
  } else {
    None
  }
}

pub fn has_pre_labeled(dir: &Path) -> bool {
  dir.join("pre_images").is_dir() && dir.join("pre_labels").is_dir()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationCategory {
  pub station_name: String,
  pub category_name: String,
  pub category_dir: PathBuf,
  pub layout: Layout,
}

fn dir_name(path: &Path) -> String {
  path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn is_hidden(path: &Path) -> bool {
  path
    .file_name()
    .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// 目录下的非隐藏子目录，按路径排序
fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>, StationError> {
  let entries = std::fs::read_dir(dir).map_err(|e| StationError::Io(dir.to_path_buf(), e))?;
  let mut dirs = Vec::new();
  for entry in entries {
    let path = entry
      .map_err(|e| StationError::Io(dir.to_path_buf(), e))?
      .path();
    if path.is_dir() && !is_hidden(&path) {
      dirs.push(path);
    }
  }
  dirs.sort();
  Ok(dirs)
}

fn canonical(path: &Path) -> Result<PathBuf, StationError> {
  std::fs::canonicalize(path).map_err(|e| StationError::Io(path.to_path_buf(), e))
}

/// 站点根目录下的全部站点目录
pub fn iter_station_dirs(stations_root: &Path) -> Result<Vec<PathBuf>, StationError> {
  if !stations_root.is_dir() {
    return Err(StationError::RootNotFound(stations_root.to_path_buf()));
  }
  sorted_subdirs(&canonical(stations_root)?)
}

/// 扫描站点下的类别
///
/// 先扫描 `det/`，再扫描站点目录本身（跳过保留目录名）。
/// 当站点目录本身就像一个类别且没有任何嵌套类别时，站点即类别。
pub fn scan_station_categories(
  station_dir: &Path,
  ignore_dirs: Option<&[&str]>,
) -> Result<Vec<StationCategory>, StationError> {
  let station_dir = canonical(station_dir)?;
  let ignore: HashSet<&str> = ignore_dirs
    .unwrap_or(&DEFAULT_IGNORE_DIRS)
    .iter()
    .copied()
    .collect();
  let station_name = dir_name(&station_dir);

  let det_root = station_dir.join(DET_DIR);
  let det_dirs = if det_root.is_dir() {
    sorted_subdirs(&det_root)?
  } else {
    Vec::new()
  };
  let station_dirs: Vec<PathBuf> = sorted_subdirs(&station_dir)?
    .into_iter()
    .filter(|dir| {
      let name = dir_name(dir);
      !ignore.contains(name.as_str())
    })
    .collect();

  let mut found = Vec::new();

  let has_nested = !det_dirs.is_empty()
    || station_dirs
      .iter()
      .any(|dir| dir_name(dir) != DET_DIR);
  if !has_nested && let Some(layout) = classify_dir(&station_dir) {
    debug!("[{}] 站点目录本身即为类别 ({})", station_name, layout);
    found.push(StationCategory {
      station_name: station_name.clone(),
      category_name: station_name.clone(),
      category_dir: station_dir.clone(),
      layout,
    });
  }

  let mut seen: BTreeSet<(String, PathBuf)> = BTreeSet::new();
  for dir in det_dirs.into_iter().chain(station_dirs) {
    let name = dir_name(&dir);
    let key = (name.clone(), canonical(&dir)?);
    if !seen.insert(key) {
      continue;
    }

    let Some(layout) = classify_dir(&dir) else {
      debug!("[{}] 跳过非类别目录: {}", station_name, dir.display());
      continue;
    };
    found.push(StationCategory {
      station_name: station_name.clone(),
      category_name: name,
      category_dir: dir,
      layout,
    });
  }

  Ok(found)
}

/// 自定义数据根目录：含 `pre_images/` 与 `pre_labels/` 的子目录
pub fn scan_pre_labeled_root(root: &Path) -> Result<Vec<(String, PathBuf)>, StationError> {
  if !root.is_dir() {
    return Err(StationError::RootNotFound(root.to_path_buf()));
  }
  Ok(
    sorted_subdirs(root)?
      .into_iter()
      .filter(|dir| has_pre_labeled(dir))
      .map(|dir| (dir_name(&dir), dir))
      .collect(),
  )
}

/// 默认原始数据目录：含 `images/` 与 `labels/` 且不以 `_unlabeled` 结尾的子目录
pub fn scan_raw_root(root: &Path) -> Result<Vec<(String, PathBuf)>, StationError> {
  if !root.is_dir() {
    return Err(StationError::RootNotFound(root.to_path_buf()));
  }
  Ok(
    sorted_subdirs(root)?
      .into_iter()
      .filter(|dir| !dir_name(dir).ends_with("_unlabeled"))
      .filter(|dir| dir.join("images").is_dir() && dir.join("labels").is_dir())
      .map(|dir| (dir_name(&dir), dir))
      .collect(),
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mkdir(path: &Path) {
    std::fs::create_dir_all(path).unwrap();
  }

  fn touch(path: &Path) {
    mkdir(path.parent().unwrap());
    std::fs::write(path, b"x").unwrap();
  }

  #[test]
  fn layout_round_trips_through_text() {
    for layout in [Layout::DirImages, Layout::PreLabeled, Layout::FlatImages] {
      assert_eq!(layout.as_str().parse::<Layout>().unwrap(), layout);
    }
    assert!("nested".parse::<Layout>().is_err());
  }

  #[test]
  fn classify_prefers_images_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("c");
    mkdir(&dir.join("pre_images"));
    mkdir(&dir.join("pre_labels"));
    assert_eq!(classify_dir(&dir), Some(Layout::PreLabeled));
    mkdir(&dir.join("images"));
    assert_eq!(classify_dir(&dir), Some(Layout::DirImages));
  }

  #[test]
  fn pre_images_alone_is_not_a_category() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("c");
    mkdir(&dir.join("pre_images"));
    assert_eq!(classify_dir(&dir), None);
    touch(&dir.join("loose.jpg"));
    assert_eq!(classify_dir(&dir), Some(Layout::FlatImages));
  }

  #[test]
  fn hidden_and_ignored_dirs_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let station = tmp.path().join("s1");
    touch(&station.join(".cache/a.jpg"));
    touch(&station.join("models/a.jpg"));
    touch(&station.join("output/a.jpg"));
    touch(&station.join("gauge/a.jpg"));

    let found = scan_station_categories(&station, None).unwrap();
    let names: Vec<_> = found.iter().map(|c| c.category_name.as_str()).collect();
    assert_eq!(names, ["gauge"]);
  }

  #[test]
  fn raw_root_skips_unlabeled_siblings() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["b", "a", "a_unlabeled"] {
      mkdir(&tmp.path().join(name).join("images"));
      mkdir(&tmp.path().join(name).join("labels"));
    }
    mkdir(&tmp.path().join("c/images"));
    let found = scan_raw_root(tmp.path()).unwrap();
    let names: Vec<_> = found.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["a", "b"]);
  }

  #[test]
  fn missing_root_is_an_error() {
    assert!(matches!(
      iter_station_dirs(Path::new("/no/such/stations/root")),
      Err(StationError::RootNotFound(_))
    ));
  }
}
