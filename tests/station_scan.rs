// 该文件是 Biaoji （标记） 项目的一部分。
// tests/station_scan.rs - 站点目录扫描测试
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

mod common;

use std::fs;

use biaoji::station::{
  Layout, iter_station_dirs, scan_pre_labeled_root, scan_station_categories,
};

use common::{labeled_pairs, touch, unlabeled_images};

fn summary(entries: &[biaoji::station::StationCategory]) -> Vec<(String, Layout)> {
  entries
    .iter()
    .map(|e| (e.category_name.clone(), e.layout))
    .collect()
}

#[test]
fn det_and_station_level_categories_are_both_found() {
  let tmp = tempfile::tempdir().unwrap();
  let station = tmp.path().join("s1");
  unlabeled_images(&station.join("det/gauge/images"), &["a"]);
  labeled_pairs(&station.join("det/oil"), "pre_images", "pre_labels", &["a"]);
  unlabeled_images(&station.join("valve"), &["p1"]);
  fs::create_dir_all(station.join("notes")).unwrap();

  let found = scan_station_categories(&station, None).unwrap();
  assert_eq!(
    summary(&found),
    [
      ("gauge".to_string(), Layout::DirImages),
      ("oil".to_string(), Layout::PreLabeled),
      ("valve".to_string(), Layout::FlatImages),
    ]
  );
  let station = fs::canonicalize(&station).unwrap();
  assert!(found.iter().all(|e| e.station_name == "s1"));
  assert_eq!(found[0].category_dir, station.join("det/gauge"));
  assert_eq!(found[2].category_dir, station.join("valve"));
}

#[test]
fn scanning_is_read_only_and_repeatable() {
  let tmp = tempfile::tempdir().unwrap();
  let station = tmp.path().join("s1");
  unlabeled_images(&station.join("det/gauge/images"), &["a"]);
  unlabeled_images(&station.join("valve"), &["p1"]);

  let first = scan_station_categories(&station, None).unwrap();
  let second = scan_station_categories(&station, None).unwrap();
  assert_eq!(first, second);
  assert!(!station.join("det/gauge/labels").exists());
}

#[test]
fn station_dir_itself_can_be_the_category() {
  let tmp = tempfile::tempdir().unwrap();
  let station = tmp.path().join("pump_room");
  unlabeled_images(&station.join("images"), &["a", "b"]);

  let found = scan_station_categories(&station, None).unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].category_name, "pump_room");
  assert_eq!(found[0].layout, Layout::DirImages);
  assert_eq!(found[0].category_dir, fs::canonicalize(&station).unwrap());
}

#[test]
fn categories_are_not_recursed_into() {
  let tmp = tempfile::tempdir().unwrap();
  let station = tmp.path().join("s1");
  unlabeled_images(&station.join("gauge/images"), &["a"]);
  unlabeled_images(&station.join("gauge/inner"), &["b"]);

  let found = scan_station_categories(&station, None).unwrap();
  assert_eq!(summary(&found), [("gauge".to_string(), Layout::DirImages)]);
}

#[test]
fn custom_ignore_list_replaces_the_default() {
  let tmp = tempfile::tempdir().unwrap();
  let station = tmp.path().join("s1");
  unlabeled_images(&station.join("models"), &["a"]);
  unlabeled_images(&station.join("gauge"), &["a"]);

  let found = scan_station_categories(&station, Some(&["det", "gauge"][..])).unwrap();
  assert_eq!(summary(&found), [("models".to_string(), Layout::FlatImages)]);
}

#[test]
fn station_dirs_are_sorted_and_hidden_ones_skipped() {
  let tmp = tempfile::tempdir().unwrap();
  for name in ["s2", "s1", ".trash"] {
    fs::create_dir_all(tmp.path().join(name)).unwrap();
  }
  touch(&tmp.path().join("readme.txt"));

  let dirs = iter_station_dirs(tmp.path()).unwrap();
  let names: Vec<_> = dirs
    .iter()
    .map(|d| d.file_name().unwrap().to_string_lossy().into_owned())
    .collect();
  assert_eq!(names, ["s1", "s2"]);
}

#[test]
fn pre_labeled_root_requires_both_dirs() {
  let tmp = tempfile::tempdir().unwrap();
  labeled_pairs(&tmp.path().join("oil"), "pre_images", "pre_labels", &["a"]);
  unlabeled_images(&tmp.path().join("gauge/pre_images"), &["a"]);

  let found = scan_pre_labeled_root(tmp.path()).unwrap();
  let names: Vec<_> = found.iter().map(|(n, _)| n.as_str()).collect();
  assert_eq!(names, ["oil"]);
}
