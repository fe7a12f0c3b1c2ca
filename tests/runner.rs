// 该文件是 Biaoji （标记） 项目的一部分。
// tests/runner.rs - 类别处理流程测试
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
use std::path::Path;

use biaoji::annotate::{AUTO_LABEL_REPORT, OutputLayout, STATISTICS_FILE};
use biaoji::config::PipelineConfig;
use biaoji::registry::WeightsMap;
use biaoji::runner::{Action, CategoryRunner, CategoryState, RunOptions, TrainInit};
use biaoji::station::{Layout, StationCategory};
use biaoji::weights::{WeightsSources, trained_weights_path};

use common::{FakeBackend, file_names, labeled_pairs, touch, unlabeled_images};

fn no_shuffle_config() -> PipelineConfig {
  let mut config = PipelineConfig::default();
  config.validation.split_ratio = 0.5;
  config.validation.shuffle = false;
  config
}

/// `<root>/gauge` 含 pre_images/pre_labels 与待标注的 images/
fn pre_labeled_category(root: &Path) -> std::path::PathBuf {
  let dir = root.join("gauge");
  labeled_pairs(&dir, "pre_images", "pre_labels", &["a", "b"]);
  touch(&dir.join("pre_images/c.jpg"));
  unlabeled_images(&dir.join("images"), &["u1", "u2_empty"]);
  dir
}

#[test]
fn train_and_annotate_registers_weights_and_writes_triage() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = pre_labeled_category(tmp.path());
  let registry = tmp.path().join("models/model_registry.yaml");
  let config = no_shuffle_config();
  let backend = FakeBackend::default();
  let options = RunOptions {
    registry_path: Some(registry.clone()),
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options, WeightsSources::default(), &backend);

  let outcome = runner.run_category("gauge", &dir, true).unwrap();
  assert_eq!(outcome.state, CategoryState::Annotated);
  assert_eq!(backend.train_count(), 1);

  let best = trained_weights_path(&dir.join("models"));
  assert_eq!(outcome.weights.as_deref(), Some(best.as_path()));
  assert_eq!(
    WeightsMap::load(&registry).unwrap().resolve("gauge"),
    Some(best.clone())
  );

  assert_eq!(file_names(&dir.join("category/train/images")), ["a.jpg"]);
  assert_eq!(file_names(&dir.join("category/val/images")), ["b.jpg"]);
  assert!(dir.join("dataset_config.yaml").is_file());

  assert_eq!(file_names(&dir.join("labels/labels/high_conf")), ["u1.txt"]);
  assert!(file_names(&dir.join("labels/labels/low_conf")).is_empty());
  let stats: serde_json::Value =
    serde_json::from_str(&fs::read_to_string(dir.join("labels").join(STATISTICS_FILE)).unwrap())
      .unwrap();
  assert_eq!(stats["total"], 2);
  assert_eq!(stats["high_conf"], 1);
  assert_eq!(stats["low_conf"], 1);
}

#[test]
fn existing_weights_skip_training_unless_forced() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = pre_labeled_category(tmp.path());
  touch(&trained_weights_path(&dir.join("models")));
  let config = no_shuffle_config();

  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::Train,
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options.clone(), WeightsSources::default(), &backend);
  let outcome = runner.run_category("gauge", &dir, true).unwrap();
  assert_eq!(outcome.state, CategoryState::Trained);
  assert_eq!(backend.train_count(), 0);
  assert!(!dir.join("category").exists());

  let forced = RunOptions {
    force_train: true,
    ..options
  };
  let runner = CategoryRunner::new(&config, forced, WeightsSources::default(), &backend);
  assert!(runner.process_category("gauge", &dir, true));
  assert_eq!(backend.train_count(), 1);
}

#[test]
fn registry_entry_is_reused_without_training() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = pre_labeled_category(tmp.path());
  let weights = tmp.path().join("elsewhere/gauge.pt");
  touch(&weights);
  let registry = tmp.path().join("registry.yaml");
  fs::write(&registry, "gauge: elsewhere/gauge.pt\n").unwrap();

  let config = no_shuffle_config();
  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::Train,
    registry_path: Some(registry),
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options, WeightsSources::default(), &backend);
  let outcome = runner.run_category("gauge", &dir, true).unwrap();
  assert_eq!(backend.train_count(), 0);
  assert_eq!(outcome.weights, Some(fs::canonicalize(&weights).unwrap()));
}

#[test]
fn pretrained_weights_warm_start_only_with_reuse() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = pre_labeled_category(tmp.path());
  let pretrained = tmp.path().join("base.pt");
  touch(&pretrained);
  let sources = WeightsSources::default().with_pretrained_model(&pretrained);
  let config = no_shuffle_config();

  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::Train,
    train_init: TrainInit::Reuse,
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options, sources.clone(), &backend);
  assert!(runner.process_category("gauge", &dir, true));
  assert_eq!(backend.train_calls.borrow()[0], Some(pretrained.clone()));

  let other = tmp.path().join("other");
  labeled_pairs(&other, "pre_images", "pre_labels", &["a"]);
  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::Train,
    train_init: TrainInit::Base,
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options, sources, &backend);
  assert!(runner.process_category("other", &other, true));
  assert_eq!(backend.train_calls.borrow()[0], None);
}

#[test]
fn annotate_only_without_weights_or_labels_fails_softly() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = tmp.path().join("gauge");
  unlabeled_images(&dir.join("images"), &["u1"]);
  let config = PipelineConfig::default();
  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::Annotate,
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options, WeightsSources::default(), &backend);

  assert!(!runner.process_category("gauge", &dir, true));
  assert_eq!(backend.train_count(), 0);
  assert!(!dir.join("labels").exists());
}

#[test]
fn annotate_only_trains_once_when_labels_exist() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = pre_labeled_category(tmp.path());
  let registry = tmp.path().join("registry.yaml");
  let config = no_shuffle_config();

  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::Annotate,
    registry_path: Some(registry.clone()),
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options.clone(), WeightsSources::default(), &backend);
  let outcome = runner.run_category("gauge", &dir, true).unwrap();
  assert_eq!(outcome.state, CategoryState::Annotated);
  assert_eq!(backend.train_count(), 1);
  assert!(WeightsMap::load(&registry).unwrap().get("gauge").is_some());

  let fresh = tmp.path().join("fresh");
  labeled_pairs(&fresh, "pre_images", "pre_labels", &["a"]);
  let backend = FakeBackend::default();
  let disabled = RunOptions {
    auto_train_on_missing: false,
    registry_path: None,
    ..options
  };
  let runner = CategoryRunner::new(&config, disabled, WeightsSources::default(), &backend);
  assert!(!runner.process_category("fresh", &fresh, true));
  assert_eq!(backend.train_count(), 0);
}

#[test]
fn training_without_raw_dirs_fails_only_that_category() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = tmp.path().join("gauge");
  unlabeled_images(&dir.join("images"), &["u1"]);
  let config = PipelineConfig::default();
  let backend = FakeBackend::default();
  let runner = CategoryRunner::new(&config, RunOptions::default(), WeightsSources::default(), &backend);

  assert!(!runner.process_category("gauge", &dir, true));
  assert_eq!(backend.train_count(), 0);
}

#[test]
fn trainer_errors_are_contained() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = pre_labeled_category(tmp.path());
  let config = no_shuffle_config();
  let backend = FakeBackend {
    fail_training: true,
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, RunOptions::default(), WeightsSources::default(), &backend);
  assert!(!runner.process_category("gauge", &dir, true));
  assert_eq!(backend.train_count(), 1);
}

#[test]
fn yolo_layout_skips_existing_labels() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = pre_labeled_category(tmp.path());
  fs::create_dir_all(dir.join("labels")).unwrap();
  fs::write(dir.join("labels/u1.txt"), "7 0.1 0.1 0.1 0.1\n").unwrap();
  let pretrained = tmp.path().join("base.pt");
  touch(&pretrained);

  let config = PipelineConfig::default();
  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::Annotate,
    output_layout: OutputLayout::Yolo,
    ..Default::default()
  };
  let sources = WeightsSources::default().with_pretrained_model(&pretrained);
  let runner = CategoryRunner::new(&config, options, sources, &backend);
  assert!(runner.process_category("gauge", &dir, true));

  assert_eq!(
    fs::read_to_string(dir.join("labels/u1.txt")).unwrap(),
    "7 0.1 0.1 0.1 0.1\n"
  );
  assert_eq!(fs::read_to_string(dir.join("labels/u2_empty.txt")).unwrap(), "");
  let report: serde_json::Value =
    serde_json::from_str(&fs::read_to_string(dir.join("labels").join(AUTO_LABEL_REPORT)).unwrap())
      .unwrap();
  assert_eq!(report["total"], 2);
  assert_eq!(report["skipped_existing"], 1);
  assert_eq!(report["empty"], 1);
  assert_eq!(report["annotated"], 0);
}

#[test]
fn flat_station_entry_is_annotated_in_place() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = tmp.path().join("s1/valve");
  unlabeled_images(&dir, &["p1", "p2"]);
  let shared = tmp.path().join("shared");
  touch(&trained_weights_path(&shared.join("valve")));

  let config = PipelineConfig::default();
  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::TrainAndAnnotate,
    shared_model_root: Some(shared.clone()),
    output_layout: OutputLayout::Triage,
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options, WeightsSources::default(), &backend);
  let entry = StationCategory {
    station_name: "s1".to_string(),
    category_name: "valve".to_string(),
    category_dir: dir.clone(),
    layout: Layout::FlatImages,
  };
  assert!(runner.process_station_entry(&entry));
  assert_eq!(backend.train_count(), 0);
  assert_eq!(
    file_names(&dir.join("labels")),
    [AUTO_LABEL_REPORT, "p1.txt", "p2.txt"]
  );
  assert_eq!(
    backend.loaded.borrow().as_slice(),
    [trained_weights_path(&shared.join("valve"))]
  );
}

#[test]
fn flat_station_entry_without_weights_fails() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = tmp.path().join("s1/valve");
  unlabeled_images(&dir, &["p1"]);
  let config = PipelineConfig::default();
  let backend = FakeBackend::default();
  let options = RunOptions {
    shared_model_root: Some(tmp.path().join("shared")),
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options, WeightsSources::default(), &backend);
  let entry = StationCategory {
    station_name: "s1".to_string(),
    category_name: "valve".to_string(),
    category_dir: dir.clone(),
    layout: Layout::FlatImages,
  };
  assert!(!runner.process_station_entry(&entry));
  assert!(!dir.join("labels").exists());
}

#[test]
fn station_entry_without_pre_labels_is_downgraded_to_annotate() {
  let tmp = tempfile::tempdir().unwrap();
  let dir = tmp.path().join("s1/det/gauge");
  unlabeled_images(&dir.join("images"), &["u1"]);
  let shared = tmp.path().join("shared");
  touch(&trained_weights_path(&shared.join("gauge")));

  let config = PipelineConfig::default();
  let backend = FakeBackend::default();
  let options = RunOptions {
    action: Action::Train,
    shared_model_root: Some(shared),
    output_layout: OutputLayout::Yolo,
    ..Default::default()
  };
  let runner = CategoryRunner::new(&config, options, WeightsSources::default(), &backend);
  let entry = StationCategory {
    station_name: "s1".to_string(),
    category_name: "gauge".to_string(),
    category_dir: dir.clone(),
    layout: Layout::DirImages,
  };
  assert!(runner.process_station_entry(&entry));
  assert_eq!(backend.train_count(), 0);
  assert!(dir.join("labels/u1.txt").is_file());
}
